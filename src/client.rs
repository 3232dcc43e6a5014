use std::{io::Read, time::Duration};

use anyhow::Error;
use serde::{Deserialize, Serialize};

use crate::{error::MirrorError, FetchResult};

/// Cydia's APT transport user agent.
pub const DEFAULT_USER_AGENT: &str = "Telesphoreo APT-HTTP/1.0.592";
pub const DEFAULT_DEVICE_MODEL: &str = "iPhone10,3";
pub const DEFAULT_DEVICE_ID: &str = "8843d7f92416211de9ebb963ff4ce28125932878";
pub const DEFAULT_FIRMWARE: &str = "14.4";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a single response body.
pub const MAX_BODY_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Device identity sent with every request.
///
/// Some repositories only serve their content (or serve different content) to clients that
/// look like a package manager running on a device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientIdentity {
    pub user_agent: String,
    pub device_model: String,
    pub device_id: String,
    pub firmware: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            device_model: DEFAULT_DEVICE_MODEL.to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            firmware: DEFAULT_FIRMWARE.to_string(),
        }
    }
}

impl ClientIdentity {
    /// Headers other than `User-Agent`, in the order they are sent.
    pub fn headers(&self) -> [(&'static str, &str); 3] {
        [
            ("X-Machine", self.device_model.as_str()),
            ("X-Unique-ID", self.device_id.as_str()),
            ("X-Firmware", self.firmware.as_str()),
        ]
    }
}

/// Source of remote files.
///
/// Implementations return the complete body of a 2xx response, anything else (transport
/// errors, non-2xx status) is a [MirrorError::Transport].
pub trait FetchClient {
    fn fetch(&self, url: &str) -> Result<FetchResult, Error>;
}

/// Blocking HTTP client sending the configured [ClientIdentity].
pub struct HttpClient {
    agent: ureq::Agent,
    identity: ClientIdentity,
    max_size: u64,
}

impl HttpClient {
    pub fn new(identity: ClientIdentity) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .user_agent(&identity.user_agent)
            .build();

        Self {
            agent,
            identity,
            max_size: MAX_BODY_SIZE,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}

fn transport_error(url: &str, reason: impl ToString) -> Error {
    MirrorError::Transport {
        url: url.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

impl FetchClient for HttpClient {
    fn fetch(&self, url: &str) -> Result<FetchResult, Error> {
        tracing::debug!("-> GET '{url}'..");

        let mut request = self.agent.get(url);
        for (name, value) in self.identity.headers() {
            request = request.set(name, value);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                return Err(transport_error(
                    url,
                    format!("HTTP {code} {}", response.status_text()),
                ));
            }
            Err(err) => return Err(transport_error(url, err)),
        };

        // one extra byte to tell a body of exactly max_size from an oversized one
        let mut reader = response.into_reader().take(self.max_size + 1);
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|err| transport_error(url, err))?;

        if data.len() as u64 > self.max_size {
            return Err(transport_error(
                url,
                format!("response exceeds {} bytes", self.max_size),
            ));
        }

        Ok(FetchResult {
            fetched: data.len(),
            data,
        })
    }
}
