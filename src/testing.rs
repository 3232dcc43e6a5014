//! In-memory repository for tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::Error;

use crate::{
    client::FetchClient, error::MirrorError, handle::CancellationToken, FetchResult,
};

/// Serves a fixed set of URLs, answers everything else with a 404 and records every request.
#[derive(Default)]
pub struct FakeRepository {
    files: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
    cancel_after: Option<(String, usize, CancellationToken)>,
    served: AtomicUsize,
}

impl FakeRepository {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_file(mut self, url: &str, data: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), data);
        self
    }

    /// Cancel `token` once `count` successful requests for URLs ending in `suffix` were served.
    pub fn cancel_after(mut self, suffix: &str, count: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((suffix.to_string(), count, token));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested(&self, url: &str) -> usize {
        self.requests().iter().filter(|u| *u == url).count()
    }
}

impl FetchClient for FakeRepository {
    fn fetch(&self, url: &str) -> Result<FetchResult, Error> {
        self.requests.lock().unwrap().push(url.to_string());

        let data = match self.files.get(url) {
            Some(data) => data.clone(),
            None => {
                return Err(MirrorError::Transport {
                    url: url.to_string(),
                    reason: "HTTP 404 Not Found".to_string(),
                }
                .into())
            }
        };

        if let Some((suffix, count, token)) = &self.cancel_after {
            if url.ends_with(suffix.as_str()) {
                let served = self.served.fetch_add(1, Ordering::SeqCst) + 1;
                if served >= *count {
                    token.cancel();
                }
            }
        }

        Ok(FetchResult {
            fetched: data.len(),
            data,
        })
    }
}

/// Minimal autoindex-style listing linking to `entries`.
pub fn listing(entries: &[&str]) -> Vec<u8> {
    let mut html = String::from(
        "<html><head><title>Index</title></head><body>\n<a href=\"../\">Parent Directory</a>\n",
    );
    for entry in entries {
        html.push_str(&format!("<a href=\"{entry}\">{entry}</a>\n"));
    }
    html.push_str("</body></html>\n");
    html.into_bytes()
}
