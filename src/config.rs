use anyhow::{format_err, Error};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use proxmox_schema::{api, ApiType, Schema};
use proxmox_section_config::{SectionConfig, SectionConfigData, SectionConfigPlugin};

use crate::{
    client::ClientIdentity,
    crawl::DEFAULT_MAX_DEPTH,
    index::{default_overrides, RootOverride},
    mirror::MirrorOptions,
    types::{
        ARCHITECTURE_SCHEMA, CLIENT_ID_SCHEMA, DEFAULT_ARCHITECTURE, MIRROR_ID_SCHEMA,
        REPOSITORY_URL_SCHEMA,
    },
};

#[api(
    properties: {
        id: {
            schema: MIRROR_ID_SCHEMA,
        },
        url: {
            schema: REPOSITORY_URL_SCHEMA,
        },
        destination: {
            type: String,
        },
        architecture: {
            schema: ARCHITECTURE_SCHEMA,
            optional: true,
        },
        client: {
            schema: CLIENT_ID_SCHEMA,
            optional: true,
        },
        crawl: {
            type: bool,
            optional: true,
            default: true,
        },
        "crawl-without-metadata": {
            type: bool,
            optional: true,
            default: false,
        },
    }
)]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Configuration entry for a mirrored repository.
pub struct MirrorConfig {
    /// Identifier for this entry.
    pub id: String,
    /// Repository root URL.
    pub url: String,
    /// Existing directory the mirror is created in, as `<destination>/<host>/`.
    pub destination: String,
    /// Architecture for `binary-<arch>` index lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Client identity used for requests, built-in default if not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    /// Whether to crawl directory listings for files not referenced by the package index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl: Option<bool>,
    /// Whether to crawl the repository if no metadata can be found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_without_metadata: Option<bool>,
}

#[api(
    properties: {
        id: {
            schema: CLIENT_ID_SCHEMA,
        },
        "user-agent": {
            type: String,
        },
        "device-model": {
            type: String,
        },
        "device-id": {
            type: String,
        },
        firmware: {
            type: String,
        },
    }
)]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Device identity presented to repositories.
pub struct ClientConfig {
    /// Identifier for this entry.
    pub id: String,
    /// User-Agent header.
    pub user_agent: String,
    /// Device model, sent as X-Machine.
    pub device_model: String,
    /// Stable device identifier, sent as X-Unique-ID.
    pub device_id: String,
    /// Firmware version, sent as X-Firmware.
    pub firmware: String,
}

impl From<ClientConfig> for ClientIdentity {
    fn from(config: ClientConfig) -> Self {
        ClientIdentity {
            user_agent: config.user_agent,
            device_model: config.device_model,
            device_id: config.device_id,
            firmware: config.firmware,
        }
    }
}

#[api(
    properties: {
        id: {
            schema: MIRROR_ID_SCHEMA,
        },
        prefix: {
            type: String,
        },
        "root-path": {
            type: String,
        },
    }
)]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Rule resolving package file names with a given prefix against a fixed root path.
pub struct RootOverrideConfig {
    /// Identifier for this entry.
    pub id: String,
    /// File name prefix the rule applies to.
    pub prefix: String,
    /// Path below the repository host the file names are relative to.
    pub root_path: String,
}

impl From<RootOverrideConfig> for RootOverride {
    fn from(config: RootOverrideConfig) -> Self {
        RootOverride {
            prefix: config.prefix,
            root_path: config.root_path,
        }
    }
}

lazy_static! {
    static ref CONFIG: SectionConfig = init();
}

fn plugin(type_name: &str, schema: &'static Schema) -> SectionConfigPlugin {
    let obj_schema = match schema {
        Schema::Object(obj_schema) => obj_schema,
        _ => unreachable!(),
    };
    SectionConfigPlugin::new(type_name.to_string(), Some(String::from("id")), obj_schema)
}

fn init() -> SectionConfig {
    let mut config = SectionConfig::new(&MIRROR_ID_SCHEMA);

    config.register_plugin(plugin("mirror", &MirrorConfig::API_SCHEMA));
    config.register_plugin(plugin("client", &ClientConfig::API_SCHEMA));
    config.register_plugin(plugin("root-override", &RootOverrideConfig::API_SCHEMA));

    config
}

/// Parse config file contents. `path` is only used for error messages.
pub fn parse_config(path: &str, content: &str) -> Result<SectionConfigData, Error> {
    CONFIG.parse(path, content)
}

/// Read config, a missing file is an empty config.
pub fn config(path: &str) -> Result<SectionConfigData, Error> {
    let content =
        proxmox_sys::fs::file_read_optional_string(path)?.unwrap_or_else(|| "".to_string());

    parse_config(path, &content)
}

/// Look up a client identity, the built-in one if `id` is `None`.
pub fn client_identity(data: &SectionConfigData, id: Option<&str>) -> Result<ClientIdentity, Error> {
    match id {
        None => Ok(ClientIdentity::default()),
        Some(id) => {
            let client: ClientConfig = data
                .lookup("client", id)
                .map_err(|err| format_err!("unknown client '{id}' - {err}"))?;
            Ok(client.into())
        }
    }
}

/// Built-in root overrides followed by the configured ones.
pub fn root_overrides(data: &SectionConfigData) -> Result<Vec<RootOverride>, Error> {
    let configured: Vec<RootOverrideConfig> = data.convert_to_typed_array("root-override")?;

    let mut overrides = default_overrides();
    overrides.extend(configured.into_iter().map(RootOverride::from));
    Ok(overrides)
}

/// Run options and client identity of a configured mirror.
pub fn mirror_options(
    data: &SectionConfigData,
    mirror: &MirrorConfig,
) -> Result<(MirrorOptions, ClientIdentity), Error> {
    let options = MirrorOptions {
        architecture: mirror
            .architecture
            .clone()
            .unwrap_or_else(|| DEFAULT_ARCHITECTURE.to_string()),
        overrides: root_overrides(data)?,
        crawl: mirror.crawl.unwrap_or(true),
        crawl_without_metadata: mirror.crawl_without_metadata.unwrap_or(false),
        max_depth: DEFAULT_MAX_DEPTH,
    };
    let identity = client_identity(data, mirror.client.as_deref())?;

    Ok((options, identity))
}
