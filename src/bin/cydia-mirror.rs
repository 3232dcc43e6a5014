use anyhow::{bail, Error};
use serde_json::Value;
use url::Url;

use proxmox_router::cli::{
    default_table_format_options, format_and_print_result_full, get_output_format,
    run_cli_command, CliCommand, CliCommandMap, CliEnvironment, ColumnConfig, OUTPUT_FORMAT,
};
use proxmox_schema::{api, ApiType, ArraySchema, ReturnType};
use tracing_subscriber::EnvFilter;

use cydia_mirror::{
    client::HttpClient,
    config::{client_identity, mirror_options, root_overrides, MirrorConfig},
    handle::MirrorHandle,
    index::build_index,
    locate::{LocateOutcome, Locator},
    mirror::{probe_root, read_package_index, validate_url, MirrorOptions},
    package::{package_records, PackageRecord},
    types::{
        ARCHITECTURE_SCHEMA, CLIENT_ID_SCHEMA, DEFAULT_ARCHITECTURE, MIRROR_ID_SCHEMA,
        REPOSITORY_URL_SCHEMA,
    },
};

mod cydia_mirror_cmds;
use cydia_mirror_cmds::*;

pub const LIST_PACKAGES_RETURN_TYPE: ReturnType = ReturnType {
    optional: false,
    schema: &ArraySchema::new("Returns the list of packages.", &PackageRecord::API_SCHEMA).schema(),
};

#[api(
    input: {
        properties: {
            url: {
                schema: REPOSITORY_URL_SCHEMA,
            },
            destination: {
                type: String,
                description: "Existing directory the mirror is created in.",
            },
            architecture: {
                schema: ARCHITECTURE_SCHEMA,
                optional: true,
            },
            client: {
                schema: CLIENT_ID_SCHEMA,
                optional: true,
            },
            config: {
                type: String,
                optional: true,
                description: "Path to mirroring config file.",
            },
            "full-log": {
                type: bool,
                optional: true,
                default: false,
                description: "Print every log line while running instead of a summary.",
            },
            "no-crawl": {
                type: bool,
                optional: true,
                default: false,
                description: "Only download files referenced by the package index.",
            },
            "output-format": {
                schema: OUTPUT_FORMAT,
                optional: true,
            },
        }
    },
 )]
/// Mirror a repository into a local directory
#[allow(clippy::too_many_arguments)]
async fn mirror(
    url: String,
    destination: String,
    architecture: Option<String>,
    client: Option<String>,
    config: Option<String>,
    full_log: bool,
    no_crawl: bool,
    param: Value,
) -> Result<(), Error> {
    let config = config.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = cydia_mirror::config::config(&config)?;

    let options = MirrorOptions {
        architecture: architecture.unwrap_or_else(|| DEFAULT_ARCHITECTURE.to_string()),
        overrides: root_overrides(&config)?,
        crawl: !no_crawl,
        ..Default::default()
    };
    let identity = client_identity(&config, client.as_deref())?;

    run_mirror(
        url,
        expand_destination(&destination),
        options,
        identity,
        full_log,
        get_output_format(&param),
    )
    .await
}

#[api(
    input: {
        properties: {
            id: {
                schema: MIRROR_ID_SCHEMA,
            },
            config: {
                type: String,
                optional: true,
                description: "Path to mirroring config file.",
            },
            "full-log": {
                type: bool,
                optional: true,
                default: false,
                description: "Print every log line while running instead of a summary.",
            },
            "output-format": {
                schema: OUTPUT_FORMAT,
                optional: true,
            },
        }
    },
 )]
/// Mirror a configured repository
async fn run(id: String, config: Option<String>, full_log: bool, param: Value) -> Result<(), Error> {
    let config = config.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = cydia_mirror::config::config(&config)?;

    let mirror: MirrorConfig = config.lookup("mirror", &id)?;
    let (options, identity) = mirror_options(&config, &mirror)?;

    run_mirror(
        mirror.url,
        expand_destination(&mirror.destination),
        options,
        identity,
        full_log,
        get_output_format(&param),
    )
    .await
}

#[api(
    input: {
        properties: {
            url: {
                schema: REPOSITORY_URL_SCHEMA,
            },
            architecture: {
                schema: ARCHITECTURE_SCHEMA,
                optional: true,
            },
            client: {
                schema: CLIENT_ID_SCHEMA,
                optional: true,
            },
            config: {
                type: String,
                optional: true,
                description: "Path to mirroring config file.",
            },
            "output-format": {
                schema: OUTPUT_FORMAT,
                optional: true,
            },
        }
    },
 )]
/// Locate repository metadata and list the packages it references without downloading them
async fn locate(
    url: String,
    architecture: Option<String>,
    client: Option<String>,
    config: Option<String>,
    param: Value,
) -> Result<(), Error> {
    let config = config.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = cydia_mirror::config::config(&config)?;

    let root: Url = validate_url(&url)?;
    let probe_root = probe_root(&url, &root);
    let output_format = get_output_format(&param);
    let architecture = architecture.unwrap_or_else(|| DEFAULT_ARCHITECTURE.to_string());
    let overrides = root_overrides(&config)?;
    let identity = client_identity(&config, client.as_deref())?;

    tokio::task::spawn_blocking(move || -> Result<(), Error> {
        let client = HttpClient::new(identity);
        let handle = MirrorHandle::new();

        match Locator::new(&client, &handle, &architecture).locate(&probe_root) {
            LocateOutcome::Packages { packages, release } => {
                if let Some(release) = release {
                    eprintln!("Release: {}", release.url);
                }
                eprintln!("{}: {}", packages.kind, packages.url);

                let stanzas = read_package_index(&packages)?;
                let artifacts = build_index(&stanzas, &root, &overrides);
                let records = package_records(&stanzas);

                let options = default_table_format_options()
                    .column(ColumnConfig::new("package"))
                    .column(ColumnConfig::new("version"))
                    .column(ColumnConfig::new("architecture"))
                    .column(ColumnConfig::new("filename"));
                format_and_print_result_full(
                    &mut serde_json::json!(records),
                    &LIST_PACKAGES_RETURN_TYPE,
                    &output_format,
                    &options,
                );

                eprintln!(
                    "{} entries, {} packages, referencing {} files",
                    stanzas.len(),
                    records.len(),
                    artifacts.len()
                );
                Ok(())
            }
            LocateOutcome::ReleaseOnly(release) => {
                println!("Release: {}", release.url);
                println!("No package index found, a mirror run would crawl the repository.");
                Ok(())
            }
            LocateOutcome::NotFound | LocateOutcome::Cancelled => {
                bail!("no Release or Packages file found below '{root}'")
            }
        }
    })
    .await?
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CYDIA_MIRROR_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    let rpcenv = CliEnvironment::new();

    let cmd_def = CliCommandMap::new()
        .insert(
            "mirror",
            CliCommand::new(&API_METHOD_MIRROR).arg_param(&["url", "destination"]),
        )
        .insert(
            "locate",
            CliCommand::new(&API_METHOD_LOCATE).arg_param(&["url"]),
        )
        .insert("run", CliCommand::new(&API_METHOD_RUN).arg_param(&["id"]))
        .insert("config", config_commands());

    run_cli_command(
        cmd_def,
        rpcenv,
        Some(|future| proxmox_async::runtime::main(future)),
    );
}
