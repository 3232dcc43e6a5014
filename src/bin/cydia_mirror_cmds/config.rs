use anyhow::Error;
use serde_json::Value;

use proxmox_router::cli::{
    default_table_format_options, format_and_print_result_full, get_output_format, CliCommand,
    CliCommandMap, ColumnConfig, CommandLineInterface, OUTPUT_FORMAT,
};
use proxmox_schema::{api, ApiType, ArraySchema, ReturnType};

use cydia_mirror::{
    config::{ClientConfig, MirrorConfig},
    types::MIRROR_ID_SCHEMA,
};

use super::DEFAULT_CONFIG_PATH;

pub const LIST_MIRRORS_RETURN_TYPE: ReturnType = ReturnType {
    optional: false,
    schema: &ArraySchema::new("Returns the list of mirrors.", &MirrorConfig::API_SCHEMA).schema(),
};

pub const SHOW_MIRROR_RETURN_TYPE: ReturnType = ReturnType {
    schema: &MirrorConfig::API_SCHEMA,
    optional: true,
};

pub const LIST_CLIENTS_RETURN_TYPE: ReturnType = ReturnType {
    optional: false,
    schema: &ArraySchema::new("Returns the list of client identities.", &ClientConfig::API_SCHEMA)
        .schema(),
};

#[api(
    input: {
        properties: {
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
/// List configured mirrors
async fn list_mirrors(config: Option<String>, param: Value) -> Result<Value, Error> {
    let config = config.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = cydia_mirror::config::config(&config)?;
    let config: Vec<MirrorConfig> = config.convert_to_typed_array("mirror")?;

    let output_format = get_output_format(&param);
    let options = default_table_format_options()
        .column(ColumnConfig::new("id").header("ID"))
        .column(ColumnConfig::new("url"))
        .column(ColumnConfig::new("destination"))
        .column(ColumnConfig::new("architecture"));

    format_and_print_result_full(
        &mut serde_json::json!(config),
        &LIST_MIRRORS_RETURN_TYPE,
        &output_format,
        &options,
    );

    Ok(Value::Null)
}

#[api(
    input: {
        properties: {
            config: {
                type: String,
                optional: true,
                description: "Path to mirroring config file.",
            },
            id: {
                schema: MIRROR_ID_SCHEMA,
            },
            "output-format": {
                schema: OUTPUT_FORMAT,
                optional: true,
            },
        }
    },
 )]
/// Show full mirror config
async fn show_mirror(config: Option<String>, id: String, param: Value) -> Result<Value, Error> {
    let config = config.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = cydia_mirror::config::config(&config)?;
    let mut config = config.lookup_json("mirror", &id)?;

    let output_format = get_output_format(&param);
    format_and_print_result_full(
        &mut config,
        &SHOW_MIRROR_RETURN_TYPE,
        &output_format,
        &default_table_format_options(),
    );
    Ok(Value::Null)
}

#[api(
    input: {
        properties: {
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
/// List configured client identities
async fn list_clients(config: Option<String>, param: Value) -> Result<Value, Error> {
    let config = config.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = cydia_mirror::config::config(&config)?;
    let config: Vec<ClientConfig> = config.convert_to_typed_array("client")?;

    let output_format = get_output_format(&param);
    let options = default_table_format_options()
        .column(ColumnConfig::new("id").header("ID"))
        .column(ColumnConfig::new("user-agent"))
        .column(ColumnConfig::new("device-model"))
        .column(ColumnConfig::new("firmware"));

    format_and_print_result_full(
        &mut serde_json::json!(config),
        &LIST_CLIENTS_RETURN_TYPE,
        &output_format,
        &options,
    );

    Ok(Value::Null)
}

pub fn config_commands() -> CommandLineInterface {
    let cmd_def = CliCommandMap::new()
        .insert("list", CliCommand::new(&API_METHOD_LIST_MIRRORS))
        .insert(
            "show",
            CliCommand::new(&API_METHOD_SHOW_MIRROR).arg_param(&["id"]),
        )
        .insert("clients", CliCommand::new(&API_METHOD_LIST_CLIENTS));

    cmd_def.into()
}
