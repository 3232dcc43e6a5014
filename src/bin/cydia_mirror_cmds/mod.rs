use std::path::PathBuf;

use anyhow::{bail, Error};
use dirs::home_dir;

use cydia_mirror::{
    client::{ClientIdentity, HttpClient},
    handle::MirrorHandle,
    mirror::{mirror_repository, LogDisplay, MirrorOptions},
    types::MirrorStatus,
};

mod config;
pub use config::*;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cydia-mirror.cfg";

/// Expand a leading `~` to the user's home directory.
pub fn expand_destination(destination: &str) -> PathBuf {
    expand_home(destination, home_dir())
}

fn expand_home(destination: &str, home: Option<PathBuf>) -> PathBuf {
    let destination = destination.trim();
    match home {
        Some(home) if destination == "~" => home,
        Some(home) => match destination.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(destination),
        },
        None => PathBuf::from(destination),
    }
}

/// Run a mirror on a blocking worker, cancelling it on Ctrl-C, and print the outcome.
pub async fn run_mirror(
    url: String,
    destination: PathBuf,
    options: MirrorOptions,
    identity: ClientIdentity,
    full_log: bool,
    output_format: String,
) -> Result<(), Error> {
    let handle = MirrorHandle::new();

    let printer = if full_log {
        let receiver = handle.subscribe();
        Some(std::thread::spawn(move || {
            for line in receiver {
                println!("{line}");
            }
        }))
    } else {
        None
    };

    let cancel = handle.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling, waiting for the current transfer to finish..");
            cancel.cancel();
        }
    });

    let worker = handle.clone();
    let res = tokio::task::spawn_blocking(move || {
        let client = HttpClient::new(identity);
        mirror_repository(&client, &url, &destination, &options, &worker)
    })
    .await;

    ctrl_c.abort();
    // the printer only returns once every sender is dropped
    handle.close();
    if let Some(printer) = printer {
        let _ = printer.join();
    }

    let report = res??;

    if output_format == "text" {
        if !full_log {
            print!("{}", report.render(LogDisplay::Summary));
        }
    } else if output_format == "json" {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if report.status != MirrorStatus::Success {
        bail!("mirror run {}", report.status);
    }

    Ok(())
}
