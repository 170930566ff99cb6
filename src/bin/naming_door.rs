// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Daemon entry point serving a naming tree over bootstrap and discovery.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Daemon entry point serving a naming tree over bootstrap and discovery.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, LevelFilter};

use naming_door::{NamingRegistry, NamingService, ServerConfig};

/// Command-line arguments for the naming daemon.
#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "Hierarchical naming service daemon")]
struct Cli {
    /// TOML configuration file; falls back to NAMING_DOOR_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bootstrap bind address; repeat for several.
    #[arg(long = "bind")]
    bind: Vec<String>,

    /// Bootstrap port; 0 picks a free port, -1 disables the listener.
    #[arg(long, allow_negative_numbers = true)]
    port: Option<i32>,

    /// Naming RPC port.
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Host written into vended handles.
    #[arg(long)]
    advertise: Option<String>,

    /// Answer discovery requests.
    #[arg(long, default_value_t = false)]
    discovery: bool,

    /// Enable debug logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn resolve_config_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    cli_path.or_else(|| {
        env::var("NAMING_DOOR_CONFIG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    })
}

fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = match resolve_config_path(cli.config.clone()) {
        Some(path) => ServerConfig::load(&path)
            .with_context(|| format!("load configuration from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if !cli.bind.is_empty() {
        config.bind_addresses = cli.bind.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(rpc_port) = cli.rpc_port {
        config.rpc_port = rpc_port;
    }
    if let Some(host) = &cli.advertise {
        config.advertised_host = Some(host.clone());
    }
    if cli.discovery {
        config.discovery.enabled = true;
    }
    if config.bind_addresses.is_empty() {
        return Err(anyhow!("at least one bind address is required"));
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(&cli)?;
    let registry = Arc::new(NamingRegistry::new());
    let mut service = NamingService::new(config, registry).context("create naming service")?;
    service.start().context("start naming service")?;
    for url in service.bootstrap_urls() {
        info!("naming available at {url}");
    }
    loop {
        thread::park();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "naming-door",
            "--bind",
            "127.0.0.1",
            "--port",
            "-1",
            "--discovery",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.bind_addresses, vec!["127.0.0.1".to_owned()]);
        assert_eq!(config.port, -1);
        assert!(config.discovery.enabled);
    }
}
