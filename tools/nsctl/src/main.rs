// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Command-line client for browsing and editing a naming-door namespace.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Command-line client for browsing and editing a naming-door namespace.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::LevelFilter;
use serde_json::Value;

use naming_door::config::{DISABLE_DISCOVERY, PARTITION_NAME, PROVIDER_URL};
use naming_door::discovery::DiscoveryClient;
use naming_door::{Environment, NamingContext, NamingObject, NamingRegistry, Resolved};

#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "Naming service client")]
struct Cli {
    /// Provider URLs, comma separated (e.g. nd://host:1099).
    #[arg(long, env = "NSCTL_URL")]
    url: Option<String>,

    /// Restrict discovery to a partition.
    #[arg(long)]
    partition: Option<String>,

    /// Never fall back to discovery.
    #[arg(long, default_value_t = false)]
    no_discovery: bool,

    /// Enable debug logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the object bound at a name.
    Lookup { name: String },
    /// Bind a JSON value (bare text is bound as a string).
    Bind { name: String, value: String },
    /// Bind or replace a JSON value.
    Rebind { name: String, value: String },
    /// Remove a binding.
    Unbind { name: String },
    /// List a context.
    List {
        #[arg(default_value = "")]
        name: String,
    },
    /// Create a subcontext.
    Mkdir { name: String },
    /// Find a server with a discovery request and print its address.
    Discover,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn environment(cli: &Cli) -> Environment {
    let mut env = Environment::new();
    if let Some(url) = &cli.url {
        env.set(PROVIDER_URL, url.clone());
    }
    if let Some(partition) = &cli.partition {
        env.set(PARTITION_NAME, partition.clone());
    }
    if cli.no_discovery {
        env.set(DISABLE_DISCOVERY, "true");
    }
    env
}

fn parse_value(text: &str) -> NamingObject {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => NamingObject::value(value),
        Err(_) => NamingObject::value(text),
    }
}

fn render(resolved: &Resolved) -> String {
    match resolved {
        Resolved::Value(value) => value.to_string(),
        Resolved::Context(context) => format!("context {}", context.name_in_namespace()),
        Resolved::Reference(reference) => format!("reference {}", reference.class_name),
        Resolved::Link(link) => format!("link -> {}", link.link_name()),
        Resolved::Object(_) => "object".to_owned(),
    }
}

fn run(cli: Cli) -> Result<()> {
    let env = environment(&cli);
    let context = NamingContext::initial(env.clone(), Arc::new(NamingRegistry::new()));
    match cli.command {
        Command::Lookup { name } => {
            let resolved = context.lookup(&name).with_context(|| format!("lookup {name}"))?;
            println!("{}", render(&resolved));
        }
        Command::Bind { name, value } => {
            context
                .bind(&name, parse_value(&value))
                .with_context(|| format!("bind {name}"))?;
        }
        Command::Rebind { name, value } => {
            context
                .rebind(&name, parse_value(&value))
                .with_context(|| format!("rebind {name}"))?;
        }
        Command::Unbind { name } => {
            context.unbind(&name).with_context(|| format!("unbind {name}"))?;
        }
        Command::List { name } => {
            for entry in context.list(&name).with_context(|| format!("list {name:?}"))? {
                println!("{}\t{}", entry.name, entry.class_name);
            }
        }
        Command::Mkdir { name } => {
            let created = context
                .create_subcontext(&name)
                .with_context(|| format!("create subcontext {name}"))?;
            println!("{}", created.name_in_namespace());
        }
        Command::Discover => {
            let endpoint = DiscoveryClient::from_env(&env)?
                .discover()
                .context("discovery")?;
            println!("{endpoint}");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli)
}
