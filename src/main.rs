use anyhow::{bail, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use log::{info, warn};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use subnetwatch::{
    client::{StateStore, WatchOptions, Watcher},
    config::{ClientConfig, ConfigFile, ServerConfig},
    output::{OutputConfig, OutputFormat, OutputManager},
    network::RangePrefix,
    server,
};

fn build_cli() -> Command {
    Command::new("subnetwatch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Live reachability and latency sweeps of /24 IPv4 ranges")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (default: ~/.subnetwatch.toml)")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("state-file")
                .long("state-file")
                .value_name("FILE")
                .help("Where the range list and grids are stored")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the scan server")
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .value_name("ADDR")
                        .help("Address to listen on"),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("Port to listen on (overrides PORT)")
                        .value_parser(clap::value_parser!(u16)),
                )
                .arg(
                    Arg::new("batch-size")
                        .short('b')
                        .long("batch-size")
                        .value_name("SIZE")
                        .help("Hosts probed concurrently")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("MS")
                        .help("Per-probe timeout in milliseconds")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("ranges")
                .about("Manage the configured ranges")
                .subcommand_required(true)
                .subcommand(
                    Command::new("add")
                        .about("Add a range")
                        .arg(prefix_arg().required(true)),
                )
                .subcommand(
                    Command::new("remove")
                        .about("Remove a range")
                        .arg(prefix_arg().required(true)),
                )
                .subcommand(Command::new("list").about("List ranges").arg(format_arg())),
        )
        .subcommand(
            Command::new("watch")
                .about("Scan the configured ranges and show results as they arrive")
                .arg(
                    Arg::new("server")
                        .short('s')
                        .long("server")
                        .value_name("URL")
                        .help("Scan server WebSocket URL"),
                )
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("SECS")
                        .help("Rescan every SECS seconds instead of stopping after one sweep")
                        .value_parser(clap::value_parser!(u64).range(1..)),
                )
                .arg(
                    Arg::new("backoff")
                        .long("backoff")
                        .help("Double the reconnect delay after each failed attempt")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Show the last known grid without connecting")
                .arg(prefix_arg())
                .arg(format_arg()),
        )
}

fn prefix_arg() -> Arg {
    Arg::new("prefix")
        .value_name("PREFIX")
        .help("Range prefix, e.g. 192.168.1")
        .value_parser(clap::value_parser!(RangePrefix))
        .index(1)
}

fn format_arg() -> Arg {
    Arg::new("format")
        .short('f')
        .long("format")
        .value_name("FORMAT")
        .help("Output format: text or json")
        .value_parser(|raw: &str| raw.parse::<OutputFormat>())
        .default_value("text")
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = build_cli().get_matches();
    if let Err(e) = run(&matches).await {
        eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
        process::exit(1);
    }
}

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let config_path = matches.get_one::<PathBuf>("config");
    let mut config = ConfigFile::load(config_path.map(PathBuf::as_path)).context("failed to load configuration")?;
    if let Some(state_file) = matches.get_one::<PathBuf>("state-file") {
        config.client.state_file = Some(state_file.clone());
    }
    let colored = !matches.get_flag("no-color");

    match matches.subcommand() {
        Some(("serve", sub)) => run_serve(config.server, sub).await,
        Some(("ranges", sub)) => run_ranges(&config.client, sub, colored),
        Some(("watch", sub)) => run_watch(config.client, sub, colored).await,
        Some(("show", sub)) => run_show(&config.client, sub, colored),
        _ => bail!("no subcommand given"),
    }
}

async fn run_serve(config: ServerConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let mut config = config.apply_env();
    if let Some(bind) = matches.get_one::<String>("bind") {
        config.bind_address = bind.clone();
    }
    if let Some(&port) = matches.get_one::<u16>("port") {
        config = config.with_port(port);
    }
    if let Some(&batch_size) = matches.get_one::<usize>("batch-size") {
        config = config.with_batch_size(batch_size);
    }
    if let Some(&timeout) = matches.get_one::<u64>("timeout") {
        config = config.with_probe_timeout(timeout);
    }

    server::serve(&config, shutdown_on_ctrl_c())
        .await
        .with_context(|| format!("server on {} failed", config.listen_addr()))
}

fn run_ranges(config: &ClientConfig, matches: &ArgMatches, colored: bool) -> anyhow::Result<()> {
    let store = StateStore::open(config.state_file.as_deref())?;
    let mut state = store.load()?;

    match matches.subcommand() {
        Some(("add", sub)) => {
            let prefix = required_prefix(sub)?;
            state.add_range(prefix)?;
            store.save(&state)?;
            println!("{} {}", "Added".green(), prefix);
        }
        Some(("remove", sub)) => {
            let prefix = required_prefix(sub)?;
            state.remove_range(prefix)?;
            store.save(&state)?;
            println!("{} {}", "Removed".yellow(), prefix);
        }
        Some(("list", sub)) => {
            output_manager(colored, selected_format(sub), false).write_range_list(&state)?;
        }
        _ => bail!("unknown ranges subcommand"),
    }
    Ok(())
}

async fn run_watch(mut config: ClientConfig, matches: &ArgMatches, colored: bool) -> anyhow::Result<()> {
    if let Some(server) = matches.get_one::<String>("server") {
        config.server_url = server.clone();
    }
    if matches.get_flag("backoff") {
        config.reconnect_backoff = true;
    }
    config.validate()?;

    let store = StateStore::open(config.state_file.as_deref())?;
    if store.load()?.ranges().is_empty() {
        bail!("no ranges configured; add one with `subnetwatch ranges add <prefix>`");
    }
    info!("Using state file {}", store.path().display());

    let options = WatchOptions {
        server_url: config.server_url.clone(),
        rescan_interval: matches.get_one::<u64>("interval").map(|&secs| Duration::from_secs(secs)),
        reconnect: config.reconnect_policy(),
    };
    let output = output_manager(colored, OutputFormat::Text, true);
    let mut watcher = Watcher::new(store, options);

    watcher
        .run(
            |state, connection| {
                if let Err(e) = output.write_state(state, Some(connection)) {
                    warn!("Failed to render: {}", e);
                }
            },
            &shutdown_on_ctrl_c(),
        )
        .await?;
    Ok(())
}

fn run_show(config: &ClientConfig, matches: &ArgMatches, colored: bool) -> anyhow::Result<()> {
    let store = StateStore::open(config.state_file.as_deref())?;
    let state = store.load()?;
    let output = output_manager(colored, selected_format(matches), false);

    match matches.get_one::<RangePrefix>("prefix") {
        Some(prefix) => match state.get(*prefix) {
            Some(range) => output.write_range(range)?,
            None => bail!("range {} is not configured", prefix),
        },
        None => output.write_state(&state, None)?,
    }
    Ok(())
}

fn required_prefix(matches: &ArgMatches) -> anyhow::Result<RangePrefix> {
    matches
        .get_one::<RangePrefix>("prefix")
        .copied()
        .context("a range prefix is required")
}

fn selected_format(matches: &ArgMatches) -> OutputFormat {
    matches.get_one::<OutputFormat>("format").copied().unwrap_or(OutputFormat::Text)
}

fn output_manager(colored: bool, format: OutputFormat, redraw: bool) -> OutputManager {
    OutputManager::new(OutputConfig {
        format,
        colored,
        redraw,
    })
}

/// Token cancelled on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                trigger.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });
    token
}
