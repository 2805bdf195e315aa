mod clock;
mod commands;
mod config;
mod core;
mod cron;
mod daemon;
mod heartbeat;
mod jobs;
mod mcp;
mod memory;
mod paths;
mod queue;
mod runner;
mod scheduler;
mod sessions;
mod state;
mod utils;

#[cfg(all(test, unix))]
mod integration_tests;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(|s| s.as_str()).unwrap_or("start");

    match command {
        "--version" | "-V" => {
            println!("valetd {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        "--help" | "-h" => {
            print_help();
            return Ok(());
        }
        _ => {}
    }

    let paths = paths::Paths::from_home()?;
    // Malformed config is fatal; a missing file just means defaults.
    let settings = config::Settings::load(&paths.config_file())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let exit_code = match command {
        "start" => {
            runtime.block_on(crate::core::run(settings, paths, None))?;
            0
        }
        "send" => runtime.block_on(commands::send(settings, paths, &args[1..]))?,
        "status" => runtime.block_on(commands::status(settings, paths))?,
        "agents" => runtime.block_on(commands::agents(settings, paths, &args[1..]))?,
        other => {
            eprintln!("Unknown command: \"{}\"\n", other);
            print_help();
            1
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn print_help() {
    println!("valetd {}", env!("CARGO_PKG_VERSION"));
    println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
    println!("Usage: valetd [COMMAND]\n");
    println!("Commands:");
    println!("  start                 Run the daemon (default)");
    println!("  send <message>        Send a one-shot message [--agent <id>]");
    println!("  status                Show daemon, heartbeat, job, and session status");
    println!("  agents <subcommand>   Manage agents (list, show, reset, backup)");
    println!("\nOptions:");
    println!("  -h, --help       Print help");
    println!("  -V, --version    Print version");
}
