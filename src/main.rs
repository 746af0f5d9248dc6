//! Pacer - real-time room & presence engine
//!
//! Usage:
//!   cargo run -- server                    # Run the engine
//!   cargo run -- server --port 4433       # Run on a specific port

use pacer::{EngineConfig, Server};
use std::env;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            run_server(&args).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            return Ok(());
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Pacer - Real-Time Room & Presence Engine");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the engine");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on (default: 4433)");
    println!("    --max-conn <NUM>    Maximum connections (default: 10000)");
    println!();
    println!("WHAT IT DOES:");
    println!("    - Groups connections into named rooms (one permanent lobby)");
    println!("    - Counts presence per logical user, not per tab");
    println!("    - Retains 24h of messages per room, capped at 5000");
    println!("    - Deletes user-created rooms after 30 minutes empty");
    println!("    - Pings every connection and sweeps the silent ones");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --port 5000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_port(args: &[String]) -> u16 {
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            if let Ok(port) = args[i + 1].parse() {
                return port;
            }
        }
    }
    4433
}

fn parse_max_connections(args: &[String]) -> usize {
    for i in 0..args.len() {
        if args[i] == "--max-conn" && i + 1 < args.len() {
            if let Ok(max) = args[i + 1].parse() {
                return max;
            }
        }
    }
    10000
}

async fn run_server(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let port = parse_port(args);
    let max_connections = parse_max_connections(args);

    let config = EngineConfig {
        bind_addr: format!("0.0.0.0:{}", port).parse()?,
        max_connections,
        ..Default::default()
    };

    info!("configuration:");
    info!("  - bind address: {}", config.bind_addr);
    info!("  - max connections: {}", config.max_connections);
    info!("  - heartbeat interval: {:?}", config.heartbeat_interval);
    info!("  - room inactivity timeout: {:?}", config.room_inactivity_timeout);
    info!("  - message retention: {:?}", config.message_retention);
    info!(
        "  - permanent rooms: {}",
        config
            .permanent_rooms
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut server = Server::new(config);

    if let Err(e) = server.start().await {
        error!("server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
