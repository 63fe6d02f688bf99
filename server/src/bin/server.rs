//! kiln server binary.

use clap::Parser;
use server::{Config, Server};
use std::path::PathBuf;
use store::Store;

#[derive(Parser)]
#[command(name = "kiln-server")]
#[command(about = "In-memory key-value server")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load config: {err}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    server::logging::init(&config.logging);

    let mut server = match Server::new(&config, Store::new()) {
        Ok(server) => server,
        Err(err) => {
            tracing::error!("[{}] startup: {err}", err.raw_os_error().unwrap_or(0));
            std::process::exit(1);
        }
    };

    if let Err(err) = server.run() {
        tracing::error!("[{}] event loop: {err}", err.raw_os_error().unwrap_or(0));
        std::process::exit(1);
    }
}

fn print_default_config() {
    let config = r#"# kiln server configuration

[listener]
# Address to listen on
address = "0.0.0.0:8080"

# Accept backlog
backlog = 4096

# Connections with no activity for this long are closed
idle_timeout_ms = 15000

# Per-read scratch buffer (number of bytes, or a string like "64KB")
read_buffer_size = "64KB"

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
# (the RUST_LOG environment variable takes precedence)
level = "info"

# Output format: "pretty", "compact", or "json"
format = "pretty"
"#;
    print!("{config}");
}
