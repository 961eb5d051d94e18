use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use flagrelay::{Server, ServerConfig};

#[derive(Parser)]
#[command(
    name = "flagrelay-server",
    about = "Standalone server for the flag-capture relay game"
)]
struct Args {
    /// Port to listen on (binds 0.0.0.0:<port>).
    port: u16,

    /// Number of session slots; each holds two players.
    #[arg(long, default_value_t = ServerConfig::default().game_max)]
    game_max: usize,

    /// Maximum accepted command length, in bytes.
    #[arg(long, default_value_t = ServerConfig::default().max_cmd_len)]
    max_cmd_len: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let bind_addr = format!("0.0.0.0:{}", args.port);

    let config = ServerConfig {
        game_max: args.game_max,
        max_cmd_len: args.max_cmd_len,
        ..ServerConfig::default()
    };

    let mut server = Server::with_config(&bind_addr, config);

    if let Err(e) = server.start() {
        eprintln!("failed to start server: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(addr = %bind_addr, "flagrelay server running");

    while server.is_running() {
        std::thread::sleep(Duration::from_millis(200));
    }

    if let Err(e) = server.stop() {
        tracing::debug!(error = %e, "server already stopped");
    }

    ExitCode::SUCCESS
}
