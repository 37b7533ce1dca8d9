use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use server::app::AppHandle;
use server::config::{Args, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig::load(&args.config);
    info!("loaded configuration from {}", args.config);

    let bind_addr = config.bind_addr();
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("listening on {bind_addr}");

    let app = AppHandle::new(config);
    app.run_accept_loop(listener).await;
}
