use barter_perp_monitor::{
    ConnectionStatus, HistoryNotifier, LogNotifier, Monitor, MonitorConfig, WebSocketClient,
    WebSocketConfig,
};
use rustls::crypto::ring::default_provider;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let _ = default_provider().install_default();
    init_logging();

    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Starting perp monitor against {}", config.ws_url);

    let feed = WebSocketClient::new(WebSocketConfig::new(config.ws_url.clone())).start();

    let mut status = feed.status;
    tokio::spawn(async move {
        while let Some(update) = status.recv().await {
            match update {
                ConnectionStatus::Connected => info!("Market feed connected"),
                ConnectionStatus::Connecting => info!("Market feed connecting"),
                ConnectionStatus::Disconnected => warn!("Market feed disconnected"),
            }
        }
    });

    let monitor = Monitor::new(config, HistoryNotifier::new(LogNotifier));

    tokio::select! {
        _ = monitor.run(feed.events) => {
            info!("Monitor stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
