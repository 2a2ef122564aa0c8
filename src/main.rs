use spreadrunner::app::{App, Config};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config_path =
        std::env::var("SPREADRUNNER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration ({config_path}): {e}");
            std::process::exit(2);
        }
    };

    config.init_logging();
    info!("spreadrunner starting");

    tokio::select! {
        result = App::run(config) => {
            if let Err(e) = result {
                error!(error = %e, "fatal error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("spreadrunner stopped");
}
