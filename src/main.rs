mod browser;
mod config;
mod http;
mod middleware;
mod server;
mod static_files;
mod threadpool;

use std::env;
use std::path::Path;
use std::process;

use env_logger::Env;
use log::{error, info};

use config::{Config, CONFIG_FILE};
use crate::http::SERVER_NAME;
use middleware::{CorsMiddleware, RequestLogMiddleware};
use server::Server;

fn main() {
    // Defaults, then the config file, then positional CLI overrides.
    let mut config = Config::load(Path::new(CONFIG_FILE));
    let args: Vec<String> = env::args().skip(1).collect();
    config.apply_args(&args);

    env_logger::Builder::from_env(Env::default().default_filter_or(&config.log_level))
        .format_timestamp_millis()
        .init();

    let root = match config.resolve_root() {
        Ok(root) => root,
        Err(e) => {
            error!("Cannot resolve root directory {:?}: {}", config.root_dir, e);
            process::exit(1);
        }
    };

    info!("{} starting (root: {})", SERVER_NAME, root.display());

    let server = match Server::new(&config, root) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            process::exit(1);
        }
    };

    let server = server
        .with_middleware(Box::new(CorsMiddleware))
        .with_middleware(Box::new(RequestLogMiddleware));

    info!("Server available at {}/", config.base_url());
    info!("Press Ctrl+C to stop the server");

    ctrlc::set_handler(|| {
        info!("Shutting down server...");
        process::exit(0);
    })
    .expect("Error setting Ctrl-C handler");

    if config.open_browser {
        browser::launch_after_delay(config.base_url());
    }

    if let Err(e) = server.run() {
        error!("Server error: {}", e);
        process::exit(1);
    }
}
