mod api;
mod mail;
mod runtime;
mod storage;
mod sync;
mod utils;

use std::{ env, sync::Arc };
use std::path::Path;
use anyhow::Result;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

use crate::mail::imap::ImapTransport;
use crate::runtime::Runtime;
use crate::utils::config::ConfigLoader;

#[tokio::main]
async fn main() -> Result<()> {
    let mut config_path = String::from("/etc/mailsift/config.ini");

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = path;
                }
            }
            _ => {}
        }
    }

    // Resolve config path: honor CLI arg, else fallback for dev
    let resolved_path = if Path::new(&config_path).exists() {
        config_path.clone()
    } else {
        let dev_path = "config/mailsift.conf";
        if Path::new(dev_path).exists() {
            dev_path.to_string()
        } else {
            config_path.clone()
        }
    };

    let loader = match ConfigLoader::new(resolved_path).load().await {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    let config = Arc::new(loader.get_config().clone());

    // Initialize logging based on config
    // Defaults: plain logs; if logging.json=true, enable JSON format
    let json_enabled = config.get_bool("logging", "json", false);
    let level = match config.get_value("logging", "level").unwrap_or("info").to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };
    if json_enabled {
        tracing_subscriber::fmt().with_max_level(level).json().init();
    } else {
        tracing_subscriber::fmt().with_max_level(level).init();
    }

    let transport = Arc::new(ImapTransport::from_config(&config));
    let runtime = Arc::new(Runtime::new(config, transport));
    let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    info!("mailsift starting");
    runtime.run(&mut tasks).await?;

    // wait forever (or until one fails)
    for task in tasks {
        task.await?;
    }

    Ok(())
}
