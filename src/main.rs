use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;

mod models;
mod repositories;
mod services;
mod settings;
mod utils;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "ledger.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    init_logging(&args.log4rs)?;
    let settings = settings::Settings::new(&args.config)?;
    log::info!("Starting Wicket ledger service.");

    let pool = repositories::connect(
        &settings.database.url,
        settings.database.max_connections,
    )
    .await?;
    log::info!("Connected to {}.", settings.database.url);

    let result = services::start_services(pool.clone(), settings).await;
    pool.close().await;

    result
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            log::info!("Logging initialized from {}.", path);
            Ok(())
        }
        Err(e) => {
            eprintln!("[WARN] Could not load {}: {}. Logging to console.", path, e);

            let stdout = ConsoleAppender::builder()
                .encoder(Box::new(PatternEncoder::new(
                    "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
                )))
                .build();
            let config = log4rs::Config::builder()
                .appender(Appender::builder().build("stdout", Box::new(stdout)))
                .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;

            log4rs::init_config(config)?;
            Ok(())
        }
    }
}
