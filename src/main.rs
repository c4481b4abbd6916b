use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use friend_circle::config::Config;
use friend_circle::fetcher::Fetcher;
use friend_circle::output::write_json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "friend_circle=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("FRIEND_CIRCLE_CONFIG").unwrap_or_else(|_| "conf.toml".to_string());
    let config = Config::load(&config_path)?;
    let settings = &config.spider_settings;

    if !settings.enable {
        info!("Spider disabled in {}, nothing to do", config_path);
        return Ok(());
    }

    info!(
        "Fetching roster {}: {} articles per blog, {} workers (IPv4 preferred: {})",
        settings.json_url, settings.article_count, settings.max_workers, settings.force_ipv4
    );

    let fetcher = Fetcher::from_settings(settings)?;
    let output = fetcher.run(&settings.json_url).await;

    write_json(&config.output.all_path, &output.result)?;
    write_json(&config.output.errors_path, &output.errors)?;
    info!(
        "Wrote {} and {}",
        config.output.all_path, config.output.errors_path
    );

    Ok(())
}
