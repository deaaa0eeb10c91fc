mod cli;

use ragchat::config::ClientConfig;

/// Bundled defaults, used when no .env file is present
const BUNDLED_CONFIG: &str = include_str!("../assets/config.env");

fn load_dotenv() {
    // First try to load from .env file (local dev)
    if dotenvy::dotenv().is_ok() {
        return;
    }

    load_bundled_config();
}

fn load_bundled_config() {
    for line in BUNDLED_CONFIG.lines() {
        let line = line.trim();
        // Skip comments and empty lines
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Parse KEY=VALUE
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim();
            // Only set if not already set (allow env override)
            if std::env::var(key).is_err() {
                // SAFETY: We're setting env vars at startup before the runtime spawns any threads
                unsafe {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    load_dotenv();
    let config = ClientConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cli::run(config))
}
