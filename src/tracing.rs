use tracing_subscriber::{filter::LevelFilter, fmt, EnvFilter};

use crate::conf;

/// Installs the global subscriber. `RUST_LOG` directives take precedence
/// over the configured level.
pub fn init() -> anyhow::Result<()> {
    let level = conf::global().log_level;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env()?;
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|error| anyhow::anyhow!("Failed to init tracing: {error}"))?;
    Ok(())
}
