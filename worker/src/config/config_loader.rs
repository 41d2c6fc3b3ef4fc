use std::str::FromStr;

use anyhow::{Context, Result, bail};

use super::config_model::{Database, DotEnvyConfig, Sweeper};

/// One week.
const MAX_PENDING_TIMEOUT_MINUTES: i64 = 7 * 24 * 60;

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    load_from(|name| std::env::var(name).ok())
}

fn parsed_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{name} is invalid")),
        None => Ok(default),
    }
}

pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<DotEnvyConfig> {
    let database = Database {
        url: lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .context("DATABASE_URL is invalid")?,
        max_connections: parsed_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
    };

    let sweeper = Sweeper {
        pending_timeout_minutes: parsed_or(&lookup, "PENDING_TIMEOUT_MINUTES", 15)?,
        interval_seconds: parsed_or(&lookup, "SWEEP_INTERVAL_SECONDS", 60)?,
        batch_size: parsed_or(&lookup, "SWEEP_BATCH_SIZE", 100)?,
    };

    if sweeper.pending_timeout_minutes <= 0 {
        bail!("PENDING_TIMEOUT_MINUTES must be positive");
    }
    if sweeper.pending_timeout_minutes > MAX_PENDING_TIMEOUT_MINUTES {
        bail!("PENDING_TIMEOUT_MINUTES must be at most {MAX_PENDING_TIMEOUT_MINUTES}");
    }
    if sweeper.interval_seconds == 0 {
        bail!("SWEEP_INTERVAL_SECONDS must be positive");
    }
    if sweeper.batch_size <= 0 {
        bail!("SWEEP_BATCH_SIZE must be positive");
    }

    Ok(DotEnvyConfig { database, sweeper })
}
