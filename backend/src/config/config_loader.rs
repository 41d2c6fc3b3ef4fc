use std::str::FromStr;

use anyhow::{Context, Result};

use super::config_model::{BackendServer, Database, DotEnvyConfig, Mpesa};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    load_from(|name| std::env::var(name).ok())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{name} is invalid"))
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    required(lookup, name)?
        .trim()
        .parse()
        .with_context(|| format!("{name} is invalid"))
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
    let backend_server = BackendServer {
        port: parsed(&lookup, "SERVER_PORT_BACKEND")?,
        body_limit: parsed(&lookup, "SERVER_BODY_LIMIT")?,
        timeout: parsed(&lookup, "SERVER_TIMEOUT")?,
    };

    let database = Database {
        url: required(&lookup, "DATABASE_URL")?,
        max_connections: parsed_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
    };

    let mpesa = Mpesa {
        environment: lookup("MPESA_ENVIRONMENT").unwrap_or_else(|| "sandbox".to_string()),
        base_url: lookup("MPESA_BASE_URL").filter(|value| !value.trim().is_empty()),
        consumer_key: required(&lookup, "MPESA_CONSUMER_KEY")?,
        consumer_secret: required(&lookup, "MPESA_CONSUMER_SECRET")?,
        short_code: required(&lookup, "MPESA_SHORT_CODE")?,
        passkey: required(&lookup, "MPESA_PASSKEY")?,
        callback_url: required(&lookup, "MPESA_CALLBACK_URL")?,
        transaction_type: lookup("MPESA_TRANSACTION_TYPE")
            .unwrap_or_else(|| "CustomerPayBillOnline".to_string()),
        request_timeout: parsed_or(&lookup, "MPESA_REQUEST_TIMEOUT", 30)?,
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        mpesa,
    })
}
