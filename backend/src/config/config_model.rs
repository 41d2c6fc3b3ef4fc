use std::time::Duration;

use crates::payments::mpesa_client::{MpesaConfig, base_url_for};

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub mpesa: Mpesa,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone)]
pub struct Mpesa {
    pub environment: String,
    pub base_url: Option<String>,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    pub transaction_type: String,
    pub request_timeout: u64,
}

// Credentials stay out of `{:?}` output.
impl std::fmt::Debug for Mpesa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mpesa")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("short_code", &self.short_code)
            .field("callback_url", &self.callback_url)
            .field("transaction_type", &self.transaction_type)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Mpesa {
    pub fn client_config(&self) -> MpesaConfig {
        MpesaConfig {
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| base_url_for(&self.environment).to_string()),
            consumer_key: self.consumer_key.clone(),
            consumer_secret: self.consumer_secret.clone(),
            short_code: self.short_code.clone(),
            passkey: self.passkey.clone(),
            callback_url: self.callback_url.clone(),
            transaction_type: self.transaction_type.clone(),
            request_timeout: Duration::from_secs(self.request_timeout),
        }
    }
}
