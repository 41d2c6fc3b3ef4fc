#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub database: Database,
    pub sweeper: Sweeper,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct Sweeper {
    pub pending_timeout_minutes: i64,
    pub interval_seconds: u64,
    pub batch_size: i64,
}
