use anyhow::Result;
use crates::{
    domain::repositories::mpesa_transactions::MpesaTransactionRepository,
    infra::db::{
        postgres::postgres_connection, repositories::mpesa_transactions::MpesaTransactionPostgres,
    },
};
use std::sync::Arc;
use tracing::{error, info};
use worker::{
    config, services::sweeper_loop,
    usecases::expire_pending_transactions::ExpirePendingTransactionsUseCase,
};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(error) = run().await {
        error!("Worker exited with error: {:#}", error);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("worker")?;

    let dotenvy_env = config::config_loader::load()?;
    info!("ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(
        &dotenvy_env.database.url,
        dotenvy_env.database.max_connections,
    )?;
    info!("Postgres connection has been established");

    let transaction_repository: Arc<dyn MpesaTransactionRepository + Send + Sync> =
        Arc::new(MpesaTransactionPostgres::new(Arc::new(postgres_pool)));
    let expire_usecase = Arc::new(ExpirePendingTransactionsUseCase::new(transaction_repository));

    let sweeper = tokio::spawn(sweeper_loop::run_sweeper_loop(
        expire_usecase,
        dotenvy_env.sweeper.clone(),
    ));

    tokio::select! {
        result = sweeper => result??,
        _ = tokio::signal::ctrl_c() => info!("Received ctrl+C signal"),
    };

    Ok(())
}
