use crate::config::config_model::Sweeper;
use crate::usecases::expire_pending_transactions::{
    ExpirePendingTransactionsParams, ExpirePendingTransactionsUseCase,
};
use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

pub async fn run_sweeper_loop(
    usecase: Arc<ExpirePendingTransactionsUseCase>,
    sweeper: Sweeper,
) -> Result<()> {
    info!(
        pending_timeout_minutes = sweeper.pending_timeout_minutes,
        interval_seconds = sweeper.interval_seconds,
        batch_size = sweeper.batch_size,
        "expire_pending: sweeper started"
    );

    loop {
        let params = ExpirePendingTransactionsParams {
            pending_timeout_minutes: sweeper.pending_timeout_minutes,
            batch_size: sweeper.batch_size,
        };

        match usecase.run(params).await {
            Ok(result) if result.scanned > 0 => info!(
                scanned = result.scanned,
                expired = result.expired,
                already_settled = result.already_settled,
                failed = result.failed,
                "expire_pending: sweep finished"
            ),
            Ok(_) => {}
            Err(err) => error!(db_error = ?err, "expire_pending: sweep failed"),
        }

        tokio::time::sleep(Duration::from_secs(sweeper.interval_seconds)).await;
    }
}
