use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use crates::domain::{
    repositories::mpesa_transactions::MpesaTransactionRepository,
    value_objects::{
        enums::mpesa_transaction_statuses::MpesaTransactionStatus,
        mpesa_transactions::{FailTransactionModel, SettlementOutcome},
    },
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result code written to ledger entries that never received a callback.
pub const TIMEOUT_RESULT_CODE: &str = "TIMEOUT";

#[derive(Debug, Clone)]
pub struct ExpirePendingTransactionsParams {
    pub pending_timeout_minutes: i64,
    pub batch_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpirePendingTransactionsResult {
    pub scanned: usize,
    pub expired: usize,
    pub already_settled: usize,
    pub failed: usize,
    pub expired_ids: Vec<String>,
}

pub struct ExpirePendingTransactionsUseCase {
    repository: Arc<dyn MpesaTransactionRepository + Send + Sync>,
}

impl ExpirePendingTransactionsUseCase {
    pub fn new(repository: Arc<dyn MpesaTransactionRepository + Send + Sync>) -> Self {
        Self { repository }
    }

    pub async fn run(
        &self,
        params: ExpirePendingTransactionsParams,
    ) -> Result<ExpirePendingTransactionsResult> {
        self.run_at(params, Utc::now()).await
    }

    pub async fn run_at(
        &self,
        params: ExpirePendingTransactionsParams,
        now: DateTime<Utc>,
    ) -> Result<ExpirePendingTransactionsResult> {
        let timeout_minutes = params.pending_timeout_minutes.max(1);
        let created_before = Duration::try_minutes(timeout_minutes)
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .with_context(|| format!("pending timeout of {timeout_minutes} minutes is out of range"))?;

        let stale = self
            .repository
            .list_stale_pending(created_before, params.batch_size.max(1))
            .await?;

        let mut result = ExpirePendingTransactionsResult {
            scanned: stale.len(),
            ..Default::default()
        };

        for transaction in stale {
            let checkout_request_id = transaction.checkout_request_id.clone();
            let model = FailTransactionModel {
                checkout_request_id: checkout_request_id.clone(),
                status: MpesaTransactionStatus::Failed,
                result_code: TIMEOUT_RESULT_CODE.to_string(),
                result_desc: format!("No provider callback within {timeout_minutes} minutes"),
                order_note: format!(
                    "M-Pesa payment timed out: no confirmation received within {timeout_minutes} minutes"
                ),
                failed_at: now,
            };

            match self.repository.fail_transaction(model).await {
                Ok(SettlementOutcome::Applied(_)) => {
                    info!(
                        checkout_request_id = %checkout_request_id,
                        order_id = transaction.order_id,
                        created_at = %transaction.created_at,
                        "expire_pending: pending transaction timed out"
                    );
                    result.expired += 1;
                    result.expired_ids.push(checkout_request_id);
                }
                Ok(SettlementOutcome::AlreadyTerminal(current)) => {
                    info!(
                        checkout_request_id = %checkout_request_id,
                        status = %current.status,
                        "expire_pending: callback settled transaction first; skipping"
                    );
                    result.already_settled += 1;
                }
                Ok(SettlementOutcome::NotFound) => {
                    warn!(
                        checkout_request_id = %checkout_request_id,
                        "expire_pending: transaction vanished before expiry"
                    );
                }
                Err(err) => {
                    error!(
                        checkout_request_id = %checkout_request_id,
                        db_error = ?err,
                        "expire_pending: failed to expire transaction; will retry next sweep"
                    );
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }
}
