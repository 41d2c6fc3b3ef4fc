use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;

use crate::domain::{
    entities::mpesa_transactions::{InsertMpesaTransactionEntity, MpesaTransactionEntity},
    value_objects::mpesa_transactions::{
        CompleteTransactionModel, FailTransactionModel, SettlementOutcome,
    },
};

#[automock]
#[async_trait]
pub trait MpesaTransactionRepository {
    async fn insert_pending(&self, insert_entity: InsertMpesaTransactionEntity) -> Result<i32>;

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<MpesaTransactionEntity>>;

    async fn list_for_order(&self, order_id: i32) -> Result<Vec<MpesaTransactionEntity>>;

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MpesaTransactionEntity>>;

    /// Ledger, payment record and order are written in one transaction with the ledger row
    /// locked, so a concurrent duplicate observes `AlreadyTerminal`.
    async fn complete_transaction(&self, model: CompleteTransactionModel)
    -> Result<SettlementOutcome>;

    /// Same locking contract as `complete_transaction`; only ledger and order are written.
    async fn fail_transaction(&self, model: FailTransactionModel) -> Result<SettlementOutcome>;
}
