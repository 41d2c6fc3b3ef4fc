//! In-memory ledger, order and payment tables sharing one lock.
//!
//! Settlement writes are staged on a copy of the tables and only swapped in once every write
//! succeeded, which mirrors the commit/rollback behaviour of the Postgres repositories.
//! `fail_on_write` makes the n-th write of the next operation fail.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use crate::domain::{
    entities::{
        mpesa_transactions::{InsertMpesaTransactionEntity, MpesaTransactionEntity},
        orders::{OrderEntity, append_order_note},
        payments::{MPESA_PAYMENT_METHOD, PaymentEntity},
    },
    repositories::{mpesa_transactions::MpesaTransactionRepository, orders::OrderRepository},
    value_objects::{
        enums::{
            mpesa_transaction_statuses::MpesaTransactionStatus, order_statuses::OrderStatus,
        },
        mpesa_transactions::{CompleteTransactionModel, FailTransactionModel, SettlementOutcome},
    },
};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_transaction_id: i32,
    next_payment_id: i32,
    transactions: Vec<MpesaTransactionEntity>,
    orders: HashMap<i32, OrderEntity>,
    payments: Vec<PaymentEntity>,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: Tables,
    fail_on_write: Option<usize>,
    committed_writes: usize,
}

struct StagedWrites {
    tables: Tables,
    writes: usize,
    fail_on_write: Option<usize>,
}

impl StagedWrites {
    fn begin(tables: &Tables, fail_on_write: Option<usize>) -> Self {
        Self {
            tables: tables.clone(),
            writes: 0,
            fail_on_write,
        }
    }

    fn record_write(&mut self) -> Result<()> {
        self.writes += 1;
        if self.fail_on_write == Some(self.writes) {
            bail!("injected failure on write {}", self.writes);
        }
        Ok(())
    }

    fn commit(self, state: &mut StoreState) {
        state.tables = self.tables;
        state.committed_writes += self.writes;
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `nth` write (1-based) of the next write operation fail; that operation
    /// leaves every table untouched. The fault is consumed by the next mutating call even
    /// when that call returns before writing anything.
    pub async fn fail_on_write(&self, nth: usize) {
        self.state.lock().await.fail_on_write = Some(nth);
    }

    pub async fn committed_writes(&self) -> usize {
        self.state.lock().await.committed_writes
    }

    pub async fn seed_order(&self, order_id: i32, total_amount: Decimal) -> OrderEntity {
        let now = Utc::now();
        let order = OrderEntity {
            id: order_id,
            user_id: 1,
            status: OrderStatus::Pending.to_string(),
            total_amount,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .await
            .tables
            .orders
            .insert(order_id, order.clone());
        order
    }

    /// Adds an unconfirmed payment record, as checkout does before the push is initiated.
    pub async fn seed_payment(&self, order_id: i32, amount: Decimal) -> PaymentEntity {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        state.tables.next_payment_id += 1;
        let payment = PaymentEntity {
            id: state.tables.next_payment_id,
            order_id,
            amount,
            payment_method: MPESA_PAYMENT_METHOD.to_string(),
            is_confirmed: false,
            confirmed_at: None,
            mpesa_code: None,
            created_at: now,
            updated_at: now,
        };
        state.tables.payments.push(payment.clone());
        payment
    }

    /// Inserts a ledger row verbatim, bypassing write accounting.
    pub async fn seed_transaction(&self, mut entity: MpesaTransactionEntity) -> i32 {
        let mut state = self.state.lock().await;
        state.tables.next_transaction_id += 1;
        entity.id = state.tables.next_transaction_id;
        state.tables.transactions.push(entity);
        state.tables.next_transaction_id
    }

    pub async fn transaction(&self, checkout_request_id: &str) -> Option<MpesaTransactionEntity> {
        self.state
            .lock()
            .await
            .tables
            .transactions
            .iter()
            .find(|tx| tx.checkout_request_id == checkout_request_id)
            .cloned()
    }

    pub async fn order(&self, order_id: i32) -> Option<OrderEntity> {
        self.state.lock().await.tables.orders.get(&order_id).cloned()
    }

    pub async fn payments_for_order(&self, order_id: i32) -> Vec<PaymentEntity> {
        self.state
            .lock()
            .await
            .tables
            .payments
            .iter()
            .filter(|payment| payment.order_id == order_id)
            .cloned()
            .collect()
    }
}

fn position_of(tables: &Tables, checkout_request_id: &str) -> Option<usize> {
    tables
        .transactions
        .iter()
        .position(|tx| tx.checkout_request_id == checkout_request_id)
}

#[async_trait]
impl MpesaTransactionRepository for InMemoryPaymentStore {
    async fn insert_pending(&self, insert_entity: InsertMpesaTransactionEntity) -> Result<i32> {
        let mut state = self.state.lock().await;
        let fail_on_write = state.fail_on_write.take();
        if position_of(&state.tables, &insert_entity.checkout_request_id).is_some() {
            bail!(
                "duplicate checkout_request_id {}",
                insert_entity.checkout_request_id
            );
        }

        let mut staged = StagedWrites::begin(&state.tables, fail_on_write);
        staged.record_write()?;
        staged.tables.next_transaction_id += 1;
        let id = staged.tables.next_transaction_id;
        staged.tables.transactions.push(MpesaTransactionEntity {
            id,
            order_id: insert_entity.order_id,
            checkout_request_id: insert_entity.checkout_request_id,
            merchant_request_id: insert_entity.merchant_request_id,
            phone_number: insert_entity.phone_number,
            amount: insert_entity.amount,
            status: insert_entity.status,
            result_code: None,
            result_desc: None,
            mpesa_receipt_number: None,
            transaction_date: None,
            created_at: insert_entity.created_at,
            updated_at: insert_entity.updated_at,
        });
        staged.commit(&mut state);

        Ok(id)
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<MpesaTransactionEntity>> {
        Ok(self.transaction(checkout_request_id).await)
    }

    async fn list_for_order(&self, order_id: i32) -> Result<Vec<MpesaTransactionEntity>> {
        let state = self.state.lock().await;
        let mut results: Vec<MpesaTransactionEntity> = state
            .tables
            .transactions
            .iter()
            .filter(|tx| tx.order_id == order_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(results)
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MpesaTransactionEntity>> {
        let state = self.state.lock().await;
        let mut results: Vec<MpesaTransactionEntity> = state
            .tables
            .transactions
            .iter()
            .filter(|tx| !tx.is_terminal() && tx.created_at < created_before)
            .cloned()
            .collect();
        results.sort_by_key(|tx| tx.created_at);
        results.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(results)
    }

    async fn complete_transaction(
        &self,
        model: CompleteTransactionModel,
    ) -> Result<SettlementOutcome> {
        let mut state = self.state.lock().await;
        let fail_on_write = state.fail_on_write.take();
        let Some(index) = position_of(&state.tables, &model.checkout_request_id) else {
            return Ok(SettlementOutcome::NotFound);
        };
        let current = &state.tables.transactions[index];
        if current.is_terminal() {
            return Ok(SettlementOutcome::AlreadyTerminal(current.clone()));
        }
        let order_id = current.order_id;
        if !state.tables.orders.contains_key(&order_id) {
            bail!("order {order_id} not found");
        }

        let mut staged = StagedWrites::begin(&state.tables, fail_on_write);
        let now = model.confirmed_at;

        staged.record_write()?;
        let completed = {
            let tx = &mut staged.tables.transactions[index];
            tx.status = MpesaTransactionStatus::Completed.to_string();
            tx.result_code = Some(model.result_code.clone());
            tx.result_desc = Some(model.result_desc.clone());
            tx.mpesa_receipt_number = model.mpesa_receipt_number.clone();
            tx.transaction_date = model.transaction_date;
            tx.updated_at = now;
            tx.clone()
        };

        staged.record_write()?;
        let mut confirmed_rows = 0;
        for payment in staged
            .tables
            .payments
            .iter_mut()
            .filter(|payment| payment.order_id == order_id)
        {
            payment.is_confirmed = true;
            payment.confirmed_at = Some(model.confirmed_at);
            payment.mpesa_code = model.mpesa_receipt_number.clone();
            payment.updated_at = now;
            confirmed_rows += 1;
        }
        if confirmed_rows == 0 {
            staged.tables.next_payment_id += 1;
            let id = staged.tables.next_payment_id;
            staged.tables.payments.push(PaymentEntity {
                id,
                order_id,
                amount: completed.amount,
                payment_method: MPESA_PAYMENT_METHOD.to_string(),
                is_confirmed: true,
                confirmed_at: Some(model.confirmed_at),
                mpesa_code: model.mpesa_receipt_number.clone(),
                created_at: now,
                updated_at: now,
            });
        }

        staged.record_write()?;
        let order = staged
            .tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| anyhow!("order {order_id} not found"))?;
        order.status = OrderStatus::Processing.to_string();
        order.updated_at = now;

        staged.commit(&mut state);
        Ok(SettlementOutcome::Applied(completed))
    }

    async fn fail_transaction(&self, model: FailTransactionModel) -> Result<SettlementOutcome> {
        let mut state = self.state.lock().await;
        let fail_on_write = state.fail_on_write.take();
        let Some(index) = position_of(&state.tables, &model.checkout_request_id) else {
            return Ok(SettlementOutcome::NotFound);
        };
        let current = &state.tables.transactions[index];
        if current.is_terminal() {
            return Ok(SettlementOutcome::AlreadyTerminal(current.clone()));
        }
        let order_id = current.order_id;
        if !state.tables.orders.contains_key(&order_id) {
            bail!("order {order_id} not found");
        }

        let mut staged = StagedWrites::begin(&state.tables, fail_on_write);
        let now = model.failed_at;

        staged.record_write()?;
        let failed = {
            let tx = &mut staged.tables.transactions[index];
            tx.status = model.status.to_string();
            tx.result_code = Some(model.result_code.clone());
            tx.result_desc = Some(model.result_desc.clone());
            tx.updated_at = now;
            tx.clone()
        };

        staged.record_write()?;
        let order = staged
            .tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| anyhow!("order {order_id} not found"))?;
        order.status = OrderStatus::Failed.to_string();
        order.notes = Some(append_order_note(order.notes.as_deref(), &model.order_note));
        order.updated_at = now;

        staged.commit(&mut state);
        Ok(SettlementOutcome::Applied(failed))
    }
}

#[async_trait]
impl OrderRepository for InMemoryPaymentStore {
    async fn find_by_id(&self, order_id: i32) -> Result<Option<OrderEntity>> {
        Ok(self.order(order_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending(order_id: i32, checkout_request_id: &str) -> InsertMpesaTransactionEntity {
        let now = Utc::now();
        InsertMpesaTransactionEntity {
            order_id,
            checkout_request_id: checkout_request_id.to_string(),
            merchant_request_id: "29115-34620561-1".to_string(),
            phone_number: "254712345678".to_string(),
            amount: dec!(1500.00),
            status: MpesaTransactionStatus::Pending.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn completion(checkout_request_id: &str) -> CompleteTransactionModel {
        CompleteTransactionModel {
            checkout_request_id: checkout_request_id.to_string(),
            result_code: "0".to_string(),
            result_desc: "The service request is processed successfully.".to_string(),
            mpesa_receipt_number: Some("NLJ7RT61SV".to_string()),
            transaction_date: None,
            confirmed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn completion_confirms_existing_payment_record() {
        let store = InMemoryPaymentStore::new();
        store.seed_order(42, dec!(1500.00)).await;
        store.seed_payment(42, dec!(1500.00)).await;
        store.insert_pending(pending(42, "ws_CO_1")).await.unwrap();

        let outcome = store.complete_transaction(completion("ws_CO_1")).await.unwrap();

        assert!(matches!(outcome, SettlementOutcome::Applied(_)));
        let payments = store.payments_for_order(42).await;
        assert_eq!(payments.len(), 1);
        assert!(payments[0].is_confirmed);
        assert_eq!(payments[0].mpesa_code.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(store.committed_writes().await, 4);
    }

    #[tokio::test]
    async fn completion_creates_payment_record_when_missing() {
        let store = InMemoryPaymentStore::new();
        store.seed_order(42, dec!(1500.00)).await;
        store.insert_pending(pending(42, "ws_CO_1")).await.unwrap();

        store.complete_transaction(completion("ws_CO_1")).await.unwrap();

        let payments = store.payments_for_order(42).await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount, dec!(1500.00));
        assert_eq!(payments[0].payment_method, MPESA_PAYMENT_METHOD);
    }

    #[tokio::test]
    async fn injected_failure_rolls_back_every_table() {
        let store = InMemoryPaymentStore::new();
        store.seed_order(42, dec!(1500.00)).await;
        store.seed_payment(42, dec!(1500.00)).await;
        store.insert_pending(pending(42, "ws_CO_1")).await.unwrap();
        store.fail_on_write(2).await;

        let result = store.complete_transaction(completion("ws_CO_1")).await;

        assert!(result.is_err());
        let tx = store.transaction("ws_CO_1").await.unwrap();
        assert_eq!(tx.status(), MpesaTransactionStatus::Pending);
        assert!(!store.payments_for_order(42).await[0].is_confirmed);
        assert_eq!(store.order(42).await.unwrap().status, "pending");
        assert_eq!(store.committed_writes().await, 1);

        // the injected fault is spent; a retry goes through
        let retried = store.complete_transaction(completion("ws_CO_1")).await.unwrap();
        assert!(matches!(retried, SettlementOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn second_settlement_reports_already_terminal() {
        let store = InMemoryPaymentStore::new();
        store.seed_order(42, dec!(1500.00)).await;
        store.insert_pending(pending(42, "ws_CO_1")).await.unwrap();
        store.complete_transaction(completion("ws_CO_1")).await.unwrap();
        let writes = store.committed_writes().await;

        let outcome = store
            .fail_transaction(FailTransactionModel {
                checkout_request_id: "ws_CO_1".to_string(),
                status: MpesaTransactionStatus::Failed,
                result_code: "1".to_string(),
                result_desc: "Insufficient funds".to_string(),
                order_note: "payment failed".to_string(),
                failed_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(matches!(outcome, SettlementOutcome::AlreadyTerminal(_)));
        assert_eq!(store.committed_writes().await, writes);
    }

    #[tokio::test]
    async fn fault_is_spent_by_a_call_that_returns_early() {
        let store = InMemoryPaymentStore::new();
        store.seed_order(42, dec!(1500.00)).await;
        store.insert_pending(pending(42, "ws_CO_1")).await.unwrap();
        store.fail_on_write(1).await;

        let outcome = store.complete_transaction(completion("ws_unknown")).await.unwrap();
        assert!(matches!(outcome, SettlementOutcome::NotFound));

        let outcome = store.complete_transaction(completion("ws_CO_1")).await.unwrap();
        assert!(matches!(outcome, SettlementOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn fault_is_spent_by_a_rejected_duplicate_insert() {
        let store = InMemoryPaymentStore::new();
        store.insert_pending(pending(42, "ws_CO_1")).await.unwrap();
        store.fail_on_write(1).await;

        assert!(store.insert_pending(pending(42, "ws_CO_1")).await.is_err());
        assert!(store.insert_pending(pending(42, "ws_CO_2")).await.is_ok());
    }

    #[tokio::test]
    async fn settlement_stamps_rows_with_the_model_timestamp() {
        let store = InMemoryPaymentStore::new();
        store.seed_order(42, dec!(1500.00)).await;
        store.insert_pending(pending(42, "ws_CO_1")).await.unwrap();
        let failed_at = Utc::now() - chrono::Duration::minutes(5);

        store
            .fail_transaction(FailTransactionModel {
                checkout_request_id: "ws_CO_1".to_string(),
                status: MpesaTransactionStatus::Failed,
                result_code: "TIMEOUT".to_string(),
                result_desc: "no callback received".to_string(),
                order_note: "payment timed out".to_string(),
                failed_at,
            })
            .await
            .unwrap();

        assert_eq!(store.transaction("ws_CO_1").await.unwrap().updated_at, failed_at);
        assert_eq!(store.order(42).await.unwrap().updated_at, failed_at);
    }

    #[tokio::test]
    async fn duplicate_checkout_request_id_is_rejected() {
        let store = InMemoryPaymentStore::new();
        store.insert_pending(pending(42, "ws_CO_1")).await.unwrap();

        assert!(store.insert_pending(pending(42, "ws_CO_1")).await.is_err());
    }
}
