use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{insert_into, prelude::*, update};
use std::sync::Arc;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{mpesa_transactions, orders, payments},
    },
};
use domain::{
    entities::{
        mpesa_transactions::{InsertMpesaTransactionEntity, MpesaTransactionEntity},
        orders::{OrderEntity, append_order_note},
        payments::{InsertPaymentEntity, MPESA_PAYMENT_METHOD},
    },
    repositories::mpesa_transactions::MpesaTransactionRepository,
    value_objects::{
        enums::{
            mpesa_transaction_statuses::MpesaTransactionStatus, order_statuses::OrderStatus,
        },
        mpesa_transactions::{CompleteTransactionModel, FailTransactionModel, SettlementOutcome},
    },
};

pub struct MpesaTransactionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl MpesaTransactionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

/// Loads the ledger row with `FOR UPDATE`; concurrent settlements of the same checkout id
/// queue here until the first one commits.
fn lock_by_checkout_request_id(
    conn: &mut PgConnection,
    checkout_request_id: &str,
) -> QueryResult<Option<MpesaTransactionEntity>> {
    mpesa_transactions::table
        .filter(mpesa_transactions::checkout_request_id.eq(checkout_request_id))
        .select(MpesaTransactionEntity::as_select())
        .for_update()
        .first::<MpesaTransactionEntity>(conn)
        .optional()
}

fn lock_order(conn: &mut PgConnection, order_id: i32) -> QueryResult<OrderEntity> {
    orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .for_update()
        .first::<OrderEntity>(conn)
}

#[async_trait]
impl MpesaTransactionRepository for MpesaTransactionPostgres {
    async fn insert_pending(&self, insert_entity: InsertMpesaTransactionEntity) -> Result<i32> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let id = insert_into(mpesa_transactions::table)
            .values(&insert_entity)
            .returning(mpesa_transactions::id)
            .get_result::<i32>(&mut conn)?;

        Ok(id)
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<MpesaTransactionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = mpesa_transactions::table
            .filter(mpesa_transactions::checkout_request_id.eq(checkout_request_id))
            .select(MpesaTransactionEntity::as_select())
            .first::<MpesaTransactionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn list_for_order(&self, order_id: i32) -> Result<Vec<MpesaTransactionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = mpesa_transactions::table
            .filter(mpesa_transactions::order_id.eq(order_id))
            .order((
                mpesa_transactions::created_at.desc(),
                mpesa_transactions::id.desc(),
            ))
            .select(MpesaTransactionEntity::as_select())
            .load::<MpesaTransactionEntity>(&mut conn)?;

        Ok(results)
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MpesaTransactionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = mpesa_transactions::table
            .filter(mpesa_transactions::status.eq(MpesaTransactionStatus::Pending.as_str()))
            .filter(mpesa_transactions::created_at.lt(created_before))
            .order(mpesa_transactions::created_at.asc())
            .limit(limit)
            .select(MpesaTransactionEntity::as_select())
            .load::<MpesaTransactionEntity>(&mut conn)?;

        Ok(results)
    }

    async fn complete_transaction(
        &self,
        model: CompleteTransactionModel,
    ) -> Result<SettlementOutcome> {
        let mut pooled = Arc::clone(&self.db_pool).get()?;
        let conn: &mut PgConnection = &mut pooled;

        let outcome = conn.transaction::<SettlementOutcome, anyhow::Error, _>(|conn| {
            let Some(transaction) = lock_by_checkout_request_id(conn, &model.checkout_request_id)?
            else {
                return Ok(SettlementOutcome::NotFound);
            };
            if transaction.is_terminal() {
                return Ok(SettlementOutcome::AlreadyTerminal(transaction));
            }

            let order = lock_order(conn, transaction.order_id)?;
            let now = model.confirmed_at;

            let completed = update(mpesa_transactions::table.find(transaction.id))
                .set((
                    mpesa_transactions::status.eq(MpesaTransactionStatus::Completed.as_str()),
                    mpesa_transactions::result_code.eq(Some(model.result_code.as_str())),
                    mpesa_transactions::result_desc.eq(Some(model.result_desc.as_str())),
                    mpesa_transactions::mpesa_receipt_number
                        .eq(model.mpesa_receipt_number.as_deref()),
                    mpesa_transactions::transaction_date.eq(model.transaction_date),
                    mpesa_transactions::updated_at.eq(now),
                ))
                .returning(MpesaTransactionEntity::as_select())
                .get_result::<MpesaTransactionEntity>(conn)?;

            let confirmed_rows = update(payments::table.filter(payments::order_id.eq(order.id)))
                .set((
                    payments::is_confirmed.eq(true),
                    payments::confirmed_at.eq(Some(model.confirmed_at)),
                    payments::mpesa_code.eq(model.mpesa_receipt_number.as_deref()),
                    payments::updated_at.eq(now),
                ))
                .execute(conn)?;

            if confirmed_rows == 0 {
                insert_into(payments::table)
                    .values(&InsertPaymentEntity {
                        order_id: order.id,
                        amount: completed.amount,
                        payment_method: MPESA_PAYMENT_METHOD.to_string(),
                        is_confirmed: true,
                        confirmed_at: Some(model.confirmed_at),
                        mpesa_code: model.mpesa_receipt_number.clone(),
                        created_at: now,
                        updated_at: now,
                    })
                    .execute(conn)?;
            }

            update(orders::table.find(order.id))
                .set((
                    orders::status.eq(OrderStatus::Processing.to_string()),
                    orders::updated_at.eq(now),
                ))
                .execute(conn)?;

            Ok(SettlementOutcome::Applied(completed))
        })?;

        Ok(outcome)
    }

    async fn fail_transaction(&self, model: FailTransactionModel) -> Result<SettlementOutcome> {
        let mut pooled = Arc::clone(&self.db_pool).get()?;
        let conn: &mut PgConnection = &mut pooled;

        let outcome = conn.transaction::<SettlementOutcome, anyhow::Error, _>(|conn| {
            let Some(transaction) = lock_by_checkout_request_id(conn, &model.checkout_request_id)?
            else {
                return Ok(SettlementOutcome::NotFound);
            };
            if transaction.is_terminal() {
                return Ok(SettlementOutcome::AlreadyTerminal(transaction));
            }

            let order = lock_order(conn, transaction.order_id)?;
            let now = model.failed_at;

            let failed = update(mpesa_transactions::table.find(transaction.id))
                .set((
                    mpesa_transactions::status.eq(model.status.as_str()),
                    mpesa_transactions::result_code.eq(Some(model.result_code.as_str())),
                    mpesa_transactions::result_desc.eq(Some(model.result_desc.as_str())),
                    mpesa_transactions::updated_at.eq(now),
                ))
                .returning(MpesaTransactionEntity::as_select())
                .get_result::<MpesaTransactionEntity>(conn)?;

            let notes = append_order_note(order.notes.as_deref(), &model.order_note);
            update(orders::table.find(order.id))
                .set((
                    orders::status.eq(OrderStatus::Failed.to_string()),
                    orders::notes.eq(Some(notes)),
                    orders::updated_at.eq(now),
                ))
                .execute(conn)?;

            Ok(SettlementOutcome::Applied(failed))
        })?;

        Ok(outcome)
    }
}
