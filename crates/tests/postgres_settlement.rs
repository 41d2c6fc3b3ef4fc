//! Runs against a migrated database from `DATABASE_URL`:
//! `cargo test -p crates --test postgres_settlement -- --ignored`

use std::sync::Arc;

use chrono::Utc;
use crates::{
    domain::{
        entities::mpesa_transactions::InsertMpesaTransactionEntity,
        repositories::mpesa_transactions::MpesaTransactionRepository,
        value_objects::{
            enums::mpesa_transaction_statuses::MpesaTransactionStatus,
            mpesa_transactions::{CompleteTransactionModel, SettlementOutcome},
        },
    },
    infra::db::{
        postgres::{
            postgres_connection::{PgPoolSquad, establish_connection},
            schema::orders,
        },
        repositories::mpesa_transactions::MpesaTransactionPostgres,
    },
};
use diesel::prelude::*;
use rust_decimal_macros::dec;

fn pool() -> Arc<PgPoolSquad> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    Arc::new(establish_connection(&database_url, 4).expect("pool"))
}

fn insert_order(db_pool: &PgPoolSquad) -> i32 {
    let mut conn = db_pool.get().expect("connection");
    diesel::insert_into(orders::table)
        .values((
            orders::user_id.eq(1),
            orders::status.eq("pending"),
            orders::total_amount.eq(dec!(1000)),
            orders::created_at.eq(Utc::now()),
            orders::updated_at.eq(Utc::now()),
        ))
        .returning(orders::id)
        .get_result(&mut conn)
        .expect("insert order")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "needs a migrated Postgres database"]
async fn concurrent_duplicate_callbacks_settle_once() {
    let db_pool = pool();
    let order_id = insert_order(&db_pool);
    let checkout_request_id = format!("ws_it_{}", Utc::now().timestamp_nanos_opt().unwrap_or(0));
    let repository = Arc::new(MpesaTransactionPostgres::new(Arc::clone(&db_pool)));

    repository
        .insert_pending(InsertMpesaTransactionEntity {
            order_id,
            checkout_request_id: checkout_request_id.clone(),
            merchant_request_id: "29115-34620561-1".to_string(),
            phone_number: "254712345678".to_string(),
            amount: dec!(1000),
            status: MpesaTransactionStatus::Pending.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    let model = CompleteTransactionModel {
        checkout_request_id: checkout_request_id.clone(),
        result_code: "0".to_string(),
        result_desc: "The service request is processed successfully.".to_string(),
        mpesa_receipt_number: Some("NLJ7RT61SV".to_string()),
        transaction_date: None,
        confirmed_at: Utc::now(),
    };

    let first = tokio::spawn({
        let repository = Arc::clone(&repository);
        let model = model.clone();
        async move { repository.complete_transaction(model).await }
    });
    let second = tokio::spawn({
        let repository = Arc::clone(&repository);
        async move { repository.complete_transaction(model).await }
    });

    let outcomes = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
    let applied = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, SettlementOutcome::Applied(_)))
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, SettlementOutcome::AlreadyTerminal(_)))
        .count();
    assert_eq!((applied, duplicates), (1, 1));

    let mut conn = db_pool.get().unwrap();
    let status: String = orders::table
        .find(order_id)
        .select(orders::status)
        .first(&mut conn)
        .unwrap();
    assert_eq!(status, "processing");
}

#[tokio::test]
#[ignore = "needs a migrated Postgres database"]
async fn unknown_checkout_request_id_is_not_found() {
    let repository = MpesaTransactionPostgres::new(pool());

    let outcome = repository
        .complete_transaction(CompleteTransactionModel {
            checkout_request_id: "ws_never_issued".to_string(),
            result_code: "0".to_string(),
            result_desc: "ok".to_string(),
            mpesa_receipt_number: None,
            transaction_date: None,
            confirmed_at: Utc::now(),
        })
        .await
        .unwrap();

    assert_eq!(outcome, SettlementOutcome::NotFound);
}
