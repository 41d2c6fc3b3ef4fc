use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use crate::domain::value_objects::enums::mpesa_transaction_statuses::MpesaTransactionStatus;
use crate::infra::db::postgres::schema::mpesa_transactions;

/// One push-payment attempt, keyed by the provider's checkout request id.
#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = mpesa_transactions)]
pub struct MpesaTransactionEntity {
    pub id: i32,
    pub order_id: i32,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub phone_number: String,
    pub amount: Decimal,
    pub status: String,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<NaiveDateTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MpesaTransactionEntity {
    pub fn status(&self) -> MpesaTransactionStatus {
        MpesaTransactionStatus::from_str(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = mpesa_transactions)]
pub struct InsertMpesaTransactionEntity {
    pub order_id: i32,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub phone_number: String,
    pub amount: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
