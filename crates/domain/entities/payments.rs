use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use crate::infra::db::postgres::schema::payments;

pub const MPESA_PAYMENT_METHOD: &str = "mpesa";

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payments)]
pub struct PaymentEntity {
    pub id: i32,
    pub order_id: i32,
    pub amount: Decimal,
    pub payment_method: String,
    pub is_confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub mpesa_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payments)]
pub struct InsertPaymentEntity {
    pub order_id: i32,
    pub amount: Decimal,
    pub payment_method: String,
    pub is_confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub mpesa_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
