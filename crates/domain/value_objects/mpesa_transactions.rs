use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    entities::mpesa_transactions::MpesaTransactionEntity,
    value_objects::enums::mpesa_transaction_statuses::MpesaTransactionStatus,
};

/// Terminal success transition: ledger -> completed, payment -> confirmed, order -> processing.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteTransactionModel {
    pub checkout_request_id: String,
    pub result_code: String,
    pub result_desc: String,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<NaiveDateTime>,
    pub confirmed_at: DateTime<Utc>,
}

/// Terminal failure transition: ledger -> failed/cancelled, order -> failed with a note.
#[derive(Debug, Clone, PartialEq)]
pub struct FailTransactionModel {
    pub checkout_request_id: String,
    pub status: MpesaTransactionStatus,
    pub result_code: String,
    pub result_desc: String,
    pub order_note: String,
    pub failed_at: DateTime<Utc>,
}

/// What an atomic terminal transition observed once the ledger row was locked.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Applied(MpesaTransactionEntity),
    AlreadyTerminal(MpesaTransactionEntity),
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MpesaTransactionDto {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub order_id: i32,
    pub phone_number: String,
    pub amount: Decimal,
    pub status: MpesaTransactionStatus,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<NaiveDateTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MpesaTransactionEntity> for MpesaTransactionDto {
    fn from(entity: MpesaTransactionEntity) -> Self {
        Self {
            status: entity.status(),
            checkout_request_id: entity.checkout_request_id,
            merchant_request_id: entity.merchant_request_id,
            order_id: entity.order_id,
            phone_number: entity.phone_number,
            amount: entity.amount,
            result_code: entity.result_code,
            result_desc: entity.result_desc,
            receipt_number: entity.mpesa_receipt_number,
            transaction_date: entity.transaction_date,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

/// Body of a push-payment request from the checkout flow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentModel {
    pub phone_number: String,
    pub amount: Decimal,
    pub order_id: i32,
    #[serde(default)]
    pub account_reference: Option<String>,
}

/// The push was accepted by the provider; says nothing about the payment itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiatedPaymentDto {
    #[serde(rename = "checkoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "merchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "customerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusDto {
    pub checkout_request_id: String,
    pub status: MpesaTransactionStatus,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,
    /// Raw provider answer; only set when the ledger entry is still pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<Value>,
}

impl From<MpesaTransactionEntity> for PaymentStatusDto {
    fn from(entity: MpesaTransactionEntity) -> Self {
        Self {
            status: entity.status(),
            checkout_request_id: entity.checkout_request_id,
            result_code: entity.result_code,
            result_desc: entity.result_desc,
            receipt_number: entity.mpesa_receipt_number,
            provider_response: None,
        }
    }
}
