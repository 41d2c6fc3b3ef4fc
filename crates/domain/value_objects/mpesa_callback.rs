use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const RESULT_CODE_SUCCESS: i64 = 0;
pub const RESULT_CODE_CANCELLED_BY_USER: i64 = 1032;

const TRANSACTION_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

// Wire shape: { Body: { stkCallback: { ... } } }
#[derive(Debug, Deserialize)]
struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    body: StkCallbackBody,
}

#[derive(Debug, Deserialize)]
struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode", deserialize_with = "deserialize_result_code")]
    result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
struct CallbackItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<Value>,
}

/// The provider sends `ResultCode` as a number; some gateways relay it as a string.
fn deserialize_result_code<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("ResultCode is not an integer")),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| serde::de::Error::custom("ResultCode is not an integer")),
        other => Err(serde::de::Error::custom(format!(
            "unexpected ResultCode: {other}"
        ))),
    }
}

/// Fields carried in `CallbackMetadata.Item`. None of them is guaranteed to be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallbackMetadataFields {
    pub amount: Option<Decimal>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<NaiveDateTime>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StkCallbackResult {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_desc: String,
    pub metadata: CallbackMetadataFields,
}

impl StkCallbackResult {
    pub fn is_success(&self) -> bool {
        self.result_code == RESULT_CODE_SUCCESS
    }

    pub fn is_cancelled_by_user(&self) -> bool {
        self.result_code == RESULT_CODE_CANCELLED_BY_USER
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCallback {
    Malformed(String),
    Valid(StkCallbackResult),
}

impl ParsedCallback {
    pub fn parse(body: &[u8]) -> Self {
        let envelope: StkCallbackEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(err) => return ParsedCallback::Malformed(err.to_string()),
        };

        let callback = envelope.body.stk_callback;
        let checkout_request_id = callback.checkout_request_id.trim().to_string();
        if checkout_request_id.is_empty() {
            return ParsedCallback::Malformed("CheckoutRequestID is empty".to_string());
        }

        let metadata = callback
            .callback_metadata
            .map(|metadata| extract_metadata(&metadata.items))
            .unwrap_or_default();

        ParsedCallback::Valid(StkCallbackResult {
            merchant_request_id: callback.merchant_request_id,
            checkout_request_id,
            result_code: callback.result_code,
            result_desc: callback.result_desc,
            metadata,
        })
    }
}

fn extract_metadata(items: &[CallbackItem]) -> CallbackMetadataFields {
    let mut fields = CallbackMetadataFields::default();

    for item in items {
        let Some(value) = item.value.as_ref().and_then(value_to_string) else {
            continue;
        };
        match item.name.as_str() {
            "Amount" => fields.amount = Decimal::from_str(&value).ok(),
            "MpesaReceiptNumber" => fields.mpesa_receipt_number = Some(value),
            "TransactionDate" => {
                fields.transaction_date =
                    NaiveDateTime::parse_from_str(&value, TRANSACTION_DATE_FORMAT).ok()
            }
            "PhoneNumber" => fields.phone_number = Some(value),
            _ => {}
        }
    }

    fields
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}
