use std::time::Duration;

use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Local;
use reqwest::{
    StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::domain::value_objects::phone_numbers::normalize_phone_number;

pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
pub const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

const TOKEN_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const STK_QUERY_PATH: &str = "/mpesa/stkpushquery/v1/query";

/// Picks the provider host for `MPESA_ENVIRONMENT`; anything but `production` is sandbox.
pub fn base_url_for(environment: &str) -> &'static str {
    if environment.eq_ignore_ascii_case("production") {
        PRODUCTION_BASE_URL
    } else {
        SANDBOX_BASE_URL
    }
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    pub transaction_type: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayAuthError {
    #[error("provider rejected the application credentials (status {status})")]
    Credentials { status: u16 },
    #[error("credential endpoint failed (status {status})")]
    Upstream { status: u16 },
    #[error("credential endpoint unreachable: {0}")]
    Connectivity(String),
    #[error("credential response malformed: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] GatewayAuthError),
    #[error("provider transport failure: {0}")]
    Transport(String),
    #[error("amount {0} cannot be sent as whole currency units")]
    InvalidAmount(Decimal),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushPaymentRequest {
    pub phone_number: String,
    pub amount: Decimal,
    pub order_id: i32,
    pub account_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushPaymentOutcome {
    Accepted {
        checkout_request_id: String,
        merchant_request_id: String,
        customer_message: String,
    },
    Rejected {
        message: String,
        response_code: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusQueryOutcome {
    Answered {
        result_code: Option<String>,
        result_desc: Option<String>,
        raw: Value,
    },
    Failed {
        message: String,
        response_code: Option<String>,
        raw: Value,
    },
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushBody<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'a str,
    amount: i64,
    party_a: String,
    party_b: &'a str,
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: String,
    transaction_desc: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryBody<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<Value>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    customer_message: Option<String>,
}

/// Error envelope the provider uses for non-2xx responses.
#[derive(Debug, Deserialize)]
struct ProviderErrorEnvelope {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// `base64(short_code + passkey + timestamp)`, the per-request password the provider expects.
pub fn build_request_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{short_code}{passkey}{timestamp}"))
}

pub fn generate_timestamp() -> String {
    Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Rounds half away from zero; the provider only accepts whole currency units.
pub fn round_amount(amount: Decimal) -> Result<i64, GatewayError> {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(GatewayError::InvalidAmount(amount))
}

fn build_push_body<'a>(
    config: &'a MpesaConfig,
    request: &PushPaymentRequest,
    timestamp: String,
) -> Result<StkPushBody<'a>, GatewayError> {
    let phone_number = normalize_phone_number(&request.phone_number);

    Ok(StkPushBody {
        business_short_code: &config.short_code,
        password: build_request_password(&config.short_code, &config.passkey, &timestamp),
        timestamp,
        transaction_type: &config.transaction_type,
        amount: round_amount(request.amount)?,
        party_a: phone_number.clone(),
        party_b: &config.short_code,
        phone_number,
        callback_url: &config.callback_url,
        account_reference: request
            .account_reference
            .clone()
            .unwrap_or_else(|| format!("ORDER-{}", request.order_id)),
        transaction_desc: format!("Payment for order {}", request.order_id),
    })
}

fn build_query_body<'a>(
    config: &'a MpesaConfig,
    checkout_request_id: &'a str,
    timestamp: String,
) -> StkQueryBody<'a> {
    StkQueryBody {
        business_short_code: &config.short_code,
        password: build_request_password(&config.short_code, &config.passkey, &timestamp),
        timestamp,
        checkout_request_id,
    }
}

fn value_as_code(value: &Value) -> Option<String> {
    match value {
        Value::String(code) => Some(code.clone()),
        Value::Number(code) => Some(code.to_string()),
        _ => None,
    }
}

fn parse_provider_error(body: &str) -> (Option<String>, Option<String>) {
    match serde_json::from_str::<ProviderErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error_code, envelope.error_message),
        Err(_) => (None, None),
    }
}

fn classify_token_response(status: StatusCode, body: &str) -> Result<String, GatewayAuthError> {
    if status.is_client_error() {
        return Err(GatewayAuthError::Credentials {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        return Err(GatewayAuthError::Upstream {
            status: status.as_u16(),
        });
    }

    let parsed: AccessTokenResponse = serde_json::from_str(body)
        .map_err(|err| GatewayAuthError::MalformedResponse(err.to_string()))?;

    match parsed.access_token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(GatewayAuthError::MalformedResponse(
            "access_token missing".to_string(),
        )),
    }
}

fn classify_push_response(status: StatusCode, body: &str) -> PushPaymentOutcome {
    if !status.is_success() {
        let (response_code, message) = parse_provider_error(body);
        return PushPaymentOutcome::Rejected {
            message: message.unwrap_or_else(|| format!("push request failed with status {status}")),
            response_code,
        };
    }

    let parsed: StkPushResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) => {
            return PushPaymentOutcome::Rejected {
                message: format!("unreadable push response: {err}"),
                response_code: None,
            };
        }
    };

    let response_code = parsed.response_code.as_ref().and_then(value_as_code);
    match (
        response_code.as_deref(),
        parsed.checkout_request_id,
        parsed.merchant_request_id,
    ) {
        (Some("0"), Some(checkout_request_id), Some(merchant_request_id))
            if !checkout_request_id.is_empty() =>
        {
            PushPaymentOutcome::Accepted {
                checkout_request_id,
                merchant_request_id,
                customer_message: parsed.customer_message.unwrap_or_default(),
            }
        }
        _ => PushPaymentOutcome::Rejected {
            message: parsed
                .response_description
                .unwrap_or_else(|| "push request not accepted".to_string()),
            response_code,
        },
    }
}

fn classify_status_response(status: StatusCode, body: &str) -> StatusQueryOutcome {
    let raw: Value = serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()));

    if !status.is_success() {
        let (response_code, message) = parse_provider_error(body);
        return StatusQueryOutcome::Failed {
            message: message.unwrap_or_else(|| format!("status query failed with status {status}")),
            response_code,
            raw,
        };
    }

    StatusQueryOutcome::Answered {
        result_code: raw.get("ResultCode").and_then(value_as_code),
        result_desc: raw
            .get("ResultDesc")
            .and_then(Value::as_str)
            .map(str::to_string),
        raw,
    }
}

/// Provider gateway client. Every call re-acquires a bearer token and none of them retry;
/// transport failures are surfaced to the caller as `GatewayError::Transport`.
pub struct MpesaClient {
    http: reqwest::Client,
    config: MpesaConfig,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    pub async fn acquire_access_token(&self) -> Result<String, GatewayError> {
        let credentials = STANDARD.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));

        let resp = self
            .http
            .get(self.url(TOKEN_PATH))
            .header(AUTHORIZATION, format!("Basic {credentials}"))
            .send()
            .await
            .map_err(|err| {
                error!(error = %err, "mpesa_client: credential endpoint unreachable");
                GatewayAuthError::Connectivity(err.to_string())
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| GatewayAuthError::Connectivity(err.to_string()))?;

        classify_token_response(status, &body).map_err(|err| {
            error!(
                status = %status,
                response_body = %body,
                error = %err,
                "mpesa_client: access token request failed"
            );
            GatewayError::Auth(err)
        })
    }

    pub async fn submit_push_payment(
        &self,
        request: &PushPaymentRequest,
    ) -> Result<PushPaymentOutcome, GatewayError> {
        let body = build_push_body(&self.config, request, generate_timestamp())?;
        let amount = body.amount;
        let access_token = self.acquire_access_token().await?;

        let resp = self
            .http
            .post(self.url(STK_PUSH_PATH))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                error!(
                    order_id = request.order_id,
                    error = %err,
                    "mpesa_client: push request transport failure"
                );
                GatewayError::from(err)
            })?;

        let status = resp.status();
        let response_body = resp.text().await?;
        let outcome = classify_push_response(status, &response_body);

        match &outcome {
            PushPaymentOutcome::Accepted {
                checkout_request_id,
                merchant_request_id,
                ..
            } => info!(
                order_id = request.order_id,
                checkout_request_id = %checkout_request_id,
                merchant_request_id = %merchant_request_id,
                amount,
                "mpesa_client: push request accepted"
            ),
            PushPaymentOutcome::Rejected {
                message,
                response_code,
            } => error!(
                order_id = request.order_id,
                status = %status,
                response_code = ?response_code,
                message = %message,
                response_body = %response_body,
                "mpesa_client: push request rejected"
            ),
        }

        Ok(outcome)
    }

    pub async fn query_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<StatusQueryOutcome, GatewayError> {
        let access_token = self.acquire_access_token().await?;
        let body = build_query_body(&self.config, checkout_request_id, generate_timestamp());

        let resp = self
            .http
            .post(self.url(STK_QUERY_PATH))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                error!(
                    checkout_request_id,
                    error = %err,
                    "mpesa_client: status query transport failure"
                );
                GatewayError::from(err)
            })?;

        let status = resp.status();
        let response_body = resp.text().await?;
        let outcome = classify_status_response(status, &response_body);

        if let StatusQueryOutcome::Failed {
            message,
            response_code,
            ..
        } = &outcome
        {
            warn!(
                checkout_request_id,
                status = %status,
                response_code = ?response_code,
                message = %message,
                response_body = %response_body,
                "mpesa_client: status query failed"
            );
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn request_password_encodes_short_code_passkey_and_timestamp() {
        let password = build_request_password(
            "174379",
            "bfb279f9aa9bdbcf158e97dd71a467cd2e0c893059b10f78e6b72ada1ed2c919",
            "20160216165627",
        );

        assert_eq!(
            password,
            "MTc0Mzc5YmZiMjc5ZjlhYTliZGJjZjE1OGU5N2RkNzFhNDY3Y2QyZTBjODkzMDU5YjEwZjc4ZTZiNzJhZGExZWQyYzkxOTIwMTYwMjE2MTY1NjI3"
        );
    }

    #[test]
    fn timestamp_is_fourteen_digits() {
        let timestamp = generate_timestamp();
        assert_eq!(timestamp.len(), 14);
        assert!(timestamp.chars().all(|c| c.is_ascii_digit()));
    }

    fn config() -> MpesaConfig {
        MpesaConfig {
            base_url: SANDBOX_BASE_URL.to_string(),
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            short_code: "174379".to_string(),
            passkey: "bfb279f9aa9bdbcf158e97dd71a467cd2e0c893059b10f78e6b72ada1ed2c919".to_string(),
            callback_url: "https://shop.example.com/api/v1/mpesa/callback".to_string(),
            transaction_type: "CustomerPayBillOnline".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn amounts_round_to_whole_units() {
        assert_eq!(round_amount(dec!(1000)), Ok(1000));
        assert_eq!(round_amount(dec!(999.50)), Ok(1000));
        assert_eq!(round_amount(dec!(1000.49)), Ok(1000));
        assert_eq!(round_amount(dec!(2.5)), Ok(3));
    }

    #[test]
    fn amount_beyond_i64_is_an_error_not_zero() {
        let amount = Decimal::MAX;
        assert_eq!(round_amount(amount), Err(GatewayError::InvalidAmount(amount)));
    }

    #[test]
    fn push_body_carries_normalized_phone_and_whole_amount() {
        let config = config();
        let request = PushPaymentRequest {
            phone_number: "0712345678".to_string(),
            amount: dec!(999.50),
            order_id: 42,
            account_reference: None,
        };

        let body = build_push_body(&config, &request, "20160216165627".to_string()).unwrap();

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "BusinessShortCode": "174379",
                "Password": "MTc0Mzc5YmZiMjc5ZjlhYTliZGJjZjE1OGU5N2RkNzFhNDY3Y2QyZTBjODkzMDU5YjEwZjc4ZTZiNzJhZGExZWQyYzkxOTIwMTYwMjE2MTY1NjI3",
                "Timestamp": "20160216165627",
                "TransactionType": "CustomerPayBillOnline",
                "Amount": 1000,
                "PartyA": "254712345678",
                "PartyB": "174379",
                "PhoneNumber": "254712345678",
                "CallBackURL": "https://shop.example.com/api/v1/mpesa/callback",
                "AccountReference": "ORDER-42",
                "TransactionDesc": "Payment for order 42"
            })
        );
    }

    #[test]
    fn push_body_keeps_caller_account_reference() {
        let config = config();
        let request = PushPaymentRequest {
            phone_number: "+254112345678".to_string(),
            amount: dec!(250),
            order_id: 43,
            account_reference: Some("INV-2024-0043".to_string()),
        };

        let body = serde_json::to_value(
            build_push_body(&config, &request, "20240101120000".to_string()).unwrap(),
        )
        .unwrap();

        assert_eq!(body["AccountReference"], "INV-2024-0043");
        assert_eq!(body["PartyA"], "254112345678");
        assert_eq!(body["Amount"], 250);
    }

    #[test]
    fn push_body_refuses_unrepresentable_amount() {
        let config = config();
        let request = PushPaymentRequest {
            phone_number: "0712345678".to_string(),
            amount: Decimal::MAX,
            order_id: 42,
            account_reference: None,
        };

        assert!(matches!(
            build_push_body(&config, &request, "20160216165627".to_string()),
            Err(GatewayError::InvalidAmount(_))
        ));
    }

    #[test]
    fn query_body_carries_checkout_request_id_and_password() {
        let config = config();

        let body = build_query_body(&config, "ws_CO_191220191020363925", "20160216165627".to_string());

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "BusinessShortCode": "174379",
                "Password": "MTc0Mzc5YmZiMjc5ZjlhYTliZGJjZjE1OGU5N2RkNzFhNDY3Y2QyZTBjODkzMDU5YjEwZjc4ZTZiNzJhZGExZWQyYzkxOTIwMTYwMjE2MTY1NjI3",
                "Timestamp": "20160216165627",
                "CheckoutRequestID": "ws_CO_191220191020363925"
            })
        );
    }

    #[test]
    fn environment_selects_base_url() {
        assert_eq!(base_url_for("production"), PRODUCTION_BASE_URL);
        assert_eq!(base_url_for("sandbox"), SANDBOX_BASE_URL);
        assert_eq!(base_url_for(""), SANDBOX_BASE_URL);
    }

    #[test]
    fn token_response_errors_are_distinguished() {
        assert_eq!(
            classify_token_response(StatusCode::BAD_REQUEST, "{}"),
            Err(GatewayAuthError::Credentials { status: 400 })
        );
        assert_eq!(
            classify_token_response(StatusCode::SERVICE_UNAVAILABLE, ""),
            Err(GatewayAuthError::Upstream { status: 503 })
        );
        assert!(matches!(
            classify_token_response(StatusCode::OK, r#"{"expires_in":"3599"}"#),
            Err(GatewayAuthError::MalformedResponse(_))
        ));
        assert_eq!(
            classify_token_response(
                StatusCode::OK,
                r#"{"access_token":"c9SQxWWhmdVRlyh0zh8gZDTkubVF","expires_in":"3599"}"#
            ),
            Ok("c9SQxWWhmdVRlyh0zh8gZDTkubVF".to_string())
        );
    }

    #[test]
    fn accepted_push_response_carries_both_identifiers() {
        let body = r#"{
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_191220191020363925",
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        }"#;

        assert_eq!(
            classify_push_response(StatusCode::OK, body),
            PushPaymentOutcome::Accepted {
                checkout_request_id: "ws_CO_191220191020363925".to_string(),
                merchant_request_id: "29115-34620561-1".to_string(),
                customer_message: "Success. Request accepted for processing".to_string(),
            }
        );
    }

    #[test]
    fn provider_error_envelope_becomes_rejection() {
        let body = r#"{
            "requestId": "4788-81090592-1",
            "errorCode": "400.002.02",
            "errorMessage": "Bad Request - Invalid PhoneNumber"
        }"#;

        assert_eq!(
            classify_push_response(StatusCode::BAD_REQUEST, body),
            PushPaymentOutcome::Rejected {
                message: "Bad Request - Invalid PhoneNumber".to_string(),
                response_code: Some("400.002.02".to_string()),
            }
        );
    }

    #[test]
    fn non_zero_response_code_is_a_rejection() {
        let body = r#"{"ResponseCode": 1, "ResponseDescription": "Rejected"}"#;

        assert_eq!(
            classify_push_response(StatusCode::OK, body),
            PushPaymentOutcome::Rejected {
                message: "Rejected".to_string(),
                response_code: Some("1".to_string()),
            }
        );
    }

    #[test]
    fn status_response_is_surfaced_verbatim() {
        let body = r#"{
            "ResponseCode": "0",
            "ResponseDescription": "The service request has been accepted successsfully",
            "MerchantRequestID": "22205-34066-1",
            "CheckoutRequestID": "ws_CO_13012021093521236557",
            "ResultCode": "1032",
            "ResultDesc": "Request cancelled by user"
        }"#;

        match classify_status_response(StatusCode::OK, body) {
            StatusQueryOutcome::Answered {
                result_code,
                result_desc,
                raw,
            } => {
                assert_eq!(result_code.as_deref(), Some("1032"));
                assert_eq!(result_desc.as_deref(), Some("Request cancelled by user"));
                assert_eq!(raw["MerchantRequestID"], "22205-34066-1");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn status_still_processing_is_a_failed_query() {
        let body = r#"{"errorCode": "500.001.1001", "errorMessage": "The transaction is being processed"}"#;

        assert!(matches!(
            classify_status_response(StatusCode::INTERNAL_SERVER_ERROR, body),
            StatusQueryOutcome::Failed { response_code: Some(code), .. } if code == "500.001.1001"
        ));
    }
}
