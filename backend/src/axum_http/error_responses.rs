use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::usecases::mpesa_payments::PaymentError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    #[serde(rename = "providerCode", skip_serializing_if = "Option::is_none")]
    pub provider_code: Option<String>,
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (message, provider_code) = match self {
            // Don't leak internal error detail to client
            PaymentError::Persistence(_) => ("Internal server error".to_string(), None),
            PaymentError::GatewayAuth(_) => ("Payment provider is misconfigured".to_string(), None),
            PaymentError::GatewayRejected {
                ref response_code, ..
            } => {
                let provider_code = response_code.clone();
                (self.to_string(), provider_code)
            }
            other => (other.to_string(), None),
        };

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            message,
            provider_code,
        });

        (status, body).into_response()
    }
}
