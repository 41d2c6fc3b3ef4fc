use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use crates::{
    domain::{
        repositories::{mpesa_transactions::MpesaTransactionRepository, orders::OrderRepository},
        value_objects::{mpesa_callback::ParsedCallback, mpesa_transactions::InitiatePaymentModel},
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{mpesa_transactions::MpesaTransactionPostgres, orders::OrderPostgres},
    },
    payments::mpesa_client::MpesaClient,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::usecases::mpesa_payments::{MpesaGateway, MpesaPaymentUseCase};

/// Acknowledgement body the provider expects from the callback URL.
#[derive(Debug, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: u8,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    fn accepted(result_desc: &str) -> Json<Self> {
        Json(Self {
            result_code: 0,
            result_desc: result_desc.to_string(),
        })
    }

    fn rejected(result_desc: &str) -> Json<Self> {
        Json(Self {
            result_code: 1,
            result_desc: result_desc.to_string(),
        })
    }
}

pub fn routes(db_pool: Arc<PgPoolSquad>, mpesa_client: Arc<MpesaClient>) -> Router {
    let transaction_repository = MpesaTransactionPostgres::new(Arc::clone(&db_pool));
    let order_repository = OrderPostgres::new(Arc::clone(&db_pool));
    let mpesa_usecase = MpesaPaymentUseCase::new(
        Arc::new(transaction_repository),
        Arc::new(order_repository),
        mpesa_client,
    );

    router(Arc::new(mpesa_usecase))
}

pub fn router<T, O, G>(mpesa_usecase: Arc<MpesaPaymentUseCase<T, O, G>>) -> Router
where
    T: MpesaTransactionRepository + Send + Sync + 'static,
    O: OrderRepository + Send + Sync + 'static,
    G: MpesaGateway + Send + Sync + 'static,
{
    Router::new()
        .route("/stk-push", post(initiate))
        .route("/callback", post(callback))
        .route("/status/:checkout_request_id", get(status))
        .route("/orders/:order_id/transactions", get(list_for_order))
        .with_state(mpesa_usecase)
}

pub async fn initiate<T, O, G>(
    State(mpesa_usecase): State<Arc<MpesaPaymentUseCase<T, O, G>>>,
    Json(initiate_model): Json<InitiatePaymentModel>,
) -> impl IntoResponse
where
    T: MpesaTransactionRepository + Send + Sync + 'static,
    O: OrderRepository + Send + Sync + 'static,
    G: MpesaGateway + Send + Sync + 'static,
{
    match mpesa_usecase.initiate(initiate_model).await {
        Ok(initiated) => (StatusCode::OK, Json(initiated)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Public provider callback. Anything the provider can act on gets a 200 acknowledgement;
/// only an unreadable body (400) or a failed write (500, provider retries) does not.
pub async fn callback<T, O, G>(
    State(mpesa_usecase): State<Arc<MpesaPaymentUseCase<T, O, G>>>,
    body: Bytes,
) -> impl IntoResponse
where
    T: MpesaTransactionRepository + Send + Sync + 'static,
    O: OrderRepository + Send + Sync + 'static,
    G: MpesaGateway + Send + Sync + 'static,
{
    let callback = match ParsedCallback::parse(&body) {
        ParsedCallback::Valid(callback) => callback,
        ParsedCallback::Malformed(reason) => {
            warn!(
                reason = %reason,
                body_len = body.len(),
                "mpesa router: malformed callback payload"
            );
            return (
                StatusCode::BAD_REQUEST,
                CallbackAck::rejected("Malformed callback payload"),
            )
                .into_response();
        }
    };

    let checkout_request_id = callback.checkout_request_id.clone();
    match mpesa_usecase.reconcile(callback).await {
        Ok(outcome) => (StatusCode::OK, CallbackAck::accepted(outcome.description())).into_response(),
        Err(err) => {
            error!(
                checkout_request_id = %checkout_request_id,
                error = %err,
                "mpesa router: callback not applied, provider will retry"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                CallbackAck::rejected("Temporary failure, please retry"),
            )
                .into_response()
        }
    }
}

pub async fn status<T, O, G>(
    State(mpesa_usecase): State<Arc<MpesaPaymentUseCase<T, O, G>>>,
    Path(checkout_request_id): Path<String>,
) -> impl IntoResponse
where
    T: MpesaTransactionRepository + Send + Sync + 'static,
    O: OrderRepository + Send + Sync + 'static,
    G: MpesaGateway + Send + Sync + 'static,
{
    match mpesa_usecase.query_and_sync(&checkout_request_id).await {
        Ok(payment_status) => (StatusCode::OK, Json(payment_status)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn list_for_order<T, O, G>(
    State(mpesa_usecase): State<Arc<MpesaPaymentUseCase<T, O, G>>>,
    Path(order_id): Path<i32>,
) -> impl IntoResponse
where
    T: MpesaTransactionRepository + Send + Sync + 'static,
    O: OrderRepository + Send + Sync + 'static,
    G: MpesaGateway + Send + Sync + 'static,
{
    match mpesa_usecase.list_for_order(order_id).await {
        Ok(transactions) => (StatusCode::OK, Json(transactions)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::mpesa_payments::MockMpesaGateway;
    use axum::{body::Body, http::Request};
    use crates::infra::memory::payment_store::InMemoryPaymentStore;
    use rust_decimal_macros::dec;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app(store: &InMemoryPaymentStore, gateway: MockMpesaGateway) -> Router {
        router(Arc::new(MpesaPaymentUseCase::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(gateway),
        )))
    }

    async fn post_callback(app: Router, body: String) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/callback")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn callback_body(checkout_request_id: &str, result_code: i64) -> String {
        json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": checkout_request_id,
                    "ResultCode": result_code,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn malformed_callback_is_rejected_with_400() {
        let store = InMemoryPaymentStore::new();

        let (status, body) =
            post_callback(app(&store, MockMpesaGateway::new()), "{\"Body\":{}}".to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ResultCode"], 1);
    }

    #[tokio::test]
    async fn unknown_checkout_request_id_is_acknowledged() {
        let store = InMemoryPaymentStore::new();

        let (status, body) =
            post_callback(app(&store, MockMpesaGateway::new()), callback_body("ws_unknown", 0)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ResultCode"], 0);
        assert_eq!(store.committed_writes().await, 0);
    }

    #[tokio::test]
    async fn failed_write_asks_provider_to_retry() {
        let store = InMemoryPaymentStore::new();
        store.seed_order(43, dec!(250)).await;
        let mut gateway = MockMpesaGateway::new();
        gateway.expect_submit_push_payment().returning(|_| {
            Ok(crates::payments::mpesa_client::PushPaymentOutcome::Accepted {
                checkout_request_id: "ws_2".to_string(),
                merchant_request_id: "29115-34620561-2".to_string(),
                customer_message: "Success. Request accepted for processing".to_string(),
            })
        });
        let usecase = MpesaPaymentUseCase::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(gateway),
        );
        usecase
            .initiate(InitiatePaymentModel {
                phone_number: "+254712345678".to_string(),
                amount: dec!(250),
                order_id: 43,
                account_reference: None,
            })
            .await
            .unwrap();
        store.fail_on_write(1).await;

        let (status, body) = post_callback(router(Arc::new(usecase)), callback_body("ws_2", 1032)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["ResultCode"], 1);
        assert!(!store.transaction("ws_2").await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn business_failure_is_still_acknowledged() {
        let store = InMemoryPaymentStore::new();
        store.seed_order(43, dec!(250)).await;
        store
            .seed_transaction(crates::domain::entities::mpesa_transactions::MpesaTransactionEntity {
                id: 0,
                order_id: 43,
                checkout_request_id: "ws_2".to_string(),
                merchant_request_id: "29115-34620561-2".to_string(),
                phone_number: "254712345678".to_string(),
                amount: dec!(250),
                status: "pending".to_string(),
                result_code: None,
                result_desc: None,
                mpesa_receipt_number: None,
                transaction_date: None,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
            .await;

        let (status, body) =
            post_callback(app(&store, MockMpesaGateway::new()), callback_body("ws_2", 1032)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ResultCode"], 0);
        assert_eq!(store.order(43).await.unwrap().status, "failed");
    }
}
