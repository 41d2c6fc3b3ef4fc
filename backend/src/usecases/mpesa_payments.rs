use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use crates::{
    domain::{
        entities::mpesa_transactions::InsertMpesaTransactionEntity,
        repositories::{mpesa_transactions::MpesaTransactionRepository, orders::OrderRepository},
        value_objects::{
            enums::mpesa_transaction_statuses::MpesaTransactionStatus,
            mpesa_callback::StkCallbackResult,
            mpesa_transactions::{
                CompleteTransactionModel, FailTransactionModel, InitiatePaymentModel,
                InitiatedPaymentDto, MpesaTransactionDto, PaymentStatusDto, SettlementOutcome,
            },
            phone_numbers::{is_valid_payer_phone, normalize_phone_number},
        },
    },
    payments::mpesa_client::{
        GatewayAuthError, GatewayError, MpesaClient, PushPaymentOutcome, PushPaymentRequest,
        StatusQueryOutcome,
    },
};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{error, info, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MpesaGateway: Send + Sync {
    async fn submit_push_payment(
        &self,
        request: PushPaymentRequest,
    ) -> Result<PushPaymentOutcome, GatewayError>;

    async fn query_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<StatusQueryOutcome, GatewayError>;
}

#[async_trait]
impl MpesaGateway for MpesaClient {
    async fn submit_push_payment(
        &self,
        request: PushPaymentRequest,
    ) -> Result<PushPaymentOutcome, GatewayError> {
        MpesaClient::submit_push_payment(self, &request).await
    }

    async fn query_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<StatusQueryOutcome, GatewayError> {
        MpesaClient::query_status(self, checkout_request_id).await
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("order {0} not found")]
    OrderNotFound(i32),
    #[error("amount {requested} does not match order total {expected}")]
    AmountMismatch { requested: Decimal, expected: Decimal },
    #[error("payment provider authentication failed: {0}")]
    GatewayAuth(GatewayAuthError),
    #[error("payment provider unavailable: {0}")]
    GatewayTransport(String),
    #[error("payment provider rejected the request: {message}")]
    GatewayRejected {
        message: String,
        response_code: Option<String>,
    },
    #[error("unknown checkout request id {0}")]
    UnknownTransaction(String),
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl PaymentError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            PaymentError::Validation(_) | PaymentError::AmountMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            PaymentError::OrderNotFound(_) | PaymentError::UnknownTransaction(_) => {
                StatusCode::NOT_FOUND
            }
            PaymentError::GatewayAuth(_) => StatusCode::BAD_GATEWAY,
            PaymentError::GatewayTransport(_) => StatusCode::SERVICE_UNAVAILABLE,
            PaymentError::GatewayRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            // No response from the credential endpoint is a network problem, not a config one.
            GatewayError::Auth(GatewayAuthError::Connectivity(message))
            | GatewayError::Transport(message) => PaymentError::GatewayTransport(message),
            GatewayError::Auth(auth_error) => PaymentError::GatewayAuth(auth_error),
            GatewayError::InvalidAmount(amount) => {
                PaymentError::Validation(format!("amount {amount} is out of range"))
            }
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, PaymentError>;

/// What a callback did to the ledger. Every variant is acknowledged to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed { checkout_request_id: String },
    Failed {
        checkout_request_id: String,
        status: MpesaTransactionStatus,
    },
    AlreadyTerminal {
        checkout_request_id: String,
        status: MpesaTransactionStatus,
    },
    UnknownTransaction { checkout_request_id: String },
}

impl ReconcileOutcome {
    pub fn description(&self) -> &'static str {
        match self {
            ReconcileOutcome::Completed { .. } => "Payment confirmed",
            ReconcileOutcome::Failed { .. } => "Payment failure recorded",
            ReconcileOutcome::AlreadyTerminal { .. } => "Callback already processed",
            ReconcileOutcome::UnknownTransaction { .. } => "Callback acknowledged",
        }
    }
}

/// Largest accepted gap between the requested amount and the order total.
pub fn amount_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

pub struct MpesaPaymentUseCase<T, O, G>
where
    T: MpesaTransactionRepository + Send + Sync + 'static,
    O: OrderRepository + Send + Sync + 'static,
    G: MpesaGateway + Send + Sync + 'static,
{
    transaction_repo: Arc<T>,
    order_repo: Arc<O>,
    gateway: Arc<G>,
}

impl<T, O, G> MpesaPaymentUseCase<T, O, G>
where
    T: MpesaTransactionRepository + Send + Sync + 'static,
    O: OrderRepository + Send + Sync + 'static,
    G: MpesaGateway + Send + Sync + 'static,
{
    pub fn new(transaction_repo: Arc<T>, order_repo: Arc<O>, gateway: Arc<G>) -> Self {
        Self {
            transaction_repo,
            order_repo,
            gateway,
        }
    }

    fn validate_initiate(model: &InitiatePaymentModel) -> UseCaseResult<()> {
        if model.phone_number.trim().is_empty() {
            return Err(PaymentError::Validation("phoneNumber is required".to_string()));
        }
        if !is_valid_payer_phone(&model.phone_number) {
            return Err(PaymentError::Validation(format!(
                "phoneNumber {} is not a valid Kenyan mobile number",
                model.phone_number.trim()
            )));
        }
        if model.order_id <= 0 {
            return Err(PaymentError::Validation(
                "orderId must be a positive integer".to_string(),
            ));
        }
        if model.amount < Decimal::ONE {
            return Err(PaymentError::Validation(
                "amount must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn initiate(&self, model: InitiatePaymentModel) -> UseCaseResult<InitiatedPaymentDto> {
        Self::validate_initiate(&model)?;
        let order_id = model.order_id;

        let order = self
            .order_repo
            .find_by_id(order_id)
            .await
            .map_err(|err| {
                error!(order_id, db_error = ?err, "mpesa_payments: failed to load order");
                PaymentError::Persistence(err)
            })?
            .ok_or(PaymentError::OrderNotFound(order_id))?;

        if (model.amount - order.total_amount).abs() > amount_tolerance() {
            warn!(
                order_id,
                requested = %model.amount,
                expected = %order.total_amount,
                "mpesa_payments: amount does not match order total"
            );
            return Err(PaymentError::AmountMismatch {
                requested: model.amount,
                expected: order.total_amount,
            });
        }

        let request = PushPaymentRequest {
            phone_number: model.phone_number.clone(),
            amount: model.amount,
            order_id,
            account_reference: model.account_reference.clone(),
        };

        let outcome = self.gateway.submit_push_payment(request).await.map_err(|err| {
            error!(order_id, gateway_error = %err, "mpesa_payments: push request failed");
            PaymentError::from(err)
        })?;

        let (checkout_request_id, merchant_request_id, customer_message) = match outcome {
            PushPaymentOutcome::Accepted {
                checkout_request_id,
                merchant_request_id,
                customer_message,
            } => (checkout_request_id, merchant_request_id, customer_message),
            PushPaymentOutcome::Rejected {
                message,
                response_code,
            } => {
                warn!(
                    order_id,
                    response_code = ?response_code,
                    message = %message,
                    "mpesa_payments: provider declined push request"
                );
                return Err(PaymentError::GatewayRejected {
                    message,
                    response_code,
                });
            }
        };

        let now = Utc::now();
        let insert_entity = InsertMpesaTransactionEntity {
            order_id,
            checkout_request_id: checkout_request_id.clone(),
            merchant_request_id: merchant_request_id.clone(),
            phone_number: normalize_phone_number(&model.phone_number),
            amount: model.amount,
            status: MpesaTransactionStatus::Pending.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.transaction_repo
            .insert_pending(insert_entity)
            .await
            .map_err(|err| {
                // The push is already on the payer's phone; its callback will be unmatched.
                error!(
                    order_id,
                    checkout_request_id = %checkout_request_id,
                    db_error = ?err,
                    "mpesa_payments: failed to record pending transaction"
                );
                PaymentError::Persistence(err)
            })?;

        info!(
            order_id,
            checkout_request_id = %checkout_request_id,
            amount = %model.amount,
            "mpesa_payments: push payment initiated"
        );

        Ok(InitiatedPaymentDto {
            checkout_request_id,
            merchant_request_id,
            customer_message,
        })
    }

    /// Applies a provider callback. Only persistence failures are returned as errors; unknown
    /// and duplicate callbacks are acknowledged outcomes.
    pub async fn reconcile(&self, callback: StkCallbackResult) -> UseCaseResult<ReconcileOutcome> {
        let checkout_request_id = callback.checkout_request_id.clone();

        let transaction = self
            .transaction_repo
            .find_by_checkout_request_id(&checkout_request_id)
            .await
            .map_err(|err| {
                error!(
                    checkout_request_id = %checkout_request_id,
                    db_error = ?err,
                    "mpesa_payments: failed to load transaction for callback"
                );
                PaymentError::Persistence(err)
            })?;

        let Some(transaction) = transaction else {
            warn!(
                checkout_request_id = %checkout_request_id,
                merchant_request_id = %callback.merchant_request_id,
                result_code = callback.result_code,
                "mpesa_payments: callback for unknown checkout request id"
            );
            return Ok(ReconcileOutcome::UnknownTransaction {
                checkout_request_id,
            });
        };

        if transaction.is_terminal() {
            info!(
                checkout_request_id = %checkout_request_id,
                status = %transaction.status,
                result_code = callback.result_code,
                "mpesa_payments: duplicate callback ignored"
            );
            return Ok(ReconcileOutcome::AlreadyTerminal {
                checkout_request_id,
                status: transaction.status(),
            });
        }

        let settlement = if callback.is_success() {
            if let Some(amount) = callback.metadata.amount {
                if amount != transaction.amount {
                    warn!(
                        checkout_request_id = %checkout_request_id,
                        ledger_amount = %transaction.amount,
                        callback_amount = %amount,
                        "mpesa_payments: callback amount differs from ledger amount"
                    );
                }
            }

            self.transaction_repo
                .complete_transaction(CompleteTransactionModel {
                    checkout_request_id: checkout_request_id.clone(),
                    result_code: callback.result_code.to_string(),
                    result_desc: callback.result_desc.clone(),
                    mpesa_receipt_number: callback.metadata.mpesa_receipt_number.clone(),
                    transaction_date: callback.metadata.transaction_date,
                    confirmed_at: Utc::now(),
                })
                .await
        } else {
            let status = if callback.is_cancelled_by_user() {
                MpesaTransactionStatus::Cancelled
            } else {
                MpesaTransactionStatus::Failed
            };

            self.transaction_repo
                .fail_transaction(FailTransactionModel {
                    checkout_request_id: checkout_request_id.clone(),
                    status,
                    result_code: callback.result_code.to_string(),
                    result_desc: callback.result_desc.clone(),
                    order_note: format!(
                        "M-Pesa payment {} ({}): {}",
                        status, callback.result_code, callback.result_desc
                    ),
                    failed_at: Utc::now(),
                })
                .await
        };

        let settlement = settlement.map_err(|err| {
            error!(
                checkout_request_id = %checkout_request_id,
                order_id = transaction.order_id,
                result_code = callback.result_code,
                db_error = ?err,
                "mpesa_payments: failed to apply callback"
            );
            PaymentError::Persistence(err)
        })?;

        let outcome = match settlement {
            SettlementOutcome::Applied(updated) => {
                let status = updated.status();
                info!(
                    checkout_request_id = %checkout_request_id,
                    order_id = updated.order_id,
                    status = %status,
                    receipt = ?updated.mpesa_receipt_number,
                    "mpesa_payments: callback applied"
                );
                if status == MpesaTransactionStatus::Completed {
                    ReconcileOutcome::Completed {
                        checkout_request_id,
                    }
                } else {
                    ReconcileOutcome::Failed {
                        checkout_request_id,
                        status,
                    }
                }
            }
            // Lost the race against a concurrent callback or the sweeper.
            SettlementOutcome::AlreadyTerminal(current) => {
                info!(
                    checkout_request_id = %checkout_request_id,
                    status = %current.status,
                    "mpesa_payments: transaction settled concurrently, callback ignored"
                );
                ReconcileOutcome::AlreadyTerminal {
                    checkout_request_id,
                    status: current.status(),
                }
            }
            SettlementOutcome::NotFound => {
                warn!(
                    checkout_request_id = %checkout_request_id,
                    "mpesa_payments: transaction disappeared before settlement"
                );
                ReconcileOutcome::UnknownTransaction {
                    checkout_request_id,
                }
            }
        };

        Ok(outcome)
    }

    /// Read-only: terminal entries are answered from the ledger, pending ones are passed
    /// through to the provider without writing anything.
    pub async fn query_and_sync(&self, checkout_request_id: &str) -> UseCaseResult<PaymentStatusDto> {
        let checkout_request_id = checkout_request_id.trim();
        if checkout_request_id.is_empty() {
            return Err(PaymentError::Validation(
                "checkoutRequestId is required".to_string(),
            ));
        }

        let transaction = self
            .transaction_repo
            .find_by_checkout_request_id(checkout_request_id)
            .await
            .map_err(|err| {
                error!(
                    checkout_request_id,
                    db_error = ?err,
                    "mpesa_payments: failed to load transaction for status query"
                );
                PaymentError::Persistence(err)
            })?
            .ok_or_else(|| PaymentError::UnknownTransaction(checkout_request_id.to_string()))?;

        if transaction.is_terminal() {
            return Ok(PaymentStatusDto::from(transaction));
        }

        let outcome = self
            .gateway
            .query_status(checkout_request_id)
            .await
            .map_err(|err| {
                error!(
                    checkout_request_id,
                    gateway_error = %err,
                    "mpesa_payments: status query failed"
                );
                PaymentError::from(err)
            })?;

        let (result_code, result_desc, raw) = match outcome {
            StatusQueryOutcome::Answered {
                result_code,
                result_desc,
                raw,
            } => (result_code, result_desc, raw),
            StatusQueryOutcome::Failed {
                message,
                response_code,
                raw,
            } => (response_code, Some(message), raw),
        };

        Ok(PaymentStatusDto {
            checkout_request_id: transaction.checkout_request_id.clone(),
            status: transaction.status(),
            result_code,
            result_desc,
            receipt_number: None,
            provider_response: Some(raw),
        })
    }

    pub async fn list_for_order(&self, order_id: i32) -> UseCaseResult<Vec<MpesaTransactionDto>> {
        self.order_repo
            .find_by_id(order_id)
            .await
            .map_err(|err| {
                error!(order_id, db_error = ?err, "mpesa_payments: failed to load order");
                PaymentError::Persistence(err)
            })?
            .ok_or(PaymentError::OrderNotFound(order_id))?;

        let transactions = self
            .transaction_repo
            .list_for_order(order_id)
            .await
            .map_err(|err| {
                error!(
                    order_id,
                    db_error = ?err,
                    "mpesa_payments: failed to list transactions for order"
                );
                PaymentError::Persistence(err)
            })?;

        Ok(transactions.into_iter().map(MpesaTransactionDto::from).collect())
    }
}
