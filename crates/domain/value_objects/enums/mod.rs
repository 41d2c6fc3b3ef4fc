pub mod mpesa_transaction_statuses;
pub mod order_statuses;
