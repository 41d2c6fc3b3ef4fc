pub mod mpesa_transactions;
pub mod orders;
