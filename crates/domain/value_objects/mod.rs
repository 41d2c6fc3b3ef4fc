pub mod enums;
pub mod mpesa_callback;
pub mod mpesa_transactions;
pub mod phone_numbers;
