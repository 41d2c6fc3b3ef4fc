pub mod mpesa_payments;
