pub mod expire_pending_transactions;
