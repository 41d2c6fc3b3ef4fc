use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MpesaTransactionStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl MpesaTransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MpesaTransactionStatus::Pending => "pending",
            MpesaTransactionStatus::Completed => "completed",
            MpesaTransactionStatus::Failed => "failed",
            MpesaTransactionStatus::Cancelled => "cancelled",
        }
    }

    /// Unknown values map to `Failed` so a corrupted row is never transitioned again.
    pub fn from_str(value: &str) -> Self {
        match value {
            "pending" => MpesaTransactionStatus::Pending,
            "completed" => MpesaTransactionStatus::Completed,
            "failed" => MpesaTransactionStatus::Failed,
            "cancelled" => MpesaTransactionStatus::Cancelled,
            _ => MpesaTransactionStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MpesaTransactionStatus::Pending)
    }
}

impl Display for MpesaTransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!MpesaTransactionStatus::Pending.is_terminal());
        assert!(MpesaTransactionStatus::Completed.is_terminal());
        assert!(MpesaTransactionStatus::Failed.is_terminal());
        assert!(MpesaTransactionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn unknown_status_is_treated_as_terminal() {
        assert_eq!(
            MpesaTransactionStatus::from_str("settled"),
            MpesaTransactionStatus::Failed
        );
        assert_eq!(
            MpesaTransactionStatus::from_str("cancelled"),
            MpesaTransactionStatus::Cancelled
        );
    }
}
