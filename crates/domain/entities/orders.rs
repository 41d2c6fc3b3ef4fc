use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use crate::infra::db::postgres::schema::orders;

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = orders)]
pub struct OrderEntity {
    pub id: i32,
    pub user_id: i32,
    pub status: String,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Appends a line to the free-text order notes, keeping whatever was there before.
pub fn append_order_note(existing: Option<&str>, note: &str) -> String {
    match existing.map(str::trim_end).filter(|value| !value.is_empty()) {
        Some(previous) => format!("{previous}\n{note}"),
        None => note.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_is_used_as_is_when_order_has_no_notes() {
        assert_eq!(append_order_note(None, "payment failed"), "payment failed");
        assert_eq!(append_order_note(Some("  "), "payment failed"), "payment failed");
    }

    #[test]
    fn note_is_appended_after_previous_notes() {
        let notes = append_order_note(Some("leave at the gate\n"), "payment failed");
        assert_eq!(notes, "leave at the gate\npayment failed");
    }
}
