//! Transaction record model and field-level merge semantics.

use common::{CorrelationId, TransitId};
use serde::{Deserialize, Serialize};

/// Status of one participant's local transaction.
///
/// ```text
/// PENDING ──┬──► COMPLETED
///           └──► FAILED
/// ```
///
/// Terminal states never move back to `PENDING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    /// Returns true for `COMPLETED` and `FAILED`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document collection a record lives in.
///
/// Each participant group keeps its own view of the saga under the same
/// correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    /// Written by Reserve and the reservation completion/cancellation steps.
    Reservations,
    /// Written by Book and the booking completion/cancellation steps.
    Bookings,
    /// Written by Pay.
    Payments,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Reservations,
        Collection::Bookings,
        Collection::Payments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Reservations => "reservations",
            Collection::Bookings => "bookings",
            Collection::Payments => "payments",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current snapshot of a saga participant's transaction.
///
/// Payload fields are filled in incrementally; each step only merges the
/// fields it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_id: Option<TransitId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Last failure reason recorded by a compensation path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransactionRecord {
    /// Creates an empty record for the given correlation id.
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            status: None,
            transit_id: None,
            number_of_seats: None,
            user_id: None,
            amount: None,
            day: None,
            destination: None,
            start: None,
            error: None,
        }
    }

    /// Applies a partial update field by field.
    ///
    /// Fields absent from the patch keep their value. A `PENDING` status is
    /// dropped when the record is already terminal; any other status write
    /// supersedes the current one.
    pub fn merge(&mut self, patch: &TransactionPatch) {
        if let Some(next) = patch.status {
            let keep_terminal = matches!(self.status, Some(current) if current.is_terminal())
                && next == TransactionStatus::Pending;
            if !keep_terminal {
                self.status = Some(next);
            }
        }
        merge_field(&mut self.transit_id, &patch.transit_id);
        merge_field(&mut self.number_of_seats, &patch.number_of_seats);
        merge_field(&mut self.user_id, &patch.user_id);
        merge_field(&mut self.amount, &patch.amount);
        merge_field(&mut self.day, &patch.day);
        merge_field(&mut self.destination, &patch.destination);
        merge_field(&mut self.start, &patch.start);
        merge_field(&mut self.error, &patch.error);
    }

    /// Returns the status if it is terminal.
    pub fn terminal_status(&self) -> Option<TransactionStatus> {
        self.status.filter(TransactionStatus::is_terminal)
    }
}

fn merge_field<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if let Some(v) = value {
        *target = Some(v.clone());
    }
}

/// A partial record: only the `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_id: Option<TransitId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransactionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A patch that only writes the status.
    pub fn status(status: TransactionStatus) -> Self {
        Self::new().with_status(status)
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_transit_id(mut self, transit_id: TransitId) -> Self {
        self.transit_id = Some(transit_id);
        self
    }

    pub fn with_number_of_seats(mut self, seats: u32) -> Self {
        self.number_of_seats = Some(seats);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_day(mut self, day: impl Into<String>) -> Self {
        self.day = Some(day.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Returns true if the patch writes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_patch() -> TransactionPatch {
        TransactionPatch::status(TransactionStatus::Pending)
            .with_transit_id(TransitId::new("T-1"))
            .with_number_of_seats(2)
            .with_user_id("user-1")
    }

    #[test]
    fn merge_only_touches_present_fields() {
        let mut record = TransactionRecord::new(CorrelationId::new());
        record.merge(&booking_patch());
        record.merge(&TransactionPatch::new().with_amount(40));

        assert_eq!(record.status, Some(TransactionStatus::Pending));
        assert_eq!(record.transit_id, Some(TransitId::new("T-1")));
        assert_eq!(record.number_of_seats, Some(2));
        assert_eq!(record.user_id.as_deref(), Some("user-1"));
        assert_eq!(record.amount, Some(40));
        assert!(record.day.is_none());
    }

    #[test]
    fn merging_same_patch_twice_is_idempotent() {
        let mut once = TransactionRecord::new(CorrelationId::new());
        once.merge(&booking_patch());

        let mut twice = once.clone();
        twice.merge(&booking_patch());

        assert_eq!(once, twice);
    }

    #[test]
    fn terminal_status_is_never_reset_to_pending() {
        let mut record = TransactionRecord::new(CorrelationId::new());
        record.merge(&booking_patch());
        record.merge(&TransactionPatch::status(TransactionStatus::Completed));
        record.merge(&booking_patch());

        assert_eq!(record.status, Some(TransactionStatus::Completed));
        assert_eq!(record.terminal_status(), Some(TransactionStatus::Completed));
    }

    #[test]
    fn later_terminal_write_supersedes() {
        let mut record = TransactionRecord::new(CorrelationId::new());
        record.merge(&TransactionPatch::status(TransactionStatus::Completed));
        record.merge(&TransactionPatch::status(TransactionStatus::Failed));
        assert_eq!(record.status, Some(TransactionStatus::Failed));
    }

    #[test]
    fn record_uses_camel_case_wire_names() {
        let mut record = TransactionRecord::new(CorrelationId::new());
        record.merge(&booking_patch());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["transitId"], "T-1");
        assert_eq!(json["numberOfSeats"], 2);
        assert!(json.get("amount").is_none());
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(TransactionPatch::new().is_empty());
        assert!(!TransactionPatch::status(TransactionStatus::Failed).is_empty());
    }

    #[test]
    fn collection_names() {
        assert_eq!(Collection::Reservations.to_string(), "reservations");
        assert_eq!(Collection::Bookings.as_str(), "bookings");
        assert_eq!(Collection::ALL.len(), 3);
    }
}
