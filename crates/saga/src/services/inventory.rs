//! Inventory gateway trait and in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use common::{CorrelationId, TransitId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::seat_transition;

/// A transit and its seat counters, as served by the inventory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transit {
    pub transit_id: TransitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_name: Option<String>,
    pub start: String,
    pub destination: String,
    pub day: String,
    /// Departure time, numeric as stored by the transits service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival: Option<i64>,
    pub available_seats: u32,
    pub locked_seats: u32,
    pub total_seats: u32,
    /// Seats taken out of the pool by completed bookings.
    #[serde(default)]
    pub sold_seats: u32,
}

impl Transit {
    /// Creates a transit with all seats available.
    pub fn new(
        transit_id: impl Into<TransitId>,
        start: impl Into<String>,
        destination: impl Into<String>,
        day: impl Into<String>,
        seats: u32,
    ) -> Self {
        Self {
            transit_id: transit_id.into(),
            transit_name: None,
            start: start.into(),
            destination: destination.into(),
            day: day.into(),
            departure: None,
            arrival: None,
            available_seats: seats,
            locked_seats: 0,
            total_seats: seats,
            sold_seats: 0,
        }
    }

    pub fn seat_counts(&self) -> SeatCounts {
        SeatCounts {
            available_seats: self.available_seats,
            locked_seats: self.locked_seats,
            total_seats: self.total_seats,
        }
    }

    /// Returns true if `available + locked == total`.
    pub fn is_consistent(&self) -> bool {
        self.seat_counts().is_consistent()
    }

    fn matches(&self, query: &TransitQuery) -> bool {
        let eq = |wanted: &Option<String>, actual: &str| wanted.as_deref().is_none_or(|w| w == actual);
        eq(&query.day, &self.day)
            && eq(&query.destination, &self.destination)
            && eq(&query.start, &self.start)
    }
}

/// The three seat counters of a transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatCounts {
    pub available_seats: u32,
    pub locked_seats: u32,
    pub total_seats: u32,
}

impl SeatCounts {
    pub fn is_consistent(&self) -> bool {
        self.available_seats.checked_add(self.locked_seats) == Some(self.total_seats)
    }
}

/// What a seat update does to the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeatOperationKind {
    /// Book: move seats from available to locked.
    Lock,
    /// Booking completion: locked seats leave the pool.
    Consume,
    /// Cancellation: locked seats go back to available.
    Release,
}

impl SeatOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatOperationKind::Lock => "lock",
            SeatOperationKind::Consume => "consume",
            SeatOperationKind::Release => "release",
        }
    }
}

impl std::fmt::Display for SeatOperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency key of a seat update within one transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatOperation {
    pub correlation_id: CorrelationId,
    pub kind: SeatOperationKind,
}

/// A conditional seat delta.
///
/// Applied only if the transit's counters still equal `expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatUpdate {
    pub operation: SeatOperation,
    pub seats: u32,
    pub expected: SeatCounts,
}

/// Result of a seat update that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeatUpdateOutcome {
    /// The counters were changed.
    Applied,
    /// The same operation was applied before; nothing changed.
    AlreadyApplied,
    /// Consume/Release for a correlation id that holds no lock.
    NothingLocked,
}

/// Fields to merge into a transit document. Absent fields are left as they are.
///
/// This is the body of `PUT ?transitId`: a full transit is a patch with every
/// field set, and a seat update sends only the three counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold_seats: Option<u32>,
}

impl TransitPatch {
    /// A patch setting only the seat counters.
    pub fn seats(counts: SeatCounts) -> Self {
        Self {
            available_seats: Some(counts.available_seats),
            locked_seats: Some(counts.locked_seats),
            total_seats: Some(counts.total_seats),
            ..Self::default()
        }
    }

    /// Counters this patch sets, if it sets all three.
    pub fn seat_counts(&self) -> Option<SeatCounts> {
        Some(SeatCounts {
            available_seats: self.available_seats?,
            locked_seats: self.locked_seats?,
            total_seats: self.total_seats?,
        })
    }

    /// Merges the patch into `transit`.
    pub fn apply(&self, transit: &mut Transit) {
        if let Some(name) = &self.transit_name {
            transit.transit_name = Some(name.clone());
        }
        if let Some(start) = &self.start {
            transit.start = start.clone();
        }
        if let Some(destination) = &self.destination {
            transit.destination = destination.clone();
        }
        if let Some(day) = &self.day {
            transit.day = day.clone();
        }
        if let Some(departure) = self.departure {
            transit.departure = Some(departure);
        }
        if let Some(arrival) = self.arrival {
            transit.arrival = Some(arrival);
        }
        if let Some(available) = self.available_seats {
            transit.available_seats = available;
        }
        if let Some(locked) = self.locked_seats {
            transit.locked_seats = locked;
        }
        if let Some(total) = self.total_seats {
            transit.total_seats = total;
        }
        if let Some(sold) = self.sold_seats {
            transit.sold_seats = sold;
        }
    }

    /// Builds a new transit from the patch, or names the first missing field.
    pub fn into_transit(self, transit_id: TransitId) -> Result<Transit, InventoryError> {
        let missing = |field: &'static str| InventoryError::IncompleteTransit {
            transit_id: transit_id.clone(),
            field,
        };
        Ok(Transit {
            start: self.start.ok_or_else(|| missing("start"))?,
            destination: self.destination.ok_or_else(|| missing("destination"))?,
            day: self.day.ok_or_else(|| missing("day"))?,
            available_seats: self.available_seats.ok_or_else(|| missing("availableSeats"))?,
            locked_seats: self.locked_seats.unwrap_or(0),
            total_seats: self.total_seats.ok_or_else(|| missing("totalSeats"))?,
            sold_seats: self.sold_seats.unwrap_or(0),
            transit_name: self.transit_name,
            departure: self.departure,
            arrival: self.arrival,
            transit_id,
        })
    }
}

impl From<Transit> for TransitPatch {
    fn from(transit: Transit) -> Self {
        Self {
            transit_name: transit.transit_name,
            start: Some(transit.start),
            destination: Some(transit.destination),
            day: Some(transit.day),
            departure: transit.departure,
            arrival: transit.arrival,
            available_seats: Some(transit.available_seats),
            locked_seats: Some(transit.locked_seats),
            total_seats: Some(transit.total_seats),
            sold_seats: Some(transit.sold_seats),
        }
    }
}

/// Query string of `PUT ?transitId`.
///
/// A plain transits service only reads `transitId` and merges the body. The
/// seat operation fields let a service that understands them apply the write
/// as a keyed, conditional [`SeatUpdate`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitWriteQuery {
    pub transit_id: TransitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<SeatOperationKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_available_seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_locked_seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_total_seats: Option<u32>,
}

impl TransitWriteQuery {
    /// A plain field merge.
    pub fn merge(transit_id: TransitId) -> Self {
        Self {
            transit_id,
            correlation_id: None,
            operation: None,
            seats: None,
            expected_available_seats: None,
            expected_locked_seats: None,
            expected_total_seats: None,
        }
    }

    pub fn seat_update(transit_id: TransitId, update: &SeatUpdate) -> Self {
        Self {
            transit_id,
            correlation_id: Some(update.operation.correlation_id),
            operation: Some(update.operation.kind),
            seats: Some(update.seats),
            expected_available_seats: Some(update.expected.available_seats),
            expected_locked_seats: Some(update.expected.locked_seats),
            expected_total_seats: Some(update.expected.total_seats),
        }
    }

    /// The keyed seat update carried by the query.
    ///
    /// `Ok(None)` for a plain merge; `Err` with the first missing field when
    /// only part of the seat operation is present.
    pub fn to_seat_update(&self) -> Result<Option<SeatUpdate>, &'static str> {
        let keyed = [
            self.correlation_id.is_some(),
            self.operation.is_some(),
            self.seats.is_some(),
            self.expected_available_seats.is_some(),
            self.expected_locked_seats.is_some(),
            self.expected_total_seats.is_some(),
        ];
        if !keyed.contains(&true) {
            return Ok(None);
        }

        Ok(Some(SeatUpdate {
            operation: SeatOperation {
                correlation_id: self.correlation_id.ok_or("correlationId")?,
                kind: self.operation.ok_or("operation")?,
            },
            seats: self.seats.ok_or("seats")?,
            expected: SeatCounts {
                available_seats: self
                    .expected_available_seats
                    .ok_or("expectedAvailableSeats")?,
                locked_seats: self.expected_locked_seats.ok_or("expectedLockedSeats")?,
                total_seats: self.expected_total_seats.ok_or("expectedTotalSeats")?,
            },
        }))
    }
}

/// Search filter for transits. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
}

impl TransitQuery {
    pub fn new(
        day: impl Into<String>,
        destination: impl Into<String>,
        start: impl Into<String>,
    ) -> Self {
        Self {
            day: Some(day.into()),
            destination: Some(destination.into()),
            start: Some(start.into()),
        }
    }
}

/// Errors returned by an inventory gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("Transit not found: {0}")]
    TransitNotFound(TransitId),

    /// The counters changed since they were read.
    #[error("Seat counts of transit {transit_id} changed concurrently")]
    Conflict { transit_id: TransitId },

    #[error(
        "Seat invariant violated on transit {transit_id}: {available} available + {locked} locked != {total} total"
    )]
    InvariantViolation {
        transit_id: TransitId,
        available: u32,
        locked: u32,
        total: u32,
    },

    #[error("Requested {requested} seats but only {available} are available")]
    InsufficientSeats { requested: u32, available: u32 },

    #[error("Cannot unlock {requested} seats, only {locked} are locked")]
    LockUnderflow { requested: u32, locked: u32 },

    /// A new transit was written without a required field.
    #[error("Transit {transit_id} is missing {field}")]
    IncompleteTransit {
        transit_id: TransitId,
        field: &'static str,
    },

    #[error("Inventory service unavailable: {0}")]
    Unavailable(String),
}

/// Read and conditionally update transit seat counters.
#[async_trait]
pub trait InventoryGateway: Send + Sync {
    /// Returns the transits matching `query`, in the service's order.
    async fn find_transits(&self, query: &TransitQuery) -> Result<Vec<Transit>, InventoryError>;

    async fn get_transit(&self, transit_id: &TransitId) -> Result<Option<Transit>, InventoryError>;

    /// Applies a conditional, idempotent seat delta.
    async fn update_seats(
        &self,
        transit_id: &TransitId,
        update: SeatUpdate,
    ) -> Result<SeatUpdateOutcome, InventoryError>;

    /// Merges fields into a transit, creating it if it does not exist yet.
    async fn merge_transit(
        &self,
        transit_id: &TransitId,
        patch: TransitPatch,
    ) -> Result<(), InventoryError>;

    /// Creates a transit or overwrites every field of an existing one.
    async fn upsert_transit(&self, transit: Transit) -> Result<(), InventoryError> {
        let transit_id = transit.transit_id.clone();
        self.merge_transit(&transit_id, TransitPatch::from(transit))
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Locked,
    Settled(SeatOperationKind),
}

/// Settled seat operations remembered for redelivery checks.
pub const DEFAULT_SETTLED_RETENTION: usize = 10_000;

type LockKey = (TransitId, CorrelationId);

#[derive(Debug)]
struct InMemoryInventoryState {
    transits: Vec<Transit>,
    locks: HashMap<LockKey, LockState>,
    /// Settled keys, oldest first.
    settled: VecDeque<LockKey>,
    settled_retention: usize,
    fail_on_read: bool,
    fail_on_update: bool,
    pending_conflicts: usize,
    applied_updates: usize,
}

impl Default for InMemoryInventoryState {
    fn default() -> Self {
        Self {
            transits: Vec::new(),
            locks: HashMap::new(),
            settled: VecDeque::new(),
            settled_retention: DEFAULT_SETTLED_RETENTION,
            fail_on_read: false,
            fail_on_update: false,
            pending_conflicts: 0,
            applied_updates: 0,
        }
    }
}

impl InMemoryInventoryState {
    fn record_lock_state(&mut self, key: LockKey, lock: LockState) {
        let settled = matches!(lock, LockState::Settled(_));
        self.locks.insert(key.clone(), lock);
        if !settled {
            return;
        }

        self.settled.push_back(key);
        while self.settled.len() > self.settled_retention {
            if let Some(oldest) = self.settled.pop_front() {
                self.locks.remove(&oldest);
            }
        }
    }
}

/// In-memory inventory gateway for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryGateway {
    state: Arc<Mutex<InMemoryInventoryState>>,
}

impl InMemoryInventoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gateway seeded with `transits`.
    pub fn with_transits(transits: impl IntoIterator<Item = Transit>) -> Self {
        let gateway = Self::new();
        gateway.state().transits.extend(transits);
        gateway
    }

    /// Caps how many settled seat operations are remembered.
    ///
    /// Once forgotten, a redelivered consume or release answers
    /// `NothingLocked`. Open locks are never forgotten.
    pub fn with_settled_retention(self, retention: usize) -> Self {
        self.state().settled_retention = retention;
        self
    }

    /// Number of seat operations currently tracked for idempotency.
    pub fn tracked_operations(&self) -> usize {
        self.state().locks.len()
    }

    /// Makes reads fail until switched off again.
    pub fn set_fail_on_read(&self, fail: bool) {
        self.state().fail_on_read = fail;
    }

    /// Makes seat updates fail until switched off again.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.state().fail_on_update = fail;
    }

    /// Rejects the next `count` seat updates with `Conflict`.
    pub fn inject_conflicts(&self, count: usize) {
        self.state().pending_conflicts = count;
    }

    /// Number of seat updates that changed counters.
    pub fn applied_updates(&self) -> usize {
        self.state().applied_updates
    }

    /// Returns a snapshot of a transit.
    pub fn transit(&self, transit_id: &TransitId) -> Option<Transit> {
        self.state()
            .transits
            .iter()
            .find(|t| &t.transit_id == transit_id)
            .cloned()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryInventoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl InventoryGateway for InMemoryInventoryGateway {
    async fn find_transits(&self, query: &TransitQuery) -> Result<Vec<Transit>, InventoryError> {
        let state = self.state();
        if state.fail_on_read {
            return Err(InventoryError::Unavailable("read failed".into()));
        }
        Ok(state
            .transits
            .iter()
            .filter(|t| t.matches(query))
            .cloned()
            .collect())
    }

    async fn get_transit(&self, transit_id: &TransitId) -> Result<Option<Transit>, InventoryError> {
        let state = self.state();
        if state.fail_on_read {
            return Err(InventoryError::Unavailable("read failed".into()));
        }
        Ok(state
            .transits
            .iter()
            .find(|t| &t.transit_id == transit_id)
            .cloned())
    }

    async fn update_seats(
        &self,
        transit_id: &TransitId,
        update: SeatUpdate,
    ) -> Result<SeatUpdateOutcome, InventoryError> {
        let mut guard = self.state();
        let state = &mut *guard;
        if state.fail_on_update {
            return Err(InventoryError::Unavailable("update failed".into()));
        }

        let key = (transit_id.clone(), update.operation.correlation_id);
        let kind = update.operation.kind;
        match (kind, state.locks.get(&key).copied()) {
            (SeatOperationKind::Lock, Some(_)) => return Ok(SeatUpdateOutcome::AlreadyApplied),
            (SeatOperationKind::Lock, None) | (_, Some(LockState::Locked)) => {}
            (_, Some(LockState::Settled(settled))) if settled == kind => {
                return Ok(SeatUpdateOutcome::AlreadyApplied);
            }
            (_, _) => return Ok(SeatUpdateOutcome::NothingLocked),
        }

        let transit = state
            .transits
            .iter_mut()
            .find(|t| &t.transit_id == transit_id)
            .ok_or_else(|| InventoryError::TransitNotFound(transit_id.clone()))?;

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(InventoryError::Conflict {
                transit_id: transit_id.clone(),
            });
        }
        if transit.seat_counts() != update.expected {
            return Err(InventoryError::Conflict {
                transit_id: transit_id.clone(),
            });
        }

        let next = seat_transition(kind, transit.seat_counts(), update.seats)?;
        if !next.is_consistent() {
            return Err(InventoryError::InvariantViolation {
                transit_id: transit_id.clone(),
                available: next.available_seats,
                locked: next.locked_seats,
                total: next.total_seats,
            });
        }

        transit.available_seats = next.available_seats;
        transit.locked_seats = next.locked_seats;
        transit.total_seats = next.total_seats;
        if kind == SeatOperationKind::Consume {
            transit.sold_seats += update.seats;
        }

        let lock = match kind {
            SeatOperationKind::Lock => LockState::Locked,
            settled => LockState::Settled(settled),
        };
        state.record_lock_state(key, lock);
        state.applied_updates += 1;

        tracing::debug!(
            transit_id = %transit_id,
            correlation_id = %update.operation.correlation_id,
            operation = %kind,
            seats = update.seats,
            "Seat update applied"
        );
        Ok(SeatUpdateOutcome::Applied)
    }

    async fn merge_transit(
        &self,
        transit_id: &TransitId,
        patch: TransitPatch,
    ) -> Result<(), InventoryError> {
        let mut state = self.state();
        if state.fail_on_update {
            return Err(InventoryError::Unavailable("update failed".into()));
        }

        let position = state
            .transits
            .iter()
            .position(|t| &t.transit_id == transit_id);
        let merged = match position {
            Some(index) => {
                let mut merged = state.transits[index].clone();
                patch.apply(&mut merged);
                merged
            }
            None => patch.into_transit(transit_id.clone())?,
        };

        if !merged.is_consistent() {
            return Err(InventoryError::InvariantViolation {
                transit_id: transit_id.clone(),
                available: merged.available_seats,
                locked: merged.locked_seats,
                total: merged.total_seats,
            });
        }

        match position {
            Some(index) => state.transits[index] = merged,
            None => state.transits.push(merged),
        }
        Ok(())
    }
}
