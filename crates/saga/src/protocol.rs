//! The fixed step graph of the reservation saga and its seat arithmetic.
//!
//! ```text
//! Reserve ──bookings──► Book ──payments──► Pay
//! Pay ──bookingCompletions──► CompleteBooking ──reservationCompletions──► CompleteReservation
//! Pay ──bookingCancellations──► CancelBooking ──reservationCancellations──► CancelReservation
//! Book ──reservationCancellations (on failure)──► CancelReservation
//! CompleteReservation | CancelReservation ──notifications──►
//! ```
//!
//! Any step that fails before emitting its success event emits its
//! compensation event instead.

use ledger::Collection;

use crate::messages::Topic;
use crate::services::inventory::{InventoryError, SeatCounts, SeatOperationKind};

/// Fixed ticket price used to compute the payment amount.
pub const UNIT_PRICE: u64 = 20;

/// Error carried by `reservationCancellations` when booking fails.
pub const BOOKINGS_ERROR: &str = "Bookings error!";
/// Error carried by `bookingCancellations` when the gateway declines.
pub const PAYMENT_DECLINED_ERROR: &str = "Payment gateway error!";
/// Error carried by `bookingCancellations` when the pay step itself fails.
pub const SERVER_ERROR: &str = "Server error!";
/// Error assumed when a cancellation event arrives without one.
pub const DEFAULT_CANCELLATION_ERROR: &str = "Payments error!";

/// How many times a step re-reads inventory after a concurrent change.
pub const MAX_SEAT_UPDATE_ATTEMPTS: usize = 3;

/// Amount charged for a booking.
pub fn amount_for(number_of_seats: u32) -> u64 {
    u64::from(number_of_seats) * UNIT_PRICE
}

/// One participant of the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Reserve,
    Book,
    Pay,
    CompleteBooking,
    CancelBooking,
    CompleteReservation,
    CancelReservation,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::Reserve,
        Step::Book,
        Step::Pay,
        Step::CompleteBooking,
        Step::CancelBooking,
        Step::CompleteReservation,
        Step::CancelReservation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Reserve => "reserve",
            Step::Book => "book",
            Step::Pay => "pay",
            Step::CompleteBooking => "complete_booking",
            Step::CancelBooking => "cancel_booking",
            Step::CompleteReservation => "complete_reservation",
            Step::CancelReservation => "cancel_reservation",
        }
    }

    /// Topic that triggers this step. `Reserve` is started over HTTP.
    pub fn inbound(&self) -> Option<Topic> {
        match self {
            Step::Reserve => None,
            Step::Book => Some(Topic::Bookings),
            Step::Pay => Some(Topic::Payments),
            Step::CompleteBooking => Some(Topic::BookingCompletions),
            Step::CancelBooking => Some(Topic::BookingCancellations),
            Step::CompleteReservation => Some(Topic::ReservationCompletions),
            Step::CancelReservation => Some(Topic::ReservationCancellations),
        }
    }

    /// Topic emitted when the step's local work succeeds.
    pub fn success_topic(&self) -> Topic {
        match self {
            Step::Reserve => Topic::Bookings,
            Step::Book => Topic::Payments,
            Step::Pay => Topic::BookingCompletions,
            Step::CompleteBooking => Topic::ReservationCompletions,
            Step::CancelBooking => Topic::ReservationCancellations,
            Step::CompleteReservation | Step::CancelReservation => Topic::Notifications,
        }
    }

    /// Topic emitted instead of the success topic when the step fails.
    ///
    /// `None` means the step has no further compensation level: failures are
    /// logged and dead-lettered.
    pub fn compensation_topic(&self) -> Option<Topic> {
        match self {
            Step::Book => Some(Topic::ReservationCancellations),
            Step::Pay => Some(Topic::BookingCancellations),
            _ => None,
        }
    }

    /// Collection the step writes its status to.
    pub fn collection(&self) -> Collection {
        match self {
            Step::Reserve | Step::CompleteReservation | Step::CancelReservation => {
                Collection::Reservations
            }
            Step::Book | Step::CompleteBooking | Step::CancelBooking => Collection::Bookings,
            Step::Pay => Collection::Payments,
        }
    }

    /// Step subscribed to `topic`, if any.
    pub fn for_topic(topic: Topic) -> Option<Step> {
        Step::ALL
            .into_iter()
            .find(|step| step.inbound() == Some(topic))
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Applies one seat operation for `seats` seats.
///
/// - `Lock`: `available -= n`, `locked += n`
/// - `Consume`: `locked -= n`; the seats leave the pool, so `total -= n`
/// - `Release`: `locked -= n`, `available += n`
///
/// Every transition preserves `available + locked == total`.
pub fn seat_transition(
    kind: SeatOperationKind,
    counts: SeatCounts,
    seats: u32,
) -> Result<SeatCounts, InventoryError> {
    let unlock = |counts: SeatCounts| {
        counts
            .locked_seats
            .checked_sub(seats)
            .ok_or(InventoryError::LockUnderflow {
                requested: seats,
                locked: counts.locked_seats,
            })
    };

    match kind {
        SeatOperationKind::Lock => {
            let available_seats = counts.available_seats.checked_sub(seats).ok_or(
                InventoryError::InsufficientSeats {
                    requested: seats,
                    available: counts.available_seats,
                },
            )?;
            Ok(SeatCounts {
                available_seats,
                locked_seats: counts.locked_seats + seats,
                total_seats: counts.total_seats,
            })
        }
        SeatOperationKind::Consume => Ok(SeatCounts {
            available_seats: counts.available_seats,
            locked_seats: unlock(counts)?,
            total_seats: counts.total_seats.saturating_sub(seats),
        }),
        SeatOperationKind::Release => Ok(SeatCounts {
            available_seats: counts.available_seats + seats,
            locked_seats: unlock(counts)?,
            total_seats: counts.total_seats,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(available: u32, locked: u32, total: u32) -> SeatCounts {
        SeatCounts {
            available_seats: available,
            locked_seats: locked,
            total_seats: total,
        }
    }

    #[test]
    fn happy_path_follows_the_topic_graph() {
        let mut topic = Step::Reserve.success_topic();
        let mut visited = vec![Step::Reserve];
        while let Some(step) = Step::for_topic(topic) {
            visited.push(step);
            topic = step.success_topic();
        }

        assert_eq!(
            visited,
            vec![
                Step::Reserve,
                Step::Book,
                Step::Pay,
                Step::CompleteBooking,
                Step::CompleteReservation,
            ]
        );
        assert_eq!(topic, Topic::Notifications);
    }

    #[test]
    fn compensation_chain_ends_in_notifications() {
        let pay_failure = Step::Pay.compensation_topic().unwrap();
        let cancel_booking = Step::for_topic(pay_failure).unwrap();
        assert_eq!(cancel_booking, Step::CancelBooking);

        let cancel_reservation = Step::for_topic(cancel_booking.success_topic()).unwrap();
        assert_eq!(cancel_reservation, Step::CancelReservation);
        assert_eq!(
            Step::Book.compensation_topic(),
            Some(Topic::ReservationCancellations)
        );
        assert_eq!(cancel_reservation.success_topic(), Topic::Notifications);
        assert!(cancel_booking.compensation_topic().is_none());
    }

    #[test]
    fn every_inbound_topic_has_exactly_one_step() {
        for topic in Topic::ALL {
            let subscribers = Step::ALL
                .iter()
                .filter(|step| step.inbound() == Some(topic))
                .count();
            let expected = usize::from(topic != Topic::Notifications);
            assert_eq!(subscribers, expected, "topic {topic}");
        }
    }

    #[test]
    fn steps_write_to_their_own_collection() {
        assert_eq!(Step::Reserve.collection(), Collection::Reservations);
        assert_eq!(Step::CancelBooking.collection(), Collection::Bookings);
        assert_eq!(Step::Pay.collection(), Collection::Payments);
    }

    #[test]
    fn amount_uses_unit_price() {
        assert_eq!(amount_for(2), 40);
        assert_eq!(amount_for(0), 0);
    }

    #[test]
    fn lock_moves_seats_from_available_to_locked() {
        let next = seat_transition(SeatOperationKind::Lock, counts(5, 0, 5), 2).unwrap();
        assert_eq!(next, counts(3, 2, 5));
    }

    #[test]
    fn lock_rejects_more_seats_than_available() {
        let err = seat_transition(SeatOperationKind::Lock, counts(1, 4, 5), 2).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientSeats {
                requested: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn consume_keeps_available_and_shrinks_pool() {
        let next = seat_transition(SeatOperationKind::Consume, counts(3, 2, 5), 2).unwrap();
        assert_eq!(next, counts(3, 0, 3));
        assert_eq!(next.available_seats + next.locked_seats, next.total_seats);
    }

    #[test]
    fn release_returns_seats() {
        let next = seat_transition(SeatOperationKind::Release, counts(3, 2, 5), 2).unwrap();
        assert_eq!(next, counts(5, 0, 5));
    }

    #[test]
    fn unlocking_more_than_locked_is_rejected() {
        for kind in [SeatOperationKind::Consume, SeatOperationKind::Release] {
            let err = seat_transition(kind, counts(5, 0, 5), 1).unwrap_err();
            assert!(matches!(err, InventoryError::LockUnderflow { .. }));
        }
    }
}
