//! End-to-end tests of the reservation saga over the in-memory bus.

use std::sync::Arc;

use futures_util::future::join_all;
use ledger::{
    Collection, CorrelationId, InMemoryLedger, LedgerExt, TransactionRecord, TransactionStatus,
    TransitId,
};
use saga::messages::Notification;
use saga::protocol::{BOOKINGS_ERROR, MAX_SEAT_UPDATE_ATTEMPTS, PAYMENT_DECLINED_ERROR};
use saga::steps::ReservationRequest;
use saga::{
    Choreography, ErrorKind, InMemoryBus, InMemoryInventoryGateway, ReserveOutcome, SagaMessage,
    SagaServices, ScriptedPaymentGateway, Topic, Transit,
};

const TRANSIT: &str = "T-1";

struct TestHarness {
    choreography: Arc<Choreography>,
    ledger: InMemoryLedger,
    bus: InMemoryBus,
    inventory: InMemoryInventoryGateway,
    payment: ScriptedPaymentGateway,
}

impl TestHarness {
    fn new(seats: u32) -> Self {
        Self::with_seat_update_attempts(seats, MAX_SEAT_UPDATE_ATTEMPTS)
    }

    fn with_seat_update_attempts(seats: u32, attempts: usize) -> Self {
        let ledger = InMemoryLedger::new();
        let bus = InMemoryBus::new();
        let inventory = InMemoryInventoryGateway::with_transits([
            Transit::new("T-0", "Berlin", "Munich", "2024-05-01", 50),
            Transit::new(TRANSIT, "Berlin", "Hamburg", "2024-05-01", seats),
        ]);
        let payment = ScriptedPaymentGateway::new();

        let services = SagaServices::new(
            Arc::new(ledger.clone()),
            Arc::new(bus.clone()),
            Arc::new(inventory.clone()),
            Arc::new(payment.clone()),
        )
        .with_seat_update_attempts(attempts);

        Self {
            choreography: Arc::new(Choreography::new(services)),
            ledger,
            bus,
            inventory,
            payment,
        }
    }

    fn request(seats: u32) -> ReservationRequest {
        ReservationRequest {
            day: Some("2024-05-01".into()),
            destination: Some("Hamburg".into()),
            start: Some("Berlin".into()),
            number_of_seats: Some(seats),
            user_id: Some("user-1".into()),
        }
    }

    async fn reserve(&self, seats: u32) -> CorrelationId {
        match self
            .choreography
            .reserve_step()
            .reserve(Self::request(seats))
            .await
            .unwrap()
        {
            ReserveOutcome::Started(record) => record.correlation_id,
            ReserveOutcome::NoTransitAvailable => panic!("expected a transit"),
        }
    }

    async fn deliver_next(&self) -> Topic {
        let delivery = self.bus.next_delivery().expect("a pending delivery");
        self.choreography
            .dispatch(delivery.topic, &delivery.envelope)
            .await;
        delivery.topic
    }

    async fn run(&self) -> usize {
        self.choreography.run_until_idle(&self.bus).await
    }

    /// Dispatches every pending delivery in parallel, batch by batch.
    async fn run_concurrently(&self) {
        loop {
            let batch: Vec<_> = std::iter::from_fn(|| self.bus.next_delivery()).collect();
            if batch.is_empty() {
                break;
            }
            let tasks = batch.into_iter().map(|delivery| {
                let choreography = Arc::clone(&self.choreography);
                tokio::spawn(async move {
                    choreography
                        .dispatch(delivery.topic, &delivery.envelope)
                        .await
                })
            });
            for result in join_all(tasks).await {
                result.unwrap();
            }
        }
    }

    fn seats(&self) -> (u32, u32, u32) {
        let transit = self.inventory.transit(&TransitId::new(TRANSIT)).unwrap();
        assert!(transit.is_consistent(), "seat invariant broken: {transit:?}");
        (
            transit.available_seats,
            transit.locked_seats,
            transit.total_seats,
        )
    }

    async fn record(&self, collection: Collection, id: CorrelationId) -> TransactionRecord {
        self.ledger.require(collection, id).await.unwrap()
    }

    fn notifications(&self) -> Vec<Notification> {
        self.bus
            .published_on(Topic::Notifications)
            .into_iter()
            .filter_map(|message| match message {
                SagaMessage::Notification(note) => Some(note),
                _ => None,
            })
            .collect()
    }

    fn redeliver_first(&self, topic: Topic) {
        let published = self
            .bus
            .published()
            .into_iter()
            .find(|p| p.message.topic() == topic)
            .expect("a published message on the topic");
        self.bus.redeliver(&published).unwrap();
    }
}

#[tokio::test]
async fn test_declined_payment_releases_seats_and_notifies() {
    let h = TestHarness::new(5);
    h.payment.set_decline(true);
    let id = h.reserve(2).await;

    assert_eq!(h.deliver_next().await, Topic::Bookings);
    assert_eq!(h.seats(), (3, 2, 5));

    h.run().await;
    assert_eq!(h.seats(), (5, 0, 5));

    let reservation = h.record(Collection::Reservations, id).await;
    assert_eq!(reservation.status, Some(TransactionStatus::Failed));
    assert_eq!(reservation.error.as_deref(), Some(PAYMENT_DECLINED_ERROR));
    assert_eq!(
        h.record(Collection::Bookings, id).await.status,
        Some(TransactionStatus::Failed)
    );
    assert_eq!(
        h.record(Collection::Payments, id).await.status,
        Some(TransactionStatus::Failed)
    );

    assert_eq!(
        h.notifications(),
        vec![Notification {
            correlation_id: id,
            status: TransactionStatus::Failed,
            user_id: Some("user-1".into()),
        }]
    );
}

#[tokio::test]
async fn test_approved_payment_consumes_seats() {
    let h = TestHarness::new(5);
    let id = h.reserve(2).await;

    h.deliver_next().await;
    assert_eq!(h.seats(), (3, 2, 5));

    h.run().await;
    let (available, locked, _) = h.seats();
    assert_eq!((available, locked), (3, 0));

    for collection in Collection::ALL {
        assert_eq!(
            h.record(collection, id).await.status,
            Some(TransactionStatus::Completed),
            "{collection} record"
        );
    }
    let transit = h.inventory.transit(&TransitId::new(TRANSIT)).unwrap();
    assert_eq!(transit.sold_seats, 2);
    assert_eq!(h.payment.charges(), vec![("user-1".to_string(), 40)]);
    assert_eq!(h.notifications()[0].status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_each_step_publishes_one_event() {
    let h = TestHarness::new(5);
    h.reserve(2).await;
    h.run().await;

    let topics: Vec<Topic> = h.bus.published().iter().map(|p| p.message.topic()).collect();
    assert_eq!(
        topics,
        vec![
            Topic::Bookings,
            Topic::Payments,
            Topic::BookingCompletions,
            Topic::ReservationCompletions,
            Topic::Notifications,
        ]
    );
}

#[tokio::test]
async fn test_redelivered_booking_completion_is_a_no_op() {
    let h = TestHarness::new(5);
    let id = h.reserve(2).await;
    h.run().await;
    let before = h.seats();

    h.redeliver_first(Topic::BookingCompletions);
    h.redeliver_first(Topic::BookingCompletions);
    h.run().await;

    assert_eq!(h.seats(), before);
    assert_eq!(
        h.record(Collection::Reservations, id).await.status,
        Some(TransactionStatus::Completed)
    );
}

#[tokio::test]
async fn test_redelivered_payment_is_not_charged_twice() {
    let h = TestHarness::new(5);
    h.reserve(2).await;
    h.run().await;

    h.redeliver_first(Topic::Payments);
    h.run().await;

    assert_eq!(h.payment.charge_count(), 1);
    assert_eq!(h.seats(), (3, 0, 3));
}

#[tokio::test]
async fn test_redelivered_booking_does_not_lock_twice() {
    let h = TestHarness::new(5);
    h.payment.set_decline(true);
    h.reserve(2).await;

    h.deliver_next().await;
    h.redeliver_first(Topic::Bookings);
    h.run().await;

    assert_eq!(h.seats(), (5, 0, 5));
}

#[tokio::test]
async fn test_booking_failure_after_lock_releases_seats() {
    let h = TestHarness::new(5);
    h.bus.set_fail_on_publish(Topic::Payments, true);
    let id = h.reserve(2).await;

    h.run().await;

    assert_eq!(h.seats(), (5, 0, 5));
    assert_eq!(h.payment.charge_count(), 0);
    let reservation = h.record(Collection::Reservations, id).await;
    assert_eq!(reservation.status, Some(TransactionStatus::Failed));
    assert_eq!(reservation.error.as_deref(), Some(BOOKINGS_ERROR));
    assert_eq!(h.notifications()[0].status, TransactionStatus::Failed);
}

#[tokio::test]
async fn test_lost_compensation_is_resubmitted_from_dead_letters() {
    let h = TestHarness::new(5);
    h.payment.set_decline(true);
    h.bus.set_fail_on_publish(Topic::ReservationCancellations, true);
    let id = h.reserve(2).await;

    h.run().await;
    assert_eq!(h.seats(), (5, 0, 5));
    assert_eq!(
        h.record(Collection::Reservations, id).await.status,
        Some(TransactionStatus::Pending)
    );
    let dead_letters = h.choreography.services().dead_letters.clone();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(
        dead_letters.entries()[0].topic,
        Topic::ReservationCancellations
    );

    h.bus.set_fail_on_publish(Topic::ReservationCancellations, false);
    let report = dead_letters.resubmit_all(&h.bus).await;
    assert_eq!(report.resubmitted, 1);
    h.run().await;

    assert!(dead_letters.is_empty());
    assert_eq!(h.seats(), (5, 0, 5));
    assert_eq!(
        h.record(Collection::Reservations, id).await.status,
        Some(TransactionStatus::Failed)
    );
    assert_eq!(h.notifications().len(), 1);
}

#[tokio::test]
async fn test_missing_user_starts_nothing() {
    let h = TestHarness::new(5);
    let mut request = TestHarness::request(2);
    request.user_id = None;

    let err = h
        .choreography
        .reserve_step()
        .reserve(request)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.ledger.total_records().await, 0);
    assert!(h.bus.published().is_empty());
}

#[tokio::test]
async fn test_reserve_skips_transits_without_enough_seats() {
    let h = TestHarness::new(1);

    let outcome = h
        .choreography
        .reserve_step()
        .reserve(TestHarness::request(2))
        .await
        .unwrap();

    assert_eq!(outcome, ReserveOutcome::NoTransitAvailable);
    assert_eq!(h.run().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_keep_seat_invariant() {
    const RESERVATIONS: usize = 8;
    let h = TestHarness::with_seat_update_attempts(20, RESERVATIONS);
    let mut ids = Vec::new();
    for _ in 0..RESERVATIONS {
        ids.push(h.reserve(2).await);
    }

    h.run_concurrently().await;

    for id in ids {
        assert_eq!(
            h.record(Collection::Reservations, id).await.status,
            Some(TransactionStatus::Completed),
            "reservation {id} did not complete"
        );
    }

    let (available, locked, total) = h.seats();
    assert_eq!((available, locked, total), (4, 0, 4));
    let transit = h.inventory.transit(&TransitId::new(TRANSIT)).unwrap();
    assert_eq!(transit.sold_seats, 16);
    assert_eq!(h.payment.charge_count(), RESERVATIONS);
}
