//! Choreographed transit reservation saga.
//!
//! Independent steps subscribe to bus topics, perform one local transaction
//! each and publish the event that triggers the next step:
//!
//! 1. Reserve (synchronous): pick a transit, record the reservation
//! 2. Book: lock seats
//! 3. Pay: charge the user
//! 4. Complete or cancel the booking: consume or release the seats
//! 5. Complete or cancel the reservation: notify the user
//!
//! A failing step emits a compensation event instead of its success event.
//! Delivery is at-least-once, so every ledger write is a field-level merge
//! and every seat change is keyed by correlation id.

pub mod bus;
pub mod choreography;
pub mod dead_letter;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod services;
pub mod steps;

pub use bus::{
    BusError, DEFAULT_PUBLISHED_RETENTION, Delivery, EventBus, InMemoryBus, MessageId,
    PublishedMessage,
};
pub use choreography::{Choreography, DispatchResult};
pub use dead_letter::{DeadLetter, DeadLetterQueue, ResubmitReport};
pub use error::{ErrorKind, SagaError};
pub use messages::{Envelope, SagaMessage, Topic, UnknownTopic};
pub use protocol::Step;
pub use services::{
    HttpInventoryGateway, InMemoryInventoryGateway, InventoryError, InventoryGateway,
    PaymentDecision, PaymentGateway, RandomPaymentGateway, ScriptedPaymentGateway, SeatCounts,
    SeatOperation, SeatOperationKind, SeatUpdate, SeatUpdateOutcome, Transit, TransitPatch,
    TransitQuery, TransitWriteQuery,
};
pub use steps::{ReservationRequest, ReserveOutcome, ReserveStep, SagaServices, StepOutcome};
