//! External collaborators of the saga steps: inventory and payment.

pub mod http_inventory;
pub mod inventory;
pub mod payment;

pub use http_inventory::HttpInventoryGateway;
pub use inventory::{
    DEFAULT_SETTLED_RETENTION, InMemoryInventoryGateway, InventoryError, InventoryGateway,
    SeatCounts, SeatOperation, SeatOperationKind, SeatUpdate, SeatUpdateOutcome, Transit,
    TransitPatch, TransitQuery, TransitWriteQuery,
};
pub use payment::{PaymentDecision, PaymentGateway, RandomPaymentGateway, ScriptedPaymentGateway};
