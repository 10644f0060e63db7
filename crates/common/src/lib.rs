//! Identifier types shared by every saga participant.

mod types;

pub use types::{CorrelationId, TransitId};
