pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{CorrelationId, TransitId};
pub use error::{LedgerError, Result};
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use record::{Collection, TransactionPatch, TransactionRecord, TransactionStatus};
pub use store::{Ledger, LedgerExt};
