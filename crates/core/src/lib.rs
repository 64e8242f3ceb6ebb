pub mod config;
pub mod correlation;
pub mod domain;
pub mod errors;
pub mod price;

pub use correlation::{CorrelationPolicy, CorrelationToken};
pub use domain::counterparty::{normalize_address, Counterparty, CounterpartyId};
pub use domain::outcome::{OutcomeRecord, PurchaseRecord};
pub use domain::quote_unit::{QuoteUnit, QuoteUnitId, QuoteUnitStatus};
pub use domain::request::{LineItem, QuoteRequest, QuoteRequestId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use price::parse_price;
