//! Quote correlation engine.
//!
//! This crate holds the workflow that turns a purchase description into a decision:
//! - **Assistant** (`assistant`, `llm`, `heuristic`, `backend`) - extraction, matching,
//!   message composition and ranking, backed by a language model or by deterministic rules
//! - **Matcher** (`matcher`) - clean, first-seen ordered counterparty list
//! - **Dispatcher** (`dispatcher`) - one solicitation and one pending quote unit per counterparty
//! - **Correlator** (`correlator`) - inbound replies to quote units
//! - **Wait** (`wait`, `signal`) - deadline-bounded poll with an optional wake-up
//! - **Decision** (`decision`) - ranking over received units
//!
//! ```text
//! describe -> extract -> match -> dispatch -> wait (poll store) -> decide -> purchase memory
//!                                               ^
//!                         channel inbound -> correlator
//! ```
//!
//! The assistant is a translator only. Which units exist, when waiting stops and what was
//! received are decided here, from the store.

pub mod assistant;
pub mod backend;
pub mod correlator;
pub mod decision;
pub mod dispatcher;
pub mod error;
pub mod heuristic;
pub mod llm;
pub mod matcher;
pub mod runtime;
pub mod signal;
pub mod wait;

pub use assistant::{MatchSuggestion, QuoteAssistant, RankedOutcome, ReceivedQuote};
pub use backend::AssistantBackend;
pub use correlator::{CorrelationOutcome, ResponseCorrelator};
pub use decision::DecisionStep;
pub use dispatcher::OutboundDispatcher;
pub use error::{AssistantError, EngineError};
pub use matcher::{CounterpartyMatcher, MatchedCounterparty};
pub use runtime::{EngineStores, QuoteCommand, QuoteWorkflow, WorkflowOutcome, WorkflowSettings};
pub use signal::ReplySignal;
pub use wait::{WaitScheduler, WaitSnapshot};
