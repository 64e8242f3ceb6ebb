//! Message channel used to reach counterparties.
//!
//! - **Contract** (`channel`) - `send` / `listen` / `close` plus the inbound handler callback
//! - **Simulated** (`simulated`) - dry-run variant that records sends and replays replies
//! - **Live** (`live`) - HTTP gateway transport with an explicit `Unpaired -> Paired` state
//! - **Backend** (`backend`) - the variant picked once at startup from configuration
//!
//! ```text
//! Dispatcher --send--> ChannelBackend --> gateway / recorder
//! gateway webhook --deliver_inbound--> InboundHandler (correlator)
//! ```

pub mod backend;
pub mod channel;
pub mod error;
pub mod live;
pub mod simulated;

pub use backend::ChannelBackend;
pub use channel::{HandlerRegistry, InboundHandler, InboundMessage, MessageChannel};
pub use error::ChannelError;
pub use live::{LiveChannel, PairingState, ReconnectPolicy};
pub use simulated::{SentMessage, SimulatedChannel};
