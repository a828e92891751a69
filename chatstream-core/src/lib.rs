//! Streaming chat-completion client core.
//!
//! [`session::ChatSession`] drives one request at a time: it appends a loading placeholder,
//! decodes the provider's event stream ([`decoder`]), folds deltas into the placeholder
//! ([`accumulator`]) and publishes every intermediate list ([`messages`]).

pub mod accumulator;
pub mod config;
pub mod decoder;
pub mod error;
pub mod http_client;
pub mod messages;
pub mod model;
pub mod normalizer;
pub mod providers;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use error::{ChatStreamError, CoreResult};
pub use model::{ChatMessage, ChatToken, CompletionParams, MessageInput, MessageMeta};
pub use session::{ChatSession, ChatSessionBuilder, SubmitOutcome};
pub use transport::{CompletionTransport, ReplayTransport};
