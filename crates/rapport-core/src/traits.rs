use crate::{context::Context, error::EngineError, message::InboundMessage, message::OutboundMessage};
use async_trait::async_trait;

/// Completion capability — the text generator behind free-form replies.
///
/// Treated as unreliable and possibly slow; callers always time-box it
/// and fall back to a templated reply on failure.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Whether this provider requires an API key to function.
    fn requires_api_key(&self) -> bool;

    /// Send a conversation context to the provider and get the reply text.
    async fn complete(&self, context: &Context) -> Result<String, EngineError>;

    /// Check if the provider is available and ready.
    async fn is_available(&self) -> bool;
}

/// Messaging transport — the narrow seam to the outside world.
///
/// The engine never talks to a protocol client directly; it only consumes
/// this send/receive contract.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start listening for inbound messages.
    /// Returns a receiver that yields messages as they arrive.
    async fn start(&self) -> Result<tokio::sync::mpsc::Receiver<InboundMessage>, EngineError>;

    /// Deliver a message to the remote party.
    async fn send(&self, message: OutboundMessage) -> Result<(), EngineError>;

    /// Graceful shutdown.
    async fn stop(&self) -> Result<(), EngineError>;
}
