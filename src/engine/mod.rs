//! The engagement engine: one struct owning the store, the completion
//! provider, and the outbound channel, processing inbound messages
//! sequentially and running the follow-up scheduler in the background.

mod adapt;
mod chunker;
mod keywords;
mod learning;
mod pipeline;
mod scheduler;
mod templates;


use rapport_core::config::Config;
use rapport_core::error::EngineError;
use rapport_core::message::OutboundMessage;
use rapport_core::traits::{Channel, Provider};
use rapport_memory::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub struct Engine {
    config: Config,
    store: Store,
    provider: Arc<dyn Provider>,
    channel: Arc<dyn Channel>,
    /// One lock per user id, shared between the pipeline and the
    /// scheduler so reminders never interleave with message handling.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        config: Config,
        store: Store,
        provider: Arc<dyn Provider>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            channel,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Chunk, pace, and send a reply. Only the first part carries the
    /// quoted message id. A failed send is retried once without the
    /// quote; if that also fails the part is dropped and logged rather
    /// than wedging the pipeline.
    pub(crate) async fn deliver(
        &self,
        user_id: &str,
        text: &str,
        quoted: Option<String>,
    ) -> Result<(), EngineError> {
        let parts = chunker::chunk(text, self.config.chunking.single_part_max);
        let delays = chunker::pace(&parts, &self.config.chunking, &mut rand::thread_rng());
        for (i, (part, delay)) in parts.iter().zip(delays).enumerate() {
            tokio::time::sleep(delay).await;
            let message = OutboundMessage {
                user_id: user_id.to_string(),
                text: part.clone(),
                quoted_message_id: if i == 0 { quoted.clone() } else { None },
            };
            if let Err(e) = self.channel.send(message.clone()).await {
                warn!("send to {user_id} failed, retrying without quote: {e}");
                let retry = OutboundMessage {
                    quoted_message_id: None,
                    ..message
                };
                if let Err(e) = self.channel.send(retry).await {
                    error!("dropping reply part {} for {user_id}: {e}", i + 1);
                }
            }
        }
        Ok(())
    }

    /// Start the channel and run until its message stream closes.
    pub async fn run(self: Arc<Self>) -> Result<(), EngineError> {
        info!(
            "engine starting: channel '{}', provider '{}'",
            self.channel.name(),
            self.provider.name(),
        );
        let mut inbound = self.channel.start().await?;

        if self.config.scheduler.enabled {
            let engine = self.clone();
            tokio::spawn(async move { engine.scheduler_loop().await });
        } else {
            info!("follow-up scheduler disabled");
        }

        while let Some(msg) = inbound.recv().await {
            if let Err(e) = self.handle_message(msg).await {
                error!("message handling failed: {e}");
            }
        }

        info!("inbound stream closed, shutting down");
        self.channel.stop().await
    }
}
