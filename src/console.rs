//! Console channel: stdin lines in, stdout replies out. The default
//! transport for local runs and demos.

use async_trait::async_trait;
use rapport_core::error::EngineError;
use rapport_core::message::{InboundMessage, OutboundMessage};
use rapport_core::traits::Channel;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::debug;

/// Single-user channel over the terminal.
pub struct ConsoleChannel {
    user_id: String,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self {
            user_id: "console".to_string(),
        }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn start(&self) -> Result<mpsc::Receiver<InboundMessage>, EngineError> {
        let (tx, rx) = mpsc::channel(32);
        let user_id = self.user_id.clone();

        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut lines = stdin.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if tx.send(InboundMessage::new(&user_id, line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        debug!("stdin read failed: {e}");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), EngineError> {
        println!("{}", message.text);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
