//! CLI readline adapter: a ChannelAdapter (spec.md §4.14) that reads
//! prompts from stdin and prints replies to stdout. Gives the gateway a
//! usable channel out of the box without any external service config.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use halcyon_channels::{ChannelAdapter, ChannelError, ChannelStatus, InboundHandler, OutboundMessage};

const AGENT_ID: &str = "main";
const TARGET: &str = "main";

pub struct CliAdapter {
    inbound: Arc<dyn InboundHandler>,
    status: Arc<Mutex<ChannelStatus>>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl CliAdapter {
    pub fn new(inbound: Arc<dyn InboundHandler>) -> Self {
        Self { inbound, status: Arc::new(Mutex::new(ChannelStatus::Disconnected)), reader_task: None }
    }

    fn session_key() -> String {
        format!("{AGENT_ID}:cli:{TARGET}")
    }
}

#[async_trait]
impl ChannelAdapter for CliAdapter {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&mut self) -> Result<(), ChannelError> {
        *self.status.lock().await = ChannelStatus::Connected;
        let inbound = self.inbound.clone();
        let status = self.status.clone();

        self.reader_task = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if !line.trim().is_empty() => {
                        inbound.handle_inbound(&Self::session_key(), line.trim(), "").await;
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
            *status.lock().await = ChannelStatus::Disconnected;
        }));

        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ChannelError> {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        *self.status.lock().await = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send(&self, _target: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
        if let Some(text) = &message.text {
            println!("{text}");
        }
        Ok(())
    }

    fn health(&self) -> ChannelStatus {
        self.status.try_lock().map(|s| s.clone()).unwrap_or(ChannelStatus::Connecting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullInbound;

    #[async_trait]
    impl InboundHandler for NullInbound {
        async fn handle_inbound(&self, _session_key: &str, _content: &str, _reply_to: &str) {}
    }

    #[test]
    fn name_is_cli() {
        let adapter = CliAdapter::new(Arc::new(NullInbound));
        assert_eq!(adapter.name(), "cli");
    }

    #[test]
    fn starts_disconnected_until_start_is_called() {
        let adapter = CliAdapter::new(Arc::new(NullInbound));
        assert!(matches!(adapter.health(), ChannelStatus::Disconnected));
    }

    #[tokio::test]
    async fn send_with_no_text_is_a_noop() {
        let adapter = CliAdapter::new(Arc::new(NullInbound));
        let message = OutboundMessage { text: None, files: None, reply_to: None };
        assert!(adapter.send("ignored", &message).await.is_ok());
    }
}
