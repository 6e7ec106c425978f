use std::collections::HashMap;

use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::{channel::ChannelAdapter, error::ChannelError, types::{ChannelStatus, OutboundMessage}};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300; // 5 minutes
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// ChannelHub (C14, spec.md §4.14): lifecycle and dispatch for registered
/// [`ChannelAdapter`]s. Adapters are stored by [`ChannelAdapter::name`] and
/// started with exponential backoff with jitter on connect failure.
pub struct ChannelHub {
    adapters: HashMap<String, Box<dyn ChannelAdapter>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self { adapters: HashMap::new() }
    }

    /// Register an adapter. Replaces any existing adapter with the same name.
    pub fn register(&mut self, adapter: Box<dyn ChannelAdapter>) {
        let name = adapter.name().to_string();
        info!(channel = %name, "registering channel adapter");
        self.adapters.insert(name, adapter);
    }

    /// Start every registered adapter, sequentially, with backoff on failure.
    pub async fn start_all(&mut self) {
        for (name, adapter) in self.adapters.iter_mut() {
            info!(channel = %name, "starting channel adapter");
            if let Err(e) = start_with_backoff(name, adapter.as_mut()).await {
                error!(channel = %name, error = %e, "failed to start channel adapter after retries");
            }
        }
    }

    /// Stop every registered adapter. Errors are logged, not propagated, so
    /// one misbehaving adapter doesn't block shutdown of the rest (spec.md
    /// §5 graceful-shutdown sequence: "stop adapters").
    pub async fn stop_all(&mut self) {
        for (name, adapter) in self.adapters.iter_mut() {
            info!(channel = %name, "stopping channel adapter");
            if let Err(e) = adapter.stop().await {
                warn!(channel = %name, error = %e, "error while stopping channel adapter");
            }
        }
    }

    /// Deliver `message` to `delivery`, a string of the form
    /// `<adapterName>:<adapterSubTarget>` (spec.md §6 ChannelAdapter
    /// contract, outbound).
    pub async fn deliver(&self, delivery: &str, message: OutboundMessage) -> Result<(), ChannelError> {
        let (adapter_name, target) = delivery
            .split_once(':')
            .ok_or_else(|| ChannelError::MalformedTarget(delivery.to_string()))?;
        let adapter = self
            .adapters
            .get(adapter_name)
            .ok_or_else(|| ChannelError::UnknownAdapter(adapter_name.to_string()))?;
        adapter.send(target, &message).await
    }

    /// Current health of every registered adapter, sorted by name for
    /// deterministic ManagementAPI `status` output.
    pub fn health(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> =
            self.adapters.iter().map(|(name, a)| (name.clone(), a.health())).collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempt to start a single adapter with exponential backoff and ±10% jitter.
/// Schedule: 5s -> 10s -> 20s -> ... -> 300s (cap), up to [`MAX_ATTEMPTS`] tries.
async fn start_with_backoff(name: &str, adapter: &mut dyn ChannelAdapter) -> Result<(), ChannelError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match adapter.start().await {
            Ok(()) => {
                info!(channel = %name, attempt, "channel adapter started successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                return Err(e);
            }
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    channel = %name,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "channel adapter start failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    unreachable!("backoff loop exited without returning")
}

/// Deterministic pseudo-random jitter (0 .. `JITTER_FRACTION * base_secs`),
/// derived from the current time to avoid a rand dependency.
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyAdapter {
        name: String,
        fail_until: u32,
        attempts: Arc<AtomicU32>,
        sent: Arc<std::sync::Mutex<Vec<(String, OutboundMessage)>>>,
    }

    #[async_trait]
    impl ChannelAdapter for FlakyAdapter {
        fn name(&self) -> &str {
            &self.name
        }
        async fn start(&mut self) -> Result<(), ChannelError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.fail_until {
                Err(ChannelError::ConnectionFailed("not yet".to_string()))
            } else {
                Ok(())
            }
        }
        async fn stop(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send(&self, target: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push((target.to_string(), message.clone()));
            Ok(())
        }
        fn health(&self) -> ChannelStatus {
            ChannelStatus::Connected
        }
    }

    #[tokio::test]
    async fn deliver_splits_adapter_name_from_sub_target() {
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        let adapter = FlakyAdapter {
            name: "discord".to_string(),
            fail_until: 1,
            attempts: Arc::new(AtomicU32::new(0)),
            sent: sent.clone(),
        };
        let mut hub = ChannelHub::new();
        hub.register(Box::new(adapter));
        hub.start_all().await;

        hub.deliver("discord:dm:42", OutboundMessage::text("hi")).await.unwrap();
        let recorded = sent.lock().unwrap();
        assert_eq!(recorded[0].0, "dm:42");
    }

    #[tokio::test]
    async fn deliver_to_unknown_adapter_errors() {
        let hub = ChannelHub::new();
        let err = hub.deliver("nope:dm:1", OutboundMessage::text("hi")).await.unwrap_err();
        assert!(matches!(err, ChannelError::UnknownAdapter(_)));
    }

    #[tokio::test]
    async fn deliver_without_separator_errors() {
        let hub = ChannelHub::new();
        let err = hub.deliver("malformed", OutboundMessage::text("hi")).await.unwrap_err();
        assert!(matches!(err, ChannelError::MalformedTarget(_)));
    }

    #[tokio::test]
    async fn health_is_sorted_by_adapter_name() {
        let mut hub = ChannelHub::new();
        hub.register(Box::new(FlakyAdapter {
            name: "gmail".to_string(),
            fail_until: 1,
            attempts: Arc::new(AtomicU32::new(0)),
            sent: Arc::new(std::sync::Mutex::new(Vec::new())),
        }));
        hub.register(Box::new(FlakyAdapter {
            name: "cli".to_string(),
            fail_until: 1,
            attempts: Arc::new(AtomicU32::new(0)),
            sent: Arc::new(std::sync::Mutex::new(Vec::new())),
        }));
        let statuses = hub.health();
        assert_eq!(statuses[0].0, "cli");
        assert_eq!(statuses[1].0, "gmail");
    }
}
