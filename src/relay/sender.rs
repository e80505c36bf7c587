//! Outbound text path: chunk, pace, transmit.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::config::MeshtasticConfig;
use crate::logutil::escape_log;
use crate::metrics;
use crate::relay::chunker::chunk_message;
use crate::relay::transport::RadioTransport;

/// Outcome of one [`OutboundSender::send`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub fragments: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl SendReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.delivered == self.fragments
    }
}

pub struct OutboundSender {
    transport: Arc<dyn RadioTransport>,
    max_len: usize,
    default_channel: u32,
    min_gap: Duration,
    /// Last transmission per channel. Held across the send so fragments from
    /// different callers never interleave.
    last_send: Mutex<HashMap<u32, Instant>>,
}

impl OutboundSender {
    pub fn new(transport: Arc<dyn RadioTransport>, config: &MeshtasticConfig) -> Self {
        Self::with_settings(
            transport,
            config.max_message_size,
            config.channel,
            Duration::from_millis(config.min_send_gap_ms),
        )
    }

    pub fn with_settings(
        transport: Arc<dyn RadioTransport>,
        max_len: usize,
        default_channel: u32,
        min_gap: Duration,
    ) -> Self {
        Self {
            transport,
            max_len,
            default_channel,
            min_gap,
            last_send: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_channel(&self) -> u32 {
        self.default_channel
    }

    pub fn transport(&self) -> &Arc<dyn RadioTransport> {
        &self.transport
    }

    /// Send on the default channel.
    pub async fn send(&self, text: &str) -> SendReport {
        self.send_on(text, self.default_channel).await
    }

    /// Chunk `text` and transmit the fragments in order on `channel`.
    /// A failed fragment is logged and skipped; the rest are still tried.
    pub async fn send_on(&self, text: &str, channel: u32) -> SendReport {
        let mut report = SendReport::default();
        if text.trim().is_empty() {
            debug!("Skipping empty outbound message");
            return report;
        }
        let fragments = chunk_message(text, self.max_len);
        report.fragments = fragments.len();

        let mut last_send = self.last_send.lock().await;
        for (idx, fragment) in fragments.iter().enumerate() {
            if let Some(last) = last_send.get(&channel) {
                let elapsed = last.elapsed();
                if elapsed < self.min_gap {
                    let wait = self.min_gap - elapsed;
                    debug!(
                        "Gating: waiting {}ms to respect minimum {}ms between sends on ch {}",
                        wait.as_millis(),
                        self.min_gap.as_millis(),
                        channel
                    );
                    sleep(wait).await;
                }
            }
            let result = self.transport.send_text(fragment, channel).await;
            last_send.insert(channel, Instant::now());
            match result {
                Ok(id) => {
                    report.delivered += 1;
                    metrics::inc_fragments_sent();
                    debug!(
                        "Sent fragment {}/{} id={} ch={} ({} bytes): '{}'",
                        idx + 1,
                        fragments.len(),
                        id,
                        channel,
                        fragment.len(),
                        escape_log(fragment)
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::inc_fragments_failed();
                    warn!(
                        "Fragment {}/{} on ch {} failed: {}",
                        idx + 1,
                        fragments.len(),
                        channel,
                        e
                    );
                }
            }
        }
        report
    }
}
