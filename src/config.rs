use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) const DEFAULT_REQUESTOR_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_RESPONDER_TIMEOUT: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_GONE_AWAY_TIMEOUT: Duration = Duration::from_secs(120);
pub(crate) const DEFAULT_CHAN_SIZE: usize = 100;
pub(crate) const DEFAULT_CORR_CHAN_SIZE: usize = 10;
pub(crate) const DEFAULT_CORR_CHAN_RETRIES: u32 = 5;
pub(crate) const DEFAULT_CORR_CHAN_SEND_TIMEOUT: Duration = Duration::from_millis(100);

const MIN_CORR_CHAN_SEND_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_CORR_CHAN_SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// One bounded attempt to place a request on the work channel.
pub(crate) const SUBMIT_ATTEMPT_TIMEOUT: Duration = Duration::from_micros(100);
pub(crate) const MAX_SUBMIT_ATTEMPTS: u32 = 3;

/// Knobs for a requestor/responder pair.
///
/// Every field is optional; `None` or a zero value falls back to the
/// default. Durations are given in milliseconds to keep the struct
/// serde-friendly.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PairConfig {
    /// Max wait for a matching reply in `send` (`None` = 30 000).
    pub requestor_timeout_ms: Option<u64>,

    /// Idle wait in `listen_and_handle` before reporting `Idle` (`None` = 1 000).
    pub responder_timeout_ms: Option<u64>,

    /// Inter-request silence before the responder declares the requestor
    /// gone and shuts itself down (`None` = 120 000).
    pub gone_away_timeout_ms: Option<u64>,

    /// Work-channel buffer capacity (`None` = 100).
    pub chan_size: Option<usize>,

    /// Reply-channel inbound buffer capacity (`None` = 10).
    pub corr_chan_size: Option<usize>,

    /// Forwarder retries per response before the reply is dropped (`None` = 5).
    pub corr_chan_retries: Option<u32>,

    /// Forwarder per-attempt timeout, clamped to [100 ms, 60 s] (`None` = 100).
    pub corr_chan_send_timeout_ms: Option<u64>,
}

/// Fully resolved pair settings.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub requestor_timeout: Duration,
    pub responder_timeout: Duration,
    pub gone_away_timeout: Duration,
    pub chan_size: usize,
    pub corr_chan_size: usize,
    pub corr_chan_retries: u32,
    pub corr_chan_send_timeout: Duration,
}

impl PairConfig {
    pub(crate) fn resolve(&self) -> Settings {
        Settings {
            requestor_timeout: millis_or(self.requestor_timeout_ms, DEFAULT_REQUESTOR_TIMEOUT),
            responder_timeout: millis_or(self.responder_timeout_ms, DEFAULT_RESPONDER_TIMEOUT),
            gone_away_timeout: millis_or(self.gone_away_timeout_ms, DEFAULT_GONE_AWAY_TIMEOUT),
            chan_size: self.chan_size.filter(|&v| v > 0).unwrap_or(DEFAULT_CHAN_SIZE),
            corr_chan_size: self
                .corr_chan_size
                .filter(|&v| v > 0)
                .unwrap_or(DEFAULT_CORR_CHAN_SIZE),
            corr_chan_retries: self.corr_chan_retries.unwrap_or(DEFAULT_CORR_CHAN_RETRIES),
            corr_chan_send_timeout: millis_or(
                self.corr_chan_send_timeout_ms,
                DEFAULT_CORR_CHAN_SEND_TIMEOUT,
            )
            .clamp(MIN_CORR_CHAN_SEND_TIMEOUT, MAX_CORR_CHAN_SEND_TIMEOUT),
        }
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value
        .filter(|&v| v > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}
