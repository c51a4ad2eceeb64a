use anyhow::Context;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Tracing subscriber configuration, loadable from the environment.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct LoggerConfig {
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    pub rolling: Option<String>,
    #[serde(default)]
    pub max_files: usize,
}

impl LoggerConfig {
    /// Read configuration from `LOG_LEVEL`, `LOG_FILE_DIR`, `LOG_FILE_PREFIX`
    /// and `LOG_ROLLING`, falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            file_dir: std::env::var("LOG_FILE_DIR").ok(),
            file_prefix: std::env::var("LOG_FILE_PREFIX").ok(),
            rolling: std::env::var("LOG_ROLLING").ok(),
            max_files: 2,
        }
    }

    /// Install a global `tracing` subscriber. With `file_dir` set, logs go to
    /// a rolling file appender and the returned guard must be kept alive for
    /// the flush thread; otherwise logs go to stdout and `None` is returned.
    pub fn init(&self) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);

        let Some(dir) = self.file_dir.as_deref() else {
            let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
            return Ok(None);
        };

        let rotation = match self.rolling.as_deref() {
            Some("hourly") => Rotation::HOURLY,
            Some("minutely") => Rotation::MINUTELY,
            _ => Rotation::DAILY,
        };

        let appender: RollingFileAppender = RollingFileAppender::builder()
            .rotation(rotation)
            .max_log_files(self.max_files.max(1))
            .filename_prefix(self.file_prefix.as_deref().unwrap_or(""))
            .build(dir)
            .with_context(|| format!("failed to create rolling appender in {}", dir))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(writer)
            .try_init();

        Ok(Some(guard))
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            file_prefix: None,
            rolling: Some("daily".to_string()),
            max_files: 2,
        }
    }
}

/// Lock-free rate limiter for log statements on hot paths.
///
/// At most one emission per `interval`; callers racing for the same slot
/// settle it with a compare-exchange on the next-emission deadline, and the
/// losers only bump the skipped counter. The winning emission learns how
/// many statements were skipped since the previous one.
pub struct Throttle {
    epoch: Instant,
    interval_nanos: u64,
    next_emit: AtomicU64,
    skipped: AtomicU64,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            interval_nanos: interval.as_nanos().min(u64::MAX as u128) as u64,
            // 0 leaves the first poll free to emit immediately.
            next_emit: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// `Some(skipped_count)` when the caller won the emission slot, `None`
    /// when it should stay quiet.
    #[inline]
    pub fn poll(&self) -> Option<u64> {
        if self.interval_nanos == 0 {
            return Some(self.skipped.swap(0, Ordering::Relaxed));
        }

        let now = self.epoch.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        let due = self.next_emit.load(Ordering::Acquire);
        if now < due {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match self.next_emit.compare_exchange(
            due,
            now + self.interval_nanos,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => Some(self.skipped.swap(0, Ordering::Relaxed)),
            Err(_) => {
                // Another caller claimed this slot first.
                self.skipped.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

/// Rate-limited logging with the level given as an identifier
/// (`error`, `warn`, `info`, `debug`, `trace`); one throttle per call site.
#[macro_export]
macro_rules! log_throttled {
    ($level:ident, $interval:expr, $($arg:tt)*) => {{
        static THROTTLE: std::sync::OnceLock<$crate::utils::logger::Throttle> =
            std::sync::OnceLock::new();
        match THROTTLE
            .get_or_init(|| $crate::utils::logger::Throttle::new($interval))
            .poll()
        {
            Some(0) => tracing::$level!($($arg)*),
            Some(skipped) => tracing::$level!(skipped, $($arg)*),
            None => {}
        }
    }};
}
