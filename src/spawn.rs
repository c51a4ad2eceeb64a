use std::thread;

use crate::comms::{Listened, Requestor, pair};
use crate::config::PairConfig;
use crate::utils::logger::LoggerConfig;
use crate::utils::{CancelToken, try_pin_core};

/// Configuration for a spawned responder worker.
#[derive(Debug, Clone, Default)]
pub struct SpawnConfig {
    pub pair: PairConfig,

    /// Logical CPU core to pin the worker thread to (`None` = no pinning).
    pub core_id: Option<usize>,

    /// Install a tracing subscriber from the worker thread (`None` = the
    /// embedding application owns logging setup).
    pub logger: Option<LoggerConfig>,
}

/// Lifecycle hooks observed by the worker thread.
#[derive(Default)]
pub struct LoopHooks {
    /// Runs before the dispatch loop starts; may replace the loop's cancel
    /// token. An error aborts startup and is reported through `post_end`.
    pub pre_start: Option<Box<dyn FnOnce(CancelToken) -> anyhow::Result<CancelToken> + Send>>,

    /// Runs after each idle pass of the loop. An error aborts the loop.
    pub post_listen: Option<Box<dyn FnMut() -> anyhow::Result<()> + Send>>,

    /// Runs once on loop exit with the terminating error, if any.
    pub post_end: Option<Box<dyn FnOnce(Option<anyhow::Error>) + Send>>,
}

/// Build a pair and drive its responder on a dedicated thread, returning
/// the requestor.
///
/// The loop runs `listen_and_handle` until it reports an error (parent
/// cancellation, gone-away expiry, a dead work channel) or a hook aborts
/// it; the responder is then closed so outstanding and subsequent sends
/// fail with a typed error instead of waiting out their full timeout.
pub fn spawn<T, U, H>(
    parent: CancelToken,
    cfg: SpawnConfig,
    hooks: LoopHooks,
    mut handler: H,
) -> Requestor<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
    H: FnMut(&CancelToken, T) -> anyhow::Result<U> + Send + 'static,
{
    let (requestor, mut responder) = pair::<T, U>(parent.clone(), cfg.pair.clone());

    thread::spawn(move || {
        let LoopHooks {
            pre_start,
            mut post_listen,
            post_end,
        } = hooks;

        // Kept alive for the thread's lifetime so the appender flushes.
        let _log_guard = cfg.logger.as_ref().and_then(|logger| match logger.init() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("[PairWorker] logger init failed: {}", e);
                None
            }
        });

        if let Some(core_id) = cfg.core_id {
            match try_pin_core(core_id) {
                Ok(id) => tracing::info!("[PairWorker] pinned to core {}", id),
                Err(e) => tracing::error!("[PairWorker] cannot pin core: {}", e),
            }
        }

        let token = match pre_start {
            Some(hook) => match hook(parent.clone()) {
                Ok(token) => token,
                Err(e) => {
                    tracing::error!("[PairWorker] pre_start failed: {}", e);
                    responder.close();
                    if let Some(hook) = post_end {
                        hook(Some(e));
                    }
                    return;
                }
            },
            None => parent,
        };

        let mut terminal: Option<anyhow::Error> = None;
        loop {
            match responder.listen_and_handle(&token, &mut handler) {
                Ok(Listened::Handled) => {}
                Ok(Listened::Idle) => {
                    if let Some(hook) = post_listen.as_mut()
                        && let Err(e) = hook()
                    {
                        terminal = Some(e);
                        break;
                    }
                }
                Err(e) => {
                    terminal = Some(anyhow::Error::new(e));
                    break;
                }
            }
        }

        responder.close();
        match &terminal {
            Some(e) => tracing::debug!("[PairWorker] dispatch loop ended: {}", e),
            None => tracing::debug!("[PairWorker] dispatch loop ended"),
        }
        if let Some(hook) = post_end {
            hook(terminal);
        }
    });

    requestor
}
