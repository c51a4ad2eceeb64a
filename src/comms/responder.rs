use crossbeam::channel::{Receiver, TryRecvError};
use crossbeam::utils::Backoff;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::comms::corr::CorrChan;
use crate::comms::req::{ReqEnvelope, ReqPool};
use crate::comms::resp::{Resp, RespPool};
use crate::comms::timer::TimerPool;
use crate::error::{CommsError, panic_message};
use crate::utils::{CancelToken, SharedFlag};

/// Outcome of one `listen_and_handle` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listened {
    /// A request was received and answered.
    Handled,
    /// The idle wait elapsed with no work; call again.
    Idle,
}

/// Receiving half of a pair.
///
/// `listen_and_handle` is meant to be driven in a loop from a single
/// dedicated thread; `&mut self` enforces that there is one driver. Closing
/// is safe from anywhere via [`Responder::close`] or a [`CloseHandle`].
pub struct Responder<T, U> {
    work_rx: Receiver<ReqEnvelope<T, U>>,
    done: SharedFlag,
    closed: SharedFlag,
    parent: CancelToken,
    timeout: Duration,
    gone_away_timeout: Duration,
    gone_away_at: Option<Instant>,
    resps: Arc<RespPool<U>>,
    reqs: Arc<ReqPool<T, U>>,
    timers: Arc<TimerPool>,
}

/// Detached handle that can close a responder from any thread.
#[derive(Clone)]
pub struct CloseHandle {
    closed: SharedFlag,
    done: SharedFlag,
}

impl CloseHandle {
    pub fn close(&self) {
        self.closed.raise();
        self.done.raise();
    }
}

impl<T, U> Responder<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    pub(crate) fn new(
        work_rx: Receiver<ReqEnvelope<T, U>>,
        done: SharedFlag,
        parent: CancelToken,
        timeout: Duration,
        gone_away_timeout: Duration,
        resps: Arc<RespPool<U>>,
        reqs: Arc<ReqPool<T, U>>,
        timers: Arc<TimerPool>,
    ) -> Self {
        Self {
            work_rx,
            done,
            closed: SharedFlag::new(),
            parent,
            timeout,
            gone_away_timeout,
            gone_away_at: None,
            resps,
            reqs,
            timers,
        }
    }

    /// Wait for one request (up to the configured idle timeout) and answer
    /// it with `handler`.
    ///
    /// Returns [`Listened::Idle`] when the wait elapsed with no work and the
    /// requestor is still considered present — the caller is expected to
    /// loop, optionally doing other work in between. A handler panic is
    /// answered with [`CommsError::HandlerPanic`] and reported to the sender
    /// rather than to this caller.
    pub fn listen_and_handle<F>(
        &mut self,
        cancel: &CancelToken,
        handler: &mut F,
    ) -> Result<Listened, CommsError>
    where
        F: FnMut(&CancelToken, T) -> anyhow::Result<U>,
    {
        // Armed on first use, so the driving thread may do other work before
        // the first request comes in.
        let gone_away_at = *self
            .gone_away_at
            .get_or_insert_with(|| Instant::now() + self.gone_away_timeout);

        let mut timer = self.timers.acquire(self.timeout);
        let backoff = Backoff::new();
        let mut spins: u32 = 0;

        let picked = loop {
            if self.parent.is_cancelled() || cancel.is_cancelled() {
                self.closed.raise();
                break Err(CommsError::ContextCompleted);
            }

            match self.work_rx.try_recv() {
                Ok(env) => break Ok(Some(env)),
                Err(TryRecvError::Empty) => {
                    if timer.fired() {
                        if Instant::now() > gone_away_at {
                            self.closed.raise();
                            break Err(CommsError::RequestorGoneAway);
                        }
                        break Ok(None);
                    }
                    spins = spins.saturating_add(1);
                    if spins < 64 {
                        backoff.spin();
                    } else if spins < 256 {
                        backoff.snooze();
                    } else {
                        thread::sleep(Duration::from_micros(2));
                    }
                }
                Err(TryRecvError::Disconnected) => break Err(CommsError::CommsChannelClosed),
            }
        };
        self.timers.release(timer);

        match picked {
            Err(err) => Err(err),
            Ok(None) => Ok(Listened::Idle),
            Ok(Some(env)) => self.receive(cancel, handler, env),
        }
    }

    /// Mark this side closed and fire the done signal so every in-flight and
    /// future `send` learns no reply is coming. The work channel itself is
    /// left open: requests already submitted fail by timeout rather than by
    /// racing a closed channel.
    pub fn close(&self) {
        self.closed.raise();
        if self.done.raise() {
            tracing::debug!("[Responder] done signal closed");
        }
    }

    /// Handle usable from other threads to close this responder.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            closed: self.closed.clone(),
            done: self.done.clone(),
        }
    }

    fn receive<F>(
        &mut self,
        cancel: &CancelToken,
        handler: &mut F,
        mut env: ReqEnvelope<T, U>,
    ) -> Result<Listened, CommsError>
    where
        F: FnMut(&CancelToken, T) -> anyhow::Result<U>,
    {
        let id = env.id;
        let data = env.data.take();
        let reply = env.reply.take();
        self.reqs.put(env);

        let (Some(data), Some(reply)) = (data, reply) else {
            tracing::warn!(id, "[Responder] discarding malformed request envelope");
            return Ok(Listened::Handled);
        };

        if self.closed.is_raised() {
            let resp = self.resps.get(id, Err(CommsError::ResponderClosed));
            self.send_resp(&reply, resp);
            return Ok(Listened::Handled);
        }

        self.gone_away_at = Some(Instant::now() + self.gone_away_timeout);
        self.handle(cancel, handler, id, data, &reply)
    }

    fn handle<F>(
        &self,
        cancel: &CancelToken,
        handler: &mut F,
        id: u64,
        data: T,
        reply: &CorrChan<U>,
    ) -> Result<Listened, CommsError>
    where
        F: FnMut(&CancelToken, T) -> anyhow::Result<U>,
    {
        let body = match catch_unwind(AssertUnwindSafe(|| handler(cancel, data))) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(CommsError::Handler(err)),
            Err(payload) => Err(CommsError::HandlerPanic(panic_message(payload))),
        };

        let resp = self.resps.get(id, body);
        self.send_resp(reply, resp);
        Ok(Listened::Handled)
    }

    /// Replies to a requestor that has already torn down its side are simply
    /// dropped back into the pool; the responder carries on.
    fn send_resp(&self, reply: &CorrChan<U>, resp: Resp<U>) {
        if let Err(resp) = reply.deliver(resp) {
            crate::log_throttled!(
                warn,
                Duration::from_secs(5),
                "[Responder] reply channel unavailable, dropping response"
            );
            resp.close();
        }
    }
}
