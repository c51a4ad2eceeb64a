use crossbeam::channel::{Sender, TrySendError};
use crossbeam::utils::Backoff;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::comms::corr::{CorrChan, CorrChanPool};
use crate::comms::req::{ReqEnvelope, ReqPool};
use crate::comms::timer::TimerPool;
use crate::config::{MAX_SUBMIT_ATTEMPTS, SUBMIT_ATTEMPT_TIMEOUT};
use crate::error::{CommsError, panic_message};
use crate::utils::{CancelToken, SharedFlag};

/// Sending half of a pair.
///
/// Cheap to clone and safe for concurrent use: every `send` rents its own
/// envelope and its own correlated reply channel, so callers never interact.
pub struct Requestor<T, U> {
    inner: Arc<Inner<T, U>>,
}

impl<T, U> Clone for Requestor<T, U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T, U> {
    work_tx: Sender<ReqEnvelope<T, U>>,
    done: SharedFlag,
    closed: AtomicBool,
    parent: CancelToken,
    timeout: Duration,
    reqs: Arc<ReqPool<T, U>>,
    corrs: Arc<CorrChanPool<U>>,
    timers: Arc<TimerPool>,
}

impl<T, U> Requestor<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    pub(crate) fn new(
        work_tx: Sender<ReqEnvelope<T, U>>,
        done: SharedFlag,
        parent: CancelToken,
        timeout: Duration,
        reqs: Arc<ReqPool<T, U>>,
        corrs: Arc<CorrChanPool<U>>,
        timers: Arc<TimerPool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                work_tx,
                done,
                closed: AtomicBool::new(false),
                parent,
                timeout,
                reqs,
                corrs,
                timers,
            }),
        }
    }

    /// Submit one request and wait for its correlated reply.
    ///
    /// Fails fast once either the pair's parent token or `cancel` has fired,
    /// or once this side is marked closed. Any unexpected panic on the send
    /// path is converted into [`CommsError::SendPanic`].
    pub fn send(&self, cancel: &CancelToken, input: T) -> Result<U, CommsError> {
        let inner = &self.inner;

        if inner.parent.is_cancelled() || cancel.is_cancelled() {
            inner.closed.store(true, Ordering::Relaxed);
            return Err(CommsError::ContextCompleted);
        }
        if inner.closed.load(Ordering::Relaxed) {
            return Err(CommsError::RequestorClosed);
        }

        match catch_unwind(AssertUnwindSafe(|| inner.attempt_send(input))) {
            Ok(verdict) => verdict,
            Err(payload) => Err(CommsError::SendPanic(panic_message(payload))),
        }
    }
}

impl<T, U> Inner<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn attempt_send(&self, input: T) -> Result<U, CommsError> {
        let (env, reply) = self.reqs.get(input);
        let id = env.id;

        if let Err((env, err)) = self.submit(env) {
            // The envelope never left this side; recycle it here.
            self.reqs.put(env);
            self.corrs.put(reply);
            return Err(err);
        }

        // The envelope now travels to the responder, which recycles it. The
        // reply-channel rental stays ours and must go back on every exit so
        // its binding is reset before anyone else can rent it.
        let verdict = self.await_reply(id, &reply);
        self.corrs.put(reply);
        verdict
    }

    /// Bounded attempts to place the envelope on the work channel. A full
    /// buffer may be transient (a slow responder, a burst of senders), so
    /// exhaustion does not mark this side closed; an observed done signal
    /// does.
    fn submit(
        &self,
        env: ReqEnvelope<T, U>,
    ) -> Result<(), (ReqEnvelope<T, U>, CommsError)> {
        let mut pending = env;
        let mut attempts: u32 = 0;

        'attempt: loop {
            let mut timer = self.timers.acquire(SUBMIT_ATTEMPT_TIMEOUT);
            let backoff = Backoff::new();

            loop {
                if self.done.is_raised() {
                    self.closed.store(true, Ordering::Relaxed);
                    self.timers.release(timer);
                    return Err((pending, CommsError::CommsChannelClosed));
                }

                match self.work_tx.try_send(pending) {
                    Ok(()) => {
                        self.timers.release(timer);
                        return Ok(());
                    }
                    Err(TrySendError::Full(env)) => pending = env,
                    Err(TrySendError::Disconnected(env)) => {
                        self.closed.store(true, Ordering::Relaxed);
                        self.timers.release(timer);
                        return Err((env, CommsError::CommsChannelClosed));
                    }
                }

                if timer.fired() {
                    attempts += 1;
                    self.timers.release(timer);
                    if attempts >= MAX_SUBMIT_ATTEMPTS {
                        return Err((pending, CommsError::UnableToSendRequest));
                    }
                    continue 'attempt;
                }

                backoff.snooze();
            }
        }
    }

    /// Wait for the reply carrying `id`. The reply channel only forwards
    /// matching responses, but the id is checked again here; a mismatch is
    /// a late reply from an earlier rental and is discarded.
    fn await_reply(&self, id: u64, reply: &CorrChan<U>) -> Result<U, CommsError> {
        let mut timer = self.timers.acquire(self.timeout);
        let backoff = Backoff::new();
        let mut spins: u32 = 0;

        let verdict = loop {
            if timer.fired() {
                break Err(CommsError::SendTimeout);
            }

            match reply.poll_reply() {
                Some(mut resp) => {
                    if resp.id != id {
                        resp.close();
                        continue;
                    }
                    let body = resp.body.take();
                    resp.close();
                    match body {
                        Some(Ok(output)) => break Ok(output),
                        Some(Err(err)) => break Err(err),
                        None => continue,
                    }
                }
                None => {
                    spins = spins.saturating_add(1);
                    if spins < 64 {
                        backoff.spin();
                    } else if spins < 256 {
                        backoff.snooze();
                    } else {
                        thread::sleep(Duration::from_micros(2));
                    }
                }
            }
        };

        self.timers.release(timer);
        verdict
    }
}
