use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::CommsError;

/// Pooled response envelope.
///
/// Carries the id of the request it answers and either the handler's output
/// or the error to report. `close` hands the envelope back to the pool it
/// was rented from, so any code path holding one can dispose of it without
/// knowing its origin. The back-pointer is stamped on rental and cleared on
/// return, so there is no ownership cycle at rest.
pub(crate) struct Resp<U> {
    pub(crate) id: u64,
    pub(crate) body: Option<Result<U, CommsError>>,
    pool: Option<Arc<RespPool<U>>>,
}

impl<U> Resp<U> {
    /// Reset and return this envelope to its pool, if known.
    pub(crate) fn close(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.put(self);
        }
    }
}

/// Pool of response envelopes. Traffic between the two sides is expected to
/// be heavy, so envelopes are recycled rather than rebuilt per reply.
pub(crate) struct RespPool<U> {
    free: Mutex<Vec<Resp<U>>>,
    minted: AtomicUsize,
    this: Weak<RespPool<U>>,
}

impl<U> RespPool<U> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            free: Mutex::new(Vec::new()),
            minted: AtomicUsize::new(0),
            this: this.clone(),
        })
    }

    /// Rent an envelope fully initialised for the given request id.
    pub(crate) fn get(&self, id: u64, body: Result<U, CommsError>) -> Resp<U> {
        let mut resp = match self.free.lock().unwrap().pop() {
            Some(resp) => resp,
            None => {
                self.minted.fetch_add(1, Ordering::Relaxed);
                Resp {
                    id: 0,
                    body: None,
                    pool: None,
                }
            }
        };
        resp.id = id;
        resp.body = Some(body);
        resp.pool = self.this.upgrade();
        resp
    }

    /// Reset every field before the envelope becomes rentable again.
    fn put(&self, mut resp: Resp<U>) {
        resp.id = 0;
        resp.body = None;
        resp.pool = None;
        self.free.lock().unwrap().push(resp);
    }

    /// Number of envelopes constructed so far.
    pub(crate) fn minted(&self) -> usize {
        self.minted.load(Ordering::Relaxed)
    }
}
