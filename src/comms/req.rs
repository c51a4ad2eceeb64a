use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::comms::corr::{CorrChan, CorrChanPool};

/// Monotonic, non-zero request-id source. Zero is reserved to mark a
/// recycled envelope or an idle reply channel.
pub(crate) struct IdSource {
    counter: Mutex<u64>,
}

impl IdSource {
    pub(crate) fn new() -> Self {
        Self {
            counter: Mutex::new(1),
        }
    }

    #[cfg(test)]
    fn starting_at(value: u64) -> Self {
        Self {
            counter: Mutex::new(value),
        }
    }

    pub(crate) fn next(&self) -> u64 {
        let mut counter = self.counter.lock().unwrap();
        // Wrapping is a theoretical concern at u64 scale, but protect anyway.
        if *counter == u64::MAX {
            *counter = 0;
        }
        *counter += 1;
        *counter
    }
}

/// Pooled request envelope: the caller's payload, the id stamped for this
/// request and a handle on the reply channel bound to that id. The envelope
/// moves by value from the send path, across the work channel, to the
/// responder, which dismantles it and recycles it.
pub(crate) struct ReqEnvelope<T, U> {
    pub(crate) id: u64,
    pub(crate) data: Option<T>,
    pub(crate) reply: Option<Arc<CorrChan<U>>>,
}

/// Pool of request envelopes, shared by both sides of a pair.
pub(crate) struct ReqPool<T, U> {
    free: Mutex<Vec<ReqEnvelope<T, U>>>,
    minted: AtomicUsize,
    ids: IdSource,
    corrs: Arc<CorrChanPool<U>>,
}

impl<T, U: Send + 'static> ReqPool<T, U> {
    pub(crate) fn new(corrs: Arc<CorrChanPool<U>>) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            minted: AtomicUsize::new(0),
            ids: IdSource::new(),
            corrs,
        }
    }

    /// Rent an envelope stamped with a fresh id, carrying `data` and a reply
    /// channel bound to that id. The returned channel handle is the send
    /// path's own; returning it to the channel pool stays the send path's
    /// responsibility on every exit.
    pub(crate) fn get(&self, data: T) -> (ReqEnvelope<T, U>, Arc<CorrChan<U>>) {
        let mut env = match self.free.lock().unwrap().pop() {
            Some(env) => env,
            None => {
                self.minted.fetch_add(1, Ordering::Relaxed);
                ReqEnvelope {
                    id: 0,
                    data: None,
                    reply: None,
                }
            }
        };
        env.id = self.ids.next();
        env.data = Some(data);
        let reply = self.corrs.get(env.id);
        env.reply = Some(Arc::clone(&reply));
        (env, reply)
    }

    /// Clear and recycle an envelope. Deliberately does not touch the reply
    /// channel rental; only the handle clone held inside the envelope is
    /// dropped here.
    pub(crate) fn put(&self, mut env: ReqEnvelope<T, U>) {
        env.id = 0;
        env.data = None;
        env.reply = None;
        self.free.lock().unwrap().push(env);
    }

    /// Number of envelopes constructed so far.
    pub(crate) fn minted(&self) -> usize {
        self.minted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool() -> Arc<ReqPool<i32, i32>> {
        let corrs = Arc::new(CorrChanPool::new(5, Duration::from_millis(100), 10));
        Arc::new(ReqPool::new(corrs))
    }

    #[test]
    fn ids_are_monotonic_and_non_zero() {
        let ids = IdSource::new();
        let mut last = 0;
        for _ in 0..1_000 {
            let id = ids.next();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn ids_skip_zero_on_wrap() {
        let ids = IdSource::starting_at(u64::MAX - 1);
        assert_eq!(ids.next(), u64::MAX);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[test]
    fn rental_binds_the_reply_channel() {
        let pool = pool();
        let (env, reply) = pool.get(5);
        assert!(env.id != 0);
        assert_eq!(reply.bound_id(), env.id);
        assert_eq!(env.data, Some(5));
        pool.put(env);
        pool.corrs.put(reply);
    }

    #[test]
    fn concurrent_get_put_is_clean() {
        let pool = pool();
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for n in 0..10_000 {
                        let (env, reply) = pool.get(n);
                        pool.put(env);
                        pool.corrs.put(reply);
                    }
                })
            })
            .collect();

        for w in workers {
            w.join().expect("worker must not panic");
        }

        // Two workers can only ever hold two envelopes at once.
        assert!(pool.minted() <= 2);
    }
}
