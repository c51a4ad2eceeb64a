use crossbeam::channel::{self as chan, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::comms::resp::Resp;

/// Reply channel correlated to a single outstanding request id.
///
/// The inbound side is buffered so the responder is (nearly) never blocked
/// by a slow reader; the outbound side is a rendezvous channel so a late
/// forwarding attempt can never park a phantom reply for a future rental.
/// Because these channels are pooled and recycled, a dedicated forwarder
/// thread filters everything crossing from inbound to outbound against the
/// currently bound id: 0 means the channel is idle in its pool and all
/// traffic is dropped; any other value forwards matching responses only.
pub(crate) struct CorrChan<U> {
    in_tx: Sender<Resp<U>>,
    out_rx: Receiver<Resp<U>>,
    bound: Arc<Mutex<u64>>,
}

impl<U: Send + 'static> CorrChan<U> {
    fn start(retries: u32, attempt_timeout: Duration, buffer: usize) -> Self {
        let (in_tx, in_rx) = chan::bounded::<Resp<U>>(buffer);
        let (out_tx, out_rx) = chan::bounded::<Resp<U>>(0);
        let bound = Arc::new(Mutex::new(0u64));

        let filter = Arc::clone(&bound);
        // Serves this channel instance across every rental; exits when the
        // inbound sender is dropped along with the channel itself.
        thread::spawn(move || forward_loop(in_rx, out_tx, filter, retries, attempt_timeout));

        Self {
            in_tx,
            out_rx,
            bound,
        }
    }

    pub(crate) fn bound_id(&self) -> u64 {
        *self.bound.lock().unwrap()
    }

    pub(crate) fn bind(&self, id: u64) {
        *self.bound.lock().unwrap() = id;
    }

    /// Hand a response to the forwarder. Blocks only while the inbound
    /// buffer is full, which the forwarder drains within a bounded time.
    pub(crate) fn deliver(&self, resp: Resp<U>) -> Result<(), Resp<U>> {
        self.in_tx.send(resp).map_err(|e| e.into_inner())
    }

    /// Non-blocking read of the outbound side.
    pub(crate) fn poll_reply(&self) -> Option<Resp<U>> {
        self.out_rx.try_recv().ok()
    }
}

fn forward_loop<U>(
    in_rx: Receiver<Resp<U>>,
    out_tx: Sender<Resp<U>>,
    filter: Arc<Mutex<u64>>,
    retries: u32,
    attempt_timeout: Duration,
) {
    loop {
        let resp = match in_rx.recv() {
            Ok(resp) => resp,
            Err(_) => return,
        };

        let bound = *filter.lock().unwrap();
        if bound == 0 || bound != resp.id {
            // Idle channel, or a ghost reply from a recycled rental.
            crate::log_throttled!(
                debug,
                Duration::from_secs(5),
                id = resp.id,
                "dropping uncorrelated response"
            );
            resp.close();
            continue;
        }

        // Matching id: attempt the rendezvous hand-off. Bounded attempts so
        // a requestor that timed out and left does not wedge the forwarder.
        let mut pending = resp;
        let mut attempts: u32 = 0;
        loop {
            match out_tx.send_timeout(pending, attempt_timeout) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(resp)) if attempts < retries => {
                    attempts += 1;
                    pending = resp;
                }
                Err(SendTimeoutError::Timeout(resp)) => {
                    resp.close();
                    break;
                }
                Err(SendTimeoutError::Disconnected(resp)) => {
                    resp.close();
                    return;
                }
            }
        }
    }
}

/// Pool of correlated reply channels.
///
/// `get` binds the rented channel to the request id it will serve; `put`
/// resets the binding to 0 before the handle is replaced in the pool, which
/// is the invariant preventing cross-rental leakage.
pub(crate) struct CorrChanPool<U> {
    free: Mutex<Vec<Arc<CorrChan<U>>>>,
    minted: AtomicUsize,
    retries: u32,
    attempt_timeout: Duration,
    buffer: usize,
}

impl<U: Send + 'static> CorrChanPool<U> {
    pub(crate) fn new(retries: u32, attempt_timeout: Duration, buffer: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            minted: AtomicUsize::new(0),
            retries,
            attempt_timeout,
            buffer,
        }
    }

    pub(crate) fn get(&self, id: u64) -> Arc<CorrChan<U>> {
        let chan = match self.free.lock().unwrap().pop() {
            Some(chan) => chan,
            None => {
                self.minted.fetch_add(1, Ordering::Relaxed);
                Arc::new(CorrChan::start(
                    self.retries,
                    self.attempt_timeout,
                    self.buffer,
                ))
            }
        };
        chan.bind(id);
        chan
    }

    pub(crate) fn put(&self, chan: Arc<CorrChan<U>>) {
        chan.bind(0);
        self.free.lock().unwrap().push(chan);
    }

    /// Number of channels constructed so far.
    pub(crate) fn minted(&self) -> usize {
        self.minted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::resp::RespPool;
    use std::thread;

    fn test_pool() -> CorrChanPool<i32> {
        CorrChanPool::new(5, Duration::from_millis(100), 10)
    }

    #[test]
    fn matching_id_reaches_the_receiver() {
        let pool = test_pool();
        let resps = RespPool::new();

        let chan = pool.get(42);
        chan.deliver(resps.get(42, Ok(99))).ok().expect("deliver");

        thread::sleep(Duration::from_millis(200));

        let resp = chan.poll_reply().expect("should have received a reply");
        assert_eq!(resp.id, 42);
        let mut resp = resp;
        assert_eq!(resp.body.take().expect("body").expect("ok body"), 99);
        resp.close();

        pool.put(chan);
    }

    #[test]
    fn ghost_replies_are_discarded() {
        let pool = test_pool();
        let resps = RespPool::new();

        let chan = pool.get(99);

        // Only the last id matches the binding; the rest are ghosts.
        let feeder = {
            let chan = Arc::clone(&chan);
            let resps = Arc::clone(&resps);
            thread::spawn(move || {
                for id in 0..100u64 {
                    chan.deliver(resps.get(id, Ok(7))).ok().expect("deliver");
                }
            })
        };
        feeder.join().expect("feeder");

        thread::sleep(Duration::from_millis(200));

        let resp = chan.poll_reply().expect("matching reply must survive");
        assert_eq!(resp.id, 99);
        resp.close();
        assert!(chan.poll_reply().is_none());

        pool.put(chan);
    }

    #[test]
    fn idle_channel_drops_everything() {
        let pool = test_pool();
        let resps = RespPool::new();

        let chan = pool.get(7);
        pool.put(Arc::clone(&chan));

        chan.deliver(resps.get(7, Ok(1))).ok().expect("deliver");
        thread::sleep(Duration::from_millis(200));

        assert!(chan.poll_reply().is_none());
    }

    #[test]
    fn rentals_reuse_channels() {
        let pool = test_pool();
        for id in 1..50u64 {
            let chan = pool.get(id);
            assert_eq!(chan.bound_id(), id);
            pool.put(chan);
        }
        assert_eq!(pool.minted(), 1);
    }
}
