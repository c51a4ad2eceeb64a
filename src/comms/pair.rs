use std::sync::Arc;

use crate::comms::corr::CorrChanPool;
use crate::comms::req::ReqPool;
use crate::comms::resp::RespPool;
use crate::comms::timer::TimerPool;
use crate::comms::{Requestor, Responder};
use crate::config::PairConfig;
use crate::utils::{CancelToken, SharedFlag};

/// Build a connected requestor/responder pair.
///
/// The two halves share one bounded work channel, one done signal and the
/// envelope pools; each carries its own timeout. The responder half is
/// expected to be moved onto a single dedicated thread and driven in a loop
/// (or handed to [`crate::spawn::spawn`], which does exactly that).
pub fn pair<T, U>(parent: CancelToken, cfg: PairConfig) -> (Requestor<T, U>, Responder<T, U>)
where
    T: Send + 'static,
    U: Send + 'static,
{
    let settings = cfg.resolve();

    let (work_tx, work_rx) = crossbeam::channel::bounded(settings.chan_size);
    let done = SharedFlag::new();
    let timers = Arc::new(TimerPool::new());
    let corrs = Arc::new(CorrChanPool::new(
        settings.corr_chan_retries,
        settings.corr_chan_send_timeout,
        settings.corr_chan_size,
    ));
    let reqs = Arc::new(ReqPool::new(Arc::clone(&corrs)));
    let resps = RespPool::new();

    let requestor = Requestor::new(
        work_tx,
        done.clone(),
        parent.clone(),
        settings.requestor_timeout,
        Arc::clone(&reqs),
        corrs,
        Arc::clone(&timers),
    );
    let responder = Responder::new(
        work_rx,
        done,
        parent,
        settings.responder_timeout,
        settings.gone_away_timeout,
        resps,
        reqs,
        timers,
    );

    (requestor, responder)
}
