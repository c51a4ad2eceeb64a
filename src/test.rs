#[cfg(test)]
mod tests {
    use crate::comms::corr::CorrChanPool;
    use crate::comms::req::ReqPool;
    use crate::comms::resp::RespPool;
    use crate::comms::timer::TimerPool;
    use crate::comms::{Listened, Requestor, Responder, pair};
    use crate::config::PairConfig;
    use crate::error::CommsError;
    use crate::mux::{MuxHandler, MuxRequest};
    use crate::spawn::{LoopHooks, SpawnConfig, spawn};
    use crate::utils::logger::LoggerConfig;
    use crate::utils::{CancelToken, SharedFlag};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    fn config(requestor_ms: u64, responder_ms: u64, gone_away_ms: u64) -> PairConfig {
        PairConfig {
            requestor_timeout_ms: Some(requestor_ms),
            responder_timeout_ms: Some(responder_ms),
            gone_away_timeout_ms: Some(gone_away_ms),
            ..Default::default()
        }
    }

    /// Drive a responder loop on its own thread until it reports an error,
    /// close it, and yield the terminating error through the join handle.
    fn drive<T, U, F>(
        mut responder: Responder<T, U>,
        token: CancelToken,
        mut handler: F,
    ) -> thread::JoinHandle<CommsError>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(&CancelToken, T) -> anyhow::Result<U> + Send + 'static,
    {
        thread::spawn(move || {
            let terminal = loop {
                match responder.listen_and_handle(&token, &mut handler) {
                    Ok(_) => {}
                    Err(e) => break e,
                }
            };
            responder.close();
            terminal
        })
    }

    #[test]
    fn echo_roundtrip() {
        let parent = CancelToken::new_root();
        let (requestor, responder) = pair::<i32, i32>(parent.clone(), PairConfig::default());
        let worker = drive(responder, parent.clone(), |_, input| Ok(input));

        assert_eq!(requestor.send(&parent, 4).expect("echo"), 4);

        parent.cancel();
        worker.join().expect("worker");
    }

    #[test]
    fn reciprocal_maths() {
        let parent = CancelToken::new_root();
        let (requestor, responder) = pair::<i32, f64>(parent.clone(), PairConfig::default());
        let worker = drive(responder, parent.clone(), |_, input: i32| {
            Ok((100.0 / input as f64).round() / 100.0)
        });

        assert_eq!(requestor.send(&parent, 4).expect("reciprocal of 4"), 0.25);
        assert_eq!(requestor.send(&parent, 2).expect("reciprocal of 2"), 0.5);

        parent.cancel();
        worker.join().expect("worker");
    }

    #[test]
    fn closed_receiver_fails_sends() {
        let parent = CancelToken::new_root();
        let (requestor, responder) =
            pair::<i32, i32>(parent.clone(), config(150, 1_000, 120_000));

        // Closing twice is the same as closing once.
        responder.close();
        responder.close();

        let err = requestor.send(&parent, 42).expect_err("receiver is closed");
        assert!(matches!(
            err,
            CommsError::CommsChannelClosed | CommsError::SendTimeout
        ));

        // The first failure marked this side closed.
        let err = requestor.send(&parent, 42).expect_err("requestor closed");
        assert!(matches!(err, CommsError::RequestorClosed));
    }

    #[test]
    fn gone_away_closes_the_responder() {
        let parent = CancelToken::new_root();
        let (requestor, responder) = pair::<i32, i32>(parent.clone(), config(150, 100, 500));
        let worker = drive(responder, parent.clone(), |_, input| Ok(input));

        // No traffic for longer than the gone-away window.
        thread::sleep(Duration::from_millis(550));
        let terminal = worker.join().expect("worker");
        assert!(matches!(terminal, CommsError::RequestorGoneAway));

        let err = requestor.send(&parent, 42).expect_err("responder is gone");
        assert!(matches!(
            err,
            CommsError::CommsChannelClosed | CommsError::SendTimeout
        ));
    }

    #[test]
    fn parent_cancel_fails_sends() {
        let parent = CancelToken::new_root();
        let (requestor, _responder) = pair::<i32, i32>(parent.clone(), PairConfig::default());

        parent.cancel();

        let err = requestor.send(&parent, 42).expect_err("parent cancelled");
        assert!(matches!(err, CommsError::ContextCompleted));
    }

    #[test]
    fn idle_wait_reports_idle() {
        let parent = CancelToken::new_root();
        let (_requestor, mut responder) =
            pair::<i32, i32>(parent.clone(), config(30_000, 20, 120_000));

        let mut echo = |_: &CancelToken, input: i32| Ok(input);
        let outcome = responder
            .listen_and_handle(&parent, &mut echo)
            .expect("idle pass");
        assert_eq!(outcome, Listened::Idle);
    }

    #[test]
    fn alternating_handler_panic() {
        let parent = CancelToken::new_root();
        let (requestor, responder) = pair::<i32, i32>(parent.clone(), PairConfig::default());

        let mut calls = 0u32;
        let worker = drive(responder, parent.clone(), move |_, input| {
            calls += 1;
            if calls % 2 == 0 {
                panic!("call {calls}: !Boom");
            }
            Ok(input)
        });

        for cycle in 0..10 {
            let verdict = requestor.send(&parent, 42);
            if cycle % 2 == 0 {
                assert_eq!(verdict.expect("odd calls succeed"), 42);
            } else {
                let err = verdict.expect_err("even calls panic");
                assert!(matches!(err, CommsError::HandlerPanic(_)), "got {err}");
            }
        }

        parent.cancel();
        worker.join().expect("worker");
    }

    #[test]
    fn concurrent_senders_each_get_their_reply() {
        let parent = CancelToken::new_root();
        let (requestor, responder) =
            pair::<String, String>(parent.clone(), PairConfig::default());
        let worker = drive(responder, parent.clone(), |_, input| Ok(input));

        let senders: Vec<_> = (0..5)
            .map(|n| {
                let requestor = requestor.clone();
                let token = parent.clone();
                thread::spawn(move || {
                    let input = format!("hello {n}");
                    let output = requestor.send(&token, input.clone()).expect("echo");
                    assert_eq!(output, input);
                })
            })
            .collect();

        for s in senders {
            s.join().expect("sender");
        }

        parent.cancel();
        worker.join().expect("worker");
    }

    #[test]
    fn closed_responder_answers_with_typed_error() {
        let parent = CancelToken::new_root();
        let (requestor, mut responder) =
            pair::<i32, i32>(parent.clone(), config(500, 50, 200));

        let gone = SharedFlag::new();
        let observed = gone.clone();
        let token = parent.clone();
        let worker = thread::spawn(move || {
            let mut echo = |_: &CancelToken, input: i32| Ok(input);
            loop {
                match responder.listen_and_handle(&token, &mut echo) {
                    Ok(_) => {}
                    Err(CommsError::RequestorGoneAway) => {
                        // Keep listening: requests received from here on are
                        // answered with ResponderClosed.
                        observed.raise();
                    }
                    Err(_) => break,
                }
            }
        });

        while !gone.is_raised() {
            thread::sleep(Duration::from_millis(10));
        }

        let err = requestor.send(&parent, 42).expect_err("responder closed");
        assert!(matches!(err, CommsError::ResponderClosed), "got {err}");

        parent.cancel();
        worker.join().expect("worker");
    }

    #[test]
    fn close_handle_works_across_threads() {
        let parent = CancelToken::new_root();
        let (requestor, responder) =
            pair::<i32, i32>(parent.clone(), config(150, 50, 120_000));
        let handle = responder.close_handle();
        let worker = drive(responder, parent.clone(), |_, input| Ok(input));

        thread::spawn(move || handle.close()).join().expect("closer");

        let err = requestor.send(&parent, 1).expect_err("pair is closed");
        assert!(matches!(
            err,
            CommsError::CommsChannelClosed | CommsError::SendTimeout | CommsError::ResponderClosed
        ));

        parent.cancel();
        worker.join().expect("worker");
    }

    #[test]
    fn steady_state_reuses_pooled_objects() {
        let parent = CancelToken::new_root();
        let timers = Arc::new(TimerPool::new());
        let corrs = Arc::new(CorrChanPool::new(5, Duration::from_millis(100), 10));
        let reqs = Arc::new(ReqPool::new(Arc::clone(&corrs)));
        let resps = RespPool::new();
        let (work_tx, work_rx) = crossbeam::channel::bounded(100);
        let done = SharedFlag::new();

        let requestor = Requestor::<i32, i32>::new(
            work_tx,
            done.clone(),
            parent.clone(),
            Duration::from_secs(5),
            Arc::clone(&reqs),
            Arc::clone(&corrs),
            Arc::clone(&timers),
        );
        let responder = Responder::new(
            work_rx,
            done,
            parent.clone(),
            Duration::from_millis(100),
            Duration::from_secs(60),
            Arc::clone(&resps),
            Arc::clone(&reqs),
            Arc::clone(&timers),
        );
        let worker = drive(responder, parent.clone(), |_, input| Ok(input));

        for n in 0..300 {
            assert_eq!(requestor.send(&parent, n).expect("echo"), n);
        }

        // Sequential traffic must recycle, not mint per request.
        assert!(reqs.minted() <= 2, "req envelopes minted: {}", reqs.minted());
        assert!(corrs.minted() <= 2, "reply channels minted: {}", corrs.minted());
        assert!(resps.minted() <= 3, "resp envelopes minted: {}", resps.minted());
        assert!(timers.minted() <= 3, "timers minted: {}", timers.minted());

        parent.cancel();
        worker.join().expect("worker");
    }

    #[test]
    fn spawn_runs_hooks_in_order() {
        let parent = CancelToken::new_root();
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let hooks = LoopHooks {
            pre_start: Some(Box::new({
                let events = Arc::clone(&events);
                move |token| {
                    events.lock().unwrap().push("pre_start".into());
                    Ok(token)
                }
            })),
            post_listen: None,
            post_end: Some(Box::new({
                let events = Arc::clone(&events);
                move |err| {
                    events
                        .lock()
                        .unwrap()
                        .push(format!("post_end (err: {})", err.is_some()));
                }
            })),
        };

        let cfg = SpawnConfig {
            pair: config(1_000, 10, 250),
            core_id: None,
            logger: Some(LoggerConfig::default()),
        };
        let requestor = spawn(parent.clone(), cfg, hooks, |_, input: i32| {
            Ok((100.0 / input as f64).round() / 100.0)
        });

        assert_eq!(requestor.send(&parent, 4).expect("reciprocal"), 0.25);

        // Silence long enough for gone-away to end the loop.
        thread::sleep(Duration::from_millis(400));

        let seen = events.lock().unwrap().clone();
        assert_eq!(seen, vec!["pre_start".to_string(), "post_end (err: true)".to_string()]);
    }

    #[test]
    fn spawn_post_listen_error_aborts_loop() {
        let parent = CancelToken::new_root();
        let ended = SharedFlag::new();

        let mut idles = 0u32;
        let hooks = LoopHooks {
            pre_start: None,
            post_listen: Some(Box::new(move || {
                idles += 1;
                if idles >= 3 {
                    anyhow::bail!("too many idle passes");
                }
                Ok(())
            })),
            post_end: Some(Box::new({
                let ended = ended.clone();
                move |err| {
                    assert!(err.is_some());
                    ended.raise();
                }
            })),
        };

        let cfg = SpawnConfig {
            pair: config(500, 10, 120_000),
            // Pin failure is tolerated, so this is safe on any host.
            core_id: Some(0),
            logger: None,
        };
        let requestor = spawn(parent.clone(), cfg, hooks, |_, input: i32| Ok(input));

        while !ended.is_raised() {
            thread::sleep(Duration::from_millis(10));
        }

        let err = requestor.send(&parent, 1).expect_err("loop has ended");
        assert!(matches!(
            err,
            CommsError::CommsChannelClosed | CommsError::SendTimeout
        ));
    }

    #[test]
    fn mux_over_a_pair() {
        let parent = CancelToken::new_root();
        let mux: MuxHandler<&'static str, (), i32, i32> = MuxHandler::new()
            .route("/square", |_, v| Ok(v * v))
            .route("/cube", |_, v| Ok(v * v * v));

        let requestor = spawn(
            parent.clone(),
            SpawnConfig::default(),
            LoopHooks::default(),
            move |token, req: MuxRequest<&'static str, (), i32>| mux.handle(token, req),
        );

        let square = requestor
            .send(
                &parent,
                MuxRequest {
                    key: "/square",
                    meta: (),
                    data: 4,
                },
            )
            .expect("square");
        assert_eq!(square, 16);

        let cube = requestor
            .send(
                &parent,
                MuxRequest {
                    key: "/cube",
                    meta: (),
                    data: 4,
                },
            )
            .expect("cube");
        assert_eq!(cube, 64);

        let miss = requestor
            .send(
                &parent,
                MuxRequest {
                    key: "/unknown",
                    meta: (),
                    data: 4,
                },
            )
            .expect_err("unrouted key");
        assert!(matches!(miss, CommsError::Handler(_)), "got {miss}");

        parent.cancel();
    }
}
