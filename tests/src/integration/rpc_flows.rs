//! # RPC Integration Flows
//!
//! Engines and responders sharing one in-memory bus:
//!
//! 1. Many concurrent callers multiplexed over one reply queue
//! 2. Replies arriving in a different order than requests were sent
//! 3. Two engines calling the same service without seeing each other's replies
//! 4. A slow service: timeout first, then the late reply is dropped

#[cfg(test)]
mod tests {
    use mesh_01_rpc::{
        handler_fn, HandlerError, RequestOptions, RpcConfig, RpcEngine, RpcError, RpcResponder,
    };
    use serde_json::json;
    use shared_bus::{InMemoryMessageBus, Payload};
    use std::sync::Arc;
    use std::time::Duration;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Replies `{"n": n}` after sleeping `delay_ms` from the request.
    async fn serve_delayed_echo(bus: &Arc<InMemoryMessageBus>, queue: &str) -> RpcResponder {
        let responder = RpcResponder::new(bus.clone());
        responder
            .serve(
                queue,
                Arc::new(handler_fn(|req: Payload| async move {
                    let body = req.into_json()?;
                    let delay = body["delay_ms"].as_u64().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(Some(Payload::Json(json!({ "n": body["n"] }))))
                })),
            )
            .await
            .unwrap();
        responder
    }

    // =============================================================================
    // INTEGRATION TESTS
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_reply_queue() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let _responder = serve_delayed_echo(&bus, "echo").await;
        let engine = Arc::new(RpcEngine::new(bus.clone(), RpcConfig::default()));

        let calls: Vec<_> = (0..50)
            .map(|n| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .request("echo", &json!({ "n": n, "delay_ms": 0 }), RequestOptions::default())
                        .await
                })
            })
            .collect();

        for (n, call) in calls.into_iter().enumerate() {
            let reply = call.await.unwrap().unwrap();
            assert_eq!(reply, Payload::Json(json!({ "n": n })));
        }

        let stats = engine.stats();
        assert_eq!(stats.completed, 50);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.orphaned_replies, 0);
        // echo queue plus exactly one reply queue
        assert_eq!(bus.consumer_count(), 2);
    }

    #[tokio::test]
    async fn test_out_of_order_replies_reach_their_callers() {
        let bus = Arc::new(InMemoryMessageBus::new());
        // separate queues so the slow handler does not hold up the fast one
        let _slow = serve_delayed_echo(&bus, "echo.slow").await;
        let _fast = serve_delayed_echo(&bus, "echo.fast").await;
        let engine = RpcEngine::new(bus, RpcConfig::default());

        let slow_body = json!({ "n": "slow", "delay_ms": 80 });
        let fast_body = json!({ "n": "fast", "delay_ms": 0 });
        let slow = engine.request(
            "echo.slow",
            &slow_body,
            RequestOptions::default(),
        );
        let fast = engine.request(
            "echo.fast",
            &fast_body,
            RequestOptions::default(),
        );
        let (slow, fast) = tokio::join!(slow, fast);

        assert_eq!(slow.unwrap(), Payload::Json(json!({ "n": "slow" })));
        assert_eq!(fast.unwrap(), Payload::Json(json!({ "n": "fast" })));
        assert_eq!(engine.stats().completed, 2);
    }

    #[tokio::test]
    async fn test_two_engines_stay_isolated() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let _responder = serve_delayed_echo(&bus, "echo").await;
        let a = RpcEngine::new(bus.clone(), RpcConfig::default());
        let b = RpcEngine::new(bus, RpcConfig::default());

        let body_a = json!({ "n": "a" });
        let body_b = json!({ "n": "b" });
        let (ra, rb) = tokio::join!(
            a.request("echo", &body_a, RequestOptions::default()),
            b.request("echo", &body_b, RequestOptions::default()),
        );

        assert_eq!(ra.unwrap(), Payload::Json(json!({ "n": "a" })));
        assert_eq!(rb.unwrap(), Payload::Json(json!({ "n": "b" })));
        assert_ne!(a.reply_queue(), b.reply_queue());
        assert_eq!(a.stats().orphaned_replies, 0);
        assert_eq!(b.stats().orphaned_replies, 0);
    }

    #[tokio::test]
    async fn test_late_reply_after_timeout_is_dropped() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let _responder = serve_delayed_echo(&bus, "echo").await;
        let engine = RpcEngine::new(bus, RpcConfig::default());

        let err = engine
            .request(
                "echo",
                &json!({ "n": 1, "delay_ms": 100 }),
                RequestOptions::with_timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        // the reply still arrives; nobody is waiting for it
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = engine.stats();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.orphaned_replies, 1);
        assert_eq!(stats.pending, 0);

        // the engine keeps working afterwards
        let reply = engine
            .request("echo", &json!({ "n": 2 }), RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, Payload::Json(json!({ "n": 2 })));
    }

    #[tokio::test]
    async fn test_handler_error_surfaces_as_remote() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let responder = RpcResponder::new(bus.clone());
        responder
            .serve(
                "strict",
                Arc::new(handler_fn(|_req: Payload| async move {
                    Err(HandlerError::new("order not found"))
                })),
            )
            .await
            .unwrap();
        let engine = RpcEngine::new(bus, RpcConfig::default());

        let err = engine
            .request("strict", &json!({ "id": 7 }), RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote { ref message } if message == "order not found"));
    }
}
