use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_core::{
    ConnectionHandle, CourierError, Destination, MemoryTransport, Message,
    RequestReplyCoordinator, Transport,
};

fn conn() -> ConnectionHandle {
    ConnectionHandle::new("main", "mem://local")
}

/// Echo service: replies with the request payload on the request's
/// reply-to queue, preserving the correlation id.
async fn spawn_echo(transport: Arc<MemoryTransport>, queue: &str, delay: Duration) {
    let mut rx = transport.subscribe(queue).await.unwrap();
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let reply_to = request.properties.reply_to.clone().unwrap();
            let correlation_id = request.properties.correlation_id.clone().unwrap();
            let reply =
                Message::new(request.payload.clone()).with_correlation_id(correlation_id);
            let _ = transport.publish(&conn(), "", &reply_to, reply).await;
        }
    });
}

#[tokio::test]
async fn request_reply_echo() {
    let transport = Arc::new(MemoryTransport::new());
    spawn_echo(Arc::clone(&transport), "svc.echo", Duration::ZERO).await;

    let coordinator = RequestReplyCoordinator::new(Arc::clone(&transport) as Arc<dyn Transport>, "reply.echo");
    coordinator.start().await.unwrap();

    let reply = coordinator
        .send_and_receive(
            &conn(),
            &Destination::queue("svc.echo"),
            Message::new(b"hello".to_vec()),
            Duration::from_secs(1),
            None,
        )
        .await
        .unwrap();

    assert_eq!(reply.payload, b"hello");
    assert_eq!(reply.properties.correlation_id.as_deref().map(|s| !s.is_empty()), Some(true));
    assert_eq!(coordinator.pending_requests(), 0);
}

#[tokio::test]
async fn timeout_expires_entry_and_late_reply_is_dropped() {
    let transport = Arc::new(MemoryTransport::new());
    // replies well after the caller's bound
    spawn_echo(Arc::clone(&transport), "svc.slow", Duration::from_millis(400)).await;
    spawn_echo(Arc::clone(&transport), "svc.fast", Duration::ZERO).await;

    let coordinator = RequestReplyCoordinator::new(Arc::clone(&transport) as Arc<dyn Transport>, "reply.slow");
    coordinator.start().await.unwrap();

    let started = Instant::now();
    let result = coordinator
        .send_and_receive(
            &conn(),
            &Destination::queue("svc.slow"),
            Message::new(b"too late".to_vec()),
            Duration::from_millis(150),
            None,
        )
        .await;

    assert!(matches!(result, Err(CourierError::ReplyTimeout(_))));
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(coordinator.pending_requests(), 0);

    // let the late reply land on the listener; it is discarded quietly
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(coordinator.pending_requests(), 0);

    // and the listener is still alive for the next exchange
    let reply = coordinator
        .send_and_receive(
            &conn(),
            &Destination::queue("svc.fast"),
            Message::new(b"still here".to_vec()),
            Duration::from_secs(1),
            None,
        )
        .await
        .unwrap();
    assert_eq!(reply.payload, b"still here");
}

#[tokio::test]
async fn concurrent_requests_get_their_own_replies_out_of_order() {
    let transport = Arc::new(MemoryTransport::new());

    // collect both requests, then answer them in reverse arrival order
    let mut rx = transport.subscribe("svc.pair").await.unwrap();
    {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            for request in [second, first] {
                let reply = Message::new(request.payload.clone())
                    .with_correlation_id(request.properties.correlation_id.clone().unwrap());
                let _ = transport
                    .publish(&conn(), "", request.properties.reply_to.as_deref().unwrap(), reply)
                    .await;
            }
        });
    }

    let coordinator = RequestReplyCoordinator::new(Arc::clone(&transport) as Arc<dyn Transport>, "reply.pair");
    coordinator.start().await.unwrap();

    let destination = Destination::queue("svc.pair");
    let conn_a = conn();
    let conn_b = conn();
    let (a, b) = tokio::join!(
        coordinator.send_and_receive(
            &conn_a,
            &destination,
            Message::new(b"a".to_vec()),
            Duration::from_secs(1),
            None,
        ),
        coordinator.send_and_receive(
            &conn_b,
            &destination,
            Message::new(b"b".to_vec()),
            Duration::from_secs(1),
            None,
        ),
    );

    assert_eq!(a.unwrap().payload, b"a");
    assert_eq!(b.unwrap().payload, b"b");
    assert_eq!(coordinator.pending_requests(), 0);
}

#[tokio::test]
async fn publish_failure_fails_fast_without_waiting() {
    let transport = Arc::new(MemoryTransport::new());
    transport.declare_queue("svc.unreachable");
    transport.set_connected("main", false);

    let coordinator = RequestReplyCoordinator::new(Arc::clone(&transport) as Arc<dyn Transport>, "reply.down");
    coordinator.start().await.unwrap();

    let started = Instant::now();
    let result = coordinator
        .send_and_receive(
            &conn(),
            &Destination::queue("svc.unreachable"),
            Message::new(b"x".to_vec()),
            Duration::from_secs(5),
            None,
        )
        .await;

    assert!(matches!(result, Err(CourierError::Transport(_))));
    // the error must arrive without entering the reply wait
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(coordinator.pending_requests(), 0);
}

#[tokio::test]
async fn dying_reply_subscription_fails_pending_requests() {
    let transport = Arc::new(MemoryTransport::new());
    transport.declare_queue("svc.blackhole");

    let coordinator = RequestReplyCoordinator::new(Arc::clone(&transport) as Arc<dyn Transport>, "reply.dies");
    coordinator.start().await.unwrap();

    {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            transport.close_queue("reply.dies");
        });
    }

    let started = Instant::now();
    let result = coordinator
        .send_and_receive(
            &conn(),
            &Destination::queue("svc.blackhole"),
            Message::new(b"x".to_vec()),
            Duration::from_secs(5),
            None,
        )
        .await;

    assert!(matches!(result, Err(CourierError::Transport(_))));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(coordinator.pending_requests(), 0);
}

#[tokio::test]
async fn send_and_receive_requires_running_listener() {
    let transport = Arc::new(MemoryTransport::new());
    let coordinator = RequestReplyCoordinator::new(Arc::clone(&transport) as Arc<dyn Transport>, "reply.unstarted");

    let result = coordinator
        .send_and_receive(
            &conn(),
            &Destination::queue("svc.any"),
            Message::new(b"x".to_vec()),
            Duration::from_secs(1),
            None,
        )
        .await;
    assert!(matches!(result, Err(CourierError::Transport(_))));
}

#[tokio::test]
async fn cancelled_caller_leaves_no_entry_behind() {
    let transport = Arc::new(MemoryTransport::new());
    transport.declare_queue("svc.blackhole2");

    let coordinator = RequestReplyCoordinator::new(Arc::clone(&transport) as Arc<dyn Transport>, "reply.cancel");
    coordinator.start().await.unwrap();

    {
        let conn = conn();
        let dest = Destination::queue("svc.blackhole2");
        let fut = coordinator.send_and_receive(
            &conn,
            &dest,
            Message::new(b"x".to_vec()),
            Duration::from_secs(30),
            None,
        );
        tokio::pin!(fut);
        tokio::select! {
            _ = &mut fut => panic!("no reply should ever arrive"),
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
        assert_eq!(coordinator.pending_requests(), 1);
        // dropping the request future at the end of this scope runs the
        // same cleanup path as a timeout
    }

    assert_eq!(coordinator.pending_requests(), 0);
}
