mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{frame, inbound_sinks, recv, Harness, RecordingSink, INBOUND_TOPIC};
use weft_bridge::transport::memory::{MemorySource, MemorySourceConfig};
use weft_bridge::{Bridge, ExposureGate, MemoryExchange, SinkRegistry};
use weft_core::message::keys;
use weft_core::{BridgeError, LocalBus, StartupBarrier};

#[tokio::test]
async fn exposed_agent_receives_and_hidden_agent_is_nacked() {
    let mut h = Harness::new(inbound_sinks());
    let mut nacks = h.exchange.take_nacks(INBOUND_TOPIC).unwrap();
    h.bridge.start().await.unwrap();

    h.send_frame(frame("client1@test_system", "console", "ping")).await;
    h.send_frame(frame("client1@test_system", "admin", "sudo")).await;

    let delivered = recv(&mut h.console).await;
    assert_eq!(delivered.from.to_string(), "client1@test_system");
    assert_eq!(delivered.to.to_string(), "console");
    assert_eq!(delivered.text(), Some("ping"));
    assert_eq!(delivered.origin_system(), Some("test_system"));
    assert!(delivered.headers.contains_key(keys::RECEIVED_AT));

    let nack = tokio::time::timeout(Duration::from_secs(1), nacks.recv())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(nack.sequence, 1);
    assert_eq!(nack.code, "NOT_EXPOSED");
    assert!(nack.reason.contains("admin"));

    h.bridge.stop().await;
    assert!(h.console.try_recv().is_err());
    assert!(h.echo.try_recv().is_err());
}

#[tokio::test]
async fn each_hidden_message_is_rejected_exactly_once() {
    let mut h = Harness::new(inbound_sinks());
    let mut nacks = h.exchange.take_nacks(INBOUND_TOPIC).unwrap();
    h.bridge.start().await.unwrap();

    for i in 0..3 {
        h.send_frame(frame("c@ext", "admin", &format!("attempt {i}"))).await;
    }
    // Frames are handled in order, so once the marker arrives the rejections are in
    h.send_frame(frame("c@ext", "console", "marker")).await;
    assert_eq!(recv(&mut h.console).await.text(), Some("marker"));

    let mut seen = Vec::new();
    while let Ok(nack) = nacks.try_recv() {
        assert_eq!(nack.code, "NOT_EXPOSED");
        seen.push(nack.sequence);
    }
    assert_eq!(seen, vec![0, 1, 2]);

    let stats = h.bridge.stats();
    assert_eq!(stats.inbound_rejected, 3);
    assert_eq!(stats.inbound_delivered, 1);
    assert!(h.echo.try_recv().is_err());
    h.bridge.stop().await;
}

#[tokio::test]
async fn bare_sender_is_tagged_with_source_origin() {
    let mut h = Harness::build(inbound_sinks(), Some("client_net"), vec![]);
    h.bridge.start().await.unwrap();

    h.send_frame(frame("client1", "echo@weft", "hello")).await;

    let delivered = recv(&mut h.echo).await;
    assert_eq!(delivered.from.to_string(), "client1@client_net");
    assert!(delivered.to.is_local());
    assert_eq!(delivered.origin_system(), Some("client_net"));
    h.bridge.stop().await;
}

#[tokio::test]
async fn bare_sender_without_origin_is_nacked() {
    let mut h = Harness::new(inbound_sinks());
    let mut nacks = h.exchange.take_nacks(INBOUND_TOPIC).unwrap();
    h.bridge.start().await.unwrap();

    h.send_frame(frame("client1", "console", "who am i")).await;
    h.send_frame(frame("client1@ext", "console@elsewhere", "lost")).await;
    h.send_frame(frame("impostor@weft", "console", "spoof")).await;
    h.send_frame(frame("c@ext", "console", "marker")).await;
    assert_eq!(recv(&mut h.console).await.text(), Some("marker"));

    let codes: Vec<String> = std::iter::from_fn(|| nacks.try_recv().ok())
        .map(|n| n.code)
        .collect();
    assert_eq!(codes, vec!["NOT_EXTERNAL", "MISROUTED", "MISROUTED"]);
    h.bridge.stop().await;
}

#[tokio::test]
async fn bad_frames_are_counted_and_skipped() {
    let mut h = Harness::new(inbound_sinks());
    let mut nacks = h.exchange.take_nacks(INBOUND_TOPIC).unwrap();
    h.bridge.start().await.unwrap();

    h.send_frame(b"{not json".to_vec()).await;
    h.send_frame(br#"{"from":"@ext","to":"console","payload":"x"}"#.to_vec())
        .await;
    h.send_frame(frame("c@ext", "console", "after")).await;

    assert_eq!(recv(&mut h.console).await.text(), Some("after"));
    let stats = h.bridge.stats();
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.malformed_addresses, 1);
    assert_eq!(stats.inbound_delivered, 1);
    assert!(nacks.try_recv().is_err());
    h.bridge.stop().await;
}

#[tokio::test]
async fn nothing_is_delivered_before_the_barrier_opens() {
    let mut h = Harness::build(inbound_sinks(), None, vec!["echo", "console"]);
    h.bridge.start().await.unwrap();

    for i in 0..5 {
        h.send_frame(frame("c@ext", "console", &i.to_string())).await;
    }
    h.barrier.report_ready("echo");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.console.try_recv().is_err());
    assert_eq!(h.bridge.stats().inbound_delivered, 0);

    h.barrier.report_ready("console");
    for i in 0..5 {
        assert_eq!(recv(&mut h.console).await.text(), Some(i.to_string().as_str()));
    }
    h.bridge.stop().await;
}

#[tokio::test]
async fn sender_from_unregistered_system_is_nacked() {
    let sink = RecordingSink::new();
    let mut h = Harness::new(SinkRegistry::new().with("ext", sink.clone()).unwrap());
    let mut nacks = h.exchange.take_nacks(INBOUND_TOPIC).unwrap();
    h.bridge.start().await.unwrap();

    h.send_frame(frame("client1@nowhere", "echo", "reply to me")).await;
    h.send_frame(frame("c@ext", "echo", "marker")).await;
    assert_eq!(recv(&mut h.echo).await.text(), Some("marker"));

    let nack = tokio::time::timeout(Duration::from_secs(1), nacks.recv())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(nack.sequence, 0);
    assert_eq!(nack.code, "UNKNOWN_SYSTEM");
    assert!(nack.reason.contains("nowhere"));
    assert!(h.echo.try_recv().is_err());
    assert_eq!(h.bridge.stats().inbound_rejected, 1);
    h.bridge.stop().await;
}

#[test]
fn source_origin_must_be_a_registered_system() {
    let bus = Arc::new(LocalBus::new());
    let _console = bus.register("console").unwrap();
    let source = Arc::new(MemorySource::new(
        "inbound",
        MemorySourceConfig {
            topic: Some(INBOUND_TOPIC.into()),
            origin: Some("client_net".into()),
            ..Default::default()
        },
        Arc::new(MemoryExchange::new()),
    ));
    let err = Bridge::new(
        "weft",
        ExposureGate::new(["console"]),
        SinkRegistry::new().with("ext", RecordingSink::new()).unwrap(),
        source,
        bus,
        Arc::new(StartupBarrier::new(Vec::<String>::new())),
    )
    .err()
    .unwrap();
    assert!(matches!(err, BridgeError::Config(ref m) if m.contains("client_net")));
}
