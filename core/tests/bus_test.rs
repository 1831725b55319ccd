use std::time::Duration;

use weft_core::{AgentAddress, BridgeError, InternalBus, LocalBus, Message, Result};

fn msg(from: &str, to: &str, payload: &str) -> Message {
    Message::new(
        AgentAddress::parse(from).unwrap(),
        AgentAddress::parse(to).unwrap(),
        payload,
    )
}

#[tokio::test]
async fn delivers_to_registered_mailbox() -> Result<()> {
    let bus = LocalBus::new();
    let mut rx = bus.register("console")?;
    assert!(bus.is_registered("console"));

    bus.deliver(msg("client1@ext", "console", "ping")).await?;

    let received = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("timeout")
        .expect("mailbox closed");
    assert_eq!(received.text(), Some("ping"));
    assert_eq!(received.from.to_string(), "client1@ext");

    let stats = bus.get_stats("console").unwrap();
    assert_eq!(stats.total_delivered, 1);
    // Backlog is sampled when delivering, before the agent read it
    assert_eq!(stats.backlog_size, 1);
    Ok(())
}

#[tokio::test]
async fn unknown_and_external_targets_fail() -> Result<()> {
    let bus = LocalBus::new();
    let _rx = bus.register("console")?;

    let err = bus.deliver(msg("a@ext", "admin", "x")).await.unwrap_err();
    assert!(matches!(err, BridgeError::Delivery(_)));

    let err = bus
        .deliver(msg("console", "someone@ext", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Delivery(_)));
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_rejected() -> Result<()> {
    let bus = LocalBus::new();
    let _rx = bus.register("echo")?;
    assert!(bus.register("echo").is_err());
    assert!(bus.register("").is_err());
    assert!(matches!(
        bus.register("a@b"),
        Err(BridgeError::MalformedAddress(_))
    ));
    assert_eq!(bus.registered_agents(), vec!["echo".to_string()]);
    Ok(())
}

#[tokio::test]
async fn full_mailbox_applies_backpressure() -> Result<()> {
    let bus = LocalBus::with_capacity(1);
    let mut rx = bus.register("echo")?;

    bus.deliver(msg("a@ext", "echo", "first")).await?;

    // Second delivery waits for room instead of dropping
    let blocked =
        tokio::time::timeout(Duration::from_millis(50), bus.deliver(msg("a@ext", "echo", "second")))
            .await;
    assert!(blocked.is_err(), "delivery should wait while the mailbox is full");

    assert_eq!(rx.recv().await.unwrap().text(), Some("first"));
    bus.deliver(msg("a@ext", "echo", "third")).await?;
    assert_eq!(rx.recv().await.unwrap().text(), Some("third"));
    Ok(())
}

#[tokio::test]
async fn closed_mailbox_counts_a_drop() -> Result<()> {
    let bus = LocalBus::new();
    let rx = bus.register("echo")?;
    drop(rx);

    let err = bus.deliver(msg("a@ext", "echo", "lost")).await.unwrap_err();
    assert!(matches!(err, BridgeError::Delivery(_)));
    assert_eq!(bus.get_stats("echo").unwrap().dropped_messages, 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_mailboxes() -> Result<()> {
    let bus = LocalBus::new();
    let mut rx = bus.register("echo")?;
    bus.shutdown();
    assert!(rx.recv().await.is_none());
    assert!(!bus.is_registered("echo"));
    Ok(())
}

#[tokio::test]
async fn abandoned_delivery_leaves_no_trace() -> Result<()> {
    let bus = LocalBus::with_capacity(1);
    let mut rx = bus.register("echo")?;
    bus.deliver(msg("a@ext", "echo", "first")).await?;

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), bus.deliver(msg("a@ext", "echo", "lost")))
            .await;
    assert!(abandoned.is_err());

    assert_eq!(rx.recv().await.unwrap().text(), Some("first"));
    bus.deliver(msg("a@ext", "echo", "second")).await?;
    assert_eq!(rx.recv().await.unwrap().text(), Some("second"));

    let stats = bus.get_stats("echo").unwrap();
    assert_eq!(stats.total_delivered, 2);
    assert_eq!(stats.dropped_messages, 0);
    Ok(())
}
