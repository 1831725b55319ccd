use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use weft_bridge::{Bridge, MemoryExchange, TransportRegistry, WeftConfig};
use weft_core::telemetry::{init_tracing, DEFAULT_FILTER};
use weft_core::{LocalBus, Message, StartupBarrier};

const ECHO_AGENT: &str = "echo";
const CONSOLE_AGENT: &str = "console";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing(DEFAULT_FILTER);

    let config = WeftConfig::load()?;

    let bus = Arc::new(LocalBus::with_capacity(
        config.messaging.internal.mailbox_capacity,
    ));
    let echo_rx = bus.register(ECHO_AGENT)?;
    let console_rx = bus.register(CONSOLE_AGENT)?;

    let barrier = Arc::new(config.startup_barrier());
    let exchange = Arc::new(MemoryExchange::new());
    let registry = TransportRegistry::with_defaults(exchange);

    let bridge = Arc::new(config.build_bridge(&registry, bus.clone(), barrier.clone())?);
    bridge.start().await?;

    let agents = vec![
        tokio::spawn(run_echo(echo_rx, bridge.clone(), barrier.clone())),
        tokio::spawn(run_console(console_rx, barrier.clone())),
    ];

    info!(
        system = %bridge.system_name(),
        external_systems = ?bridge.sinks().names(),
        "Weft bridge running; press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    bridge.stop().await;
    bus.shutdown();
    for agent in agents {
        if let Err(e) = agent.await {
            error!(error = %e, "Agent task failed");
        }
    }
    info!(stats = ?bridge.stats(), "Weft bridge stopped");
    Ok(())
}

/// Replies to every message with the same payload, through the bridge.
async fn run_echo(
    mut rx: mpsc::Receiver<Message>,
    bridge: Arc<Bridge>,
    barrier: Arc<StartupBarrier>,
) {
    barrier.report_ready(ECHO_AGENT);
    while let Some(msg) = rx.recv().await {
        let reply = msg.reply(msg.payload.clone());
        if let Err(e) = bridge.post(&reply).await {
            warn!(agent = ECHO_AGENT, to = %reply.to, code = e.code(), error = %e, "Echo reply failed");
        }
    }
}

/// Logs every message it receives.
async fn run_console(mut rx: mpsc::Receiver<Message>, barrier: Arc<StartupBarrier>) {
    barrier.report_ready(CONSOLE_AGENT);
    while let Some(msg) = rx.recv().await {
        info!(
            agent = CONSOLE_AGENT,
            from = %msg.from,
            origin = ?msg.origin_system(),
            text = msg.text().unwrap_or("<binary>"),
            "Message received"
        );
    }
}
