//! Resolve a dataset's master through monitors and check its role.
//!
//! Run: `cargo run --example basic_usage -- --monitors 10.0.0.1:26379,10.0.0.2:26379 --name orders`
//!
//! Without `--monitors` the example starts an in-process mock monitor and
//! data node, so it runs without any infrastructure.
//!
//! This example shows:
//! - Building a validated configuration
//! - Connecting with a retry strategy
//! - Observing per-monitor failures through an event sink
//! - Verifying the role of the connected node
//! - Watching for failovers

// Examples are allowed to use expect/unwrap for brevity
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use inferadb_ledger_sentinel::{
    ChannelSink, ConnectorEvent, MonitorEndpoint, Result, RetryStrategy, Role, SentinelConfig,
    SentinelConnector,
    mock::{MockDataNode, MockMonitor},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let flag = |name: &str| {
        args.iter().position(|a| a == name).and_then(|i| args.get(i + 1)).cloned()
    };
    let name = flag("--name").unwrap_or_else(|| "orders".to_string());

    // -------------------------------------------------------------------------
    // 1. Pick monitors: from the command line, or local mocks
    // -------------------------------------------------------------------------
    let mut mocks = None;
    let monitors = match flag("--monitors") {
        Some(list) => list.split(',').map(str::parse).collect::<Result<Vec<MonitorEndpoint>>>()?,
        None => {
            let node = MockDataNode::start(Role::Master).await?;
            let monitor = MockMonitor::start(name.clone()).await?;
            monitor.set_master(node.address());
            let endpoints = vec![monitor.endpoint()];
            mocks = Some((node, monitor));
            endpoints
        },
    };
    println!("Using monitors: {monitors:?}");

    // -------------------------------------------------------------------------
    // 2. Configure and connect
    // -------------------------------------------------------------------------
    let config = SentinelConfig::builder()
        .name(name)
        .role(Role::Master)
        .monitors(monitors)
        .retry_strategy(
            RetryStrategy::exponential(Duration::from_millis(50), Duration::from_secs(2), 2.0, 0.2)
                .with_max_attempts(5),
        )
        .connect_timeout(Duration::from_secs(2))
        .update_monitors(true)
        .failover_detector(true)
        .build()?;

    let (sink, mut events) = ChannelSink::new();
    let mut connector = SentinelConnector::new(config)?.with_event_sink(Arc::new(sink));
    let mut stream = connector.connect().await?;

    while let Ok(event) = events.try_recv() {
        match event {
            ConnectorEvent::MonitorError { endpoint, error } => {
                println!("monitor {endpoint} failed: {error}");
            },
            ConnectorEvent::CycleExhausted { message, .. } => println!("{message}"),
        }
    }

    // -------------------------------------------------------------------------
    // 3. Verify the node really is the master
    // -------------------------------------------------------------------------
    if connector.verify_role(&mut stream).await? {
        println!("Connected to master; known monitors: {}", connector.monitors().len());
    } else {
        println!("Node changed role since the monitor answered; reconnecting");
        stream = connector.connect().await?;
    }
    drop(stream);

    // -------------------------------------------------------------------------
    // 4. Watch for failovers briefly
    // -------------------------------------------------------------------------
    if let Some(detector) = connector.failover_detector() {
        let (handle, mut switches) = detector.spawn();
        match tokio::time::timeout(Duration::from_secs(1), switches.recv()).await {
            Ok(Some(switch)) => println!("master moved from {} to {}", switch.old, switch.new),
            _ => println!("no failover observed"),
        }
        handle.join().await;
    }

    drop(mocks);
    Ok(())
}
