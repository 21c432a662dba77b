//! Bridge Demo - Driving a Privileged Host API from a Test Process
//!
//! Spins up a command executor around a mock IDE workbench, connects a
//! session to it over loopback TCP, and drives host-only operations the
//! way a page-object suite would sidestep its WebDriver connection.
//!
//! # Running
//!
//! ```bash
//! cargo run --example bridge_demo -p jugar-puente
//! ```
//!
//! # Features
//!
//! - Named-operation registry bound to a privileged API handle
//! - Correlated request/response over newline-delimited JSON frames
//! - Verbatim remote error surfacing and per-command timeouts

#![allow(clippy::uninlined_format_args, clippy::unwrap_used)]

use jugar_puente::prelude::*;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stand-in for the privileged side of an IDE: reachable only from the
/// host process, never from the WebDriver session.
struct IdeWorkbench {
    product: &'static str,
    notifications: Mutex<Vec<String>>,
}

fn workbench_registry() -> CommandRegistry<IdeWorkbench> {
    let mut registry = CommandRegistry::new();

    registry.register("workbench.product", |api: Arc<IdeWorkbench>, _params| {
        async move { Ok(json!(api.product)) }
    });

    registry.register("notifications.post", |api: Arc<IdeWorkbench>, params| {
        async move {
            let message: String = param(&params, 0)?;
            let mut notifications = api.notifications.lock().unwrap();
            notifications.push(message);
            Ok(json!(notifications.len()))
        }
    });

    registry.register("notifications.list", |api: Arc<IdeWorkbench>, _params| {
        async move {
            let listed = api.notifications.lock().unwrap().clone();
            Ok(json!(listed))
        }
    });

    registry.register("add", |_api, params: Vec<Value>| async move {
        let a: i64 = param(&params, 0)?;
        let b: i64 = param(&params, 1)?;
        Ok(json!(a + b))
    });

    registry.register("workbench.rebuild", |_api, _params| async move {
        // A long-running host operation that outlives short timeouts.
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(json!("rebuilt"))
    });

    registry.register("workbench.reject", |_api, _params| async move {
        Err(PuenteError::Execution {
            message: "extension host rejected the request".to_string(),
        })
    });

    registry
}

#[tokio::main]
async fn main() -> PuenteResult<()> {
    println!("=== Puente Bridge Demo ===\n");

    // Demo 1: host side
    println!("--- Demo 1: Host Executor ---\n");

    let workbench = IdeWorkbench {
        product: "Rust IDE 1.101",
        notifications: Mutex::new(Vec::new()),
    };
    let registry = workbench_registry();
    println!("Registered operations: {:?}", registry.names());

    // Port 0 lets the OS pick; an orchestrator would pass a fixed port.
    let config = BridgeConfig::new().enabled(true).port(0);
    let executor = CommandExecutor::bind(workbench, registry, &config).await?;
    let port = executor.local_port();
    println!("Executor listening on 127.0.0.1:{}\n", port);
    let handle = executor.spawn();

    // Demo 2: session side
    println!("--- Demo 2: Session Commands ---\n");

    let session = BridgeSession::new(config.port(port));
    let product = session.execute_in_host("workbench.product", vec![]).await?;
    println!("workbench.product        -> {}", product);

    let sum = session
        .execute_in_host("add", vec![json!(2), json!(3)])
        .await?;
    println!("add(2, 3)                -> {}", sum);

    // Demo 3: privileged state behind the boundary
    println!("\n--- Demo 3: Privileged Host State ---\n");

    for message in ["Indexing finished", "2 problems found"] {
        let count = session
            .execute_in_host("notifications.post", vec![json!(message)])
            .await?;
        println!("notifications.post       -> {} queued", count);
    }
    let listed = session.execute_in_host("notifications.list", vec![]).await?;
    println!("notifications.list       -> {}", listed);

    // Demo 4: failures come back as errors, never as hangs
    println!("\n--- Demo 4: Failure Surfaces ---\n");

    let unknown = session.execute_in_host("workbench.missing", vec![]).await;
    println!("workbench.missing        -> {}", unknown.unwrap_err());

    let rejected = session.execute_in_host("workbench.reject", vec![]).await;
    println!("workbench.reject         -> {}", rejected.unwrap_err());

    let timed_out = session
        .execute_in_host_with_timeout("workbench.rebuild", vec![], Duration::from_millis(100))
        .await;
    println!("workbench.rebuild (100ms) -> {}", timed_out.unwrap_err());

    // Demo 5: session diagnostics
    println!("\n--- Demo 5: Session Diagnostics ---\n");

    // Give the late rebuild response time to arrive and be dropped.
    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("connected:          {}", session.initiator().is_connected());
    println!(
        "unmatched replies:  {}",
        session.initiator().unmatched_responses()
    );
    println!(
        "malformed frames:   {}",
        session.initiator().malformed_frames()
    );

    session.close().await;
    handle.join().await?;

    println!("\n=== Bridge Demo Complete ===");
    Ok(())
}
