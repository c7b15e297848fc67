//! Local pool demo
//!
//! Runs a handful of tasks through two pools backed by in-process units,
//! shows targeted teardown, then raises the process-wide cap.
//!
//! ```bash
//! RUST_LOG=worker_queue=debug WORKER_POOL_GLOBAL_CAP=2 cargo run --example local_pool
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker_queue::prelude::*;

fn demo_factory() -> LocalUnitFactory {
    LocalUnitFactory::new()
        .with_mailbox_capacity(4)
        .with_method("exec", |payload| async move {
            let Some(n) = payload["n"].as_u64() else {
                return Err(InvokeError::from(format!("expected a number, got {payload}")));
            };
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!({ "n": n, "square": n * n }))
        })
        .with_method("resize", |payload| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(payload)
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded .env from {:?}", path);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "local_pool=info,worker_queue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let registry = AdmissionRegistry::global();
    tracing::info!(cap = registry.cap(), "Global admission cap");

    let config = WorkerPoolConfig::from_env().with_thread_count(3);
    let compute = WorkerPoolManager::new(Arc::new(demo_factory()), config.clone())?;
    let media = WorkerPoolManager::new(
        Arc::new(demo_factory()),
        config.with_destroy_timer(Duration::from_secs(60)),
    )?;

    // Fan out across both pools; the shared cap limits how many run at once
    let mut handles = Vec::new();
    for n in 0..8u64 {
        let pool = if n % 2 == 0 { compute.clone() } else { media.clone() };
        handles.push(tokio::spawn(async move {
            pool.submit(json!({ "n": n }), CallOptions::default()).await
        }));
    }
    for handle in handles {
        let result = handle.await??;
        tracing::info!(%result, "Task finished");
    }

    // Remote failures come back unmodified
    if let Err(e) = compute.submit(json!({ "n": "seven" }), CallOptions::default()).await {
        tracing::warn!(error = %e, "Task rejected");
    }

    // Tear down a long-running task by correlation id
    let long = {
        let media = media.clone();
        tokio::spawn(async move {
            media
                .submit(
                    json!({ "image": "cat.png" }),
                    CallOptions::new()
                        .with_call_name("resize")
                        .with_correlation_id("resize-cat"),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let destroyed = media.destroy_task("resize-cat");
    match long.await? {
        Ok(value) => tracing::warn!(%value, "Task completed before teardown"),
        Err(e) => tracing::info!(destroyed, error = %e, "Task torn down"),
    }

    set_global_cap(8);
    tracing::info!(
        cap = registry.cap(),
        compute = ?compute.status(),
        media = ?media.status(),
        "Done"
    );

    compute.destroy();
    media.destroy();
    Ok(())
}
