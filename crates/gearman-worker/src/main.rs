// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gearman worker daemon.
//!
//! Connects to the job server from the environment and serves two demo
//! functions:
//! - `reverse`: returns the payload reversed
//! - `sum`: returns the sum of the payload bytes as decimal text

use anyhow::Result;
use tracing::{error, info};

use gearman_worker::{GearmanWorker, PoolExecutor, SimpleFunction, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gearman_worker=info".parse()?)
                .add_directive("gearman_protocol=info".parse()?),
        )
        .init();

    info!("Starting Gearman worker");

    let config = WorkerConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        server_addr = %config.server_addr,
        worker_id = ?config.worker_id,
        max_queued_jobs = ?config.max_queued_jobs,
        "Configuration loaded"
    );

    let mut worker = GearmanWorker::with_executor(config, PoolExecutor::current());
    worker.set_functions(vec![
        SimpleFunction::new("reverse", |data| {
            let mut out = data.to_vec();
            out.reverse();
            Ok(out)
        })
        .shared(),
        SimpleFunction::new("sum", |data| {
            let total: u64 = data.iter().map(|b| u64::from(*b)).sum();
            Ok(total.to_string().into_bytes())
        })
        .shared(),
    ]);
    worker.add_configured_server().await;

    let handle = worker.handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutting down...");
        handle.request_stop();
    });

    worker.run().await?;
    info!("Shutdown complete");

    Ok(())
}
