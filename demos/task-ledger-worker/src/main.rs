use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use ledger_core::{Task, TaskHandler};
use ledger_mongo::{LedgerConfig, LedgerRepository};
use ledger_runtime::{worker_identity, WorkerBuilder, WorkerConfig, WorkerHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, env = "LEDGER_CONNECTION_STRING")]
    connection_string: String,

    #[arg(long, env = "LEDGER_DATABASE_NAME")]
    database_name: String,

    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,

    #[arg(long, env = "POD_NAME")]
    pod_name: Option<String>,

    #[arg(long, env = "INSTANCE_ID")]
    instance_id: Option<String>,
}

/// A handler that logs and succeeds; replace with a real implementation
/// when embedding this crate in a host process.
struct LoggingHandler;

#[async_trait]
impl TaskHandler for LoggingHandler {
    async fn handle(&self, task: &Task) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(task_id = %task.task_id, "processing task");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .without_time()
            .with_filter(tracing_subscriber::EnvFilter::from_default_env()),
    );
    registry.init();

    let args = Args::parse();

    let ledger_config = LedgerConfig {
        connection_string: args.connection_string,
        database_name: args.database_name,
        connect_timeout: Duration::from_secs(10),
        ..LedgerConfig::default()
    };

    let repository = Arc::new(
        LedgerRepository::initialize(&ledger_config)
            .await
            .context("failed to initialize the ledger repository")?,
    );

    let worker_id = worker_identity(
        args.node_name.as_deref(),
        args.pod_name.as_deref(),
        args.instance_id.as_deref(),
    );

    let mut worker = WorkerBuilder::new(repository, Arc::new(LoggingHandler))
        .config(WorkerConfig::default())
        .worker_id(worker_id)
        .build();

    let handle = worker.handle();

    let signal = tokio::task::spawn(async move {
        struct DropGuard(WorkerHandle);

        impl Drop for DropGuard {
            fn drop(&mut self) {
                self.0.shutdown();
            }
        }

        let _handle = DropGuard(handle);
        tokio::signal::ctrl_c().await?;
        tracing::info!("got signal, shutting down");
        anyhow::Ok(())
    });

    tracing::info!(worker_id = %worker.worker_id(), "task-ledger-worker starting up");
    worker.run().await?;

    signal
        .await
        .context("signal task exited early with an error")?
        .context("signal task exited early with an error")?;

    Ok(())
}
