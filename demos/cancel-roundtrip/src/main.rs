use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nluq_core::{
    Broker, CancelCoordinator, LocalTasks, MemoryHub, QueueConfig, QueueEventBus, TaskSerializer,
};
use nluq_model::{JobId, ModelArtifact, ModelId};
use nluq_observe::{LoggerConfig, LoggerLevel, init_logger};
use nluq_pg::{PgBroker, PgBrokerConfig, PgTransactionLocker};

struct Node {
    coord: Arc<CancelCoordinator>,
    tasks: Arc<LocalTasks>,
}

async fn start_node(broker: Arc<dyn Broker>, cfg: &QueueConfig) -> anyhow::Result<Node> {
    cfg.validate()?;
    let bus = Arc::new(QueueEventBus::new(broker, cfg.queue_id.clone())?);
    bus.initialize().await?;

    let tasks = Arc::new(LocalTasks::new());
    let coord = Arc::new(CancelCoordinator::from_config(
        bus,
        cfg,
        tasks.clone(),
        Arc::new(TaskSerializer::new()),
    ));
    coord.start();

    let cluster = cfg.cluster_id.clone();
    coord.on_interrupt(move || {
        let cluster = cluster.clone();
        async move {
            info!(cluster = %cluster, "scheduler woken up");
            Ok(())
        }
    });
    Ok(Node { coord, tasks })
}

/// Pretend to train until cancelled.
async fn train(job: JobId, token: CancellationToken) {
    let mut epoch = 0u32;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(task = %job, epoch, "training stopped");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                epoch += 1;
                info!(task = %job, epoch, "epoch finished");
            }
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // 1) logger
    let cfg = LoggerConfig {
        level: LoggerLevel::new("nluq_core=debug,info")?,
        ..Default::default()
    };
    init_logger(&cfg)?;

    // 2) transport: postgres when NLUQ_PG_URL is set, in-memory otherwise
    let broker_a: Arc<dyn Broker>;
    let broker_b: Arc<dyn Broker>;
    let pg_url = std::env::var("NLUQ_PG_URL").ok();
    if let Some(url) = pg_url.clone() {
        let pg = PgBrokerConfig {
            url,
            ..Default::default()
        };
        broker_a = Arc::new(PgBroker::connect(&pg).await?);
        broker_b = Arc::new(PgBroker::connect(&pg).await?);
        info!("using postgres broker");
    } else {
        let hub = MemoryHub::new();
        broker_a = Arc::new(hub.connect());
        broker_b = Arc::new(hub.connect());
    }

    // 3) two nodes sharing one queue
    let node_a = start_node(
        broker_a,
        &QueueConfig {
            cluster_id: "node-a".into(),
            ..Default::default()
        },
    )
    .await?;
    let node_b = start_node(
        broker_b,
        &QueueConfig {
            cluster_id: "node-b".into(),
            ..Default::default()
        },
    )
    .await?;

    // 4) a job running on node-b
    let model = ModelId::new("9f86d081884c7d65", "2c26b46b68ffc68f", 78, "en")?;
    let job = JobId::new("acme", model.clone())?;
    let token = node_b.tasks.register(job.clone());
    let training = tokio::spawn(train(job.clone(), token));
    tokio::time::sleep(Duration::from_millis(350)).await;

    // 5) node-a cancels it, then asks again to see the failure path
    node_a.coord.request_cancel(&job, "node-b").await?;
    training.await?;
    info!(task = %job, "remote cancel confirmed");

    if let Err(e) = node_a.coord.request_cancel(&job, "node-b").await {
        warn!(task = %job, error = %e, "second cancel rejected as expected");
    }

    // 6) wake every scheduler
    node_a.coord.interrupt_schedulers().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // 7) claim the training slot under the cluster-wide lock
    if let Some(url) = pg_url {
        let locker = PgTransactionLocker::connect(&url).await?;
        let claimed = locker
            .run_in_lock("claim training slot", || async { Ok::<_, anyhow::Error>(1u32) })
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        info!(claimed, "training slot claimed under advisory lock");
        locker.close().await?;
    }

    // 8) what a finished training would persist
    let now = time::OffsetDateTime::now_utc();
    let artifact = ModelArtifact {
        id: model,
        started_at: now - time::Duration::seconds(30),
        finished_at: now,
        data: vec![0xde, 0xad, 0xbe, 0xef],
    };
    let bytes = artifact.encode()?;
    let restored = ModelArtifact::decode(&bytes)?;
    info!(model = %restored.id, bytes = bytes.len(), "artifact round trip");

    node_a.coord.bus().teardown().await?;
    node_b.coord.bus().teardown().await?;
    Ok(())
}
