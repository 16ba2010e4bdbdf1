use chrono::FixedOffset;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use clinic_core::collaborators::{
    IntegrationCommand, IntegrationGateway, NoReviews, TracingNotifier,
};
use clinic_core::reconciliation::{
    InMemoryKeyValueStore, ScheduledTask, TaskContext, TaskOutcome, TaskRunner, default_tasks,
};
use clinic_core::{
    AppointmentWorkflow, ClinicConfig, ClinicStore, Clock, CoreError, CoreResult, PatientPortal,
    SystemClock,
};

/// Queues MIS commands for the adapter task instead of calling it inline.
///
/// Submitting never blocks the request that caused the command.
#[derive(Clone)]
struct ChannelIntegrationGateway {
    tx: mpsc::UnboundedSender<IntegrationCommand>,
}

impl IntegrationGateway for ChannelIntegrationGateway {
    fn submit(&self, command: IntegrationCommand) -> CoreResult<()> {
        self.tx
            .send(command)
            .map_err(|_| CoreError::Transient("integration queue is closed".into()))
    }
}

/// Drains the integration queue until every sender is gone and returns how many commands it
/// dispatched.
///
/// The MIS adapter is an external process; here each command is logged as it would be sent.
fn spawn_integration_worker(
    mut rx: mpsc::UnboundedReceiver<IntegrationCommand>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut dispatched = 0;
        while let Some(command) = rx.recv().await {
            match serde_json::to_string(&command) {
                Ok(payload) => {
                    dispatched += 1;
                    tracing::info!(%payload, "integration command dispatched")
                }
                Err(err) => tracing::warn!(error = %err, "failed to encode integration command"),
            }
        }
        dispatched
    })
}

/// Runs `task` on its cadence until the process exits.
fn spawn_task_loop(
    runner: TaskRunner,
    task: Arc<dyn ScheduledTask>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = clock.now();
            let next = task.cadence().next_after(now, offset);
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            let runner = runner.clone();
            let current = task.clone();
            match tokio::task::spawn_blocking(move || runner.run_once(current.as_ref())).await {
                Ok(Ok(report)) => match report.outcome {
                    TaskOutcome::Completed { affected } if affected > 0 => {
                        tracing::info!(task = report.task, affected, "scheduled run finished")
                    }
                    outcome => tracing::debug!(task = report.task, ?outcome, "scheduled run"),
                },
                Ok(Err(err)) => {
                    tracing::warn!(task = task.name(), error = %err, "scheduled run failed")
                }
                Err(err) => tracing::error!(task = task.name(), error = %err, "scheduled run panicked"),
            }
        }
    })
}

/// Main entry point for the clinic application
///
/// Starts the patient portal REST API and the reconciliation scheduler together.
///
/// # Environment Variables
/// - `CLINIC_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `CLINIC_SNAPSHOT_PATH`: Store snapshot loaded at startup and written on shutdown (optional)
/// - `CLINIC_*`: Core configuration, see [`ClinicConfig::from_env_lookup`]
///
/// # Returns
/// * `Ok(())` - If the server shuts down cleanly
/// * `Err(anyhow::Error)` - If startup, serving or the final snapshot fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clinic_run=info".parse()?)
                .add_directive("clinic_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("CLINIC_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let snapshot = std::env::var("CLINIC_SNAPSHOT_PATH").ok().map(PathBuf::from);
    let cfg = Arc::new(ClinicConfig::from_env_lookup(|key| std::env::var(key).ok())?);

    let store = match &snapshot {
        Some(path) if path.exists() => {
            tracing::info!("-- Loading store snapshot from {}", path.display());
            Arc::new(ClinicStore::load_snapshot(path)?)
        }
        _ => Arc::new(ClinicStore::new()),
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let integration_worker = spawn_integration_worker(rx);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let workflow = AppointmentWorkflow::new(
        store.clone(),
        cfg.clone(),
        clock.clone(),
        Arc::new(TracingNotifier),
        Arc::new(ChannelIntegrationGateway { tx }),
        Arc::new(NoReviews),
    );

    let runner = TaskRunner::new(TaskContext::new(
        workflow.clone(),
        Arc::new(InMemoryKeyValueStore::new(clock.clone())),
        clock.clone(),
    ));
    let scheduler: Vec<JoinHandle<()>> = default_tasks()
        .into_iter()
        .map(|task| {
            tracing::info!(task = task.name(), cadence = %task.cadence(), "-- Scheduling task");
            spawn_task_loop(
                runner.clone(),
                Arc::from(task),
                clock.clone(),
                cfg.utc_offset(),
            )
        })
        .collect();

    let rest_app = router(AppState::new(PatientPortal::new(workflow)));
    tracing::info!("-- Starting clinic REST API on {}", rest_addr);
    let rest_server = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
        axum::serve(listener, rest_app)
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
            })
            .await?;
        Ok::<(), anyhow::Error>(())
    });

    let rest_result = rest_server.await;
    for handle in &scheduler {
        handle.abort();
    }
    for handle in scheduler {
        // Cancelled loops drop their workflow clones; a run already on the blocking pool
        // finishes first.
        handle.await.ok();
    }
    // The last gateway sender lives in the runner; dropping it closes the queue.
    drop(runner);
    match integration_worker.await {
        Ok(dispatched) => tracing::info!(dispatched, "-- Integration queue drained"),
        Err(err) => tracing::error!(error = %err, "integration worker failed"),
    }

    if let Some(path) = &snapshot {
        store.save_snapshot(path)?;
        tracing::info!("-- Store snapshot written to {}", path.display());
    }

    rest_result.map_err(anyhow::Error::from)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_types::{AppointmentId, PatientId};

    #[tokio::test]
    async fn test_channel_gateway_queues_and_reports_closed_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gateway = ChannelIntegrationGateway { tx };
        let command = IntegrationCommand::CreateAppointmentByPatient {
            appointment_id: AppointmentId::new(),
            author_patient_id: PatientId::new(),
        };

        gateway.submit(command.clone()).unwrap();
        assert_eq!(rx.recv().await, Some(command.clone()));

        drop(rx);
        let err = gateway.submit(command).unwrap_err();
        assert!(matches!(err, CoreError::Transient(_)));
    }

    #[tokio::test]
    async fn test_worker_drains_queue_after_last_sender_is_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = ChannelIntegrationGateway { tx };
        let worker = spawn_integration_worker(rx);
        for _ in 0..3 {
            gateway
                .submit(IntegrationCommand::CreateAppointmentByPatient {
                    appointment_id: AppointmentId::new(),
                    author_patient_id: PatientId::new(),
                })
                .unwrap();
        }
        drop(gateway);
        assert_eq!(worker.await.unwrap(), 3);
    }
}
