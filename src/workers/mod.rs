mod session_cleanup;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::services::sessions::SessionConfig;
use crate::state::AppState;

pub use session_cleanup::evict_idle_sessions;

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    state: AppState,
    config: SessionConfig,
}

impl WorkerManager {
    pub async fn new(state: AppState, config: SessionConfig) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await.map_err(WorkerError::Scheduler)?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
            config,
        })
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        if !self.config.cleanup_enabled {
            info!("session cleanup worker disabled");
            return Ok(());
        }

        let scheduler = self.scheduler.lock().await;

        let schedule = self.config.cleanup_schedule.clone();
        let ttl = self.config.idle_ttl;
        let state = self.state.clone();
        let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                evict_idle_sessions(&state, ttl);
            })
        })
        .map_err(WorkerError::Scheduler)?;
        scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
        info!(schedule = %schedule, idle_ttl_secs = ttl.as_secs(), "session cleanup worker scheduled");

        scheduler.start().await.map_err(WorkerError::Scheduler)?;
        info!("workers started");
        Ok(())
    }

    pub async fn stop(&self) {
        info!("stopping workers");

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "error shutting down scheduler");
        }
        info!("workers stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
}
