//! Daemon startup wiring.

use std::sync::Arc;

use tracing::info;

use crate::config::Settings;
use crate::daemon;
use crate::heartbeat::HeartbeatTimer;
use crate::jobs;
use crate::paths::Paths;
use crate::runner::{ResultNotifier, Runner};
use crate::scheduler::JobScheduler;
use crate::sessions::SessionStore;
use crate::state::StatusFile;

/// Run the daemon until SIGINT/SIGTERM. The optional notifier is the hook
/// through which chat transports receive heartbeat and job results.
pub async fn run(
    settings: Settings,
    paths: Paths,
    notifier: Option<ResultNotifier>,
) -> anyhow::Result<()> {
    let settings = Arc::new(settings);

    daemon::write_pid_file(&paths).await?;

    // One session store and one runner per process; everything funnels
    // through the runner's queue.
    let sessions = Arc::new(SessionStore::new(paths.clone(), Arc::clone(&settings)));
    let runner = Arc::new(Runner::new(
        Arc::clone(&settings),
        paths.clone(),
        Arc::clone(&sessions),
    ));
    let status = Arc::new(StatusFile::new(paths.clone()));

    info!(
        pid = std::process::id(),
        root = %paths.root().display(),
        "valetd started"
    );

    // Jobs belong to the default agent's workspace.
    let default_agent = runner.resolve_agent_id(None);
    let jobs_dir = {
        let workspace = settings
            .agent(&default_agent)
            .and_then(|a| a.workspace.as_deref());
        paths.agent(&default_agent, workspace).jobs_dir
    };
    let job_list = jobs::load_jobs(&jobs_dir).await;
    info!(count = job_list.len(), "Jobs loaded");

    // Warm up the default agent's session so the first real message resumes
    // instead of paying new-session latency.
    if let Err(e) = runner.bootstrap(None).await {
        tracing::error!("Bootstrap failed: {}", e);
    }

    HeartbeatTimer::new(
        Arc::clone(&runner),
        settings.heartbeat.clone(),
        Arc::clone(&status),
        notifier.clone(),
    )
    .spawn();

    JobScheduler::new(
        Arc::clone(&runner),
        job_list,
        Arc::clone(&status),
        notifier,
    )
    .spawn();

    daemon::wait_for_shutdown().await;

    info!("Shutting down");
    daemon::cleanup_pid_file(&paths).await;
    Ok(())
}
