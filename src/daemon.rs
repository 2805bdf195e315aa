//! PID-file bookkeeping and shutdown signals.
//!
//! SIGINT/SIGTERM stop the periodic timers and clean up the PID and state
//! artifacts. An in-flight external invocation is not cancelled; the
//! process exits once the signal handler returns.

use tracing::{info, warn};

use crate::paths::Paths;

pub async fn write_pid_file(paths: &Paths) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(paths.root()).await?;
    tokio::fs::write(paths.pid_file(), format!("{}\n", std::process::id())).await?;
    Ok(())
}

pub async fn cleanup_pid_file(paths: &Paths) {
    if let Err(e) = tokio::fs::remove_file(paths.pid_file()).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove PID file: {}", e);
        }
    }
}

/// The recorded daemon PID, if a PID file exists.
pub fn read_pid(paths: &Paths) -> Option<u32> {
    std::fs::read_to_string(paths.pid_file())
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn pid_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());

        assert!(read_pid(&paths).is_none());
        write_pid_file(&paths).await.unwrap();
        assert_eq!(read_pid(&paths), Some(std::process::id()));

        cleanup_pid_file(&paths).await;
        assert!(read_pid(&paths).is_none());
        // Cleanup is idempotent.
        cleanup_pid_file(&paths).await;
    }
}
