//! Background runner for the adaptive polling loops.
//!
//! Two loops per controller: the status poll and the record refetch. Each
//! cycle awaits its own work before sleeping, so cycles of the same loop never
//! overlap, and each sleep re-reads the interval so a status change takes
//! effect on the next cycle.

use log::{debug, info};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::controller::LifecycleController;

pub struct LifecycleRunner;

impl LifecycleRunner {
    /// Starts the status-poll and refetch loops for `controller`.
    pub fn spawn(controller: Arc<LifecycleController>) -> RunnerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(
            "[LifecycleRunner] Starting polling loops for building {}",
            controller.building().id
        );

        let status = tokio::spawn(status_loop(Arc::clone(&controller), shutdown_rx.clone()));
        let refresh = tokio::spawn(refresh_loop(Arc::clone(&controller), shutdown_rx));

        RunnerHandle {
            controller,
            shutdown: shutdown_tx,
            tasks: vec![status, refresh],
        }
    }
}

async fn status_loop(controller: Arc<LifecycleController>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if controller.has_instance() {
            let check = controller.poll_status().await;
            debug!(
                "[LifecycleRunner] Status check: {} ({:?})",
                check.live.provider_state.as_str(),
                check.outcome
            );
        }

        let wait = controller.status_poll_interval();
        tokio::select! {
            _ = sleep(wait) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!("[LifecycleRunner] Status loop stopped");
}

async fn refresh_loop(controller: Arc<LifecycleController>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if let Err(e) = controller.reconcile().await {
            debug!("[LifecycleRunner] Refetch failed, retrying next cycle: {}", e);
        }

        let wait = controller.instance_refresh_interval();
        tokio::select! {
            _ = sleep(wait) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!("[LifecycleRunner] Refresh loop stopped");
}

/// Owns the running loops. Dropping the handle aborts them.
pub struct RunnerHandle {
    controller: Arc<LifecycleController>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunnerHandle {
    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Signals both loops, waits for the cycles in progress to finish, then
    /// tears down the controller's countdown.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.controller.shutdown();
        info!(
            "[LifecycleRunner] Stopped polling loops for building {}",
            self.controller.building().id
        );
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
