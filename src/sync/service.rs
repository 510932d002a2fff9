use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use super::SyncEngine;
use crate::app::Result;
use crate::domain::UpdateFlags;

/// A unit of background work the engine starts after, or during, a pass.
#[async_trait]
pub trait SubService: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn exec(&self, engine: &Arc<SyncEngine>) -> Result<()>;
}

/// Runs a [`SubService`] as a tokio task, at most one at a time.
pub struct Worker<S> {
    service: Arc<S>,
    running: Arc<AtomicBool>,
}

impl<S: SubService> Worker<S> {
    pub fn new(service: S) -> Self {
        Self {
            service: Arc::new(service),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the service unless it is already running.
    ///
    /// When the service finishes the engine is asked to check whether the
    /// whole invocation is complete.
    pub fn start(&self, engine: &Arc<SyncEngine>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let service = self.service.clone();
        let running = self.running.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            let name = service.name();
            debug!("{} started", name);

            let task_engine = engine.clone();
            let outcome = tokio::spawn(async move { service.exec(&task_engine).await }).await;
            match outcome {
                Ok(Ok(())) => debug!("{} finished", name),
                Ok(Err(e)) => error!("{} failed: {}", name, e),
                Err(e) => error!("Task join error in {}: {}", name, e),
            }

            running.store(false, Ordering::SeqCst);
            engine.send_update(UpdateFlags::STATUS);
            engine.check_completion();
        });
    }
}
