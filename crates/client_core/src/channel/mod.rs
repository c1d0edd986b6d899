//! Delivery of job status updates, independent of how they travel.
//!
//! Both transports are at-least-once and unordered as far as the consumer is concerned: the
//! orchestrator's stage lattice absorbs duplicates and backward moves, so nothing here tries to
//! de-duplicate.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use shared::{
    domain::{Generation, JobId},
    protocol::StatusEvent,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::{
    backend::JobBackend,
    config::{ClientSettings, TransportKind},
    error::MintError,
};

mod polling;
mod push;

pub use polling::PollingChannel;
pub use push::PushChannel;

pub type StatusSink = mpsc::UnboundedSender<StatusEvent>;

pub trait StatusChannel: Send + Sync {
    /// Starts delivering events for `job_id` into `sink`, each tagged with `generation`.
    fn open(&self, job_id: JobId, generation: Generation, sink: StatusSink) -> Subscription;
}

/// Builds the transport selected in settings.
pub fn channel_for(
    settings: &ClientSettings,
    backend: Arc<dyn JobBackend>,
) -> Result<Arc<dyn StatusChannel>, MintError> {
    Ok(match settings.transport {
        TransportKind::Poll => Arc::new(PollingChannel::new(backend, settings.poll_interval)),
        TransportKind::Push => Arc::new(PushChannel::new(
            &settings.parsed_backend_url()?,
            settings.push_reconnect_delay,
            settings.push_max_reconnects,
        )?),
    })
}

struct ReleaseOnDrop(Arc<AtomicBool>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Observer for whether a subscription's resources are gone.
#[derive(Debug, Clone)]
pub struct ReleaseHandle(Arc<AtomicBool>);

impl ReleaseHandle {
    pub fn is_released(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ownership of one job's delivery task (timer or socket).
///
/// Dropping or closing aborts the task. The release flag is set synchronously by `close` and by
/// the task itself when it ends after a terminal event.
pub struct Subscription {
    job_id: JobId,
    generation: Generation,
    released: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn spawn<F>(job_id: JobId, generation: Generation, delivery: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let released = Arc::new(AtomicBool::new(false));
        let guard = ReleaseOnDrop(Arc::clone(&released));
        let task = tokio::spawn(async move {
            let _guard = guard;
            delivery.await;
        });
        Self {
            job_id,
            generation,
            released,
            task: Some(task),
        }
    }

    /// A subscription whose events are produced elsewhere; closing only flips the flag.
    pub fn detached(job_id: JobId, generation: Generation) -> Self {
        Self {
            job_id,
            generation,
            released: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn release_handle(&self) -> ReleaseHandle {
        ReleaseHandle(Arc::clone(&self.released))
    }

    pub fn is_closed(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if !self.released.swap(true, Ordering::SeqCst) {
            debug!(
                job_id = %self.job_id,
                generation = self.generation.0,
                "channel: subscription closed"
            );
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "../tests/channel_tests.rs"]
mod tests;
