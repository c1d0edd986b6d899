use std::{sync::Arc, time::Duration};

use shared::domain::{Generation, JobId};
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tracing::{debug, info, warn};

use super::{StatusChannel, StatusSink, Subscription};
use crate::backend::JobBackend;

/// Queries the backend once per interval until a terminal report arrives.
pub struct PollingChannel {
    backend: Arc<dyn JobBackend>,
    interval: Duration,
}

impl PollingChannel {
    pub fn new(backend: Arc<dyn JobBackend>, interval: Duration) -> Self {
        Self { backend, interval }
    }
}

impl StatusChannel for PollingChannel {
    fn open(&self, job_id: JobId, generation: Generation, sink: StatusSink) -> Subscription {
        let delivery = poll_until_terminal(
            Arc::clone(&self.backend),
            job_id.clone(),
            generation,
            self.interval,
            sink,
        );
        Subscription::spawn(job_id, generation, delivery)
    }
}

async fn poll_until_terminal(
    backend: Arc<dyn JobBackend>,
    job_id: JobId,
    generation: Generation,
    period: Duration,
    sink: StatusSink,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = IntervalStream::new(ticker);
    let mut failed_ticks: u64 = 0;

    while ticks.next().await.is_some() {
        let report = match backend.fetch_status(&job_id).await {
            Ok(report) => report,
            Err(err) => {
                failed_ticks += 1;
                warn!(
                    job_id = %job_id,
                    failed_ticks,
                    error = %err,
                    "channel: poll failed; retrying next interval"
                );
                continue;
            }
        };
        if report.job_id != job_id {
            warn!(expected = %job_id, got = %report.job_id, "channel: poll answered for another job");
            continue;
        }
        let event = report.into_event(generation);
        let terminal = event.stage.is_terminal();
        if sink.send(event).is_err() {
            debug!(job_id = %job_id, "channel: consumer gone; stopping poll");
            return;
        }
        if terminal {
            info!(job_id = %job_id, generation = generation.0, "channel: terminal status; stopping poll");
            return;
        }
    }
}
