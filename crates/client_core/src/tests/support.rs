//! Fakes for the trait seams, shared by the unit tests.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use shared::{
    domain::{Generation, JobId, JobStage, PartialResult},
    protocol::StatusReport,
};

use crate::channel::{ReleaseHandle, StatusChannel, StatusSink, Subscription};

pub const ALICE: &str = "0xAbC0000000000000000000000000000000000001";
pub const ALICE_LOWER: &str = "0xabc0000000000000000000000000000000000001";
pub const BOB: &str = "0xDEF0000000000000000000000000000000000002";
pub const LOCAL_NETWORK: &str = "0x7a69";

pub struct OpenedSubscription {
    pub job_id: JobId,
    pub generation: Generation,
    pub sink: StatusSink,
    pub release: ReleaseHandle,
    pub previous_all_released: bool,
}

/// A channel whose events are injected by the test through the recorded sinks.
#[derive(Default)]
pub struct ManualChannel {
    opened: Mutex<Vec<OpenedSubscription>>,
}

impl ManualChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened_count(&self) -> usize {
        self.opened.lock().expect("opened lock").len()
    }

    pub fn live_count(&self) -> usize {
        self.opened
            .lock()
            .expect("opened lock")
            .iter()
            .filter(|opened| !opened.release.is_released())
            .count()
    }

    pub fn with_opened<R>(&self, index: usize, f: impl FnOnce(&OpenedSubscription) -> R) -> R {
        let guard = self.opened.lock().expect("opened lock");
        f(&guard[index])
    }

    pub fn emit(&self, index: usize, stage: JobStage, partial: Option<PartialResult>) {
        self.with_opened(index, |opened| {
            let report = StatusReport {
                job_id: opened.job_id.clone(),
                stage,
                partial: partial.unwrap_or_default(),
                error: None,
                updated_at: Utc::now(),
            };
            let _ = opened.sink.send(report.into_event(opened.generation));
        });
    }
}

impl StatusChannel for ManualChannel {
    fn open(&self, job_id: JobId, generation: Generation, sink: StatusSink) -> Subscription {
        let subscription = Subscription::detached(job_id.clone(), generation);
        let mut opened = self.opened.lock().expect("opened lock");
        let previous_all_released = opened.iter().all(|o| o.release.is_released());
        opened.push(OpenedSubscription {
            job_id,
            generation,
            sink,
            release: subscription.release_handle(),
            previous_all_released,
        });
        subscription
    }
}

pub fn full_result() -> PartialResult {
    PartialResult {
        image_url: Some("https://images.example/job_1.png".to_string()),
        metadata_url: Some("ipfs://bafymetadata/job_1.json".to_string()),
        transaction_hash: Some(format!("0x{}", "ab".repeat(32))),
    }
}

pub fn assets_only() -> PartialResult {
    PartialResult {
        image_url: Some("https://images.example/job_1.png".to_string()),
        metadata_url: Some("ipfs://bafymetadata/job_1.json".to_string()),
        transaction_hash: None,
    }
}

pub fn tx_only() -> PartialResult {
    PartialResult {
        image_url: None,
        metadata_url: None,
        transaction_hash: Some(format!("0x{}", "ab".repeat(32))),
    }
}
