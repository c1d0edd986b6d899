//! The generate-then-mint job state machine.
//!
//! Exactly one job is active per session, identified by its [`Generation`]. A new submission
//! supersedes whatever came before: the previous subscription is closed before the next one
//! opens, and any event still in flight for an older generation is discarded on arrival.
//!
//! Stages form a lattice `Idle < Submitting < Generating < Minting < Completed`, with `Failed`
//! absorbing from any non-terminal stage. Events that would move a job backward are ignored,
//! which is what lets polling and push transports share one consumer.

use std::sync::Arc;

use shared::{
    domain::{Generation, JobId, JobStage, MintResult, PartialResult, WalletAddress},
    protocol::{StatusError, StatusEvent, SubmitJobRequest},
};
use tracing::{debug, info, warn};

use crate::{
    channel::{StatusChannel, StatusSink, Subscription},
    config::ClientSettings,
    error::MintError,
    wallet::{ConnectionState, WalletSession},
};

pub const MAX_PROMPT_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub generation: Generation,
    pub id: Option<JobId>,
    pub prompt: String,
    pub owner: WalletAddress,
    pub stage: JobStage,
    pub partial: PartialResult,
    pub result: Option<MintResult>,
    pub failure: Option<MintError>,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobSnapshot {
    pub generation: Generation,
    pub job_id: Option<JobId>,
    pub prompt: Option<String>,
    pub owner: Option<WalletAddress>,
    pub stage: JobStage,
    pub partial: PartialResult,
    pub result: Option<MintResult>,
    pub error: Option<MintError>,
}

impl JobSnapshot {
    pub fn retryable(&self) -> bool {
        self.error.as_ref().is_some_and(MintError::is_retryable)
    }
}

/// What the caller must send to the backend after a successful `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionTicket {
    pub generation: Generation,
    pub request: SubmitJobRequest,
}

/// How an inbound status event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Advanced(JobStage),
    Completed,
    Failed,
    /// The event belongs to a superseded generation.
    Stale,
    /// Duplicate, backward, or addressed to a job that is already terminal.
    Ignored,
}

pub struct JobOrchestrator {
    channel: Arc<dyn StatusChannel>,
    sink: StatusSink,
    settings: Arc<ClientSettings>,
    generation: Generation,
    job: Option<Job>,
    subscription: Option<Subscription>,
}

impl JobOrchestrator {
    pub fn new(
        channel: Arc<dyn StatusChannel>,
        sink: StatusSink,
        settings: Arc<ClientSettings>,
    ) -> Self {
        Self {
            channel,
            sink,
            settings,
            generation: Generation::ZERO,
            job: None,
            subscription: None,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    pub fn stage(&self) -> JobStage {
        self.job.as_ref().map_or(JobStage::Idle, |job| job.stage)
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// Starts a new generation for `prompt`, superseding any current job.
    ///
    /// Guards run before anything is mutated, so a refused submission leaves the current job
    /// untouched and never reaches the network.
    pub fn submit(
        &mut self,
        prompt: &str,
        wallet: &WalletSession,
    ) -> Result<SubmissionTicket, MintError> {
        let prompt = validate_prompt(prompt)?;
        let (owner, network) = match (wallet.connection_state(), wallet.address(), wallet.network())
        {
            (ConnectionState::Connected, Some(address), Some(network)) => (address, network),
            _ => return Err(MintError::WalletDisconnected),
        };
        if !self.settings.supports(network) {
            return Err(MintError::NetworkUnsupported {
                network: network.clone(),
            });
        }

        self.release_subscription();
        if let Some(previous) = self.job.as_ref().filter(|job| job.stage.is_in_flight()) {
            info!(
                generation = previous.generation.0,
                stage = %previous.stage,
                "job: superseded by new submission"
            );
        }
        self.generation = self.generation.next();
        self.job = Some(Job {
            generation: self.generation,
            id: None,
            prompt: prompt.clone(),
            owner: owner.clone(),
            stage: JobStage::Submitting,
            partial: PartialResult::default(),
            result: None,
            failure: None,
        });
        info!(generation = self.generation.0, owner = %owner, "job: submitting");

        Ok(SubmissionTicket {
            generation: self.generation,
            request: SubmitJobRequest {
                prompt,
                wallet_address: owner.as_str().to_string(),
            },
        })
    }

    /// The backend accepted the submission for `generation` and assigned `job_id`.
    pub fn on_submission_accepted(&mut self, generation: Generation, job_id: JobId) -> Applied {
        let Some(job) = self.current_job_mut(generation) else {
            debug!(generation = generation.0, job_id = %job_id, "job: dropping stale acceptance");
            return Applied::Stale;
        };
        if job.stage != JobStage::Submitting {
            // Cancelled while the request was in flight.
            return Applied::Ignored;
        }
        job.id = Some(job_id.clone());
        job.stage = JobStage::Generating;
        info!(generation = generation.0, job_id = %job_id, "job: accepted; generating");

        self.release_subscription();
        let subscription = self.channel.open(job_id, generation, self.sink.clone());
        self.subscription = Some(subscription);
        Applied::Advanced(JobStage::Generating)
    }

    pub fn on_submission_failed(&mut self, generation: Generation, error: MintError) -> Applied {
        let Some(job) = self.current_job_mut(generation) else {
            debug!(generation = generation.0, error = %error, "job: dropping stale submission failure");
            return Applied::Stale;
        };
        if job.stage.is_terminal() {
            return Applied::Ignored;
        }
        self.fail(error);
        Applied::Failed
    }

    pub fn apply(&mut self, event: StatusEvent) -> Applied {
        let Some(job) = self.current_job_mut(event.generation) else {
            debug!(
                generation = event.generation.0,
                job_id = %event.job_id,
                "job: dropping stale status event"
            );
            return Applied::Stale;
        };
        if job.stage.is_terminal() || job.id.as_ref() != Some(&event.job_id) {
            return Applied::Ignored;
        }
        // Fields land only with an event that is itself applied.
        let mut merged = job.partial.clone();
        if let Some(partial) = &event.partial_result {
            merged.merge(partial);
        }

        match event.stage {
            JobStage::Failed => {
                job.partial = merged;
                let error = match event.error {
                    Some(StatusError::Transport(message)) => MintError::Transport { message },
                    Some(StatusError::Backend(reason)) => MintError::BackendFailed { reason },
                    None => MintError::BackendFailed {
                        reason: "backend reported failure without a reason".to_string(),
                    },
                };
                self.fail(error);
                Applied::Failed
            }
            JobStage::Completed => match merged.complete() {
                Some(result) => {
                    job.partial = merged;
                    info!(
                        generation = job.generation.0,
                        job_id = %event.job_id,
                        transaction_hash = %result.transaction_hash,
                        "job: completed"
                    );
                    job.stage = JobStage::Completed;
                    job.result = Some(result);
                    self.release_subscription();
                    Applied::Completed
                }
                None => {
                    job.partial = merged;
                    warn!(job_id = %event.job_id, "job: completion arrived without a full result");
                    self.fail(MintError::BackendFailed {
                        reason: "incomplete result".to_string(),
                    });
                    Applied::Failed
                }
            },
            stage if stage.rank() > job.stage.rank() => {
                debug!(
                    generation = job.generation.0,
                    from = %job.stage,
                    to = %stage,
                    "job: stage advanced"
                );
                job.stage = stage;
                job.partial = merged;
                Applied::Advanced(stage)
            }
            _ => Applied::Ignored,
        }
    }

    /// Cancels the active job because the wallet it would mint to is gone.
    ///
    /// Terminal jobs are left alone: a completed mint stays completed.
    pub fn invalidate_owner(
        &mut self,
        previous: &WalletAddress,
        current: Option<&WalletAddress>,
    ) -> bool {
        let Some(job) = self.job.as_ref() else {
            return false;
        };
        if job.stage.is_terminal() || &job.owner != previous {
            return false;
        }
        info!(
            generation = job.generation.0,
            previous = %previous,
            "job: owner changed; cancelling"
        );
        self.fail(MintError::OwnerChanged {
            previous: previous.clone(),
            current: current.cloned(),
        });
        true
    }

    /// Releases the subscription for session teardown.
    pub fn shutdown(&mut self) {
        self.release_subscription();
    }

    pub fn snapshot(&self) -> JobSnapshot {
        match &self.job {
            Some(job) => JobSnapshot {
                generation: job.generation,
                job_id: job.id.clone(),
                prompt: Some(job.prompt.clone()),
                owner: Some(job.owner.clone()),
                stage: job.stage,
                partial: job.partial.clone(),
                result: job.result.clone(),
                error: job.failure.clone(),
            },
            None => JobSnapshot {
                generation: self.generation,
                ..JobSnapshot::default()
            },
        }
    }

    fn current_job_mut(&mut self, generation: Generation) -> Option<&mut Job> {
        if generation != self.generation {
            return None;
        }
        self.job.as_mut()
    }

    fn fail(&mut self, error: MintError) {
        if let Some(job) = self.job.as_mut() {
            info!(
                generation = job.generation.0,
                stage = %job.stage,
                retryable = error.is_retryable(),
                error = %error,
                "job: failed"
            );
            job.stage = JobStage::Failed;
            job.result = None;
            job.failure = Some(error);
        }
        self.release_subscription();
    }

    fn release_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
    }
}

fn validate_prompt(prompt: &str) -> Result<String, MintError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(MintError::InvalidPrompt("prompt must not be empty".to_string()));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(MintError::InvalidPrompt(format!(
            "prompt is {chars} characters; the limit is {MAX_PROMPT_CHARS}"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
