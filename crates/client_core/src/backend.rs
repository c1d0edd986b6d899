use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shared::{
    domain::JobId,
    error::ApiError,
    protocol::{StatusReport, SubmitJobRequest, SubmitJobResponse},
};
use tracing::debug;
use url::Url;

use crate::error::MintError;

/// The generation/mint service. Only its request/response surface is modelled here.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn submit(&self, request: SubmitJobRequest) -> Result<JobId, MintError>;
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReport, MintError>;
}

pub struct HttpJobBackend {
    http: Client,
    base_url: Url,
}

impl HttpJobBackend {
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            http: Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, MintError> {
        path_url(&self.base_url, segments)
    }
}

/// Appends `segments` to `base`, percent-encoding each one so an opaque id stays one segment.
pub(crate) fn path_url(base: &Url, segments: &[&str]) -> Result<Url, MintError> {
    if let Some(segment) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
        return Err(MintError::transport(format!(
            "refusing to address path segment {segment:?}"
        )));
    }
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| MintError::transport(format!("backend url {base} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    async fn submit(&self, request: SubmitJobRequest) -> Result<JobId, MintError> {
        let url = self.endpoint(&["jobs"])?;
        let res = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|err| MintError::transport(format!("submit request failed: {err}")))?;
        let status = res.status();
        if status.is_client_error() {
            let reason = rejection_reason(status, res.text().await.unwrap_or_default());
            return Err(MintError::SubmissionRejected { reason });
        }
        if !status.is_success() {
            return Err(MintError::transport(format!(
                "backend answered submit with {status}"
            )));
        }
        let body: SubmitJobResponse = res
            .json()
            .await
            .map_err(|err| MintError::transport(format!("malformed submit response: {err}")))?;
        debug!(job_id = %body.job_id, "backend: submission accepted");
        Ok(body.job_id)
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReport, MintError> {
        let url = self.endpoint(&["jobs", job_id.as_str()])?;
        self.http
            .get(url)
            .send()
            .await
            .map_err(|err| MintError::transport(format!("status request failed: {err}")))?
            .error_for_status()
            .map_err(|err| MintError::transport(format!("status request failed: {err}")))?
            .json::<StatusReport>()
            .await
            .map_err(|err| MintError::transport(format!("malformed status report: {err}")))
    }
}

fn rejection_reason(status: StatusCode, body: String) -> String {
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => api_error.message,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => format!("backend answered {status}"),
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
