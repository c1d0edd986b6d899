use std::time::Duration;

use futures::{SinkExt, StreamExt};
use shared::{
    domain::{Generation, JobId},
    protocol::{StatusEvent, StatusReport},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{StatusChannel, StatusSink, Subscription};
use crate::{backend::path_url, error::MintError};

/// Follows the backend's websocket topic for a job, reconnecting when the socket drops.
pub struct PushChannel {
    ws_base: Url,
    reconnect_delay: Duration,
    max_reconnects: u32,
}

impl PushChannel {
    pub fn new(
        backend_url: &Url,
        reconnect_delay: Duration,
        max_reconnects: u32,
    ) -> Result<Self, MintError> {
        Ok(Self {
            ws_base: websocket_base(backend_url)?,
            reconnect_delay,
            max_reconnects,
        })
    }

    pub fn topic_url(&self, job_id: &JobId) -> Result<Url, MintError> {
        path_url(&self.ws_base, &["jobs", job_id.as_str(), "events"])
    }
}

impl StatusChannel for PushChannel {
    fn open(&self, job_id: JobId, generation: Generation, sink: StatusSink) -> Subscription {
        match self.topic_url(&job_id) {
            Ok(url) => {
                let delivery = follow_topic(
                    url,
                    job_id.clone(),
                    generation,
                    sink,
                    self.reconnect_delay,
                    self.max_reconnects,
                );
                Subscription::spawn(job_id, generation, delivery)
            }
            Err(err) => {
                let _ = sink.send(StatusEvent::transport_failure(
                    job_id.clone(),
                    generation,
                    err.to_string(),
                ));
                let mut subscription = Subscription::detached(job_id, generation);
                subscription.close();
                subscription
            }
        }
    }
}

fn websocket_base(backend_url: &Url) -> Result<Url, MintError> {
    let scheme = match backend_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(MintError::transport(format!(
                "backend url must start with http:// or https://, got {other}://"
            )))
        }
    };
    let mut ws_base = backend_url.clone();
    ws_base
        .set_scheme(scheme)
        .map_err(|()| MintError::transport("cannot derive websocket url from backend url"))?;
    if !ws_base.path().ends_with('/') {
        let path = format!("{}/", ws_base.path());
        ws_base.set_path(&path);
    }
    Ok(ws_base)
}

async fn follow_topic(
    url: Url,
    job_id: JobId,
    generation: Generation,
    sink: StatusSink,
    reconnect_delay: Duration,
    max_reconnects: u32,
) {
    let mut failed_connects: u32 = 0;
    loop {
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                failed_connects = 0;
                debug!(job_id = %job_id, "channel: push connected");
                let (mut writer, mut reader) = ws_stream.split();
                while let Some(frame) = reader.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(err) => {
                            warn!(job_id = %job_id, error = %err, "channel: push receive failed");
                            break;
                        }
                    };
                    let report = match serde_json::from_str::<StatusReport>(&text) {
                        Ok(report) => report,
                        Err(err) => {
                            warn!(job_id = %job_id, error = %err, "channel: invalid push frame");
                            continue;
                        }
                    };
                    if report.job_id != job_id {
                        continue;
                    }
                    let event = report.into_event(generation);
                    let terminal = event.stage.is_terminal();
                    if sink.send(event).is_err() {
                        let _ = writer.close().await;
                        return;
                    }
                    if terminal {
                        info!(job_id = %job_id, generation = generation.0, "channel: terminal status; closing push socket");
                        let _ = writer.close().await;
                        return;
                    }
                }
                debug!(job_id = %job_id, "channel: push socket dropped; reconnecting");
            }
            Err(err) => {
                failed_connects += 1;
                warn!(
                    job_id = %job_id,
                    failed_connects,
                    error = %err,
                    "channel: push connect failed"
                );
                if failed_connects > max_reconnects {
                    let _ = sink.send(StatusEvent::transport_failure(
                        job_id.clone(),
                        generation,
                        format!("push channel unreachable after {failed_connects} attempts: {err}"),
                    ));
                    return;
                }
            }
        }
        if sink.is_closed() {
            return;
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}
