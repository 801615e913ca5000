//! NATS request/reply transport for the API endpoints

use crate::api::{ApiService, Reply};
use crate::config::NatsConfig;
use anyhow::{Context, Result};
use async_nats::{Client, HeaderMap, Message};
use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "api-key";
/// Alternate spelling accepted for the API key header
pub const API_KEY_HEADER_ALT: &str = "api_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Predict,
    Manage,
}

/// Serves API requests arriving on NATS subjects
pub struct RequestServer {
    client: Client,
    api: Arc<ApiService>,
    predict_subject: String,
    manage_subjects: Vec<String>,
    workers: usize,
}

impl RequestServer {
    /// Create a new server for the configured subjects, handling at most `workers` requests at once
    pub fn new(client: Client, api: Arc<ApiService>, nats: &NatsConfig, workers: usize) -> Self {
        Self {
            client,
            api,
            predict_subject: nats.predict_subject.clone(),
            manage_subjects: nats.manage_subjects.clone(),
            workers: workers.max(1),
        }
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, (Endpoint, Message)>> {
        let mut streams = Vec::with_capacity(1 + self.manage_subjects.len());

        let predict = self
            .client
            .subscribe(self.predict_subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.predict_subject))?;
        info!(subject = %self.predict_subject, endpoint = "predict", "Subscribed");
        streams.push(predict.map(|m| (Endpoint::Predict, m)).boxed());

        for subject in &self.manage_subjects {
            let manage = self
                .client
                .subscribe(subject.clone())
                .await
                .with_context(|| format!("Failed to subscribe to {}", subject))?;
            info!(subject = %subject, endpoint = "manage", "Subscribed");
            streams.push(manage.map(|m| (Endpoint::Manage, m)).boxed());
        }

        Ok(stream::select_all(streams).boxed())
    }

    /// Handle requests until `shutdown` resolves, then wait for in-flight ones.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut requests = self.subscribe().await?;
        let semaphore = Arc::new(Semaphore::new(self.workers));
        tokio::pin!(shutdown);

        info!(workers = self.workers, "Request server started");

        loop {
            let (endpoint, message) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting requests");
                    break;
                }
                next = requests.next() => match next {
                    Some(request) => request,
                    None => {
                        warn!("Subscriptions closed");
                        break;
                    }
                },
            };

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("Request semaphore closed")?;

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.handle(endpoint, message).await;
                drop(permit);
            });
        }

        // All permits back means every spawned handler finished
        let _drained = semaphore
            .acquire_many(self.workers as u32)
            .await
            .context("Request semaphore closed")?;
        info!("In-flight requests drained");
        Ok(())
    }

    async fn handle(&self, endpoint: Endpoint, message: Message) {
        let Some(reply_to) = message.reply.clone() else {
            warn!(subject = %message.subject, "Request without reply subject dropped");
            return;
        };

        let api_key = api_key(message.headers.as_ref());
        let reply = match endpoint {
            Endpoint::Predict => {
                Reply::from_result(self.api.predict(api_key.as_deref(), &message.payload))
            }
            Endpoint::Manage => Reply::from_result(
                self.api
                    .manage_model(api_key.as_deref(), &message.payload)
                    .await,
            ),
        };

        if reply.status >= 500 {
            error!(subject = %message.subject, status = reply.status, body = %reply.body, "Request failed");
        } else if reply.status >= 400 {
            warn!(subject = %message.subject, status = reply.status, "Request rejected");
        } else {
            debug!(subject = %message.subject, status = reply.status, "Request served");
        }

        if let Err(e) = self.client.publish(reply_to, reply.to_bytes().into()).await {
            error!(subject = %message.subject, error = %e, "Failed to publish reply");
        }
    }
}

/// API key from request headers, if any.
pub fn api_key(headers: Option<&HeaderMap>) -> Option<String> {
    let headers = headers?;
    headers
        .get(API_KEY_HEADER)
        .or_else(|| headers.get(API_KEY_HEADER_ALT))
        .map(|value| value.as_str().to_string())
}

/// Decode a reply envelope received by a client.
pub fn decode_reply(payload: &[u8]) -> Result<Reply> {
    serde_json::from_slice(payload).context("Malformed reply envelope")
}
