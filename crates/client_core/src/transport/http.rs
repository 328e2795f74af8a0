use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use shared::domain::SubscriptionId;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use super::{
    ddp::DdpStream, Method, PushEvent, RawResponse, RestRequest, StreamRequest, Transport,
    PUSH_CHANNEL_CAPACITY,
};
use crate::{auth::TokenProvider, config::ClientSettings};

pub struct HttpTransport {
    http: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .user_agent(settings.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: settings.api_base(),
        })
    }

    pub async fn send(&self, request: RestRequest) -> Result<RawResponse> {
        let url = format!(
            "{}/{}",
            self.base_url,
            request.path.trim_start_matches('/')
        );
        let mut builder = match request.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read response body from {url}"))?;
        debug!(
            method = ?request.method,
            path = %request.path,
            status,
            body_len = body.len(),
            "rest: response received"
        );
        Ok(RawResponse { status, body })
    }
}

/// REST over reqwest plus a lazily connected DDP stream for push events.
pub struct ServerTransport {
    http: HttpTransport,
    settings: ClientSettings,
    tokens: Arc<dyn TokenProvider>,
    stream: Mutex<Option<Arc<DdpStream>>>,
    pushes: broadcast::Sender<PushEvent>,
}

impl ServerTransport {
    pub fn new(settings: ClientSettings, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let http = HttpTransport::new(&settings)?;
        let (pushes, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        Ok(Self {
            http,
            settings,
            tokens,
            stream: Mutex::new(None),
            pushes,
        })
    }

    async fn connected_stream(&self) -> Result<Arc<DdpStream>> {
        let mut guard = self.stream.lock().await;
        if let Some(stream) = guard.as_ref() {
            if stream.is_connected() {
                return Ok(Arc::clone(stream));
            }
            info!("ddp: previous stream connection is gone; reconnecting");
        }

        let url = self.settings.websocket_url()?;
        let stream = Arc::new(
            DdpStream::connect(
                &url,
                self.tokens.token(),
                self.pushes.clone(),
                Duration::from_secs(self.settings.request_timeout_secs.max(1)),
            )
            .await?,
        );
        *guard = Some(Arc::clone(&stream));
        Ok(stream)
    }
}

#[async_trait]
impl Transport for ServerTransport {
    async fn request(&self, request: RestRequest) -> Result<RawResponse> {
        self.http.send(request).await
    }

    async fn open_subscription(&self, request: &StreamRequest) -> Result<SubscriptionId> {
        let stream = self.connected_stream().await?;
        stream.subscribe(request).await
    }

    async fn close_subscription(&self, subscription_id: &SubscriptionId) -> Result<()> {
        let stream = { self.stream.lock().await.clone() };
        match stream {
            Some(stream) => stream.unsubscribe(subscription_id).await,
            None => Ok(()),
        }
    }

    async fn call_method(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let stream = self.connected_stream().await?;
        stream.call(method, params).await
    }

    fn push_events(&self) -> broadcast::Receiver<PushEvent> {
        self.pushes.subscribe()
    }
}
