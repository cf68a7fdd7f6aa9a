use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use shared::{
    domain::Marker,
    error::ApiError,
    protocol::{NewMarker, ServerEvent},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::warn;

/// Narrow interface to the remote marker store: select-all, insert-one, and
/// the insert change feed. Everything else the hosted store can do is out
/// of scope.
#[async_trait]
pub trait MarkerApi: Send + Sync {
    async fn list_markers(&self) -> Result<Vec<Marker>>;
    async fn insert_marker(&self, new: &NewMarker) -> Result<Marker>;
    async fn subscribe_inserts(&self) -> Result<InsertFeed>;
}

/// Single-consumer channel of insert events, plus the transport task that
/// fills it. Torn down exactly once, either via [`InsertFeed::close`] or on
/// drop.
pub struct InsertFeed {
    receiver: mpsc::Receiver<Marker>,
    transport: Option<JoinHandle<()>>,
}

impl InsertFeed {
    /// Feed without a transport task, for in-process sources and tests.
    pub fn new(receiver: mpsc::Receiver<Marker>) -> Self {
        Self {
            receiver,
            transport: None,
        }
    }

    pub fn with_transport(receiver: mpsc::Receiver<Marker>, transport: JoinHandle<()>) -> Self {
        Self {
            receiver,
            transport: Some(transport),
        }
    }

    pub async fn recv(&mut self) -> Option<Marker> {
        self.receiver.recv().await
    }

    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.abort();
        }
        self.receiver.close();
    }
}

impl Drop for InsertFeed {
    fn drop(&mut self) {
        self.close();
    }
}

/// Production [`MarkerApi`] over the pinboard server: JSON HTTP for reads
/// and writes, a WebSocket for the change feed.
pub struct HttpMarkerApi {
    http: Client,
    server_url: String,
}

impl HttpMarkerApi {
    pub fn new(server_url: impl Into<String>) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            server_url,
        }
    }

    fn ws_url(&self) -> Result<String> {
        let ws_url = if self.server_url.starts_with("https://") {
            self.server_url.replacen("https://", "wss://", 1)
        } else if self.server_url.starts_with("http://") {
            self.server_url.replacen("http://", "ws://", 1)
        } else {
            return Err(anyhow!("server_url must start with http:// or https://"));
        };
        Ok(format!("{ws_url}/ws"))
    }
}

#[async_trait]
impl MarkerApi for HttpMarkerApi {
    async fn list_markers(&self) -> Result<Vec<Marker>> {
        let markers = self
            .http
            .get(format!("{}/markers", self.server_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(markers)
    }

    async fn insert_marker(&self, new: &NewMarker) -> Result<Marker> {
        let response = self
            .http
            .post(format!("{}/markers", self.server_url))
            .json(new)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|err| err.message)
                .unwrap_or(body);
            return Err(anyhow!("marker insert rejected ({status}): {message}"));
        }

        match response.json::<ServerEvent>().await? {
            ServerEvent::MarkerInserted { marker } => Ok(marker),
        }
    }

    async fn subscribe_inserts(&self) -> Result<InsertFeed> {
        let ws_url = self.ws_url()?;
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (_, mut ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(64);
        let transport = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(ServerEvent::MarkerInserted { marker }) => {
                            if tx.send(marker).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(%err, "ignoring malformed feed frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "marker feed receive failed");
                        break;
                    }
                }
            }
        });

        Ok(InsertFeed::with_transport(rx, transport))
    }
}
