/*!
 * Socket client for the decoding engine.
 *
 * One client owns at most one live connection. Requests are strictly
 * one-in-one-out: the batch is sent as newline-joined text and exactly one
 * response is read back. A client is not meant to be shared between
 * concurrent jobs; every translation slot creates its own.
 */

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::endpoint::DecoderEndpoint;
use crate::errors::DecoderError;

/// Attempts per request before giving up
pub const REQUEST_ATTEMPTS: u32 = 3;

/// An open connection to the engine
#[async_trait]
pub trait DecoderConnection: Send {
    /// Send one request
    async fn send(&mut self, text: &str) -> Result<(), DecoderError>;

    /// Read exactly one response
    async fn recv(&mut self) -> Result<String, DecoderError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), DecoderError> {
        Ok(())
    }
}

/// Opens connections to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &DecoderEndpoint) -> Result<Box<dyn DecoderConnection>, DecoderError>;
}

/// Bounded reconnect behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            delay: Duration::from_secs(1),
        }
    }
}

/// Client for one engine endpoint
pub struct DecoderClient {
    endpoint: DecoderEndpoint,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    connection: Option<Box<dyn DecoderConnection>>,
}

impl DecoderClient {
    pub fn new(endpoint: DecoderEndpoint, connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            endpoint,
            connector,
            policy,
            connection: None,
        }
    }

    /// Client using WebSocket connections
    pub fn websocket(endpoint: DecoderEndpoint, policy: ReconnectPolicy) -> Self {
        Self::new(endpoint, Arc::new(WsConnector), policy)
    }

    pub fn endpoint(&self) -> &DecoderEndpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Open a connection, replacing any existing one
    pub async fn connect(&mut self) -> Result<(), DecoderError> {
        self.disconnect().await;
        let connection = self.connector.connect(&self.endpoint).await?;
        self.connection = Some(connection);
        debug!("Connected to decoder at {}", self.endpoint);
        Ok(())
    }

    /// Retry `connect` up to the policy's attempt budget with a fixed delay
    pub async fn reconnect(&mut self) -> Result<(), DecoderError> {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_attempts => {
                    info!(
                        "Could not connect to translation server at {}: {}. {} tries left",
                        self.endpoint,
                        e,
                        max_attempts - attempt
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(e) => {
                    error!(
                        "Fatal error: could not connect to {} after {} attempts: {}",
                        self.endpoint, max_attempts, e
                    );
                }
            }
        }

        Err(DecoderError::ReconnectExhausted {
            url: self.endpoint.url(),
            attempts: max_attempts,
        })
    }

    /// Translate a batch; returns the trimmed engine response
    pub async fn translate(&mut self, batch: &[String]) -> Result<String, DecoderError> {
        let request = batch.join("\n");
        let mut attempts_left = REQUEST_ATTEMPTS;

        loop {
            match self.round_trip(&request).await {
                Ok(response) => return Ok(response.trim().to_string()),
                Err(e) => {
                    attempts_left -= 1;
                    self.connection = None;
                    if attempts_left == 0 {
                        error!("Cannot communicate with server. Giving up.");
                        return Err(e);
                    }
                    warn!("Decoder request failed ({}), reconnecting", e);
                    self.reconnect().await?;
                }
            }
        }
    }

    async fn round_trip(&mut self, request: &str) -> Result<String, DecoderError> {
        let connection = self.connection.as_mut().ok_or(DecoderError::NotConnected)?;
        connection.send(request).await?;
        connection.recv().await
    }

    /// Close the current connection, if any
    pub async fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                debug!("Error while closing decoder connection: {}", e);
            }
        }
    }
}

/// WebSocket connector for `ws://` endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &DecoderEndpoint) -> Result<Box<dyn DecoderConnection>, DecoderError> {
        if endpoint.protocol != "ws" {
            return Err(DecoderError::UnsupportedProtocol(endpoint.protocol.clone()));
        }

        let (stream, _) = tokio_tungstenite::connect_async(endpoint.url())
            .await
            .map_err(|e| DecoderError::Connection(e.to_string()))?;

        Ok(Box::new(WsConnection { stream }))
    }
}

/// A WebSocket connection to the engine
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl DecoderConnection for WsConnection {
    async fn send(&mut self, text: &str) -> Result<(), DecoderError> {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| DecoderError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<String, DecoderError> {
        while let Some(message) = self.stream.next().await {
            match message.map_err(|e| DecoderError::Transport(e.to_string()))? {
                Message::Text(text) => return Ok(text),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes)
                        .map_err(|_| DecoderError::Protocol("binary response is not UTF-8".to_string()));
                }
                Message::Close(frame) => {
                    return Err(DecoderError::Transport(format!("connection closed by engine: {:?}", frame)));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
        Err(DecoderError::Transport("connection closed".to_string()))
    }

    async fn close(&mut self) -> Result<(), DecoderError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| DecoderError::Transport(e.to_string()))
    }
}
