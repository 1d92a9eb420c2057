use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::{Channel, Connector};
use crate::errors::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens local runs over a bidirectional WebSocket channel.
pub struct WsRunConnector {
    url: String,
    api_key: HeaderValue,
    connect_timeout: Duration,
}

impl WsRunConnector {
    /// Creates a connector for a `ws://` or `wss://` URL.
    pub fn new(
        url: impl Into<String>,
        api_key: &str,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let url = url.into();
        url.as_str()
            .into_client_request()
            .map_err(|e| TransportError::protocol(format!("invalid websocket url {url}: {e}")))?;
        let api_key = HeaderValue::from_str(api_key)
            .map_err(|e| TransportError::protocol(format!("invalid api key header: {e}")))?;
        Ok(Self {
            url,
            api_key,
            connect_timeout,
        })
    }
}

#[async_trait::async_trait]
impl Connector for WsRunConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::protocol(format!("invalid websocket url: {e}")))?;
        request
            .headers_mut()
            .insert("X-API-Key", self.api_key.clone());

        debug!(
            event = "transport.ws_connect",
            domain = "transport",
            url = %self.url,
            connect_timeout_ms = self.connect_timeout.as_millis() as u64
        );
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                TransportError::connect(format!(
                    "websocket connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(map_connect_error)?;
        debug!(event = "transport.ws_connected", domain = "transport");
        Ok(Box::new(WsChannel { ws }))
    }
}

fn map_connect_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response) => TransportError::rejected(
            response.status().as_u16(),
            format!("websocket upgrade rejected with status {}", response.status()),
        ),
        other => TransportError::connect(format!("websocket connect failed: {other}")),
    }
}

struct WsChannel {
    ws: WsStream,
}

#[async_trait::async_trait]
impl Channel for WsChannel {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()));
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(TransportError::interrupted(format!(
                        "websocket read failed: {e}"
                    ))));
                }
            }
        }
    }

    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.ws
            .send(Message::text(frame))
            .await
            .map_err(|e| TransportError::interrupted(format!("websocket write failed: {e}")))
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
