use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use tracing::debug;

use super::lines::LineDecoder;
use super::{Channel, Connector};
use crate::errors::TransportError;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

const SESSION_ID_HEADER: &str = "X-Session-ID";

/// Opens remote runs: one `POST /runs` per attempt, reading the chunked
/// response body as line-delimited JSON.
pub struct HttpRunConnector {
    client: reqwest::Client,
    url: String,
    api_key: String,
    body: serde_json::Value,
    connect_timeout: Duration,
}

impl HttpRunConnector {
    /// Creates a connector for `url` with a prebuilt run request body.
    ///
    /// `connect_timeout` bounds everything up to the response headers.
    /// Reading the body never times out; runs may take arbitrarily long.
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        body: serde_json::Value,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::connect(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            body,
            connect_timeout,
        })
    }
}

#[async_trait::async_trait]
impl Connector for HttpRunConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>, TransportError> {
        debug!(
            event = "transport.http_connect",
            domain = "transport",
            url = %self.url
        );
        let request = self
            .client
            .post(&self.url)
            .header("X-API-Key", &self.api_key)
            .json(&self.body)
            .send();
        let response = tokio::time::timeout(self.connect_timeout, request)
            .await
            .map_err(|_| {
                TransportError::connect(format!(
                    "run request got no response within {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| TransportError::connect(format!("run request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::rejected(
                status.as_u16(),
                format!("run request failed with status {status}: {body}"),
            ));
        }

        let session_id = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        debug!(
            event = "transport.http_streaming",
            domain = "transport",
            session_id = session_id,
            status = status.as_u16()
        );

        Ok(Box::new(HttpLineChannel {
            bytes: Box::pin(response.bytes_stream()),
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        }))
    }
}

/// Receive-only channel over a streaming response body.
struct HttpLineChannel {
    bytes: ByteStream,
    decoder: LineDecoder,
    pending: VecDeque<String>,
    done: bool,
}

#[async_trait::async_trait]
impl Channel for HttpLineChannel {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(line));
            }
            if self.done {
                return None;
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.push_chunk(&chunk)),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(TransportError::interrupted(format!(
                        "run stream read failed: {e}"
                    ))));
                }
                None => {
                    self.done = true;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }

    async fn send_frame(&mut self, _frame: String) -> Result<(), TransportError> {
        Err(TransportError::protocol(
            "remote run channel is receive-only",
        ))
    }

    async fn close(&mut self) {
        self.done = true;
        self.pending.clear();
        self.bytes = Box::pin(futures::stream::empty());
    }
}
