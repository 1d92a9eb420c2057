//! Transport adapters for run channels.
//!
//! Both adapters produce the same thing: a [`Channel`] of raw text frames
//! that the run session decodes. Remote runs read line-delimited JSON from a
//! chunked HTTP response; local runs exchange JSON text messages over a
//! WebSocket.

pub mod http;
pub(crate) mod lines;
pub mod ws;

use crate::errors::TransportError;

pub use http::HttpRunConnector;
pub use ws::WsRunConnector;

/// Opens one run channel per call. A session calls `connect` again for each
/// retry.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Channel>, TransportError>;
}

/// An open run channel.
///
/// Dropping a channel releases its connection.
#[async_trait::async_trait]
pub trait Channel: Send {
    /// Waits for the next text frame.
    ///
    /// Returns `None` once the remote side has closed the channel.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;

    /// Writes one text frame.
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError>;

    /// Closes the channel gracefully where the transport supports it.
    async fn close(&mut self);
}
