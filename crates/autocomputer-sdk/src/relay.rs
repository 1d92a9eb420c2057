use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::{ToolDispatchError, TransportError};
use crate::tools::ToolEndpoint;
use crate::transport::Channel;
use crate::wire::{ClientFrame, ToolRequest, ToolResponse};

/// Answers executor tool requests on the channel they arrived on.
///
/// The relay runs inline between two reads, so at most one request is ever
/// outstanding and responses correlate with requests by channel order.
/// Dispatch failures are answered with an error response; only a failure to
/// write the response escapes, as a transport error.
#[derive(Clone)]
pub(crate) struct ToolRelay {
    endpoint: Arc<dyn ToolEndpoint>,
}

impl ToolRelay {
    pub(crate) fn new(endpoint: Arc<dyn ToolEndpoint>) -> Self {
        Self { endpoint }
    }

    /// Executes `request` against the local endpoint and writes the response.
    pub(crate) async fn handle(
        &self,
        channel: &mut dyn Channel,
        request: ToolRequest,
    ) -> Result<(), TransportError> {
        let response = self.dispatch(request).await;
        write_response(channel, response).await
    }

    /// Answers a tool request whose content could not be read.
    pub(crate) async fn reject_malformed(
        &self,
        channel: &mut dyn Channel,
        reason: String,
    ) -> Result<(), TransportError> {
        let err = ToolDispatchError::Malformed(reason);
        warn!(event = "relay.malformed_request", domain = "relay", error = %err);
        write_response(channel, ToolResponse::Error(err.to_string())).await
    }

    async fn dispatch(&self, request: ToolRequest) -> ToolResponse {
        let ToolRequest { tool_name, payload } = request;
        info!(event = "relay.dispatch", domain = "relay", tool = %tool_name);
        match self.endpoint.execute(&tool_name, payload).await {
            Ok(result) => {
                debug!(event = "relay.dispatch_ok", domain = "relay", tool = %tool_name);
                ToolResponse::Result(result)
            }
            Err(err) => {
                warn!(
                    event = "relay.dispatch_failed",
                    domain = "relay",
                    tool = %tool_name,
                    error = %err
                );
                ToolResponse::Error(err.to_string())
            }
        }
    }
}

async fn write_response(
    channel: &mut dyn Channel,
    response: ToolResponse,
) -> Result<(), TransportError> {
    let frame = ClientFrame::ToolResponse {
        content: response.into_content(),
    }
    .encode()
    .map_err(|e| TransportError::protocol(format!("failed to encode tool response: {e}")))?;
    channel.send_frame(frame).await
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Tool endpoint answering from a fixed table and recording calls.
    #[derive(Default)]
    pub(crate) struct FakeToolEndpoint {
        pub results: HashMap<String, Result<serde_json::Value, ToolDispatchError>>,
        pub calls: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl FakeToolEndpoint {
        pub(crate) fn with(
            mut self,
            tool: &str,
            result: Result<serde_json::Value, ToolDispatchError>,
        ) -> Self {
            self.results.insert(tool.to_string(), result);
            self
        }

        pub(crate) fn calls(&self) -> Vec<(String, serde_json::Value)> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl ToolEndpoint for FakeToolEndpoint {
        async fn execute(
            &self,
            tool_name: &str,
            payload: serde_json::Value,
        ) -> Result<serde_json::Value, ToolDispatchError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((tool_name.to_string(), payload));
            self.results
                .get(tool_name)
                .cloned()
                .unwrap_or_else(|| Err(ToolDispatchError::Unreachable("no such tool".into())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeToolEndpoint;
    use super::*;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Vec<String>,
        fail_writes: bool,
    }

    #[async_trait::async_trait]
    impl Channel for RecordingChannel {
        async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
            None
        }

        async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
            if self.fail_writes {
                return Err(TransportError::interrupted("socket closed"));
            }
            self.sent.push(frame);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn sent_json(channel: &RecordingChannel) -> Vec<serde_json::Value> {
        channel
            .sent
            .iter()
            .map(|s| serde_json::from_str(s).expect("json"))
            .collect()
    }

    #[tokio::test]
    async fn forwards_result_as_tool_response() {
        let endpoint = Arc::new(
            FakeToolEndpoint::default().with("click", Ok(serde_json::json!({"output": "ok"}))),
        );
        let relay = ToolRelay::new(endpoint.clone());
        let mut channel = RecordingChannel::default();

        relay
            .handle(
                &mut channel,
                ToolRequest {
                    tool_name: "click".into(),
                    payload: serde_json::json!({"x": 10, "y": 20}),
                },
            )
            .await
            .expect("relay");

        assert_eq!(
            endpoint.calls(),
            vec![("click".to_string(), serde_json::json!({"x": 10, "y": 20}))]
        );
        assert_eq!(
            sent_json(&channel),
            vec![serde_json::json!({
                "type": "tool_response",
                "content": {"output": "ok"},
                "version": "1.0"
            })]
        );
    }

    #[tokio::test]
    async fn dispatch_failure_becomes_error_response() {
        let endpoint = Arc::new(FakeToolEndpoint::default().with(
            "screenshot",
            Err(ToolDispatchError::Status {
                status: 502,
                body: "display gone".into(),
            }),
        ));
        let relay = ToolRelay::new(endpoint);
        let mut channel = RecordingChannel::default();

        relay
            .handle(
                &mut channel,
                ToolRequest {
                    tool_name: "screenshot".into(),
                    payload: serde_json::json!({}),
                },
            )
            .await
            .expect("dispatch errors stay inside the relay");

        assert_eq!(
            sent_json(&channel)[0]["content"],
            serde_json::json!({"error": "tool server error: 502 - display gone"})
        );
    }

    #[tokio::test]
    async fn malformed_request_is_still_answered() {
        let relay = ToolRelay::new(Arc::new(FakeToolEndpoint::default()));
        let mut channel = RecordingChannel::default();
        relay
            .reject_malformed(&mut channel, "missing field `tool_name`".into())
            .await
            .expect("answered");
        let sent = sent_json(&channel);
        assert_eq!(sent[0]["type"], "tool_response");
        assert!(
            sent[0]["content"]["error"]
                .as_str()
                .expect("error text")
                .contains("missing field `tool_name`")
        );
    }

    #[tokio::test]
    async fn write_failure_is_a_transport_error() {
        let relay = ToolRelay::new(Arc::new(
            FakeToolEndpoint::default().with("click", Ok(serde_json::json!({}))),
        ));
        let mut channel = RecordingChannel {
            fail_writes: true,
            ..Default::default()
        };
        let err = relay
            .handle(
                &mut channel,
                ToolRequest {
                    tool_name: "click".into(),
                    payload: serde_json::json!({}),
                },
            )
            .await
            .expect_err("write fails");
        assert!(matches!(err, TransportError::Interrupted { .. }));
    }
}
