use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt as _};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::computer::{ComputerConfig, RunningComputer};
use crate::config::ClientConfig;
use crate::errors::SdkError;
use crate::event::RunEvent;
use crate::relay::ToolRelay;
use crate::retry::RetryPolicy;
use crate::session::{Handshake, SessionPlan, run_session};
use crate::tools::ToolEndpoint;
use crate::transport::{Connector, HttpRunConnector, WsRunConnector};
use crate::wire::{ClientFrame, StartWorkflow};
use crate::workflow::{UserInputs, Workflow};

/// Handle used to cancel a running stream from anywhere.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The stream ends without a further event, its channel is dropped, and
    /// `RunStream::finish` reports `SdkError::Cancelled`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

pub(crate) enum RunTarget {
    Remote(RunningComputer),
    Local {
        config: ComputerConfig,
        endpoint: Arc<dyn ToolEndpoint>,
    },
}

#[derive(Serialize)]
struct RemoteRunRequest<'a> {
    remote_computer: &'a RunningComputer,
    workflow: &'a Workflow,
    user_inputs: &'a UserInputs,
}

/// Builder for one workflow run.
///
/// Obtained from `RunNamespace::remote` or `LocalNamespace::run`. Nothing is
/// sent until [`start`](Self::start).
pub struct RunBuilder {
    config: Arc<ClientConfig>,
    workflow: Workflow,
    user_inputs: UserInputs,
    target: RunTarget,
    retry_policy: RetryPolicy,
    connect_timeout: Duration,
    connector: Option<Arc<dyn Connector>>,
}

impl RunBuilder {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        target: RunTarget,
        workflow: Workflow,
        user_inputs: UserInputs,
    ) -> Self {
        let retry_policy = config.retry_policy.clone();
        let connect_timeout = config.connect_timeout;
        Self {
            config,
            workflow,
            user_inputs,
            target,
            retry_policy,
            connect_timeout,
            connector: None,
        }
    }

    /// Overrides the client's default retry policy for this run.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Overrides the connect timeout for this run.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replaces the default transport with a caller-supplied connector.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Validates the run and returns its event stream.
    ///
    /// Local runs check the tool endpoint first and fail here if it is not
    /// reachable. No connection to the executor is opened until the stream is
    /// polled.
    pub async fn start(self) -> Result<RunStream, SdkError> {
        if self.connect_timeout.is_zero() {
            return Err(SdkError::Validation(
                "connect_timeout must be greater than 0".into(),
            ));
        }
        let run_id = uuid::Uuid::new_v4();

        let plan = match &self.target {
            RunTarget::Remote(computer) => {
                let connector = match &self.connector {
                    Some(connector) => connector.clone(),
                    None => {
                        let body = serde_json::to_value(RemoteRunRequest {
                            remote_computer: computer,
                            workflow: &self.workflow,
                            user_inputs: &self.user_inputs,
                        })
                        .map_err(|e| {
                            SdkError::Validation(format!("failed to encode run request: {e}"))
                        })?;
                        let connector = HttpRunConnector::new(
                            self.config.runs_url(),
                            self.config.api_key.clone(),
                            body,
                            self.connect_timeout,
                        )
                        .map_err(|e| SdkError::Config(e.to_string()))?;
                        Arc::new(connector) as Arc<dyn Connector>
                    }
                };
                info!(
                    event = "run.start",
                    domain = "run",
                    run_id = %run_id,
                    target = "remote",
                    computer_id = %computer.computer_id,
                    workflow = %self.workflow.workflow_title
                );
                SessionPlan {
                    run_id,
                    connector,
                    retry: self.retry_policy.clone(),
                    handshake: None,
                    relay: None,
                }
            }
            RunTarget::Local { config, endpoint } => {
                endpoint.ready().await?;
                let connector = match &self.connector {
                    Some(connector) => connector.clone(),
                    None => {
                        let connector = WsRunConnector::new(
                            self.config.ws_workflow_url(),
                            &self.config.api_key,
                            self.connect_timeout,
                        )
                        .map_err(|e| SdkError::Config(e.to_string()))?;
                        Arc::new(connector) as Arc<dyn Connector>
                    }
                };
                let handshake = Handshake {
                    configure: encode(&ClientFrame::Configure { content: config })?,
                    start_workflow: encode(&ClientFrame::StartWorkflow {
                        content: StartWorkflow {
                            workflow: &self.workflow,
                            user_inputs: &self.user_inputs,
                            os_name: config.os_name,
                            screen: config.screen,
                        },
                    })?,
                };
                info!(
                    event = "run.start",
                    domain = "run",
                    run_id = %run_id,
                    target = "local",
                    os = config.os_name.as_str(),
                    workflow = %self.workflow.workflow_title
                );
                SessionPlan {
                    run_id,
                    connector,
                    retry: self.retry_policy.clone(),
                    handshake: Some(handshake),
                    relay: Some(ToolRelay::new(endpoint.clone())),
                }
            }
        };

        Ok(RunStream::new(run_id, Box::pin(run_session(plan))))
    }

    /// Runs to the end and returns every event, the terminal one included.
    ///
    /// A terminal error event is returned in the list, not as `Err`; use
    /// [`RunStream::finish`] to turn it into an error.
    pub async fn collect_events(self) -> Result<Vec<RunEvent>, SdkError> {
        let stream = self.start().await?;
        Ok(stream.collect().await)
    }
}

fn encode(frame: &ClientFrame<'_>) -> Result<String, SdkError> {
    frame
        .encode()
        .map_err(|e| SdkError::Validation(format!("failed to encode handshake frame: {e}")))
}

type EventStream = Pin<Box<dyn Stream<Item = RunEvent> + Send>>;

/// Live event stream of one run, returned by [`RunBuilder::start`].
///
/// Dropping the stream cancels the run and releases its connection.
pub struct RunStream {
    run_id: uuid::Uuid,
    events: Option<EventStream>,
    aborted: Pin<Box<dyn Future<Output = ()> + Send>>,
    abort_handle: AbortHandle,
    terminal: Option<RunEvent>,
}

impl RunStream {
    fn new(run_id: uuid::Uuid, events: EventStream) -> Self {
        let (tx, mut rx) = watch::channel(false);
        let aborted = Box::pin(async move {
            let closed = rx.wait_for(|aborted| *aborted).await.is_err();
            if closed {
                futures::future::pending::<()>().await;
            }
        });
        Self {
            run_id,
            events: Some(events),
            aborted,
            abort_handle: AbortHandle { tx },
            terminal: None,
        }
    }

    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    /// Returns a handle that can cancel the run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for the next event. Returns `None` after the terminal event or
    /// after cancellation.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.next().await
    }

    /// Drains the stream and reports how the run ended.
    ///
    /// Safe to call after consuming events with [`next_event`](Self::next_event).
    pub async fn finish(mut self) -> Result<(), SdkError> {
        while self.terminal.is_none() {
            if self.next_event().await.is_none() {
                break;
            }
        }
        match self.terminal.take() {
            Some(RunEvent::Completed) => Ok(()),
            Some(RunEvent::Error { message, kind }) => Err(SdkError::RunFailed { kind, message }),
            _ => Err(SdkError::Cancelled),
        }
    }
}

impl Stream for RunStream {
    type Item = RunEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunEvent>> {
        let this = self.get_mut();
        if this.events.is_none() {
            return Poll::Ready(None);
        }
        if this.aborted.as_mut().poll(cx).is_ready() {
            info!(event = "run.aborted", domain = "run", run_id = %this.run_id);
            this.events = None;
            return Poll::Ready(None);
        }
        let Some(events) = this.events.as_mut() else {
            return Poll::Ready(None);
        };
        match events.as_mut().poll_next(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.terminal = Some(event.clone());
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.events = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::computer::sample_computer;
    use crate::errors::TransportError;
    use crate::event::ErrorKind;
    use crate::relay::testing::FakeToolEndpoint;
    use crate::session::testing::{FakeConnector, Script, Step, frame};
    use crate::workflow::sample_workflow;

    fn inputs() -> UserInputs {
        UserInputs::from([("date".to_string(), json!("2026-01-01"))])
    }

    fn remote_builder(base_url: &str) -> RunBuilder {
        RunBuilder::new(
            Arc::new(ClientConfig::new(base_url, "test-key")),
            RunTarget::Remote(sample_computer("http://vm:3333")),
            sample_workflow(),
            inputs(),
        )
        .retry_policy(RetryPolicy::linear(2, 1))
    }

    fn scripted(scripts: Vec<Script>) -> (RunBuilder, Arc<crate::session::testing::Probe>) {
        let (connector, probe) = FakeConnector::new(scripts);
        (
            remote_builder("http://localhost:1").connector(connector),
            probe,
        )
    }

    #[tokio::test]
    async fn finish_is_ok_after_completed() {
        let (builder, _) = scripted(vec![Script::Open(vec![
            frame(json!({"type": "run_started"})),
            frame(json!({"type": "run_completed"})),
        ])]);
        let mut stream = builder.start().await.expect("start");
        assert_eq!(stream.next_event().await, Some(RunEvent::Started));
        stream.finish().await.expect("completed");
    }

    #[tokio::test]
    async fn finish_reports_terminal_error() {
        let (builder, _) = scripted(vec![Script::Open(vec![frame(
            json!({"type": "error", "error": "no such workflow"}),
        )])]);
        let err = builder
            .start()
            .await
            .expect("start")
            .finish()
            .await
            .expect_err("run failed");
        assert_eq!(
            err,
            SdkError::RunFailed {
                kind: ErrorKind::Remote,
                message: "no such workflow".into()
            }
        );
    }

    #[tokio::test]
    async fn abort_ends_stream_silently_and_releases_channel() {
        let (builder, probe) = scripted(vec![Script::Open(vec![
            frame(json!({"type": "run_started"})),
            Step::Hang,
        ])]);
        let mut stream = builder.start().await.expect("start");
        let abort = stream.abort_handle();
        assert_eq!(stream.next_event().await, Some(RunEvent::Started));

        abort.abort();
        assert_eq!(stream.next_event().await, None);
        assert_eq!(probe.releases(), 1);
        assert_eq!(stream.finish().await, Err(SdkError::Cancelled));
    }

    #[tokio::test]
    async fn abort_from_another_task_wakes_a_pending_read() {
        let (builder, probe) = scripted(vec![Script::Open(vec![Step::Hang])]);
        let mut stream = builder.start().await.expect("start");
        let abort = stream.abort_handle();
        let aborter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            abort.abort();
        });
        assert_eq!(stream.next_event().await, None);
        aborter.await.expect("aborter");
        assert_eq!(probe.releases(), 1);
    }

    #[tokio::test]
    async fn collect_events_includes_retries_and_terminal() {
        let (builder, probe) = scripted(vec![
            Script::Refuse(TransportError::connect("refused")),
            Script::Refuse(TransportError::connect("refused")),
            Script::Refuse(TransportError::connect("refused")),
        ]);
        let events = builder.collect_events().await.expect("collect");
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events.last(),
            Some(RunEvent::Error {
                kind: ErrorKind::RetriesExhausted { attempts: 3 },
                ..
            })
        ));
        assert_eq!(probe.attempts(), 3);
    }

    #[tokio::test]
    async fn zero_connect_timeout_is_rejected_at_start() {
        let err = match remote_builder("http://localhost:1")
            .connect_timeout(Duration::ZERO)
            .start()
            .await
        {
            Ok(_) => panic!("zero timeout should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, SdkError::Validation(msg) if msg.contains("connect_timeout")));
    }

    #[tokio::test]
    async fn remote_run_posts_request_and_streams_events() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/runs"))
            .and(header("X-API-Key", "test-key"))
            .and(body_partial_json(json!({
                "remote_computer": {"computer_id": "c-1", "tool_server_url": "http://vm:3333"},
                "workflow": {"workflow_title": "Enter appointment"},
                "user_inputs": {"date": "2026-01-01"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Session-ID", "sess-42")
                    .set_body_string(concat!(
                        "{\"type\":\"run_started\"}\n",
                        "{\"type\":\"sequence_started\",\"sequence_id\":\"seq-1\"}\n",
                        "{\"type\":\"assistant\",\"content\":{\"type\":\"text\",\"text\":\"Opening calendar\"}}\n",
                        "{\"type\":\"sequence_status\",\"sequence_id\":\"seq-1\",\"success\":true}\n",
                        "{\"type\":\"run_completed\"}\n",
                    )),
            )
            .expect(1)
            .mount(&server)
            .await;

        let events = remote_builder(&server.uri())
            .collect_events()
            .await
            .expect("collect");
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], RunEvent::Started);
        assert_eq!(
            events[2],
            RunEvent::AssistantContent {
                content: crate::event::ContentBlock::Text {
                    text: "Opening calendar".into()
                }
            }
        );
        assert_eq!(events[4], RunEvent::Completed);
    }

    #[tokio::test]
    async fn remote_rejection_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/runs"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let err = remote_builder(&server.uri())
            .start()
            .await
            .expect("start")
            .finish()
            .await
            .expect_err("rejected");
        assert!(matches!(
            err,
            SdkError::RunFailed {
                kind: ErrorKind::Rejected { status: 403 },
                ..
            }
        ));
    }

    struct DownEndpoint;

    #[async_trait::async_trait]
    impl ToolEndpoint for DownEndpoint {
        async fn ready(&self) -> Result<(), SdkError> {
            Err(SdkError::ToolEndpoint("tool server not accessible".into()))
        }

        async fn execute(
            &self,
            _tool_name: &str,
            _payload: serde_json::Value,
        ) -> Result<serde_json::Value, crate::errors::ToolDispatchError> {
            unreachable!("never dispatched")
        }
    }

    #[tokio::test]
    async fn local_run_requires_ready_tool_endpoint() {
        let (connector, probe) = FakeConnector::new(vec![]);
        let builder = RunBuilder::new(
            Arc::new(ClientConfig::new("http://localhost:1", "k")),
            RunTarget::Local {
                config: ComputerConfig::default(),
                endpoint: Arc::new(DownEndpoint),
            },
            sample_workflow(),
            inputs(),
        )
        .connector(connector);
        let err = match builder.start().await {
            Ok(_) => panic!("endpoint is down"),
            Err(err) => err,
        };
        assert!(matches!(err, SdkError::ToolEndpoint(_)));
        assert_eq!(probe.attempts(), 0);
    }

    #[tokio::test]
    async fn local_run_sends_configure_and_start_workflow() {
        let (connector, probe) = FakeConnector::new(vec![Script::Open(vec![
            frame(json!({"type": "configure_ack", "content": "configured"})),
            frame(json!({"type": "workflow_completed", "content": "done"})),
        ])]);
        let events = RunBuilder::new(
            Arc::new(ClientConfig::new("http://localhost:1", "k")),
            RunTarget::Local {
                config: ComputerConfig::new(
                    crate::computer::ScreenConfig::new(1280, 800),
                    crate::computer::OsName::Darwin,
                ),
                endpoint: Arc::new(FakeToolEndpoint::default()),
            },
            sample_workflow(),
            inputs(),
        )
        .connector(connector)
        .collect_events()
        .await
        .expect("collect");

        assert_eq!(events, vec![RunEvent::Started, RunEvent::Completed]);
        let sent = probe.sent();
        assert_eq!(sent[0]["type"], "configure");
        assert_eq!(sent[0]["version"], "1.0");
        assert_eq!(sent[0]["content"]["os_name"], "darwin");
        assert_eq!(sent[1]["type"], "start_workflow");
        assert_eq!(sent[1]["content"]["os_name"], "darwin");
        assert_eq!(sent[1]["content"]["screen"]["width"], 1280);
        assert_eq!(sent[1]["content"]["user_inputs"]["date"], "2026-01-01");
        assert_eq!(
            sent[1]["content"]["workflow"]["workflow_title"],
            "Enter appointment"
        );
    }
}
