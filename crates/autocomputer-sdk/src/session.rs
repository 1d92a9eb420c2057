//! Run session state machine.
//!
//! A session owns at most one channel at a time and walks
//! `Connecting -> Configuring -> AwaitingEvents`, falling back through
//! `Failed -> Retrying -> Connecting` on recoverable transport failures until
//! the retry budget runs out. The session is a lazy stream: nothing happens
//! until it is polled, and dropping it drops the open channel.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{debug, info, warn};

use crate::errors::TransportError;
use crate::event::{ErrorKind, RunEvent};
use crate::relay::ToolRelay;
use crate::retry::{Disposition, RetryPolicy};
use crate::transport::{Channel, Connector};
use crate::wire::{Frame, decode_frame};

const MAX_ECHOED_ACK_CHARS: usize = 256;

/// Frames sent to a local executor right after each connect.
pub(crate) struct Handshake {
    pub configure: String,
    pub start_workflow: String,
}

/// Everything one session needs, fixed before the first poll.
pub(crate) struct SessionPlan {
    pub run_id: uuid::Uuid,
    pub connector: Arc<dyn Connector>,
    pub retry: RetryPolicy,
    pub handshake: Option<Handshake>,
    pub relay: Option<ToolRelay>,
}

enum State {
    Connecting,
    Configuring(Box<dyn Channel>),
    AwaitingEvents(Box<dyn Channel>),
    Failed(TransportError),
    Retrying(Duration),
    Terminal,
}

/// Drives one run and yields its events in arrival order.
///
/// The stream ends right after the terminal event. Every session that is
/// polled to the end yields exactly one terminal event.
pub(crate) fn run_session(plan: SessionPlan) -> impl Stream<Item = RunEvent> + Send + 'static {
    async_stream::stream! {
        let SessionPlan {
            run_id,
            connector,
            retry,
            handshake,
            relay,
        } = plan;

        let mut state = State::Connecting;
        let mut attempts: u32 = 0;
        let mut retries_done: u32 = 0;
        let mut established = false;
        let mut started_emitted = false;

        loop {
            state = match state {
                State::Connecting => {
                    attempts += 1;
                    debug!(
                        event = "session.connect",
                        domain = "session",
                        run_id = %run_id,
                        attempt = attempts
                    );
                    match connector.connect().await {
                        Ok(channel) => {
                            if established {
                                info!(
                                    event = "session.reconnected",
                                    domain = "session",
                                    run_id = %run_id,
                                    attempt = retries_done
                                );
                                yield RunEvent::Reconnected { attempt: retries_done };
                            }
                            established = true;
                            if handshake.is_some() {
                                State::Configuring(channel)
                            } else {
                                State::AwaitingEvents(channel)
                            }
                        }
                        Err(err) => State::Failed(err),
                    }
                }
                State::Configuring(mut channel) => {
                    let result = match &handshake {
                        Some(handshake) => configure(&mut *channel, handshake).await,
                        None => Ok(()),
                    };
                    match result {
                        Ok(()) => {
                            debug!(event = "session.configured", domain = "session", run_id = %run_id);
                            if !started_emitted {
                                started_emitted = true;
                                yield RunEvent::Started;
                            }
                            State::AwaitingEvents(channel)
                        }
                        Err(err) => State::Failed(err),
                    }
                }
                State::AwaitingEvents(mut channel) => match channel.next_frame().await {
                    None => State::Failed(TransportError::interrupted(
                        "channel closed before the run finished",
                    )),
                    Some(Err(err)) => State::Failed(err),
                    Some(Ok(raw)) => match decode_frame(&raw) {
                        None => State::AwaitingEvents(channel),
                        Some(Frame::Event(RunEvent::Started)) => {
                            if started_emitted {
                                debug!(
                                    event = "session.duplicate_started",
                                    domain = "session",
                                    run_id = %run_id
                                );
                            } else {
                                started_emitted = true;
                                yield RunEvent::Started;
                            }
                            State::AwaitingEvents(channel)
                        }
                        Some(Frame::Event(event)) => {
                            if event.is_terminal() {
                                info!(
                                    event = "session.terminal",
                                    domain = "session",
                                    run_id = %run_id,
                                    completed = matches!(event, RunEvent::Completed)
                                );
                                channel.close().await;
                                drop(channel);
                                yield event;
                                State::Terminal
                            } else {
                                yield event;
                                State::AwaitingEvents(channel)
                            }
                        }
                        Some(Frame::ToolRequest(request)) => match &relay {
                            Some(relay) => match relay.handle(&mut *channel, request).await {
                                Ok(()) => State::AwaitingEvents(channel),
                                Err(err) => State::Failed(err),
                            },
                            None => {
                                warn!(
                                    event = "session.tool_request_ignored",
                                    domain = "session",
                                    run_id = %run_id,
                                    tool = %request.tool_name
                                );
                                State::AwaitingEvents(channel)
                            }
                        },
                        Some(Frame::MalformedToolRequest(reason)) => match &relay {
                            Some(relay) => match relay.reject_malformed(&mut *channel, reason).await {
                                Ok(()) => State::AwaitingEvents(channel),
                                Err(err) => State::Failed(err),
                            },
                            None => {
                                warn!(
                                    event = "session.tool_request_ignored",
                                    domain = "session",
                                    run_id = %run_id,
                                    reason = %reason
                                );
                                State::AwaitingEvents(channel)
                            }
                        },
                        Some(Frame::ConfigureAck) => {
                            debug!(event = "session.stray_ack", domain = "session", run_id = %run_id);
                            State::AwaitingEvents(channel)
                        }
                    },
                },
                State::Failed(err) => match retry.classify(&err) {
                    Disposition::Fatal => {
                        let kind = match &err {
                            TransportError::Rejected { status, .. } => {
                                ErrorKind::Rejected { status: *status }
                            }
                            _ => ErrorKind::Protocol,
                        };
                        warn!(
                            event = "session.fatal",
                            domain = "session",
                            run_id = %run_id,
                            error = %err
                        );
                        yield RunEvent::error(kind, err.message());
                        State::Terminal
                    }
                    Disposition::Recoverable if retry.can_retry(retries_done) => {
                        retries_done += 1;
                        let delay = retry.backoff_duration(retries_done);
                        warn!(
                            event = "session.retry_scheduled",
                            domain = "session",
                            run_id = %run_id,
                            attempt = retries_done,
                            max_retries = retry.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %err
                        );
                        yield RunEvent::error(
                            ErrorKind::Retrying {
                                attempt: retries_done,
                                max_retries: retry.max_retries,
                                delay_ms: delay.as_millis() as u64,
                            },
                            err.to_string(),
                        );
                        State::Retrying(delay)
                    }
                    Disposition::Recoverable => {
                        warn!(
                            event = "session.retries_exhausted",
                            domain = "session",
                            run_id = %run_id,
                            attempts = attempts,
                            error = %err
                        );
                        yield RunEvent::error(
                            ErrorKind::RetriesExhausted { attempts },
                            format!("giving up after {attempts} connection attempts: {err}"),
                        );
                        State::Terminal
                    }
                },
                State::Retrying(delay) => {
                    tokio::time::sleep(delay).await;
                    State::Connecting
                }
                State::Terminal => break,
            };
        }
    }
}

/// Sends `configure`, waits for `configure_ack`, then sends `start_workflow`.
async fn configure(channel: &mut dyn Channel, handshake: &Handshake) -> Result<(), TransportError> {
    channel.send_frame(handshake.configure.clone()).await?;
    let raw = match channel.next_frame().await {
        Some(Ok(raw)) => raw,
        Some(Err(err)) => return Err(err),
        None => {
            return Err(TransportError::protocol(
                "channel closed before configure_ack",
            ));
        }
    };
    if !matches!(decode_frame(&raw), Some(Frame::ConfigureAck)) {
        let echoed: String = raw.chars().take(MAX_ECHOED_ACK_CHARS).collect();
        return Err(TransportError::protocol(format!(
            "expected configure_ack, got: {echoed}"
        )));
    }
    channel.send_frame(handshake.start_workflow.clone()).await
}
