//! Client for the AutoComputer Flow API.
//!
//! The crate lists and stores workflow definitions and provisions remote or
//! local computers. Its core is running a workflow on one of those computers
//! while consuming a live, typed event stream.
//!
//! Remote runs stream line-delimited JSON from `POST /runs`. Local runs use a
//! WebSocket; the executor sends tool requests over it, and the client
//! answers them from a tool endpoint on the local computer. In both cases a
//! run is a lazy [`RunStream`] that reconnects on transient failures and ends
//! with exactly one terminal event.
//!
//! # Remote run
//!
//! ```no_run
//! use autocomputer_sdk::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SdkError> {
//! let client = AutoComputerClient::from_env()?;
//! let workflow = client.workflows().get("wf-123").await?;
//! let computer = client
//!     .computers()
//!     .start(&StartComputer::new(ComputerConfig::default()))
//!     .await?;
//!
//! let mut stream = client
//!     .runs()
//!     .remote(computer, workflow, UserInputs::new())
//!     .retry_policy(RetryPolicy::exponential(5, 500, 2.0))
//!     .start()
//!     .await?;
//! while let Some(event) = stream.next_event().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

/// Plain request/response API: workflows, computers, run entry points.
pub mod client;
/// Computer configuration and remote computer models.
pub mod computer;
/// Client configuration.
pub mod config;
/// Public error types.
pub mod errors;
/// Typed run events.
pub mod event;
/// Local VMs and local runs.
pub mod local;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
mod relay;
/// Retry budget and backoff for run sessions.
pub mod retry;
/// Run builder, event stream, and cancellation handle.
pub mod run;
mod session;
/// Local tool endpoint contract and its HTTP implementation.
pub mod tools;
/// Run channel transports.
pub mod transport;
/// Wire frames and the frame decoder.
pub mod wire;
/// Workflow definitions.
pub mod workflow;

pub use client::{
    AutoComputerClient, AutoComputerClientBuilder, ComputersNamespace, RunNamespace,
    WorkflowsNamespace,
};
pub use computer::{
    ComputerConfig, ComputerDetails, ComputerStatus, DeletedComputer, DownloadedFile,
    ListedComputer, OsName, RunningComputer, ScreenConfig, StartComputer, UploadedFile,
};
pub use config::ClientConfig;
pub use errors::{SdkError, ToolDispatchError, TransportError};
pub use event::{ContentBlock, ErrorKind, RunEvent};
pub use local::{
    ComputerProvisioner, LocalNamespace, LocalTarget, ProvisionedVm, StartVm, VmInstance,
    VmRequest, VmState, VmStatus,
};
pub use observability::init_observability;
pub use retry::{Backoff, Disposition, RetryPolicy};
pub use run::{AbortHandle, RunBuilder, RunStream};
pub use tools::{HttpToolEndpoint, ToolEndpoint};
pub use transport::{Channel, Connector};
pub use wire::{ToolRequest, ToolResponse};
pub use workflow::{UserInputs, Workflow, WorkflowSummary};
