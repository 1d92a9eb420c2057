//! Common imports for typical SDK usage.
pub use crate::{
    AbortHandle, AutoComputerClient, ClientConfig, ComputerConfig, ComputerProvisioner,
    ContentBlock, ErrorKind, LocalTarget, OsName, RetryPolicy, RunBuilder, RunEvent, RunStream,
    RunningComputer, ScreenConfig, SdkError, StartComputer, StartVm, UserInputs, Workflow,
};
