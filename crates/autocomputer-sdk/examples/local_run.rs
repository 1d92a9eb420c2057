use std::sync::Arc;

use autocomputer_sdk::prelude::*;
use autocomputer_sdk::{ProvisionedVm, VmRequest};

/// Provisioner for a VM that is already running with its tool server on
/// `localhost:3333`.
struct AlreadyRunning;

#[async_trait::async_trait]
impl ComputerProvisioner for AlreadyRunning {
    async fn start_vm(&self, request: &VmRequest) -> Result<ProvisionedVm, SdkError> {
        Ok(ProvisionedVm {
            computer_id: format!("local-{}", request.name),
            tool_server_url: format!("http://localhost:{}", request.tool_server_port),
        })
    }

    async fn stop_vm(&self, _name: &str) -> Result<(), SdkError> {
        Ok(())
    }

    async fn is_running(&self, _name: &str) -> Result<bool, SdkError> {
        Ok(true)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SdkError> {
    autocomputer_sdk::init_observability();
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| SdkError::Validation("usage: local_run <workflow.json>".into()))?;
    let workflow = Workflow::from_json_file(path)?;

    let client = AutoComputerClient::from_env()?;
    let local = client.local(Arc::new(AlreadyRunning));
    let vm = local.start_vm(StartVm::new("ubuntu-dev")).await?;

    let mut run = local
        .run(LocalTarget::from(&vm), workflow, UserInputs::new())?
        .retry_policy(RetryPolicy::linear(3, 2000))
        .start()
        .await?;
    while let Some(event) = run.next_event().await {
        println!("{event:?}");
    }
    let outcome = run.finish().await;

    local.stop_vm(&vm.name).await?;
    outcome
}
