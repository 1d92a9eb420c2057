use autocomputer_sdk::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SdkError> {
    autocomputer_sdk::init_observability();
    let client = AutoComputerClient::from_env()?;

    let workflows = client.workflows().list().await?;
    let Some(summary) = workflows.first() else {
        eprintln!("no workflows registered");
        return Ok(());
    };
    let workflow = client.workflows().get(&summary.workflow_id).await?;

    let computer = client
        .computers()
        .start(&StartComputer::new(ComputerConfig::default()))
        .await?;
    println!("computer {} (vnc: {})", computer.computer_id, computer.vnc_url);
    let computer_id = computer.computer_id.clone();

    let mut run = client
        .runs()
        .remote(computer, workflow, UserInputs::new())
        .start()
        .await?;

    while let Some(event) = run.next_event().await {
        match event {
            RunEvent::AssistantContent {
                content: ContentBlock::Text { text },
            } => println!("{text}"),
            RunEvent::SequenceStatus {
                sequence_id,
                success,
                error,
            } => println!("sequence {sequence_id}: success={success} {}", error.unwrap_or_default()),
            RunEvent::Error { message, kind } => eprintln!("[{kind}] {message}"),
            RunEvent::Reconnected { attempt } => eprintln!("reconnected (retry {attempt})"),
            other => println!("{other:?}"),
        }
    }
    let outcome = run.finish().await;

    client.computers().delete(&computer_id).await?;
    outcome
}
