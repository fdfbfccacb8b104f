use crate::monitor::{self, Outcome, RunSource};
use crate::platforms::Platforms;
use colored::Colorize;
use std::time::Duration;

pub async fn handle(
    platforms: &Platforms,
    runs: &dyn RunSource,
    token: &str,
    workflow_tag: &str,
    run_id: &str,
    interval_secs: u64,
) -> anyhow::Result<()> {
    eprintln!(
        "{}",
        format!("Monitoring workflow run {} every {}s", run_id, interval_secs).cyan()
    );

    let outcome = monitor::watch(
        platforms,
        runs,
        token,
        workflow_tag,
        run_id,
        Duration::from_secs(interval_secs),
    )
    .await?;

    match outcome {
        Outcome::Terminated => {
            eprintln!(
                "{}",
                format!("✓ Workflow {} finished, instances terminated", run_id)
                    .green()
                    .bold()
            );
            Ok(())
        }
        Outcome::Stopped => anyhow::bail!(
            "Workflow {} could not be queried {} times in a row, instances stopped",
            run_id,
            monitor::QUERY_FAILURE_THRESHOLD
        ),
    }
}
