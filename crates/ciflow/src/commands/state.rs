use crate::platforms::Platforms;
use ciflow_cloud::StateTransition;
use colored::Colorize;

pub async fn handle(
    platforms: &Platforms,
    token: &str,
    workflow_tag: &str,
    transition: &str,
    dry_run: bool,
) -> anyhow::Result<()> {
    let transition: StateTransition = transition.parse()?;

    let mode = if dry_run { " (dry run)" } else { "" };
    eprintln!(
        "{}",
        format!("Applying {} to workflow {}{}...", transition, workflow_tag, mode).yellow()
    );

    platforms
        .apply_transition(token, workflow_tag, transition, dry_run)
        .await?;

    eprintln!(
        "{}",
        format!("✓ {} applied to workflow {}", transition, workflow_tag)
            .green()
            .bold()
    );
    Ok(())
}
