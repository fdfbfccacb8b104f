//! Read-only commands
//!
//! Output goes to stdout in a form CI scripts can consume directly.

use crate::platforms::Platforms;

pub fn filter(platforms: &Platforms, workflow_tag: &str) {
    for line in platforms.lines(|p| p.filter_for(workflow_tag).to_string()) {
        println!("{}", line);
    }
}

pub fn manager_tags(platforms: &Platforms, sha: &str, workflow_tag: &str) -> anyhow::Result<()> {
    for platform in platforms.iter() {
        let tags = platform.manager_tags(sha, workflow_tag);
        if platforms.is_fan_out() {
            println!("# {}", platform.platform_kind());
        }
        println!("{}", serde_json::to_string_pretty(&tags)?);
    }
    Ok(())
}

pub async fn manager_exists(platforms: &Platforms, workflow_tag: &str) -> anyhow::Result<()> {
    println!("{}", platforms.manager_exists(workflow_tag).await?);
    Ok(())
}

/// List the instances of one workflow, or of every CI workflow
pub async fn instances(platforms: &Platforms, workflow_tag: Option<&str>) -> anyhow::Result<()> {
    let instances = match workflow_tag {
        Some(tag) => platforms.all_instances(tag).await?,
        None => platforms.all_ci_instances().await?,
    };
    tracing::debug!("Found {} instances", instances.len());
    println!("{}", serde_json::to_string_pretty(&instances)?);
    Ok(())
}

pub fn workflow_id(platforms: &Platforms, workflow_tag: &str) {
    for line in platforms.lines(|p| p.manager_workflow_id(workflow_tag)) {
        println!("{}", line);
    }
}
