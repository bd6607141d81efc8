//! Build commands.

use anyhow::Result;
use serde_json::json;
use stagehand_core::build::BuildRequest;
use stagehand_core::ledger::{Phase, PhaseLedger, StageEntry};

use super::ApiClient;

pub async fn invoke(client: &ApiClient, id: i64, notify: bool, rebuild: bool) -> Result<()> {
    let build: BuildRequest = client.get(&format!("api/v1/builds/{}", id)).await?;
    let body = json!({
        "owner_id": build.owner_id,
        "project_id": build.project_id,
        "send_notification": notify,
        "rebuild": rebuild,
    });
    let ledger: PhaseLedger = client
        .post(&format!("api/v1/builds/{}/invoke", id), &body)
        .await?;
    println!("Build {} ({}) started", id, build.job_name());
    print_ledger(&ledger);
    Ok(())
}

pub async fn stop(client: &ApiClient, id: i64) -> Result<()> {
    let build: BuildRequest = client
        .post(&format!("api/v1/builds/{}/stop", id), &json!({}))
        .await?;
    println!("Build {} is now {}", build.id, build.status);
    Ok(())
}

pub async fn ledger(client: &ApiClient, id: i64) -> Result<()> {
    let ledger: PhaseLedger = client.get(&format!("api/v1/builds/{}/ledger", id)).await?;
    print_ledger(&ledger);
    Ok(())
}

pub async fn in_progress(client: &ApiClient) -> Result<()> {
    let builds: Vec<BuildRequest> = client.get("api/v1/builds/in-progress").await?;
    print_builds(&builds);
    Ok(())
}

pub async fn in_queue(client: &ApiClient) -> Result<()> {
    let builds: Vec<BuildRequest> = client.get("api/v1/builds/in-queue").await?;
    print_builds(&builds);
    Ok(())
}

fn print_builds(builds: &[BuildRequest]) {
    if builds.is_empty() {
        println!("No builds");
        return;
    }
    println!("{:<8} {:<8} {:<8} {:<24} STATUS", "ID", "OWNER", "PROJECT", "TAG");
    for b in builds {
        println!(
            "{:<8} {:<8} {:<8} {:<24} {}",
            b.id.get(),
            b.owner_id.get(),
            b.project_id.get(),
            b.tag_name,
            b.status
        );
    }
}

fn format_entry(entry: &StageEntry) -> String {
    match entry.at {
        Some(at) => format!("{:?} at {}", entry.status, at.format("%Y-%m-%d %H:%M:%S")),
        None => format!("{:?}", entry.status),
    }
}

fn print_ledger(ledger: &PhaseLedger) {
    println!("Phase ledger {} for build {}", ledger.id, ledger.build_id);
    if ledger.in_queue {
        println!("  (waiting in CI queue)");
    }
    for phase in Phase::ALL {
        println!("  {:<12} {}", phase.as_str(), format_entry(ledger.stages.entry(phase)));
    }
    println!("  {:<12} {}", "finished", format_entry(&ledger.stages.finished));
    if ledger.download {
        println!("  outputs verified and ready for download");
    }
}
