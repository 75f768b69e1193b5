//! Sync, integrity and recovery commands.

use anyhow::Result;
use yard_inventory::sync::sync_pending;
use yard_inventory::InventoryEngine;

pub fn status(engine: &InventoryEngine, json: bool) -> Result<()> {
    let status = engine.sync_status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!("Online:     {}", if status.is_online { "yes" } else { "no" });
    println!("Platforms:  {}", status.total);
    println!("Synced:     {}", status.synced);
    println!("Needs sync: {}", status.needs_sync);
    Ok(())
}

/// Print every violation. Fails when any is found.
pub fn verify(engine: &InventoryEngine) -> Result<()> {
    let report = engine.verify();
    if report.is_valid {
        println!("No integrity problems found.");
        return Ok(());
    }
    for error in &report.errors {
        let tag = if error.violation.is_repairable() { "fixable" } else { "manual" };
        println!("[{:7}] {}", tag, error);
    }
    anyhow::bail!("{} integrity problem(s) found.", report.errors.len());
}

pub fn repair(engine: &InventoryEngine) -> Result<()> {
    if engine.repair()? {
        println!("Repaired.");
    } else {
        println!("Nothing to repair.");
    }
    let remaining = engine.verify().errors.len();
    if remaining > 0 {
        println!("{} problem(s) need manual attention; run `yard verify`.", remaining);
    }
    Ok(())
}

pub fn recover(engine: &InventoryEngine) -> Result<()> {
    let report = engine.recover_into_primary()?;
    println!("Emergency records consumed: {}", report.cleared);
    for id in &report.restored {
        println!("  restored {}", id);
    }
    println!("Snapshots on record:        {}", report.snapshots);
    Ok(())
}

pub async fn sync(engine: &InventoryEngine) -> Result<()> {
    if !engine.connectivity().is_online() {
        anyhow::bail!("No server configured for this context (or --offline given).");
    }
    let summary = sync_pending(engine).await;
    println!(
        "Attempted {}, synced {}, failed {}, skipped {}.",
        summary.attempted, summary.synced, summary.failed, summary.skipped
    );
    Ok(())
}

pub async fn pull(engine: &InventoryEngine) -> Result<()> {
    if !engine.connectivity().is_online() {
        anyhow::bail!("No server configured for this context (or --offline given).");
    }
    let report = engine.pull_remote().await?;
    println!("Fetched {}, added {} new platform(s).", report.fetched, report.inserted.len());
    if !report.complete {
        println!("Listing stopped early; run again to fetch the rest.");
    }
    Ok(())
}
