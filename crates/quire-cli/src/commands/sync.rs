use std::time::Duration;

use quire_core::auth::SessionEvent;
use quire_core::models::SyncConflict;
use quire_core::services::QueueStore;
use quire_core::sync::{DrainOutcome, PullReport};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;

use crate::app::{App, SyncContext};
use crate::cli::SyncCommands;
use crate::commands::common::format_sync_timestamp;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct PendingItem {
    pub note_id: String,
    pub operation: String,
    pub retries: u32,
    pub enqueued_at: i64,
}

#[derive(Debug, Serialize)]
pub struct SyncStatusReport {
    pub signed_in: bool,
    pub account: Option<String>,
    pub pending: Vec<PendingItem>,
    pub recent_conflicts: usize,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub note_id: String,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

/// Totals from a batch of drain steps.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub synced: usize,
    pub dropped: usize,
    pub retrying: bool,
    pub unauthenticated: bool,
}

impl PushSummary {
    pub fn from_outcomes(outcomes: &[DrainOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome {
                DrainOutcome::Synced { .. } => summary.synced += 1,
                DrainOutcome::Dropped { .. } => summary.dropped += 1,
                DrainOutcome::Retrying { .. } => summary.retrying = true,
                DrainOutcome::Unauthenticated => summary.unauthenticated = true,
                DrainOutcome::Idle => {}
            }
        }
        summary
    }
}

pub async fn run_sync(command: SyncCommands, app: &App) -> Result<(), CliError> {
    match command {
        SyncCommands::Status { json } => run_status(json, app).await,
        SyncCommands::Push => run_push(app).await,
        SyncCommands::Pull => run_pull(app).await,
        SyncCommands::Watch { pull_interval } => {
            run_watch(Duration::from_secs(pull_interval.max(1)), app).await
        }
        SyncCommands::Conflicts { limit, json } => run_conflicts(limit, json, app).await,
    }
}

pub async fn sync_status(app: &App) -> Result<SyncStatusReport, CliError> {
    let credentials = app.credentials();
    let db = app.open_database()?;
    let pending = db
        .load_all()
        .await?
        .into_iter()
        .map(|item| PendingItem {
            note_id: item.note_id.to_string(),
            operation: item.operation.to_string(),
            retries: item.retries,
            enqueued_at: item.enqueued_at,
        })
        .collect();

    Ok(SyncStatusReport {
        signed_in: credentials.is_authenticated()?,
        account: credentials.load_profile()?.map(|profile| profile.email),
        pending,
        recent_conflicts: db.list_conflicts(100).await?.len(),
    })
}

async fn run_status(as_json: bool, app: &App) -> Result<(), CliError> {
    let report = sync_status(app).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match (report.signed_in, report.account.as_deref()) {
        (true, Some(account)) => println!("Signed in as {account}"),
        (true, None) => println!("Signed in"),
        (false, _) => println!("Not signed in"),
    }
    println!("Pending changes: {}", report.pending.len());
    for item in &report.pending {
        println!(
            "  {:<6}  {}  queued {}  retries={}",
            item.operation,
            item.note_id,
            format_sync_timestamp(item.enqueued_at),
            item.retries
        );
    }
    println!("Recent conflicts: {}", report.recent_conflicts);
    println!("Database: {}", app.db_path().display());
    Ok(())
}

async fn signed_in_context(app: &App) -> Result<SyncContext, CliError> {
    let ctx = app.sync_context().await?;
    match ctx.session.restore_session().await {
        Ok(true) => Ok(ctx),
        Ok(false) => {
            ctx.close().await;
            Err(CliError::NotSignedIn)
        }
        Err(error) => {
            ctx.close().await;
            Err(error.into())
        }
    }
}

async fn run_push(app: &App) -> Result<(), CliError> {
    let ctx = signed_in_context(app).await?;
    let result = ctx.queue.drain().await;
    let remaining = ctx.queue.status().len;
    ctx.close().await;

    let summary = PushSummary::from_outcomes(&result?);
    print_push_summary(&summary, remaining);
    Ok(())
}

fn print_push_summary(summary: &PushSummary, remaining: usize) {
    println!("Pushed {} change(s)", summary.synced);
    if summary.dropped > 0 {
        println!(
            "Dropped {} change(s) after repeated failures",
            summary.dropped
        );
    }
    if summary.unauthenticated {
        println!("Session unavailable; run `quire auth login`");
    }
    if remaining > 0 {
        println!("{remaining} change(s) still pending");
    }
}

async fn run_pull(app: &App) -> Result<(), CliError> {
    let ctx = signed_in_context(app).await?;
    let result = ctx.puller.pull_once().await;
    ctx.close().await;

    print_pull_report(&result?);
    Ok(())
}

fn print_pull_report(report: &PullReport) {
    println!(
        "Fetched {} note(s): {} new, {} updated, {} unchanged",
        report.fetched, report.created, report.updated, report.unchanged
    );
    if report.conflicts > 0 {
        println!("Resolved {} conflict(s)", report.conflicts);
    }
    if report.pushed_back > 0 {
        println!(
            "{} merged note(s) queued for upload; run `quire sync push`",
            report.pushed_back
        );
    }
    if report.skipped > 0 {
        println!("Skipped {} unreadable remote file(s)", report.skipped);
    }
}

async fn run_watch(pull_interval: Duration, app: &App) -> Result<(), CliError> {
    let ctx = signed_in_context(app).await?;
    let mut events = ctx.session.subscribe();
    ctx.queue.start(&ctx.shutdown);

    let mut pulls = tokio::time::interval(pull_interval);
    pulls.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("Syncing in the background. Press Ctrl-C to stop.");
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(error) = result {
                    tracing::warn!(%error, "Failed to listen for Ctrl-C");
                }
                break;
            }
            _ = pulls.tick() => {
                match ctx.puller.pull_once().await {
                    Ok(report) if report.fetched > 0 => {
                        tracing::debug!(?report, "Periodic pull finished");
                    }
                    Ok(_) => {}
                    Err(error) => tracing::warn!(%error, "Periodic pull failed"),
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Expired) => {
                    println!("Session expired; run `quire auth login` to resume syncing.");
                    break;
                }
                Ok(SessionEvent::RefreshFailed { attempt, error }) => {
                    tracing::warn!(attempt, %error, "Token refresh failed");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    ctx.close().await;
    let status = ctx.queue.status();
    println!("Stopped. {} change(s) pending.", status.len);
    Ok(())
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        note_id: conflict.note_id.clone(),
        local_updated_at: conflict.local_updated_at,
        remote_updated_at: conflict.remote_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<15}  note={}  local={} remote={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.note_id,
                conflict.local_updated_at,
                conflict.remote_updated_at
            )
        })
        .collect()
}

async fn run_conflicts(limit: usize, as_json: bool, app: &App) -> Result<(), CliError> {
    let conflicts = app.open_database()?.list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
