//! Command implementations.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use altrinity_auth::AuthSession;
use anyhow::Context;
use route_outbox::{
    spawn_connectivity_flush, ConnectivityMonitor, ConnectivityProbe, FlushReport, QueueItem,
    SkipReason,
};
use serde_json::Value;
use tracing::info;

use crate::app::App;

/// Counts shown by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub failed: usize,
    pub authenticated: bool,
}

/// Parse the payload given inline or in a file.
pub fn read_payload(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<Value> {
    let raw = match (inline, file) {
        (Some(inline), None) => inline.to_string(),
        (None, Some(file)) => std::fs::read_to_string(file)
            .with_context(|| format!("reading payload from {}", file.display()))?,
        _ => anyhow::bail!("provide exactly one of a payload or --file"),
    };
    serde_json::from_str(&raw).context("payload is not valid JSON")
}

pub async fn enqueue(app: &App, kind: &str, payload: Value) -> anyhow::Result<QueueItem> {
    let item = QueueItem::new(kind, payload);
    app.queue.enqueue(item.clone()).await?;
    Ok(item)
}

pub async fn status(app: &App) -> QueueStatus {
    QueueStatus {
        pending: app.queue.pending_count().await,
        failed: app.queue.failed_count().await,
        authenticated: app.auth.is_authenticated(),
    }
}

pub fn describe_report(report: &FlushReport) -> String {
    match report.skipped {
        Some(SkipReason::EmptyQueue) => "Nothing to send".to_string(),
        Some(SkipReason::NoAuthToken) => {
            "Not signed in; run `altrinity-sync login` first".to_string()
        }
        Some(SkipReason::InProgress) => "A flush is already running".to_string(),
        None => format!(
            "Sent {} of {}; {} kept for retry, {} moved to failed",
            report.delivered, report.attempted, report.retained, report.dead_lettered
        ),
    }
}

pub fn describe_identity(auth: &AuthSession) -> String {
    if !auth.is_authenticated() {
        return "Not signed in".to_string();
    }
    let roles = auth.roles();
    let mut identity = format!(
        "Signed in as {} (subject {}), roles: {}",
        auth.username().unwrap_or_else(|| "<unknown>".to_string()),
        auth.subject().unwrap_or_default(),
        if roles.is_empty() {
            "none".to_string()
        } else {
            roles.join(", ")
        }
    );
    if let Some(expires_at) = auth.expires_at() {
        identity.push_str(&format!(", expires {}", expires_at.to_rfc3339()));
    }
    identity
}

/// Probe connectivity and flush on every restore until Ctrl-C.
pub async fn watch(app: &App) -> anyhow::Result<()> {
    watch_until(app, async {
        tokio::signal::ctrl_c()
            .await
            .context("listening for Ctrl-C")
    })
    .await
}

/// Run the probe and the flush trigger until `shutdown` resolves.
pub async fn watch_until<F>(app: &App, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let monitor = Arc::new(ConnectivityMonitor::new(false));
    let trigger = spawn_connectivity_flush(app.coordinator.clone(), monitor.subscribe());

    let probe = ConnectivityProbe::new(
        &app.config.api_base_url,
        Duration::from_secs(app.config.probe_interval_secs),
        Duration::from_secs(app.config.request_timeout_secs),
    )?;
    let probe_task = tokio::spawn(probe.run(monitor.clone()));

    let mut pending = app.queue.subscribe_pending_count();
    info!(pending = *pending.borrow_and_update(), "Watching connectivity");

    tokio::pin!(shutdown);
    let outcome = loop {
        tokio::select! {
            result = &mut shutdown => break result,
            changed = pending.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                info!(pending = *pending.borrow_and_update(), "Pending routes changed");
            }
        }
    };

    // The probe holds a monitor handle; it must be gone before the trigger can end.
    probe_task.abort();
    let _ = probe_task.await;
    drop(monitor);
    trigger.await.context("flush trigger task")?;
    info!("Stopped watching");
    outcome
}
