//! Server status pushes carrying the roster of online players.

use std::sync::Arc;

use serde::Serialize;
use slotkeeper_db::lifecycle::{ServerTransition, classify_server_transition};
use slotkeeper_db::{Repository, Requester, ServerStatus};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connections::require_trusted;
use crate::error::AppError;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub status: ServerStatus,
    pub batches: usize,
    /// Zero-based indexes of batches whose refresh failed.
    pub failed_batches: Vec<usize>,
    /// Occupancy rows whose timestamp was refreshed.
    pub refreshed: u64,
}

#[derive(Clone)]
pub struct HeartbeatReconciler {
    repo: Arc<dyn Repository>,
    batch_size: usize,
}

impl HeartbeatReconciler {
    pub fn new(repo: Arc<dyn Repository>, batch_size: usize) -> Self {
        Self {
            repo,
            batch_size: batch_size.max(1),
        }
    }

    /// Apply the reported status, then refresh every rostered player.
    ///
    /// Players missing from the roster are left alone and age out of live
    /// occupancy once the freshness window passes. A failing batch is logged
    /// and reported; later batches still run.
    pub async fn reconcile(
        &self,
        server_id: Uuid,
        status: &str,
        message: Option<String>,
        online: &[Uuid],
        requester: &Requester,
        now: i64,
    ) -> Result<ReconcileReport, AppError> {
        require_trusted(requester)?;
        let status: ServerStatus = status.parse()?;

        let current = self.repo.get_server(server_id).await?;
        if classify_server_transition(current.status, status) == ServerTransition::Anomalous {
            warn!(%server_id, from = %current.status, to = %status, "out-of-order server status");
        }
        self.repo
            .update_server_status(server_id, status, message, now)
            .await?;

        let mut report = ReconcileReport {
            status,
            batches: 0,
            failed_batches: Vec::new(),
            refreshed: 0,
        };

        for (index, batch) in online.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            match self.repo.refresh_occupants(server_id, batch, now).await {
                Ok(touched) => report.refreshed += touched,
                Err(e) => {
                    warn!(%server_id, batch = index, size = batch.len(), error = %e, "heartbeat batch failed");
                    report.failed_batches.push(index);
                }
            }
        }

        debug!(
            %server_id,
            %status,
            batches = report.batches,
            failed = report.failed_batches.len(),
            refreshed = report.refreshed,
            "reconciled heartbeat"
        );
        Ok(report)
    }
}
