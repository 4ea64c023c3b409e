//! HTTP API for the questionnaire service

mod handlers;
mod types;

pub use handlers::create_router;

use crate::db::AuditLog;
use crate::runtime::Orchestrator;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Read side of the audit log; `None` when auditing is disabled
    pub audit_log: Option<AuditLog>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, audit_log: Option<AuditLog>) -> Self {
        Self {
            orchestrator,
            audit_log,
        }
    }
}
