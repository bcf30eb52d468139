use super::state::WorkflowState;
use crate::classifier::ClassificationResult;
use crate::error::{Result, TollgateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One request moving through the router
///
/// `path` only grows, and a node can be entered at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub id: String,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub payload: String,
    pub classification: Option<ClassificationResult>,
    path: Vec<WorkflowState>,
    pub started_at: DateTime<Utc>,
}

impl WorkflowRequest {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: None,
            user_id: None,
            payload: payload.into(),
            classification: None,
            path: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn path(&self) -> &[WorkflowState] {
        &self.path
    }

    pub fn has_visited(&self, state: WorkflowState) -> bool {
        self.path.contains(&state)
    }

    /// Record entry into `state`
    pub fn enter(&mut self, state: WorkflowState) -> Result<()> {
        if !state.is_node() {
            return Err(TollgateError::Routing(format!(
                "{} is not an executable node",
                state
            )));
        }
        if self.has_visited(state) {
            return Err(TollgateError::Routing(format!(
                "request {} already executed {}",
                self.id, state
            )));
        }
        self.path.push(state);
        Ok(())
    }
}
