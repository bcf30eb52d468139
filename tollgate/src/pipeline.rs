//! Request façade: answer-level cache in front of the workflow router

use crate::classifier::ClassificationResult;
use crate::error::{RequestError, Result, TollgateError};
use crate::policy::PolicyStore;
use crate::workflow::{RouteOutcome, WorkflowRequest, WorkflowRouter, WorkflowState};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tollgate_cache::{CacheCoordinator, CacheError, ContentHasher, TierKind};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const ANSWER_NAMESPACE: &str = "answer";

const REQUESTS_TOTAL: &str = "tollgate_requests_total";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Request {
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub payload: String,
}

impl Request {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub request_id: String,
    pub text: String,
    /// Tier that produced the answer as a whole
    pub served_by: TierKind,
    /// Node path of the run that computed the answer
    pub path: Vec<WorkflowState>,
    pub classification: ClassificationResult,
}

/// What the answer namespace stores
#[derive(Debug, Serialize, Deserialize)]
struct CachedAnswer {
    text: String,
    path: Vec<WorkflowState>,
    classification: ClassificationResult,
}

impl From<RouteOutcome> for CachedAnswer {
    fn from(outcome: RouteOutcome) -> Self {
        Self {
            text: outcome.text,
            path: outcome.path,
            classification: outcome.classification,
        }
    }
}

pub struct Pipeline {
    cache: Arc<CacheCoordinator>,
    policy: Arc<PolicyStore>,
    router: Arc<WorkflowRouter>,
    workflow_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        cache: Arc<CacheCoordinator>,
        policy: Arc<PolicyStore>,
        router: Arc<WorkflowRouter>,
        workflow_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            policy,
            router,
            workflow_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        &self.cache
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    /// Answer one request
    ///
    /// Failures are logged here and reach the caller only as a generic
    /// [`RequestError`].
    pub async fn handle(&self, request: Request) -> std::result::Result<Response, RequestError> {
        let request_id = Uuid::new_v4().to_string();
        let emit = self.cache.config().enable_metrics;
        match self.process(&request_id, &request).await {
            Ok(response) => {
                if emit {
                    counter!(
                        REQUESTS_TOTAL,
                        "outcome" => "ok",
                        "served_by" => response.served_by.as_str()
                    )
                    .increment(1);
                }
                Ok(response)
            }
            Err(e) => {
                error!(
                    request = %request_id,
                    tenant = request.tenant_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Request failed"
                );
                if emit {
                    counter!(REQUESTS_TOTAL, "outcome" => "error").increment(1);
                }
                Err(RequestError::from(&e))
            }
        }
    }

    async fn process(&self, request_id: &str, request: &Request) -> Result<Response> {
        let tenant = request.tenant_id.as_deref();
        let user = request.user_id.as_deref();
        let context = self.policy.context_for(tenant, user).await;
        let fingerprint = self.router.fingerprint_for(&context);
        let scopes = context.scopes();
        let key = ContentHasher::key(
            ANSWER_NAMESPACE,
            [
                tenant.unwrap_or_default(),
                user.unwrap_or_default(),
                request.payload.as_str(),
            ],
        );

        let resolved = self
            .cache
            .get_or_generate_within(&key, &fingerprint, &scopes, self.workflow_timeout, || async {
                let mut workflow = WorkflowRequest::new(request.payload.clone())
                    .with_id(request_id)
                    .with_tenant(request.tenant_id.clone())
                    .with_user(request.user_id.clone());
                let outcome = self.router.route(&mut workflow, &context).await?;
                serde_json::to_string(&CachedAnswer::from(outcome))
                    .map_err(|e| CacheError::SerializationError(e.to_string()))
            })
            .await?;

        let answer: CachedAnswer = match serde_json::from_str(&resolved.value) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping unreadable cached answer");
                self.cache.remove(&key).await;
                return Err(TollgateError::Cache(CacheError::SerializationError(
                    e.to_string(),
                )));
            }
        };

        info!(
            request = %request_id,
            served_by = %resolved.served_by,
            category = %answer.classification.category,
            "Request answered"
        );

        Ok(Response {
            request_id: request_id.to_string(),
            text: answer.text,
            served_by: resolved.served_by,
            path: answer.path,
            classification: answer.classification,
        })
    }
}
