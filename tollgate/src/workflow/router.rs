//! Finite state machine that runs the minimal node path for a request
//!
//! Each node checks its own cache namespace before calling the Generation
//! tier, and makes at most one generation call per request.

use super::request::WorkflowRequest;
use super::state::WorkflowState;
use crate::classifier::{ClassificationResult, ComplexityClassifier};
use crate::config::NodeTiers;
use crate::error::{Result, TollgateError};
use crate::retriever::{Passage, Retriever};
use std::future::Future;
use std::sync::Arc;
use tollgate_cache::{
    CacheCoordinator, CacheError, CallContext, ContentHasher, ContextLayers, Fingerprint,
    GenerationTier, Resolved, ResourceTier, TierKind,
};
use tracing::{debug, info};

/// Bumped whenever the retrieval prompt wording changes
const RETRIEVE_PROMPT_VERSION: &str = "retrieve/v1";

/// Passages handed to the Retrieve node
const RETRIEVE_LIMIT: usize = 3;

/// Result of one routed request
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub text: String,
    pub classification: ClassificationResult,
    pub path: Vec<WorkflowState>,
    /// Tier that served each executed node
    pub served_by: Vec<(WorkflowState, TierKind)>,
}

impl RouteOutcome {
    /// Nodes that had to call the Generation tier
    pub fn generated_nodes(&self) -> usize {
        self.served_by
            .iter()
            .filter(|(_, tier)| *tier == TierKind::Generation)
            .count()
    }
}

/// Inputs shared by every node of one request
struct NodeScope {
    tenant_id: String,
    user_id: String,
    payload: String,
    fingerprint: Fingerprint,
    scopes: Vec<String>,
    call: CallContext,
}

pub struct WorkflowRouter {
    cache: Arc<CacheCoordinator>,
    generation: Arc<GenerationTier>,
    classifier: ComplexityClassifier,
    retriever: Arc<dyn Retriever>,
    tiers: NodeTiers,
    /// Covers node tiers, generation profile and the document set
    revision: Fingerprint,
    retrieve_fingerprint: Fingerprint,
}

impl WorkflowRouter {
    pub fn new(
        cache: Arc<CacheCoordinator>,
        generation: Arc<GenerationTier>,
        retriever: Arc<dyn Retriever>,
        tiers: NodeTiers,
    ) -> Self {
        let classifier = ComplexityClassifier::new(cache.clone(), generation.clone(), tiers.classify);
        let revision = workflow_revision(&tiers, "", retriever.as_ref());
        Self {
            retrieve_fingerprint: retrieve_fingerprint(&revision),
            revision,
            cache,
            generation,
            classifier,
            retriever,
            tiers,
        }
    }

    /// Tie every cached node output to a generation profile
    ///
    /// `profile` should change whenever the provider would answer the same
    /// prompt differently, e.g. a new model name for a resource tier.
    pub fn with_profile(mut self, profile: &Fingerprint) -> Self {
        self.classifier = self.classifier.with_profile(profile);
        self.revision = workflow_revision(&self.tiers, profile.as_str(), self.retriever.as_ref());
        self.retrieve_fingerprint = retrieve_fingerprint(&self.revision);
        self
    }

    pub fn revision(&self) -> &Fingerprint {
        &self.revision
    }

    /// Fingerprint for policy-dependent entries: `context` plus [`Self::revision`]
    pub fn fingerprint_for(&self, context: &ContextLayers) -> Fingerprint {
        ContentHasher::fingerprint(
            "context",
            [context.fingerprint().as_str(), self.revision.as_str()],
        )
    }

    /// Drive `request` from `Start` to `Done`
    pub async fn route(
        &self,
        request: &mut WorkflowRequest,
        context: &ContextLayers,
    ) -> Result<RouteOutcome> {
        let scope = NodeScope {
            tenant_id: request.tenant_id.clone().unwrap_or_default(),
            user_id: request.user_id.clone().unwrap_or_default(),
            payload: request.payload.clone(),
            fingerprint: self.fingerprint_for(context),
            scopes: context.scopes(),
            call: CallContext::new(request.id.clone()).with_tenant(request.tenant_id.clone()),
        };
        let policy = render_policy(context);
        let mut served_by = Vec::new();
        let mut notes: Option<String> = None;
        let mut analysis: Option<String> = None;
        let mut answer: Option<String> = None;

        let mut state = WorkflowState::Start;
        loop {
            let category = request.classification.as_ref().map(|c| c.category);
            let next = state.next(category).ok_or_else(|| {
                TollgateError::Routing(format!("no transition out of {}", state))
            })?;
            if next.is_terminal() {
                break;
            }
            request.enter(next)?;

            let tier = match next {
                WorkflowState::Classify => {
                    let classified = self
                        .classifier
                        .classify(&scope.payload, &scope.call)
                        .await?;
                    request.classification = Some(classified.result);
                    classified.served_by
                }
                WorkflowState::Retrieve => {
                    let resolved = self.retrieve(&scope).await?;
                    notes = Some(resolved.value);
                    resolved.served_by
                }
                WorkflowState::Reason => {
                    let notes = notes.as_deref().unwrap_or_default();
                    let prompt = reason_prompt(&policy, notes, &scope.payload);
                    let resolved = self
                        .run_node(
                            &scope,
                            WorkflowState::Reason,
                            self.tiers.reason,
                            &[notes],
                            async move { Ok(prompt) },
                        )
                        .await?;
                    analysis = Some(resolved.value);
                    resolved.served_by
                }
                WorkflowState::Summarize => {
                    let notes = notes.as_deref().unwrap_or_default();
                    let analysis = analysis.as_deref().unwrap_or_default();
                    let prompt = summarize_prompt(&policy, notes, analysis, &scope.payload);
                    let resolved = self
                        .run_node(
                            &scope,
                            WorkflowState::Summarize,
                            self.tiers.summarize,
                            &[notes, analysis],
                            async move { Ok(prompt) },
                        )
                        .await?;
                    answer = Some(resolved.value);
                    resolved.served_by
                }
                WorkflowState::Start | WorkflowState::Done => {
                    return Err(TollgateError::Routing(format!("{} is not a node", next)));
                }
            };
            debug!(request = %request.id, node = %next, tier = %tier, "Node complete");
            served_by.push((next, tier));
            state = next;
        }

        let classification = request
            .classification
            .clone()
            .ok_or_else(|| TollgateError::Routing("request was never classified".to_string()))?;
        let text = answer
            .ok_or_else(|| TollgateError::Routing("workflow ended without an answer".to_string()))?;

        info!(
            request = %request.id,
            category = %classification.category,
            path = ?request.path(),
            "Workflow complete"
        );

        Ok(RouteOutcome {
            text,
            classification,
            path: request.path().to_vec(),
            served_by,
        })
    }

    async fn retrieve(&self, scope: &NodeScope) -> Result<Resolved> {
        let payload = scope.payload.as_str();
        let key = ContentHasher::key(WorkflowState::Retrieve.as_str(), [payload]);
        let call = scope.call.clone().with_node(WorkflowState::Retrieve.as_str());

        let resolved = self
            .cache
            .get_or_generate(&key, &self.retrieve_fingerprint, &[], || async {
                let passages = self
                    .retriever
                    .retrieve(payload, RETRIEVE_LIMIT)
                    .await
                    .map_err(CacheError::from)?;
                debug!(passages = passages.len(), "Retrieved passages");
                let prompt = retrieve_prompt(&passages, payload);
                self.generation
                    .generate(&prompt, self.tiers.retrieve, &call)
                    .await
                    .map(|g| g.text)
            })
            .await?;
        Ok(resolved)
    }

    /// Cached generation for a policy-dependent node
    async fn run_node(
        &self,
        scope: &NodeScope,
        node: WorkflowState,
        tier: ResourceTier,
        inputs: &[&str],
        prompt: impl Future<Output = tollgate_cache::Result<String>>,
    ) -> Result<Resolved> {
        let mut parts = vec![
            scope.tenant_id.as_str(),
            scope.user_id.as_str(),
            scope.payload.as_str(),
        ];
        parts.extend_from_slice(inputs);
        let key = ContentHasher::key(node.as_str(), parts);
        let call = scope.call.clone().with_node(node.as_str());

        let resolved = self
            .cache
            .get_or_generate(&key, &scope.fingerprint, &scope.scopes, move || async move {
                let prompt = prompt.await?;
                self.generation
                    .generate(&prompt, tier, &call)
                    .await
                    .map(|g| g.text)
            })
            .await?;
        Ok(resolved)
    }
}

fn workflow_revision(tiers: &NodeTiers, profile: &str, retriever: &dyn Retriever) -> Fingerprint {
    let corpus = retriever.fingerprint();
    ContentHasher::fingerprint(
        "workflow",
        [
            tiers.classify.as_str(),
            tiers.retrieve.as_str(),
            tiers.reason.as_str(),
            tiers.summarize.as_str(),
            profile,
            corpus.as_str(),
        ],
    )
}

fn retrieve_fingerprint(revision: &Fingerprint) -> Fingerprint {
    ContentHasher::fingerprint(
        WorkflowState::Retrieve.as_str(),
        [RETRIEVE_PROMPT_VERSION, revision.as_str()],
    )
}

/// Render the layered policy as prompt instructions
pub fn render_policy(context: &ContextLayers) -> String {
    let mut out = context.base_policy.clone();
    if let Some(tenant) = &context.tenant {
        out.push_str("\n\nOrganization policy:\n");
        out.push_str(&tenant.text);
    }
    if let Some(user) = &context.user {
        out.push_str("\n\nUser preferences:\n");
        out.push_str(&user.text);
    }
    for (name, value) in &context.extras {
        out.push_str(&format!("\n{}: {}", name, value));
    }
    out
}

fn retrieve_prompt(passages: &[Passage], payload: &str) -> String {
    let passages = if passages.is_empty() {
        "(no passages found)".to_string()
    } else {
        passages
            .iter()
            .map(|p| format!("[{}] {}", p.id, p.text))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "# Role: Research Assistant\n\nCondense the passages into notes that help answer the request. Cite passage ids.\n\n## Passages\n{}\n\n## Request\n{}",
        passages, payload
    )
}

fn reason_prompt(policy: &str, notes: &str, payload: &str) -> String {
    format!(
        "# Role: Analyst\n\n## Instructions\n{}\n\n## Notes\n{}\n\n## Request\n{}\n\nWork through the request step by step and state your conclusions.",
        policy, notes, payload
    )
}

fn summarize_prompt(policy: &str, notes: &str, analysis: &str, payload: &str) -> String {
    let mut prompt = format!("# Role: Responder\n\n## Instructions\n{}\n\n", policy);
    if !notes.is_empty() {
        prompt.push_str(&format!("## Notes\n{}\n\n", notes));
    }
    if !analysis.is_empty() {
        prompt.push_str(&format!("## Analysis\n{}\n\n", analysis));
    }
    prompt.push_str(&format!("## Request\n{}\n\nWrite the final answer.", payload));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_policy_layers() {
        let context = ContextLayers::new("Be accurate.")
            .with_tenant("acme", "Use metric units.")
            .with_user("u1", "Keep it short.")
            .with_extra("language", "fr");
        let policy = render_policy(&context);
        assert!(policy.starts_with("Be accurate."));
        assert!(policy.contains("Organization policy:\nUse metric units."));
        assert!(policy.contains("User preferences:\nKeep it short."));
        assert!(policy.ends_with("language: fr"));
    }

    #[test]
    fn test_summarize_prompt_skips_empty_sections() {
        let prompt = summarize_prompt("policy", "", "", "hi");
        assert!(!prompt.contains("## Notes"));
        assert!(!prompt.contains("## Analysis"));
        assert!(prompt.contains("## Request\nhi"));
    }

    #[test]
    fn test_retrieve_prompt_lists_passages() {
        let passages = vec![Passage {
            id: "refunds".to_string(),
            text: "14 days".to_string(),
            score: 1.0,
        }];
        assert!(retrieve_prompt(&passages, "q").contains("[refunds] 14 days"));
        assert!(retrieve_prompt(&[], "q").contains("(no passages found)"));
    }
}
