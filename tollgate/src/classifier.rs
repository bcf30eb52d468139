//! First-pass complexity classification
//!
//! One economy-tier call labels a request `trivial`, `retrieval` or `complex`.
//! The raw label is cached per request text; anything that is not one of the
//! three labels routes as `complex`.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tollgate_cache::{
    CacheCoordinator, CallContext, ContentHasher, Fingerprint, GenerationTier, ResourceTier,
    TierKind,
};
use tracing::{debug, warn};

pub const NAMESPACE: &str = "classify";

/// First line of every classification prompt
pub const PROMPT_HEADER: &str = "# Role: Request Classifier";

/// Precedes the request text in the prompt
pub const REQUEST_MARKER: &str = "## Request\n";

/// Bumped whenever the prompt wording changes
const PROMPT_VERSION: &str = "classify/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Answerable directly
    Trivial,
    /// Needs supporting documents
    Retrieval,
    /// Needs documents and an explicit reasoning step
    Complex,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Trivial => "trivial",
            Category::Retrieval => "retrieval",
            Category::Complex => "complex",
        }
    }

    /// Strict label parse: the first word of `raw`, case-insensitive
    pub fn from_label(raw: &str) -> Option<Self> {
        let word = raw
            .trim()
            .split(|c: char| !c.is_ascii_alphabetic())
            .find(|w| !w.is_empty())?
            .to_ascii_lowercase();
        match word.as_str() {
            "trivial" => Some(Category::Trivial),
            "retrieval" => Some(Category::Retrieval),
            "complex" => Some(Category::Complex),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub raw_label: String,
    /// The label was unrecognised and defaulted to `complex`
    pub ambiguous: bool,
}

impl ClassificationResult {
    pub fn from_label(raw: &str) -> Self {
        match Category::from_label(raw) {
            Some(category) => Self {
                category,
                raw_label: raw.to_string(),
                ambiguous: false,
            },
            None => {
                warn!(label = raw, "Ambiguous classification, routing as complex");
                Self {
                    category: Category::Complex,
                    raw_label: raw.to_string(),
                    ambiguous: true,
                }
            }
        }
    }
}

pub fn build_prompt(payload: &str) -> String {
    format!(
        r#"{}

Classify the request below by the work needed to answer it.

- trivial: answerable directly, no documents needed
- retrieval: needs facts from reference documents
- complex: needs documents plus multi-step reasoning or comparison

Reply with exactly one word: trivial, retrieval or complex.

{}{}"#,
        PROMPT_HEADER, REQUEST_MARKER, payload
    )
}

/// Classification plus the tier that served it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub result: ClassificationResult,
    pub served_by: TierKind,
}

pub struct ComplexityClassifier {
    cache: Arc<CacheCoordinator>,
    generation: Arc<GenerationTier>,
    tier: ResourceTier,
    fingerprint: Fingerprint,
}

impl ComplexityClassifier {
    pub fn new(
        cache: Arc<CacheCoordinator>,
        generation: Arc<GenerationTier>,
        tier: ResourceTier,
    ) -> Self {
        Self {
            fingerprint: ContentHasher::fingerprint(NAMESPACE, [PROMPT_VERSION, tier.as_str()]),
            cache,
            generation,
            tier,
        }
    }

    /// Include the generation profile in the cached label's fingerprint
    pub fn with_profile(mut self, profile: &Fingerprint) -> Self {
        self.fingerprint = ContentHasher::fingerprint(
            NAMESPACE,
            [PROMPT_VERSION, self.tier.as_str(), profile.as_str()],
        );
        self
    }

    pub async fn classify(&self, payload: &str, call: &CallContext) -> Result<Classified> {
        let key = ContentHasher::key(NAMESPACE, [payload]);
        let call = call.clone().with_node(NAMESPACE);

        let resolved = self
            .cache
            .get_or_generate(&key, &self.fingerprint, &[], || async {
                let generation = self
                    .generation
                    .generate(&build_prompt(payload), self.tier, &call)
                    .await?;
                Ok(generation.text.trim().to_string())
            })
            .await?;

        let result = ClassificationResult::from_label(&resolved.value);
        debug!(
            category = %result.category,
            served_by = %resolved.served_by,
            "Classified request"
        );
        Ok(Classified {
            result,
            served_by: resolved.served_by,
        })
    }
}
