//! Complexity-adaptive workflow router in front of a tiered result cache
//!
//! A request is classified once, routed along the shortest node path that
//! can answer it, and every node output plus the final answer is cached in
//! the Volatile and Durable tiers of [`tollgate_cache`].
//!
//! ```no_run
//! use tollgate::{Request, Tollgate, TollgateConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let app = Tollgate::build(TollgateConfig::default()).await?;
//! let response = app.pipeline.handle(Request::new("What is the refund policy?")).await?;
//! println!("{} (served by {})", response.text, response.served_by);
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod bench;
pub mod classifier;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod provider;
pub mod retriever;
pub mod workflow;

pub use app::Tollgate;
pub use bench::{BenchmarkHarness, BenchmarkSummary, RunRecord};
pub use classifier::{Category, ClassificationResult, ComplexityClassifier};
pub use config::TollgateConfig;
pub use error::{RequestError, Result, TollgateError};
pub use pipeline::{Pipeline, Request, Response};
pub use policy::PolicyStore;
pub use provider::{CommandProvider, OfflineProvider};
pub use retriever::{Passage, Retriever, StaticRetriever};
pub use workflow::{RouteOutcome, WorkflowRequest, WorkflowRouter, WorkflowState};
