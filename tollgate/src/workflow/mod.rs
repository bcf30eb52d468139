//! Complexity-adaptive request routing

mod request;
mod router;
mod state;

pub use request::WorkflowRequest;
pub use router::{render_policy, RouteOutcome, WorkflowRouter};
pub use state::WorkflowState;
