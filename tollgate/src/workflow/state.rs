//! Router states and the fixed transition table

use crate::classifier::Category;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Start,
    Classify,
    Retrieve,
    Reason,
    Summarize,
    Done,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Start => "start",
            WorkflowState::Classify => "classify",
            WorkflowState::Retrieve => "retrieve",
            WorkflowState::Reason => "reason",
            WorkflowState::Summarize => "summarize",
            WorkflowState::Done => "done",
        }
    }

    /// States that do work and appear in a request's path
    pub fn is_node(&self) -> bool {
        !matches!(self, WorkflowState::Start | WorkflowState::Done)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Done)
    }

    /// Next state, or `None` for an illegal move
    ///
    /// Transitions out of `Classify` and `Retrieve` need the category.
    pub fn next(self, category: Option<Category>) -> Option<WorkflowState> {
        use WorkflowState::*;
        match (self, category) {
            (Start, _) => Some(Classify),
            (Classify, Some(Category::Trivial)) => Some(Summarize),
            (Classify, Some(Category::Retrieval | Category::Complex)) => Some(Retrieve),
            (Retrieve, Some(Category::Complex)) => Some(Reason),
            (Retrieve, Some(_)) => Some(Summarize),
            (Reason, _) => Some(Summarize),
            (Summarize, _) => Some(Done),
            (Classify | Retrieve, None) | (Done, _) => None,
        }
    }

    /// Node path the router takes for `category`
    pub fn path_for(category: Category) -> Vec<WorkflowState> {
        let mut path = Vec::new();
        let mut state = WorkflowState::Start;
        while let Some(next) = state.next(Some(category)) {
            if next.is_node() {
                path.push(next);
            }
            state = next;
        }
        path
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
