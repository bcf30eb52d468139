//! Generation provider adapters

pub mod command;
pub mod offline;

pub use command::CommandProvider;
pub use offline::OfflineProvider;

use crate::config::{GenerationConfig, ProviderKind};
use std::sync::Arc;
use tollgate_cache::GenerationProvider;

/// Characters per unit when a provider does not report usage
pub const CHARS_PER_UNIT: usize = 4;

/// Rough unit count for `text`
pub fn estimate_units(text: &str) -> u64 {
    (text.len() / CHARS_PER_UNIT).max(1) as u64
}

/// Build the configured provider
pub fn from_config(config: &GenerationConfig) -> Arc<dyn GenerationProvider> {
    match config.provider {
        ProviderKind::Command => Arc::new(CommandProvider::from_config(config)),
        ProviderKind::Offline => Arc::new(OfflineProvider::new()),
    }
}
