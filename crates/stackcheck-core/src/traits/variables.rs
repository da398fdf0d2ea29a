//! Templating variable source trait.

use async_trait::async_trait;

use crate::Result;

/// A backend able to enumerate the values of a dashboard query variable.
#[async_trait]
pub trait VariableSource: Send + Sync {
    /// Resolve a variable definition such as `label_values(up, job)` into its
    /// candidate values, before any regex filtering.
    async fn variable_values(&self, query: &str) -> Result<Vec<String>>;
}
