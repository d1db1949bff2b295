//! Completion port (driven/secondary port)
//!
//! Receives the terminal outcome of every enumeration invocation, exactly
//! once, whether it finished or failed.

use anyhow::Result;

use crate::domain::CycleCompletion;

/// Port trait for cycle completion notifications
#[async_trait::async_trait]
pub trait ICompletionSink: Send + Sync {
    /// Delivers the outcome of one cycle invocation
    async fn complete(&self, completion: &CycleCompletion) -> Result<()>;
}
