use std::sync::Arc;

use async_trait::async_trait;

use forkstress_core::{Job, TestResult};

use crate::error::LinkError;

/// Answers the two link operations on behalf of whoever owns the tokens.
///
/// The server calls these from its own runtime while the owner keeps
/// running elsewhere, so implementations must hand work off rather than
/// touch owner state directly.
#[async_trait]
pub trait LinkHandler: Send + Sync {
    /// Job bound to `token`, or `None` if it was already handed out.
    ///
    /// Unknown tokens are [`LinkError::UnknownToken`].
    async fn pull_job(&self, token: &str) -> Result<Option<Job>, LinkError>;

    /// Accept the single result for `token`.
    async fn push_result(&self, token: &str, result: TestResult) -> Result<(), LinkError>;
}

/// Blanket implementation so `Arc<dyn LinkHandler>` can be used directly.
#[async_trait]
impl<T: LinkHandler + ?Sized> LinkHandler for Arc<T> {
    async fn pull_job(&self, token: &str) -> Result<Option<Job>, LinkError> {
        (**self).pull_job(token).await
    }

    async fn push_result(&self, token: &str, result: TestResult) -> Result<(), LinkError> {
        (**self).push_result(token, result).await
    }
}
