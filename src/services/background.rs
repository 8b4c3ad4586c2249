//! Detached work
//!
//! Cache writes never sit on a response path, and a credential rotation must
//! finish even if the request that started it is dropped.

use std::future::Future;

use crate::error::AuthError;

/// Capability to run work outside the lifetime of the current request
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl Detached {
    /// Fire and forget. Failures are logged at warn level under `task`.
    pub fn spawn<F>(&self, task: &'static str, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = work.await {
                tracing::warn!(task, error = %format!("{:#}", e), "Detached task failed");
            }
        });
    }

    /// Run `work` on its own task and wait for it.
    ///
    /// Dropping the returned future does not cancel `work`.
    pub async fn shielded<F, T>(&self, work: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, AuthError>> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::spawn(work).await {
            Ok(result) => result,
            Err(join_error) => Err(AuthError::Internal(anyhow::anyhow!(
                "shielded task did not complete: {}",
                join_error
            ))),
        }
    }
}
