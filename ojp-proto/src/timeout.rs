//! Deadline helper shared by the dispatcher and the proxy (§5, suspension
//! points i-v are all expressed in terms of this).

use crate::error::OjpError;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Runs `operation`, failing with [`OjpError::Deadline`] if it does not
/// complete within `budget_ms`.
pub async fn with_deadline<F, T>(operation: F, budget_ms: u64, operation_name: &str) -> Result<T, OjpError>
where
    F: Future<Output = Result<T, OjpError>>,
{
    let started = std::time::Instant::now();
    match timeout(Duration::from_millis(budget_ms), operation).await {
        Ok(result) => result,
        Err(_) => Err(OjpError::Deadline {
            operation: operation_name.to_string(),
            budget_ms,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_within_budget() {
        let result = with_deadline(async { Ok::<_, OjpError>(42) }, 100, "op").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn fails_past_budget() {
        let result = with_deadline(
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, OjpError>(())
            },
            5,
            "op",
        )
        .await;
        assert!(matches!(result, Err(OjpError::Deadline { .. })));
    }
}
