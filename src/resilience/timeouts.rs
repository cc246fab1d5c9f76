//! Deadline enforcement.

use std::future::Future;
use std::time::Duration;

/// Run `fut` under an optional deadline.
///
/// On expiry the future is dropped and the elapsed limit is returned.
pub async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Result<F::Output, Duration> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| limit),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_within_limit() {
        let out = within(Some(Duration::from_secs(1)), async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn test_expired() {
        let limit = Duration::from_millis(10);
        let out = within(Some(limit), tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(out, Err(limit));
    }

    #[tokio::test]
    async fn test_no_limit() {
        assert_eq!(within(None, async { "done" }).await, Ok("done"));
    }
}
