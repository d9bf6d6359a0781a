use std::future::Future;
use std::time::Duration;

use crate::device::DeviceError;

/// Race `operation` against a deadline.
///
/// Whichever settles first wins. When the deadline fires the operation is
/// dropped and its eventual outcome is never observed by the caller.
pub async fn with_timeout<F, T, E>(duration: Duration, operation: F) -> Result<T, DeviceError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<DeviceError>,
{
    match tokio::time::timeout(duration, operation).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(DeviceError::Timeout(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TransportError;

    #[tokio::test(start_paused = true)]
    async fn returns_operation_result_when_it_settles_first() {
        let result = with_timeout(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, TransportError>(7)
        })
        .await;
        assert!(matches!(result, Ok(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn fails_with_timeout_after_deadline() {
        let started = tokio::time::Instant::now();
        let result = with_timeout(Duration::from_secs(1), async {
            std::future::pending::<Result<(), TransportError>>().await
        })
        .await;
        assert!(matches!(result, Err(DeviceError::Timeout(d)) if d == Duration::from_secs(1)));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn passes_through_operation_errors() {
        let result = with_timeout(Duration::from_secs(1), async {
            Err::<(), _>(TransportError::SessionBusy)
        })
        .await;
        assert!(matches!(
            result,
            Err(DeviceError::TransportFailure(TransportError::SessionBusy))
        ));
    }
}
