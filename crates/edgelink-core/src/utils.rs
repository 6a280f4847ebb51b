/*!
 * Utility functions and helpers for EdgeLink.
 *
 * This module provides common async utilities used throughout the EdgeLink crates.
 */
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;

/// Run a future, turning a panic inside it into an error built by `on_panic`
/// from the panic message.
pub async fn catch_panic<F, T, E>(
    future: F,
    on_panic: impl FnOnce(String) -> E,
) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(on_panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Convert milliseconds to a Duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Convert a millisecond setting where `0` means "disabled" into an optional Duration
pub fn nonzero_millis(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catch_panic() {
        let fine = catch_panic(async { Ok::<_, String>(7) }, |m| m).await;
        assert_eq!(fine, Ok(7));

        let failed = catch_panic(async { Err::<u8, _>("refused".to_string()) }, |m| m).await;
        assert_eq!(failed, Err("refused".to_string()));

        let code = 3;
        let panicked = catch_panic(
            async move {
                if code == 3 {
                    panic!("driver bug in register {}", code);
                }
                Ok::<u8, String>(0)
            },
            |m| format!("panicked: {}", m),
        )
        .await;
        assert_eq!(panicked, Err("panicked: driver bug in register 3".to_string()));

        let literal = catch_panic(
            async {
                if code > 0 {
                    panic!("boom");
                }
                Ok::<u8, String>(0)
            },
            |m| m,
        )
        .await;
        assert_eq!(literal, Err("boom".to_string()));
    }

    #[test]
    fn test_duration_conversions() {
        assert_eq!(millis_to_duration(1234), Duration::from_millis(1234));
        assert_eq!(nonzero_millis(0), None);
        assert_eq!(nonzero_millis(250), Some(Duration::from_millis(250)));
    }
}
