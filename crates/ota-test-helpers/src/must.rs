//! Unwrap helpers for test code.
//!
//! Each helper panics with the error value and the caller's location, which
//! keeps `unwrap()` and `expect()` out of the test suites.

use std::fmt::Debug;

/// Unwrap a `Result`, panicking with the error on `Err`.
///
/// ```rust
/// use ota_test_helpers::must;
///
/// let value = must(Ok::<_, String>(7));
/// assert_eq!(value, 7);
/// ```
///
/// # Panics
///
/// Panics if the result is `Err`.
#[track_caller]
pub fn must<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("must: unexpected Err: {e:?}"),
    }
}

/// Unwrap an `Option`, panicking with `msg` on `None`.
///
/// # Panics
///
/// Panics if the option is `None`.
#[track_caller]
pub fn must_some<T>(option: Option<T>, msg: &str) -> T {
    match option {
        Some(v) => v,
        None => panic!("must_some: {msg}"),
    }
}

/// Unwrap a `Result` with a context message.
///
/// # Panics
///
/// Panics if the result is `Err`.
#[track_caller]
pub fn must_with<T, E: Debug>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("must_with: {context}: {e:?}"),
    }
}

#[cfg(feature = "mock")]
mod async_helpers {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    /// Await a fallible future and unwrap it.
    ///
    /// # Panics
    ///
    /// Panics if the future resolves to `Err`.
    #[track_caller]
    pub async fn must_async<F, T, E>(future: F) -> T
    where
        F: Future<Output = Result<T, E>>,
        E: Debug,
    {
        match future.await {
            Ok(v) => v,
            Err(e) => panic!("must_async: unexpected Err: {e:?}"),
        }
    }

    /// Await a future under a deadline.
    ///
    /// # Panics
    ///
    /// Panics if the deadline passes first.
    #[track_caller]
    pub async fn must_within<F, T>(deadline: Duration, future: F) -> T
    where
        F: Future<Output = T>,
    {
        match tokio::time::timeout(deadline, future).await {
            Ok(v) => v,
            Err(_) => panic!("must_within: future did not finish within {deadline:?}"),
        }
    }
}

#[cfg(feature = "mock")]
pub use async_helpers::{must_async, must_within};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_must_ok() {
        assert_eq!(must(Ok::<_, &str>(3)), 3);
    }

    #[test]
    #[should_panic(expected = "must: unexpected Err")]
    fn test_must_err_panics() {
        must(Err::<i32, _>("boom"));
    }

    #[test]
    #[should_panic(expected = "must_some: missing")]
    fn test_must_some_none_panics() {
        must_some(None::<i32>, "missing");
    }

    #[test]
    fn test_must_with_ok() {
        assert_eq!(must_with(Ok::<_, &str>("x"), "ctx"), "x");
    }
}
