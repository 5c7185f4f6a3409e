//! Utility functions for Model API
//!
//! This module provides timing helpers used by the pipeline and its callers.

use std::time::{Duration, Instant};
use std::future::Future;
use tokio::time::timeout;
use crate::error::{Error, Result};

/// Formats a duration at the precision inference timings need
///
/// ```
/// use common::utils::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_micros(850)), "850us");
/// assert_eq!(format_duration(Duration::from_micros(12_340)), "12.34ms");
/// assert_eq!(format_duration(Duration::from_millis(1_500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    match micros {
        0..=999 => format!("{}us", micros),
        1_000..=999_999 => format!("{:.2}ms", micros as f64 / 1_000.0),
        1_000_000..=59_999_999 => format!("{:.2}s", duration.as_secs_f64()),
        _ => format!("{}m {}s", duration.as_secs() / 60, duration.as_secs() % 60),
    }
}

/// Measures the execution time of a fallible function
///
/// # Examples
///
/// ```
/// use common::utils::measure_execution_time;
///
/// let (value, _elapsed) = measure_execution_time(|| Ok::<_, common::Error>(42)).unwrap();
/// assert_eq!(value, 42);
/// ```
pub fn measure_execution_time<T, F>(f: F) -> Result<(T, Duration)>
where
    F: FnOnce() -> Result<T>,
{
    let start = Instant::now();
    let result = f()?;
    Ok((result, start.elapsed()))
}

/// Executes a future with a timeout
///
/// The wrapped operation is not cancelled on timeout if it runs on a blocking
/// thread; the caller only stops waiting for it.
pub async fn execute_with_timeout<T, F>(
    future: F,
    duration: Duration,
    operation_name: &str,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "Operation '{}' timed out after {}",
            operation_name,
            format_duration(duration)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(250)), "250us");
        assert_eq!(format_duration(Duration::from_millis(3)), "3.00ms");
        assert_eq!(format_duration(Duration::from_secs(7)), "7.00s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "62m 5s");
    }

    #[test]
    fn test_measure_propagates_errors() {
        let result: Result<((), Duration)> =
            measure_execution_time(|| Err(Error::Internal("boom".into())));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_execute_with_timeout() {
        let ok = execute_with_timeout(async { Ok(7) }, Duration::from_secs(1), "fast").await;
        assert_eq!(ok.unwrap(), 7);

        let slow = execute_with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
            Duration::from_millis(10),
            "slow",
        )
        .await;
        assert!(slow.unwrap_err().is_timeout());
    }
}
