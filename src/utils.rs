use crate::error::ScopeError;
use std::time::{Duration, Instant};

/// Error type for polling operations
#[derive(Debug)]
pub enum PollError<E> {
    /// Condition never became true within the timeout
    Timeout(Duration),
    /// The condition itself failed
    ConditionError(E),
}

impl<E> std::fmt::Display for PollError<E>
where
    E: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::Timeout(after) => write!(f, "gave up after {after:?}"),
            PollError::ConditionError(e) => write!(f, "condition error: {e}"),
        }
    }
}

impl<E> std::error::Error for PollError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Timeout(_) => None,
            PollError::ConditionError(e) => Some(e),
        }
    }
}

impl From<PollError<ScopeError>> for ScopeError {
    fn from(e: PollError<ScopeError>) -> Self {
        match e {
            PollError::Timeout(after) => {
                ScopeError::Timeout(format!("instrument did not finish within {after:?}"))
            }
            PollError::ConditionError(e) => e,
        }
    }
}

/// Poll a condition with timeout
///
/// Calls `condition` until it returns `Ok(true)`, it fails, or `timeout`
/// has elapsed, sleeping `poll_interval` between calls.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use sds_scope::link::LinkBuilder;
/// use sds_scope::scpi;
/// use sds_scope::utils::poll_until;
///
/// let mut link = LinkBuilder::new().resource("TCPIP0::192.168.1.91::INSTR").open()?;
/// link.send(scpi::ARM)?;
/// poll_until(
///     || scpi::parse_sample_status_stopped(&link.query(scpi::SAMPLE_STATUS_QUERY)?),
///     Duration::from_secs(10),
///     Duration::from_millis(50),
/// )?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn poll_until<F, E>(
    mut condition: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Result<bool, E>,
{
    let start = Instant::now();

    loop {
        match condition() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => return Err(PollError::ConditionError(e)),
        }

        if start.elapsed() >= timeout {
            return Err(PollError::Timeout(timeout));
        }
        std::thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_until_success() {
        let mut count = 0;
        let result = poll_until(
            || {
                count += 1;
                Ok::<bool, &str>(count >= 3)
            },
            Duration::from_millis(500),
            Duration::from_millis(1),
        );

        assert!(result.is_ok());
        assert_eq!(count, 3);
    }

    #[test]
    fn test_poll_until_checks_at_least_once() {
        let result = poll_until(|| Ok::<bool, &str>(true), Duration::ZERO, Duration::from_millis(10));
        assert!(result.is_ok());
    }

    #[test]
    fn test_poll_until_timeout() {
        let result = poll_until(
            || Ok::<bool, &str>(false),
            Duration::from_millis(30),
            Duration::from_millis(5),
        );

        assert!(matches!(result, Err(PollError::Timeout(_))));
    }

    #[test]
    fn test_poll_until_error() {
        let result = poll_until(
            || Err::<bool, &str>("test error"),
            Duration::from_millis(100),
            Duration::from_millis(10),
        );

        assert!(matches!(result, Err(PollError::ConditionError("test error"))));
    }

    #[test]
    fn test_timeout_converts_to_scope_timeout() {
        let e: ScopeError = PollError::<ScopeError>::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(e, ScopeError::Timeout(_)));
    }
}
