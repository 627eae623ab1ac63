use super::{
    note_io_transient_error, note_io_write_retry, IO_WRITE_MAX_RETRIES, IO_WRITE_RETRY_BACKOFF_MS,
};
use std::io::{self, ErrorKind};
use std::time::Duration as StdDuration;
use tracing::debug;

/// Runs an idempotent write operation, retrying transient failures with a
/// fixed backoff. Only whole-file replacements go through here: a retried
/// partial append could leave a torn record behind.
pub(crate) fn with_retry<T, F>(mut operation: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    for attempt in 0..=IO_WRITE_MAX_RETRIES {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retryable = is_retryable_io_error(&error);
                if retryable {
                    note_io_transient_error();
                }
                if attempt < IO_WRITE_MAX_RETRIES && retryable {
                    note_io_write_retry();
                    debug!(
                        attempt,
                        error = %error,
                        "transient io error, retrying write"
                    );
                    std::thread::sleep(StdDuration::from_millis(
                        IO_WRITE_RETRY_BACKOFF_MS[attempt],
                    ));
                    continue;
                }
                return Err(error);
            }
        }
    }
    unreachable!("retry loop must return on success or terminal error");
}

pub fn is_retryable_io_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_transient_errors_until_success() {
        let mut calls = 0;
        let value = with_retry(|| {
            calls += 1;
            if calls < 2 {
                Err(io::Error::new(ErrorKind::Interrupted, "interrupted"))
            } else {
                Ok(calls)
            }
        })
        .expect("second attempt succeeds");
        assert_eq!(value, 2);
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let mut calls = 0;
        let error = with_retry(|| -> io::Result<()> {
            calls += 1;
            Err(io::Error::new(ErrorKind::PermissionDenied, "denied"))
        })
        .expect_err("permission errors are terminal");
        assert_eq!(error.kind(), ErrorKind::PermissionDenied);
        assert_eq!(calls, 1);
    }
}
