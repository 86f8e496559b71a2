use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Poll `check` until it yields a value or `timeout` elapses.
///
/// `check` always runs at least once, so a zero timeout still samples the
/// condition. The calling thread is blocked for the whole wait.
pub fn poll_until<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_first_value() {
        let mut calls = 0;
        let value = poll_until(Duration::from_secs(1), || {
            calls += 1;
            (calls == 3).then_some(calls)
        });
        assert_eq!(value, Some(3));
    }

    #[test]
    fn zero_timeout_samples_once() {
        let mut calls = 0;
        let value: Option<()> = poll_until(Duration::ZERO, || {
            calls += 1;
            None
        });
        assert!(value.is_none());
        assert_eq!(calls, 1);
    }

    #[test]
    fn gives_up_after_timeout() {
        let start = Instant::now();
        let value: Option<()> = poll_until(Duration::from_millis(20), || None);
        assert!(value.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
