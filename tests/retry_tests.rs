mod test_helpers;

use artemis_verify::retry::{RetryError, RetryWindow, poll, probe_fn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::window;
use tokio::time::Instant;

/// Probe that records the offset of every attempt and fails until attempt
/// `succeed_on` (1-based), or forever when it is None.
fn counting_probe(
    succeed_on: Option<u32>,
) -> (
    Arc<Mutex<Vec<Duration>>>,
    impl FnMut() -> std::future::Ready<Result<u32, String>> + Send,
) {
    let start = Instant::now();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let f = move || {
        let mut log = log.lock().unwrap();
        log.push(start.elapsed());
        let n = log.len() as u32;
        std::future::ready(match succeed_on {
            Some(k) if n >= k => Ok(n),
            _ => Err(format!("attempt {n} failed")),
        })
    };
    (seen, f)
}

fn whole_secs(offsets: &[Duration]) -> Vec<u64> {
    offsets.iter().map(|d| d.as_secs()).collect()
}

#[artemis_verify::test(start_paused = true)]
async fn always_failing_probe_runs_four_times_in_thirty_seconds() {
    let (seen, f) = counting_probe(None);
    let mut probe = probe_fn(f);

    let err = poll(&mut probe, window(30, 10)).await.unwrap_err();

    assert_eq!(err.attempts, 4);
    assert_eq!(whole_secs(&seen.lock().unwrap()), vec![0, 10, 20, 30]);
    assert_eq!(err.last_error, "attempt 4 failed");
    assert_eq!(err.elapsed.as_secs(), 30);
}

#[artemis_verify::test(start_paused = true)]
async fn attempts_never_exceed_the_window_bound() {
    for (timeout, interval) in [(30, 10), (35, 10), (20, 5), (9, 10), (180, 10)] {
        let w = window(timeout, interval);
        let (seen, f) = counting_probe(None);
        let mut probe = probe_fn(f);

        let err = poll(&mut probe, w).await.unwrap_err();

        assert_eq!(err.attempts, w.max_attempts(), "window {timeout}s/{interval}s");
        assert_eq!(seen.lock().unwrap().len() as u32, err.attempts);
    }
}

#[artemis_verify::test(start_paused = true)]
async fn success_on_first_attempt_returns_immediately() {
    let (seen, f) = counting_probe(Some(1));
    let mut probe = probe_fn(f);
    let start = Instant::now();

    let value = poll(&mut probe, window(180, 10)).await.unwrap();

    assert_eq!(value, 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[artemis_verify::test(start_paused = true)]
async fn success_on_kth_attempt_returns_within_k_intervals() {
    let (seen, f) = counting_probe(Some(3));
    let mut probe = probe_fn(f);
    let start = Instant::now();

    let value = poll(&mut probe, window(180, 10)).await.unwrap();

    assert_eq!(value, 3);
    assert_eq!(whole_secs(&seen.lock().unwrap()), vec![0, 10, 20]);
    assert!(start.elapsed() < Duration::from_secs(30));
}

#[artemis_verify::test(start_paused = true)]
async fn no_attempt_starts_after_the_timeout() {
    let (seen, f) = counting_probe(None);
    let mut probe = probe_fn(f);

    let _ = poll(&mut probe, window(25, 10)).await.unwrap_err();

    let offsets = seen.lock().unwrap().clone();
    assert_eq!(whole_secs(&offsets), vec![0, 10, 20]);
    assert!(offsets.iter().all(|o| *o <= Duration::from_secs(25)));
}

#[artemis_verify::test(start_paused = true)]
async fn timeout_shorter_than_interval_allows_a_single_attempt() {
    let (seen, f) = counting_probe(None);
    let mut probe = probe_fn(f);

    let err = poll(&mut probe, window(3, 10)).await.unwrap_err();

    assert_eq!(err.attempts, 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[artemis_verify::test(start_paused = true)]
async fn slow_attempts_do_not_add_extra_attempts() {
    let start = Instant::now();
    let offsets = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&offsets);
    let mut probe = probe_fn(move || {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(start.elapsed());
            tokio::time::sleep(Duration::from_secs(4)).await;
            Err::<(), _>("still down")
        }
    });

    let err = poll(&mut probe, window(30, 10)).await.unwrap_err();

    assert_eq!(err.attempts, 4);
    assert_eq!(
        whole_secs(&offsets.lock().unwrap()),
        vec![0, 10, 20, 30]
    );
}

#[artemis_verify::test(start_paused = true)]
async fn attempt_running_past_the_timeout_ends_the_poll() {
    let mut calls = 0u32;
    let mut probe = probe_fn(move || {
        calls += 1;
        async move {
            tokio::time::sleep(Duration::from_secs(40)).await;
            Err::<(), _>(format!("call {calls}"))
        }
    });

    let err = poll(&mut probe, window(30, 10)).await.unwrap_err();

    assert_eq!(err.attempts, 1);
    assert_eq!(err.last_error, "call 1");
}

#[artemis_verify::test]
fn zero_interval_is_a_configuration_error() {
    assert_eq!(
        RetryWindow::new(Duration::from_secs(30), Duration::ZERO),
        Err(RetryError::ZeroInterval)
    );
}

#[artemis_verify::test]
fn exhausted_message_names_the_last_error() {
    let err = artemis_verify::retry::Exhausted {
        last_error: "3 of 5 ready".to_string(),
        attempts: 4,
        elapsed: Duration::from_secs(30),
    };
    let msg = err.to_string();
    assert!(msg.contains("4 attempts"), "{msg}");
    assert!(msg.contains("3 of 5 ready"), "{msg}");
    assert_eq!(err.into_inner(), "3 of 5 ready");
}
