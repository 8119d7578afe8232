use std::time::Duration;

/// Replenish period and burst size for `max_requests` per `window_seconds`.
///
/// The bucket starts full, so a client gets the whole cap at once and then
/// one request back every `window / max_requests`.
pub fn governor_quota(window_seconds: u64, max_requests: u32) -> (Duration, u32) {
    let burst = max_requests.max(1);
    let window = Duration::from_secs(window_seconds.max(1));
    let period = (window / burst).max(Duration::from_millis(1));
    (period, burst)
}
