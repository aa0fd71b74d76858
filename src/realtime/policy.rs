use crate::settings::RealtimeSettings;
use std::time::Duration;

/// Why the session is about to schedule another connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// An established connection went away.
    Dropped,
    /// The server rejected the credentials.
    AuthRejected,
    /// The attempt never produced a connection.
    AttemptFailed,
}

fn jittered_ms_with_nanos(base_ms: u64, ratio: f64, nanos: i128) -> u64 {
    let frac = ((nanos % 1000).abs() as f64) / 1000.0;
    let delta = (frac * 2.0 - 1.0) * (base_ms as f64 * ratio);
    (base_ms as f64 + delta).max(0.0) as u64
}

fn backoff_ms_with_nanos(min_ms: u64, max_ms: u64, attempt: u32, nanos: i128) -> u64 {
    let max_ms = max_ms.max(min_ms);
    let exponent = attempt.saturating_sub(1).min(16);
    let base_ms = min_ms.saturating_mul(1_u64 << exponent).min(max_ms);
    jittered_ms_with_nanos(base_ms, 0.2, nanos).clamp(min_ms, max_ms)
}

/// Delay before attempt number `attempt` (1-based) of the current cycle, or
/// `None` once the cycle is exhausted.
pub(crate) fn reconnect_delay(
    settings: &RealtimeSettings,
    trigger: Trigger,
    attempt: u32,
) -> Option<Duration> {
    if attempt > settings.max_reconnect_attempts {
        return None;
    }

    let ms = match trigger {
        Trigger::Dropped => settings.reconnect_delay_ms,
        Trigger::AuthRejected => settings.auth_retry_delay_ms,
        Trigger::AttemptFailed => {
            let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
            backoff_ms_with_nanos(settings.backoff_min_ms, settings.backoff_max_ms, attempt, nanos)
        }
    };
    Some(Duration::from_millis(ms))
}
