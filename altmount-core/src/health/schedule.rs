//! Scheduling math for the health pipeline. Pure functions over
//! timestamps; the worker writes the results into `scheduled_check_at`.

use chrono::{DateTime, Duration, Utc};

/// Base of the detection backoff ladder.
const DETECTION_BACKOFF_BASE_MINUTES: i64 = 15;

/// Both backoff ladders saturate at one day.
const BACKOFF_CAP_MINUTES: i64 = 24 * 60;

/// Newer releases are re-checked more often: fresh content loses segments
/// fastest, while a file that survived six months rarely degrades.
pub fn next_healthy_check(release: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let age = now - release;
    let delay = if age < Duration::days(7) {
        Duration::days(1)
    } else if age < Duration::days(30) {
        Duration::days(3)
    } else if age < Duration::days(180) {
        Duration::days(7)
    } else {
        Duration::days(30)
    };
    now + delay
}

/// Detection-phase backoff: `15 * 2^retry_count` minutes, capped at one
/// day. Saturating, so oversized retry counters cannot overflow.
pub fn detection_backoff(retry_count: i64) -> Duration {
    exponential_minutes(DETECTION_BACKOFF_BASE_MINUTES, retry_count)
}

/// Repair-phase backoff: the configured retrigger delay doubling per
/// notification, capped at one day.
pub fn repair_backoff(base: Duration, repair_retry_count: i64) -> Duration {
    exponential_minutes(base.num_minutes().max(1), repair_retry_count)
}

fn exponential_minutes(base_minutes: i64, count: i64) -> Duration {
    let shift = count.clamp(0, 30) as u32;
    let minutes = base_minutes
        .saturating_mul(1i64 << shift)
        .min(BACKOFF_CAP_MINUTES);
    Duration::minutes(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_recheck_bands_are_pinned() {
        let now = Utc::now();

        let fresh = now - Duration::days(2);
        assert_eq!(next_healthy_check(fresh, now), now + Duration::days(1));

        let recent = now - Duration::days(10);
        assert_eq!(next_healthy_check(recent, now), now + Duration::days(3));

        let settled = now - Duration::days(90);
        assert_eq!(next_healthy_check(settled, now), now + Duration::days(7));

        let archive = now - Duration::days(400);
        assert_eq!(next_healthy_check(archive, now), now + Duration::days(30));
    }

    #[test]
    fn band_edges_belong_to_the_older_band() {
        let now = Utc::now();
        assert_eq!(
            next_healthy_check(now - Duration::days(7), now),
            now + Duration::days(3)
        );
        assert_eq!(
            next_healthy_check(now - Duration::days(30), now),
            now + Duration::days(7)
        );
        assert_eq!(
            next_healthy_check(now - Duration::days(180), now),
            now + Duration::days(30)
        );
    }

    #[test]
    fn future_release_dates_count_as_fresh() {
        let now = Utc::now();
        assert_eq!(
            next_healthy_check(now + Duration::days(3), now),
            now + Duration::days(1)
        );
    }

    #[test]
    fn detection_backoff_doubles_and_caps() {
        assert_eq!(detection_backoff(0), Duration::minutes(15));
        assert_eq!(detection_backoff(1), Duration::minutes(30));
        assert_eq!(detection_backoff(2), Duration::minutes(60));
        assert_eq!(detection_backoff(6), Duration::minutes(960));
        // 15 * 2^7 = 1920 > 1440: capped.
        assert_eq!(detection_backoff(7), Duration::hours(24));
        assert_eq!(detection_backoff(i64::MAX), Duration::hours(24));
    }

    #[test]
    fn repair_backoff_doubles_from_its_base_and_caps() {
        let base = Duration::minutes(30);
        assert_eq!(repair_backoff(base, 0), Duration::minutes(30));
        assert_eq!(repair_backoff(base, 1), Duration::minutes(60));
        assert_eq!(repair_backoff(base, 3), Duration::minutes(240));
        assert_eq!(repair_backoff(base, 10), Duration::hours(24));
    }
}
