use crate::models::{Counter, ProgressPayload, ProgressSnapshot};
use crate::services::stage_telemetry::split_stage;

pub const MIN_SAMPLE_INTERVAL_MS: i64 = 120;
pub const SPEED_SMOOTHING: f64 = 0.3;

/// Running throughput estimate for one measured subject.
///
/// A sample is only blended when more than `min_interval_ms` passed and the
/// byte count did not go backwards. The last sample is recorded either way.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferStats {
    pub last_bytes: Option<u64>,
    pub last_timestamp_ms: i64,
    pub smoothed_speed_bps: f64,
    min_interval_ms: i64,
    smoothing: f64,
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::with_params(MIN_SAMPLE_INTERVAL_MS, SPEED_SMOOTHING)
    }
}

impl TransferStats {
    pub fn with_params(min_interval_ms: i64, smoothing: f64) -> Self {
        Self {
            last_bytes: None,
            last_timestamp_ms: 0,
            smoothed_speed_bps: 0.0,
            min_interval_ms,
            smoothing,
        }
    }

    pub fn reset(&mut self) {
        self.last_bytes = None;
        self.last_timestamp_ms = 0;
        self.smoothed_speed_bps = 0.0;
    }

    pub fn is_reset(&self) -> bool {
        self.last_bytes.is_none() && self.last_timestamp_ms == 0 && self.smoothed_speed_bps == 0.0
    }

    /// Feeds one progress sample and returns the current speed estimate.
    pub fn update(&mut self, downloaded: Option<u64>, total: Option<u64>, now_ms: i64) -> f64 {
        let (Some(downloaded), Some(_total)) = (downloaded, total) else {
            self.reset();
            return 0.0;
        };

        let Some(last_bytes) = self.last_bytes else {
            self.last_bytes = Some(downloaded);
            self.last_timestamp_ms = now_ms;
            return 0.0;
        };

        let elapsed_ms = now_ms - self.last_timestamp_ms;
        if elapsed_ms > self.min_interval_ms && downloaded >= last_bytes {
            let delta = (downloaded - last_bytes) as f64;
            let instantaneous = delta / (elapsed_ms as f64 / 1000.0);
            self.smoothed_speed_bps = if self.smoothed_speed_bps > 0.0 {
                self.smoothed_speed_bps * (1.0 - self.smoothing) + instantaneous * self.smoothing
            } else {
                instantaneous
            };
        }

        self.last_bytes = Some(downloaded);
        self.last_timestamp_ms = now_ms;
        self.smoothed_speed_bps
    }
}

/// Merges a progress payload into a session or overlay snapshot. Fields the
/// payload omits keep their previous values; speed comes from the payload
/// when the backend reports one, otherwise from `stats`.
pub fn merge_progress(
    snapshot: &mut ProgressSnapshot,
    payload: &ProgressPayload,
    stats: &mut TransferStats,
    now_ms: i64,
) {
    if !payload.stage.trim().is_empty() {
        let parts = split_stage(&payload.stage);
        snapshot.telemetry.stage_label = parts.stage_label;
        snapshot.telemetry.current_item = parts.current_item;
    }
    if payload.has_percent() {
        snapshot.progress_percent = payload.percent();
    }
    if let (Some(current), Some(total)) = (payload.downloaded_bytes, payload.total_bytes) {
        snapshot.bytes = Counter { current, total };
    }
    if let (Some(current), Some(total)) = (payload.current, payload.total) {
        snapshot.file_count = Counter { current, total };
    }

    let estimated = stats.update(payload.downloaded_bytes, payload.total_bytes, now_ms);
    snapshot.telemetry.speed_bps = payload
        .speed_bps
        .filter(|speed| speed.is_finite() && *speed >= 0.0)
        .unwrap_or(estimated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_sample_only_records() {
        let mut stats = TransferStats::default();
        assert_eq!(stats.update(Some(1_000), Some(10_000), 5_000), 0.0);
        assert_eq!(stats.last_bytes, Some(1_000));
        assert_eq!(stats.last_timestamp_ms, 5_000);
        assert_eq!(stats.smoothed_speed_bps, 0.0);
    }

    #[test]
    fn ema_bootstraps_then_blends() {
        let mut stats = TransferStats::default();
        stats.update(Some(0), Some(10_000), 0);
        assert_eq!(stats.update(Some(1_000), Some(10_000), 1_000), 1_000.0);
        let blended = stats.update(Some(3_000), Some(10_000), 2_000);
        assert!((blended - (1_000.0 * 0.7 + 2_000.0 * 0.3)).abs() < 1e-9);
    }

    #[test]
    fn jitter_and_rewind_are_rejected_but_recorded() {
        let mut stats = TransferStats::default();
        stats.update(Some(0), Some(10_000), 0);
        stats.update(Some(1_000), Some(10_000), 1_000);

        assert_eq!(stats.update(Some(1_500), Some(10_000), 1_100), 1_000.0);
        assert_eq!(stats.last_bytes, Some(1_500));
        assert_eq!(stats.last_timestamp_ms, 1_100);

        assert_eq!(stats.update(Some(200), Some(10_000), 2_100), 1_000.0);
        assert_eq!(stats.last_bytes, Some(200));

        let resumed = stats.update(Some(1_200), Some(10_000), 3_100);
        assert!((resumed - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn missing_bytes_reset_the_tracker() {
        let mut stats = TransferStats::default();
        stats.update(Some(0), Some(10), 0);
        stats.update(Some(5), Some(10), 1_000);
        assert!(stats.smoothed_speed_bps > 0.0);
        assert_eq!(stats.update(None, Some(10), 2_000), 0.0);
        assert!(stats.is_reset());
        assert_eq!(stats.update(Some(5), None, 3_000), 0.0);
        assert!(stats.is_reset());
    }

    #[test]
    fn merge_keeps_omitted_fields() {
        let mut snapshot = ProgressSnapshot::default();
        let mut stats = TransferStats::default();
        let first = ProgressPayload::stage("Downloading sodium.jar (1/4)", 25.0)
            .with_bytes(100, 400)
            .with_count(1, 4);
        merge_progress(&mut snapshot, &first, &mut stats, 0);
        assert_eq!(snapshot.telemetry.stage_label, "Downloading");
        assert_eq!(snapshot.telemetry.current_item, "sodium.jar");
        assert_eq!(snapshot.file_count, Counter { current: 1, total: 4 });

        let mut second = ProgressPayload::default();
        second.speed_bps = Some(512.0);
        merge_progress(&mut snapshot, &second, &mut stats, 500);
        assert_eq!(snapshot.progress_percent, 25.0);
        assert_eq!(snapshot.bytes, Counter { current: 100, total: 400 });
        assert_eq!(snapshot.telemetry.current_item, "sodium.jar");
        assert_eq!(snapshot.telemetry.speed_bps, 512.0);
    }

    proptest! {
        #[test]
        fn ema_stays_within_observed_rates(
            steps in proptest::collection::vec((1u64..5_000_000, 121i64..5_000), 2..40)
        ) {
            let mut stats = TransferStats::default();
            let mut bytes = 0u64;
            let mut now = 1_000i64;
            stats.update(Some(bytes), Some(u64::MAX), now);

            let mut min_rate = f64::INFINITY;
            let mut max_rate = 0.0f64;
            for (index, (delta, elapsed)) in steps.iter().enumerate() {
                bytes += delta;
                now += elapsed;
                let rate = *delta as f64 / (*elapsed as f64 / 1000.0);
                min_rate = min_rate.min(rate);
                max_rate = max_rate.max(rate);
                let speed = stats.update(Some(bytes), Some(u64::MAX), now);
                if index >= 1 {
                    prop_assert!(speed > 0.0);
                }
                prop_assert!(speed <= max_rate * (1.0 + 1e-9));
                prop_assert!(speed >= min_rate * (1.0 - 1e-9));
            }
        }
    }
}
