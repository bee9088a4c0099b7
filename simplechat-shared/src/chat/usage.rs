//! Per-request token usage, either reported inline by the API or derived from
//! the difference between two metric snapshots.

use crate::chat::metrics::MetricsSnapshot;
use crate::models::UsageBreakdown;
use std::time::Duration;
use tracing::debug;

/// Token usage attributed to one request.
pub type UsageDelta = UsageBreakdown;

/// Returns `inline` verbatim when present, otherwise the clamped difference
/// between `current` and `baseline`.
#[must_use]
pub fn reconcile_usage(
    inline: Option<&UsageBreakdown>,
    baseline: &MetricsSnapshot,
    current: &MetricsSnapshot,
) -> UsageDelta {
    inline.copied().unwrap_or_else(|| snapshot_delta(baseline, current))
}

/// Per-field `max(0, current - baseline)` over the token counters.
#[must_use]
pub fn snapshot_delta(baseline: &MetricsSnapshot, current: &MetricsSnapshot) -> UsageDelta {
    UsageDelta::new(
        current
            .total_input_tokens
            .saturating_sub(baseline.total_input_tokens),
        current
            .total_output_tokens
            .saturating_sub(baseline.total_output_tokens),
        current.total_tokens.saturating_sub(baseline.total_tokens),
    )
}

/// Holds the metrics baseline the next snapshot delta is measured against.
#[derive(Debug, Clone, Default)]
pub struct UsageReconciler {
    baseline: MetricsSnapshot,
}

impl UsageReconciler {
    /// Seeds the baseline from the startup scrape; an unavailable scrape
    /// leaves an all-zero baseline.
    #[must_use]
    pub fn initialize(snapshot: Option<MetricsSnapshot>) -> Self {
        if snapshot.is_none() {
            debug!("no initial metrics snapshot, usage deltas start from zero");
        }
        Self {
            baseline: snapshot.unwrap_or_default(),
        }
    }

    /// Snapshot the next delta is measured against.
    #[must_use]
    pub const fn baseline(&self) -> &MetricsSnapshot {
        &self.baseline
    }

    /// Resolves the usage of the request that just finished.
    ///
    /// Inline usage is authoritative and leaves the baseline alone. Without
    /// it the delta against `current` is returned and `current` becomes the
    /// new baseline. With neither there is nothing to report.
    pub fn reconcile(
        &mut self,
        inline: Option<&UsageBreakdown>,
        current: Option<&MetricsSnapshot>,
    ) -> Option<UsageDelta> {
        if let Some(inline) = inline {
            return Some(*inline);
        }

        let current = current?;
        let delta = reconcile_usage(None, &self.baseline, current);
        self.baseline = *current;
        Some(delta)
    }
}

/// Generation speed of a finished request, rounded to whole tokens/s.
///
/// Uses the completion token count when known, otherwise the number of
/// streamed chunks. Elapsed times below one millisecond count as one.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn tokens_per_second(completion_tokens: u64, chunk_count: u64, elapsed: Duration) -> u64 {
    let units = if completion_tokens > 0 {
        completion_tokens
    } else {
        chunk_count
    };
    if units == 0 {
        return 0;
    }

    let seconds = elapsed.max(Duration::from_millis(1)).as_secs_f64();
    (units as f64 / seconds).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(input: u64, output: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            total_input_tokens: input,
            total_output_tokens: output,
            total_tokens: input + output,
            ..MetricsSnapshot::default()
        }
    }

    #[test]
    fn inline_usage_is_returned_verbatim() {
        let inline = UsageBreakdown::new(5, 7, 12);
        let mut reconciler = UsageReconciler::initialize(Some(snapshot(100, 50)));

        let usage = reconciler.reconcile(Some(&inline), Some(&snapshot(900, 900)));

        assert_eq!(usage, Some(inline));
        assert_eq!(reconciler.baseline(), &snapshot(100, 50));
        assert_eq!(
            reconcile_usage(Some(&inline), &snapshot(0, 0), &snapshot(3, 3)),
            inline
        );
    }

    #[test]
    fn delta_is_computed_and_baseline_advances() {
        let mut reconciler = UsageReconciler::initialize(Some(snapshot(100, 50)));

        let usage = reconciler.reconcile(None, Some(&snapshot(120, 65)));
        assert_eq!(usage, Some(UsageBreakdown::new(20, 15, 35)));
        assert_eq!(reconciler.baseline(), &snapshot(120, 65));

        let usage = reconciler.reconcile(None, Some(&snapshot(130, 70)));
        assert_eq!(usage, Some(UsageBreakdown::new(10, 5, 15)));
    }

    #[test]
    fn delta_is_clamped_after_a_counter_reset() {
        let mut reconciler = UsageReconciler::initialize(Some(snapshot(100, 50)));

        let usage = reconciler.reconcile(None, Some(&snapshot(10, 60)));
        assert_eq!(usage, Some(UsageBreakdown::new(0, 10, 0)));
    }

    #[test]
    fn failed_initial_snapshot_means_zero_baseline() {
        let mut reconciler = UsageReconciler::initialize(None);
        assert_eq!(reconciler.baseline(), &MetricsSnapshot::default());

        let usage = reconciler.reconcile(None, Some(&snapshot(4, 2)));
        assert_eq!(usage, Some(UsageBreakdown::new(4, 2, 6)));
    }

    #[test]
    fn nothing_to_report_without_inline_or_snapshot() {
        let mut reconciler = UsageReconciler::initialize(Some(snapshot(1, 1)));
        assert_eq!(reconciler.reconcile(None, None), None);
        assert_eq!(reconciler.baseline(), &snapshot(1, 1));
    }

    #[test]
    fn speed_prefers_completion_tokens() {
        assert_eq!(tokens_per_second(50, 10, Duration::from_secs(2)), 25);
        assert_eq!(tokens_per_second(0, 10, Duration::from_secs(4)), 3);
        assert_eq!(tokens_per_second(0, 0, Duration::from_secs(1)), 0);
    }

    #[test]
    fn speed_guards_against_zero_elapsed() {
        assert_eq!(tokens_per_second(3, 0, Duration::ZERO), 3000);
        assert_eq!(tokens_per_second(1, 0, Duration::from_micros(10)), 1000);
    }
}
