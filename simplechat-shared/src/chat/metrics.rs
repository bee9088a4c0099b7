//! Prometheus exposition parsing for the vLLM metrics the client displays.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const TIME_PER_OUTPUT_TOKEN_SUM: &str = "vllm:time_per_output_token_seconds_sum";
const TIME_PER_OUTPUT_TOKEN_COUNT: &str = "vllm:time_per_output_token_seconds_count";
const REQUESTS_RUNNING: &str = "vllm:num_requests_running";
const REQUESTS_WAITING: &str = "vllm:num_requests_waiting";
const KV_CACHE_USAGE: &str = "vllm:kv_cache_usage_perc";
const KV_CACHE_USAGE_DEPRECATED: &str = "vllm:gpu_cache_usage_perc";
const PROMPT_TOKENS_TOTAL: &str = "vllm:prompt_tokens_total";
const GENERATION_TOKENS_TOTAL: &str = "vllm:generation_tokens_total";

/// Server-side performance figures taken from one metrics scrape.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Mean time per output token, in milliseconds.
    pub time_per_output_token_ms: u64,
    /// Requests being generated.
    pub requests_running: u64,
    /// Requests queued.
    pub requests_waiting: u64,
    /// KV cache usage, in percent.
    pub cache_usage_percent: u64,
    /// Lifetime prompt tokens.
    pub total_input_tokens: u64,
    /// Lifetime generated tokens.
    pub total_output_tokens: u64,
    /// Sum of the two lifetime counters.
    pub total_tokens: u64,
}

struct SamplePattern(Regex);

impl SamplePattern {
    fn new(name: &str) -> Self {
        let pattern = format!(
            r"(?m)^{}(?:\{{[^}}\n]*\}})?[ \t]+([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)",
            regex::escape(name)
        );
        // The pattern is assembled from escaped constants and cannot be invalid.
        Self(Regex::new(&pattern).unwrap_or_else(|_| unreachable!("invalid metric pattern")))
    }

    /// Value of the first sample line of this family.
    fn first_value(&self, text: &str) -> Option<f64> {
        self.0
            .captures(text)
            .and_then(|captures| captures.get(1))
            .and_then(|value| value.as_str().parse::<f64>().ok())
            .filter(|value| value.is_finite())
    }
}

macro_rules! sample_pattern {
    ($ident:ident, $name:expr) => {
        static $ident: LazyLock<SamplePattern> = LazyLock::new(|| SamplePattern::new($name));
    };
}

sample_pattern!(TPOT_SUM, TIME_PER_OUTPUT_TOKEN_SUM);
sample_pattern!(TPOT_COUNT, TIME_PER_OUTPUT_TOKEN_COUNT);
sample_pattern!(RUNNING, REQUESTS_RUNNING);
sample_pattern!(WAITING, REQUESTS_WAITING);
sample_pattern!(CACHE, KV_CACHE_USAGE);
sample_pattern!(CACHE_DEPRECATED, KV_CACHE_USAGE_DEPRECATED);
sample_pattern!(PROMPT_TOKENS, PROMPT_TOKENS_TOTAL);
sample_pattern!(GENERATION_TOKENS, GENERATION_TOKENS_TOTAL);

/// Extracts a [`MetricsSnapshot`] from Prometheus text exposition.
///
/// Never fails: families that are absent or unparsable yield zero. Comment
/// lines never match because every pattern is anchored at the metric name.
#[must_use]
pub fn parse_metrics(text: &str) -> MetricsSnapshot {
    let time_per_output_token_ms = match (TPOT_SUM.first_value(text), TPOT_COUNT.first_value(text))
    {
        (Some(sum), Some(count)) if count > 0.0 => rounded(sum / count * 1000.0),
        _ => 0,
    };

    let mut cache_usage_percent = CACHE.first_value(text).map_or(0, |ratio| rounded(ratio * 100.0));
    if cache_usage_percent == 0 {
        cache_usage_percent = CACHE_DEPRECATED
            .first_value(text)
            .map_or(0, |ratio| rounded(ratio * 100.0));
    }

    let total_input_tokens = truncated(PROMPT_TOKENS.first_value(text));
    let total_output_tokens = truncated(GENERATION_TOKENS.first_value(text));

    MetricsSnapshot {
        time_per_output_token_ms,
        requests_running: truncated(RUNNING.first_value(text)),
        requests_waiting: truncated(WAITING.first_value(text)),
        cache_usage_percent,
        total_input_tokens,
        total_output_tokens,
        total_tokens: total_input_tokens.saturating_add(total_output_tokens),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn rounded(value: f64) -> u64 {
    // `as` saturates, so negatives land on zero.
    value.round() as u64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn truncated(value: Option<f64>) -> u64 {
    value.map_or(0, |value| value.trunc() as u64)
}
