//! Fleet controller counters.
//!
//! Emitted through the `metrics` facade; when `enable_metrics` is set the axum-prometheus
//! recorder picks them up and they are served from `/internal/metrics`.

use metrics::counter;

/// Record the outcome of one heartbeat attempt (`quiet`, `replied`, `failed`)
pub fn record_heartbeat(outcome: &'static str) {
    counter!("clawctl_heartbeats_total", "outcome" => outcome).increment(1);
}

/// Record a trial enforcement action (`warned`, `expired`)
pub fn record_trial_action(action: &'static str) {
    counter!("clawctl_trial_actions_total", "action" => action).increment(1);
}

/// Record a running deployment found without a container reference
pub fn record_missing_container(loop_name: &'static str) {
    counter!("clawctl_running_without_container_total", "loop" => loop_name).increment(1);
}

/// Record a gateway rejection by reason (`unauthenticated`, `rate_limited`, `quota_exceeded`, ...)
pub fn record_gateway_rejection(reason: &'static str) {
    counter!("clawctl_gateway_rejections_total", "reason" => reason).increment(1);
}

/// Record the outcome of a forwarded inference call
pub fn record_gateway_forward(status: u16) {
    counter!("clawctl_gateway_forwarded_total", "status" => status.to_string()).increment(1);
}

pub fn record_usage_written(tier: &'static str, tokens: i64) {
    counter!("clawctl_usage_records_total", "tier" => tier).increment(1);
    counter!("clawctl_usage_tokens_total", "tier" => tier).increment(tokens.max(0) as u64);
}

pub fn record_usage_write_failure() {
    counter!("clawctl_usage_record_failures_total").increment(1);
}

pub fn record_usage_pruned(count: u64) {
    counter!("clawctl_usage_records_pruned_total").increment(count);
}
