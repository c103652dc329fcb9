//! Provider and poller metrics.
//!
//! Components hold an `Option<Arc<dyn Metrics>>`; `None` disables recording.
//! [`PrometheusMetrics`] records through the `metrics` macros into its own
//! Prometheus recorder, and the API serves the rendered text on `/metrics`.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::time::Duration;
use tracing::debug;

use crate::provider::FetchError;

/// Sink for the reliability pipeline's measurements.
pub trait Metrics: Send + Sync {
    /// One call to an upstream provider, successful or not.
    fn record_provider_attempt(&self, provider: &str, duration: Duration, err: Option<&FetchError>);

    /// Upstream asked us to back off for `retry_after`.
    fn record_rate_limit(&self, provider: &str, retry_after: Duration);

    /// One full poller fetch-and-store cycle.
    fn record_poller_cycle(&self, duration: Duration, err: Option<&FetchError>);
}

/// Prometheus-backed sink. Each instance owns its recorder, so nothing is
/// installed globally and separate instances never share series.
pub struct PrometheusMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

fn outcome(err: Option<&FetchError>) -> &'static str {
    err.map_or("ok", FetchError::kind)
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_counter!(
                "provider_attempts_total",
                Unit::Count,
                "Upstream fetch attempts by provider and outcome"
            );
            describe_histogram!(
                "provider_attempt_duration_seconds",
                Unit::Seconds,
                "Upstream fetch attempt latency"
            );
            describe_counter!(
                "rate_limits_total",
                Unit::Count,
                "Rate-limit responses that carried a retry delay"
            );
            describe_gauge!(
                "rate_limit_retry_after_seconds",
                Unit::Seconds,
                "Most recent retry delay requested by upstream"
            );
            describe_counter!(
                "poller_cycles_total",
                Unit::Count,
                "Live poller cycles by outcome"
            );
            describe_histogram!(
                "poller_cycle_duration_seconds",
                Unit::Seconds,
                "Live poller cycle duration"
            );
        });

        debug!("Prometheus metrics recorder ready");
        PrometheusMetrics { recorder, handle }
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Drain histogram buffers; call periodically when nothing scrapes.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics for PrometheusMetrics {
    fn record_provider_attempt(&self, provider: &str, duration: Duration, err: Option<&FetchError>) {
        let provider = provider.to_string();
        metrics::with_local_recorder(&self.recorder, || {
            counter!(
                "provider_attempts_total",
                "provider" => provider.clone(),
                "outcome" => outcome(err),
            )
            .increment(1);
            histogram!("provider_attempt_duration_seconds", "provider" => provider)
                .record(duration.as_secs_f64());
        });
    }

    fn record_rate_limit(&self, provider: &str, retry_after: Duration) {
        let provider = provider.to_string();
        metrics::with_local_recorder(&self.recorder, || {
            counter!("rate_limits_total", "provider" => provider.clone()).increment(1);
            gauge!("rate_limit_retry_after_seconds", "provider" => provider)
                .set(retry_after.as_secs_f64());
        });
    }

    fn record_poller_cycle(&self, duration: Duration, err: Option<&FetchError>) {
        metrics::with_local_recorder(&self.recorder, || {
            counter!("poller_cycles_total", "outcome" => outcome(err)).increment(1);
            histogram!("poller_cycle_duration_seconds").record(duration.as_secs_f64());
        });
    }
}

/// Value of the first series named `name` whose labels contain `label`.
#[cfg(test)]
pub(crate) fn sample(text: &str, name: &str, label: &str) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            line.strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('{') || rest.starts_with(' '))
        })
        .find(|line| line.contains(label))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_labelled_by_outcome() {
        let m = PrometheusMetrics::new();
        m.record_provider_attempt("p", Duration::from_millis(4), None);
        m.record_provider_attempt("p", Duration::from_millis(2), Some(&FetchError::Canceled));
        m.record_provider_attempt("p", Duration::from_millis(2), Some(&FetchError::Canceled));

        let text = m.render();
        assert_eq!(sample(&text, "provider_attempts_total", "outcome=\"ok\""), Some(1.0));
        assert_eq!(
            sample(&text, "provider_attempts_total", "outcome=\"canceled\""),
            Some(2.0)
        );
        assert_eq!(
            sample(&text, "provider_attempt_duration_seconds_count", "provider=\"p\""),
            Some(3.0)
        );
    }

    #[test]
    fn test_rate_limit_keeps_latest_retry_after() {
        let m = PrometheusMetrics::new();
        m.record_rate_limit("p", Duration::from_secs(3));
        m.record_rate_limit("p", Duration::from_secs(1));

        let text = m.render();
        assert_eq!(sample(&text, "rate_limits_total", "provider=\"p\""), Some(2.0));
        assert_eq!(
            sample(&text, "rate_limit_retry_after_seconds", "provider=\"p\""),
            Some(1.0)
        );
    }

    #[test]
    fn test_instances_do_not_share_series() {
        let a = PrometheusMetrics::new();
        let b = PrometheusMetrics::new();
        a.record_poller_cycle(Duration::from_millis(1), None);

        assert_eq!(sample(&a.render(), "poller_cycles_total", "outcome=\"ok\""), Some(1.0));
        assert_eq!(sample(&b.render(), "poller_cycles_total", "outcome=\"ok\""), None);
    }

    #[test]
    fn test_render_includes_descriptions() {
        let m = PrometheusMetrics::new();
        m.record_poller_cycle(Duration::from_millis(1), Some(&FetchError::Unavailable));
        let text = m.render();
        assert!(text.contains("# HELP poller_cycles_total"));
        assert!(text.contains("outcome=\"unavailable\""));
    }
}
