//! Metrics collection for the engine and the order saga
//!
//! Collectors live in one process-wide Prometheus registry that the metrics
//! server exposes.

use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::time::Instant;

lazy_static! {
    /// Global Prometheus registry instance
    pub static ref REGISTRY_INSTANCE: Registry = Registry::new();

    /// Engine commands handled, by symbol and command
    pub static ref ORDER_COUNTER_VEC: CounterVec = CounterVec::new(
        Opts::new("engine_orders", "engine commands handled"),
        &["symbol", "cmd"]
    )
    .unwrap();

    /// Fills executed, by symbol
    pub static ref TRADE_COUNTER_VEC: CounterVec =
        CounterVec::new(Opts::new("engine_trades", "fills executed"), &["symbol"]).unwrap();

    /// Orders that reached a terminal state in the engine
    pub static ref COMPLETION_COUNTER_VEC: CounterVec = CounterVec::new(
        Opts::new("engine_completions", "orders completed or withdrawn"),
        &["symbol", "status"]
    )
    .unwrap();

    /// Saga steps by stage and outcome
    pub static ref SAGA_COUNTER_VEC: CounterVec = CounterVec::new(
        Opts::new("saga_events", "saga steps by outcome"),
        &["stage", "outcome"]
    )
    .unwrap();

    /// Publishes that had to be retried
    pub static ref PUBLISH_RETRY_COUNTER_VEC: CounterVec = CounterVec::new(
        Opts::new("bus_publish_retries", "publish retries"),
        &["topic"]
    )
    .unwrap();

    /// Histogram for tracking method execution times
    pub static ref METHOD_HISTOGRAM_VEC: HistogramVec = HistogramVec::new(
        HistogramOpts::new("method_cost", "method cost"),
        &["method"]
    )
    .unwrap();
}

/// Registers all metric collectors with the global registry
pub fn init_registry() {
    let _ = REGISTRY_INSTANCE.register(Box::new(ORDER_COUNTER_VEC.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(TRADE_COUNTER_VEC.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(COMPLETION_COUNTER_VEC.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(SAGA_COUNTER_VEC.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(PUBLISH_RETRY_COUNTER_VEC.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(METHOD_HISTOGRAM_VEC.clone()));
}

pub fn saga_event(stage: &str, outcome: &str) {
    SAGA_COUNTER_VEC.with_label_values(&[stage, outcome]).inc();
}

/// Times a synchronous call under `method_name`
pub fn observe<T>(method_name: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    METHOD_HISTOGRAM_VEC
        .with_label_values(&[method_name])
        .observe(start.elapsed().as_secs_f64());
    result
}

/// Records metrics for an async operation
///
/// Counts the call under `saga_events{stage=method_name, outcome="called"}`
/// and observes how long the handler took.
pub async fn record_metrics<F, Fut, T>(method_name: &'static str, handler: F) -> T
where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = T> + Send,
{
    let start = Instant::now();
    saga_event(method_name, "called");
    let result = handler().await;

    let elapsed = start.elapsed();
    METHOD_HISTOGRAM_VEC
        .with_label_values(&[method_name])
        .observe(elapsed.as_secs_f64());

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_metrics_counts_and_times() {
        init_registry();
        let before = SAGA_COUNTER_VEC.with_label_values(&["sample", "called"]).get();
        let out = record_metrics("sample", || async { 7 }).await;
        assert_eq!(out, 7);
        assert_eq!(
            SAGA_COUNTER_VEC.with_label_values(&["sample", "called"]).get(),
            before + 1.0
        );
        assert!(observe("sample_sync", || true));
        assert!(METHOD_HISTOGRAM_VEC.with_label_values(&["sample_sync"]).get_sample_count() >= 1);
    }
}
