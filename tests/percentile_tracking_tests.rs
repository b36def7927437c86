//! Integration tests for latency percentiles, from the raw histogram up to
//! threshold evaluation on aggregated series.

use order_loadtest::aggregator::{MetricsAggregator, RequestOutcome, HTTP_REQS};
use order_loadtest::percentiles::LatencyHistogram;
use order_loadtest::thresholds::{Threshold, ThresholdEvaluator, ThresholdStatus};
use tokio::time::{Duration, Instant};

#[test]
fn test_histogram_large_dataset() {
    let mut histogram = LatencyHistogram::new();

    // 1000 samples from 1ms to 1000ms
    for i in 1..=1000u64 {
        histogram.record(Duration::from_millis(i));
    }

    let stats = histogram.stats().expect("Should have stats");
    assert_eq!(stats.count, 1000);

    assert!(
        stats.p50 >= 480_000 && stats.p50 <= 520_000,
        "P50 {}μs should be around 500000μs",
        stats.p50
    );
    assert!(
        stats.p95 >= 930_000 && stats.p95 <= 970_000,
        "P95 {}μs should be around 950000μs",
        stats.p95
    );
    assert!(
        stats.p99 >= 970_000 && stats.p99 <= 1_010_000,
        "P99 {}μs should be around 990000μs",
        stats.p99
    );
}

#[test]
fn test_histogram_skewed_distribution() {
    let mut histogram = LatencyHistogram::new();

    // 90 fast requests (10ms) and 10 slow ones (1000ms)
    for _ in 0..90 {
        histogram.record(Duration::from_millis(10));
    }
    for _ in 0..10 {
        histogram.record(Duration::from_millis(1000));
    }

    let p90 = histogram.value_at_percentile(90.0).unwrap();
    let p95 = histogram.value_at_percentile(95.0).unwrap();
    assert!(p90 <= 15_000, "P90 {}μs should be around 10000μs", p90);
    assert!(p95 >= 900_000, "P95 {}μs should be around 1000000μs", p95);
}

fn ingest(aggregator: &MetricsAggregator, step: &str, latency: Duration) {
    let outcome = RequestOutcome::response(step, 0, Instant::now(), 200, latency);
    aggregator.ingest(&outcome, &[]);
}

#[test]
fn test_p95_threshold_on_aggregated_latency() {
    let aggregator = MetricsAggregator::new();

    // 94% of requests at 100ms, 6% at 2s: p95 lands in the slow tail.
    for i in 0..1000 {
        let latency = if i % 100 < 94 {
            Duration::from_millis(100)
        } else {
            Duration::from_secs(2)
        };
        ingest(&aggregator, "get_order_book", latency);
    }

    let snapshot = aggregator.snapshot();
    let p95_us = snapshot.series(HTTP_REQS).unwrap().percentile(95.0).unwrap();
    assert!(p95_us >= 1_990_000, "p95 was {}μs", p95_us);

    let evaluator = ThresholdEvaluator::new(vec![
        Threshold::parse("http_req_duration", "p(95)<800").unwrap(),
        Threshold::parse("http_req_duration", "p(90)<800").unwrap(),
        Threshold::parse("http_req_duration{step:get_order_book}", "med<150").unwrap(),
    ]);
    let verdict = evaluator.evaluate(&snapshot);

    assert_eq!(verdict.results[0].status, ThresholdStatus::Failed);
    assert_eq!(verdict.results[1].status, ThresholdStatus::Passed);
    assert_eq!(verdict.results[2].status, ThresholdStatus::Passed);
    assert!(!verdict.passed);
}

#[test]
fn test_latency_stats_cover_every_series_with_latency() {
    let aggregator = MetricsAggregator::new();
    ingest(&aggregator, "place_buy_order", Duration::from_millis(40));
    ingest(&aggregator, "get_order_book", Duration::from_millis(15));
    aggregator.record_iteration(Duration::from_millis(1600));

    let stats = aggregator.snapshot().latency_stats();
    let labels: Vec<&str> = stats.keys().map(|k| k.as_str()).collect();

    assert_eq!(
        labels,
        vec![
            "http_reqs",
            "http_reqs{step:get_order_book}",
            "http_reqs{step:place_buy_order}",
            "iterations",
        ]
    );
    assert_eq!(stats["http_reqs"].count, 2);
}
