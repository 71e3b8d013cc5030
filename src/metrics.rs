//! Prometheus metrics for the knowledge graph API.
//!
//! Exposes:
//! - `kg_api_request_duration_seconds` (histogram)
//! - `kg_api_request_total` (counter with status)
//! - `kg_api_request_inflight` (gauge)
//! - `kg_api_search_tier_total` (counter per winning tier)
//! - `kg_api_fallback_answer_total` (counter)
//! - process metrics via `process` collector

use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
    TextEncoder,
};
use tracing::{error, warn};

use crate::search::SearchTier;

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 10ms up to ~80 seconds.
    let buckets =
        prometheus::exponential_buckets(0.01, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "kg_api_request_duration_seconds",
        "HTTP request duration in seconds",
        &["route"],
        buckets
    )
    .expect("failed to register request duration histogram")
});

static REQUEST_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "kg_api_request_total",
        "Total HTTP requests by route and status code",
        &["route", "status"]
    )
    .expect("failed to register request counter")
});

static REQUEST_INFLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "kg_api_request_inflight",
        "Number of in-flight requests",
        &["route"]
    )
    .expect("failed to register inflight gauge")
});

static SEARCH_TIER_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "kg_api_search_tier_total",
        "Searches by the tier that produced results",
        &["tier"]
    )
    .expect("failed to register search tier counter")
});

static FALLBACK_ANSWER_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "kg_api_fallback_answer_total",
        "Answers produced without the generation backend"
    )
    .expect("failed to register fallback counter")
});

/// Ensure collectors are registered.
pub fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&REQUEST_DURATION);
    Lazy::force(&REQUEST_TOTAL);
    Lazy::force(&REQUEST_INFLIGHT);
    Lazy::force(&SEARCH_TIER_TOTAL);
    Lazy::force(&FALLBACK_ANSWER_TOTAL);
}

/// In-flight marker for one request; the gauge is decremented on drop.
#[must_use = "dropping the guard ends the request immediately"]
pub struct InflightRequest {
    route: &'static str,
    started: Instant,
}

impl InflightRequest {
    /// Record duration and status, then release the in-flight slot.
    pub fn finish(self, status: StatusCode) {
        record_request_result(self.route, self.started.elapsed(), status);
    }
}

impl Drop for InflightRequest {
    fn drop(&mut self) {
        REQUEST_INFLIGHT.with_label_values(&[self.route]).dec();
    }
}

/// Increment inflight gauge for a route.
pub fn record_request_start(route: &'static str) -> InflightRequest {
    init_collectors();
    REQUEST_INFLIGHT.with_label_values(&[route]).inc();
    InflightRequest {
        route,
        started: Instant::now(),
    }
}

/// Record request completion with duration and status.
fn record_request_result(route: &'static str, duration: Duration, status: StatusCode) {
    REQUEST_DURATION
        .with_label_values(&[route])
        .observe(duration.as_secs_f64());
    REQUEST_TOTAL
        .with_label_values(&[route, status.as_str()])
        .inc();
}

/// Count the tier that answered a search (`none` when every tier was empty).
pub fn record_search_tier(tier: Option<SearchTier>) {
    init_collectors();
    let label = tier.map(|t| t.as_str()).unwrap_or("none");
    SEARCH_TIER_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_fallback_answer() {
    init_collectors();
    FALLBACK_ANSWER_TOTAL.inc();
}

/// Prometheus text exposition of the default registry.
pub fn metrics_response() -> Response<Full<Bytes>> {
    init_collectors();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        let mut response = Response::new(Full::from("encode error"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return response;
    }

    let mut response = Response::new(Full::from(buffer));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn records_successful_request_metrics() {
        let route = "test_route_success";

        let request = record_request_start(route);
        assert_eq!(REQUEST_INFLIGHT.with_label_values(&[route]).get(), 1);

        request.finish(StatusCode::OK);

        assert_eq!(REQUEST_INFLIGHT.with_label_values(&[route]).get(), 0);
        assert_eq!(REQUEST_TOTAL.with_label_values(&[route, "200"]).get(), 1);
        assert_eq!(
            REQUEST_DURATION
                .with_label_values(&[route])
                .get_sample_count(),
            1
        );
    }

    #[test]
    fn records_failed_request_metrics() {
        let route = "test_route_error";

        record_request_start(route).finish(StatusCode::NOT_FOUND);

        assert_eq!(REQUEST_TOTAL.with_label_values(&[route, "404"]).get(), 1);
    }

    #[tokio::test]
    async fn cancelled_request_releases_inflight_slot() {
        let route = "test_route_cancelled";

        let pending = async move {
            let _request = record_request_start(route);
            std::future::pending::<()>().await;
        };
        let timed_out = tokio::time::timeout(Duration::from_millis(50), pending).await;

        assert!(timed_out.is_err());
        assert_eq!(REQUEST_INFLIGHT.with_label_values(&[route]).get(), 0);
        assert_eq!(
            REQUEST_DURATION
                .with_label_values(&[route])
                .get_sample_count(),
            0
        );
    }

    #[test]
    fn search_tier_counter_labels_none_for_empty_searches() {
        let before = SEARCH_TIER_TOTAL.with_label_values(&["none"]).get();
        record_search_tier(None);
        assert!(SEARCH_TIER_TOTAL.with_label_values(&["none"]).get() > before);

        let before = SEARCH_TIER_TOTAL.with_label_values(&["keyword"]).get();
        record_search_tier(Some(SearchTier::Keyword));
        assert!(SEARCH_TIER_TOTAL.with_label_values(&["keyword"]).get() > before);
    }

    #[test]
    fn fallback_counter_increments() {
        let before = FALLBACK_ANSWER_TOTAL.get();
        record_fallback_answer();
        assert!(FALLBACK_ANSWER_TOTAL.get() > before);
    }

    #[test]
    fn init_collectors_can_be_called_multiple_times() {
        init_collectors();
        init_collectors();
    }

    #[tokio::test]
    async fn metrics_response_contains_registered_metrics() {
        let route = "test_metrics_response";
        record_request_start(route).finish(StatusCode::OK);

        let response = metrics_response();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body_bytes.to_vec()).expect("utf-8 metrics body");
        assert!(text.contains("kg_api_request_total"));
        assert!(text.contains("kg_api_request_duration_seconds"));
        assert!(text.contains(route));
    }
}
