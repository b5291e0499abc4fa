// Prometheus metrics definitions for the Paddock backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Open store subscriptions backing live views.
    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge =
        IntGauge::new("paddock_active_subscriptions", "Open store subscriptions").unwrap();

    /// Live WebSocket connections.
    pub static ref CONNECTED_WEBSOCKETS: IntGauge =
        IntGauge::new("paddock_connected_websockets", "Live WebSocket connections").unwrap();

    /// Setup drafts currently open.
    pub static ref OPEN_SETUP_DRAFTS: IntGauge =
        IntGauge::new("paddock_open_setup_drafts", "Setup drafts currently open").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Document writes, by operation (add, set, update, delete).
    pub static ref DOCUMENT_WRITES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("paddock_document_writes_total", "Document writes"),
        &["op"],
    )
    .unwrap();

    /// Setup saves, by outcome (created, updated, failed, rejected).
    pub static ref SETUP_SAVES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("paddock_setup_saves_total", "Tournament setup saves"),
        &["outcome"],
    )
    .unwrap();

    /// Invitation resolutions, by outcome.
    pub static ref INVITATIONS_RESOLVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("paddock_invitations_resolved_total", "Invitations resolved"),
        &["outcome"],
    )
    .unwrap();

    /// Standings aggregations run.
    pub static ref STANDINGS_COMPUTED_TOTAL: IntCounter = IntCounter::new(
        "paddock_standings_computed_total",
        "Standings aggregations run",
    )
    .unwrap();

    /// Total WebSocket messages sent to clients.
    pub static ref WEBSOCKET_MESSAGES_SENT_TOTAL: IntCounter = IntCounter::new(
        "paddock_websocket_messages_sent_total",
        "Total WebSocket messages sent",
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("paddock_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "paddock_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_SUBSCRIPTIONS.clone()),
        Box::new(CONNECTED_WEBSOCKETS.clone()),
        Box::new(OPEN_SETUP_DRAFTS.clone()),
        Box::new(DOCUMENT_WRITES_TOTAL.clone()),
        Box::new(SETUP_SAVES_TOTAL.clone()),
        Box::new(INVITATIONS_RESOLVED_TOTAL.clone()),
        Box::new(STANDINGS_COMPUTED_TOTAL.clone()),
        Box::new(WEBSOCKET_MESSAGES_SENT_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::warn!("Metric registration skipped: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Path segments that are always followed by an identifier.
const ID_PARENTS: &[&str] = &[
    "setup",
    "tournaments",
    "races",
    "points",
    "invites",
    "users",
    "invitations",
];

/// Fixed words that may follow an id parent without being an id.
const ROUTE_WORDS: &[&str] = &["preset"];

/// Normalize a URL path for metric labels: replace identifier segments with
/// `:id` to prevent cardinality explosion.
pub fn normalize_path(path: &str) -> String {
    let mut previous = "";
    path.split('/')
        .map(|segment| {
            let is_id = segment.parse::<i64>().is_ok()
                || (ID_PARENTS.contains(&previous)
                    && !segment.is_empty()
                    && !ROUTE_WORDS.contains(&segment));
            previous = segment;
            if is_id {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
