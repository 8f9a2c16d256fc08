use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};

#[derive(Clone)]
pub struct ServiceMetrics {
    pub registry: Registry,
    pub stock_movements_total: IntCounterVec,
    pub order_transitions_total: IntCounterVec,
    pub insufficient_stock_rejections: IntCounter,
    pub audit_emit_failures: IntCounter,
    pub transition_duration_seconds: Histogram,
    pub http_errors_total: IntCounterVec,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let stock_movements_total = IntCounterVec::new(
            prometheus::Opts::new(
                "stock_movements_total",
                "Recorded stock movements by direction",
            ),
            &["direction"],
        )
        .unwrap();
        let order_transitions_total = IntCounterVec::new(
            prometheus::Opts::new(
                "order_transitions_total",
                "Order state transitions by order kind and action",
            ),
            &["kind", "action"],
        )
        .unwrap();
        let insufficient_stock_rejections = IntCounter::new(
            "insufficient_stock_rejections_total",
            "Stock-out and fulfillment attempts rejected for insufficient stock",
        )
        .unwrap();
        let audit_emit_failures = IntCounter::new(
            "audit_emit_failures_total",
            "Audit entry persistence failures",
        )
        .unwrap();
        let transition_duration_seconds = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "order_transition_duration_seconds",
                "Duration of an order approval/fulfillment transaction",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0]),
        )
        .unwrap();
        let http_errors_total = IntCounterVec::new(
            prometheus::Opts::new(
                "http_errors_total",
                "Count of HTTP error responses emitted (status >= 400)",
            ),
            &["service", "code", "status"],
        )
        .unwrap();
        let _ = registry.register(Box::new(stock_movements_total.clone()));
        let _ = registry.register(Box::new(order_transitions_total.clone()));
        let _ = registry.register(Box::new(insufficient_stock_rejections.clone()));
        let _ = registry.register(Box::new(audit_emit_failures.clone()));
        let _ = registry.register(Box::new(transition_duration_seconds.clone()));
        let _ = registry.register(Box::new(http_errors_total.clone()));
        ServiceMetrics {
            registry,
            stock_movements_total,
            order_transitions_total,
            insufficient_stock_rejections,
            audit_emit_failures,
            transition_duration_seconds,
            http_errors_total,
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
