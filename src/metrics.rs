use tracing::trace;

// Trace-based metric helpers. The Prometheus recorder installed in main
// picks up request traces; these keep hot paths free of macro plumbing.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "pricelens.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn op_elapsed(op: &'static str, elapsed_ms: u128) {
    trace!(
        target = "pricelens.metrics",
        op = op,
        elapsed_ms = elapsed_ms as u64,
        "op_elapsed"
    );
}

pub fn store_fallback(op: &'static str) {
    trace!(
        target = "pricelens.metrics",
        op = op,
        "store_fallback_total_inc"
    );
}
