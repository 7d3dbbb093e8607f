//! Cache metric names and recording helpers.

use std::time::Duration;

/// Metric name constants, kept in one place so dashboards and alerts have a
/// single source of truth.
pub mod names {
    pub const CACHE_HITS: &str = "readshelf_cache_hits_total";
    pub const CACHE_MISSES: &str = "readshelf_cache_misses_total";
    pub const CACHE_SETS: &str = "readshelf_cache_sets_total";
    pub const CACHE_INVALIDATIONS: &str = "readshelf_cache_invalidations_total";
    pub const CACHE_ERRORS: &str = "readshelf_cache_errors_total";
    pub const CACHE_OP_DURATION: &str = "readshelf_cache_operation_duration_seconds";
}

pub fn record_hit(namespace: &str) {
    metrics::counter!(names::CACHE_HITS, "namespace" => namespace.to_string()).increment(1);
}

pub fn record_miss(namespace: &str) {
    metrics::counter!(names::CACHE_MISSES, "namespace" => namespace.to_string()).increment(1);
}

pub fn record_set(namespace: &str) {
    metrics::counter!(names::CACHE_SETS, "namespace" => namespace.to_string()).increment(1);
}

pub fn record_invalidation(kind: &'static str, count: u64) {
    metrics::counter!(names::CACHE_INVALIDATIONS, "kind" => kind).increment(count);
}

pub fn record_error(category: &str) {
    metrics::counter!(names::CACHE_ERRORS, "category" => category.to_string()).increment(1);
}

pub fn record_op_duration(op: &'static str, elapsed: Duration) {
    metrics::histogram!(names::CACHE_OP_DURATION, "op" => op).record(elapsed.as_secs_f64());
}
