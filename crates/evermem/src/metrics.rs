//! Prometheus metrics registry (ambient observability). Transport is out of
//! scope for this core, so metrics are exposed as plain text rather than an
//! HTTP handler — the outer transport decides how to serve
//! `render_prometheus_text()`.

#[cfg(feature = "prometheus")]
mod imp {
    use std::sync::OnceLock;

    use lazy_static::lazy_static;
    use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Registry, TextEncoder};

    lazy_static! {
        static ref REGISTRY: Registry = Registry::new();
    }

    static EXTRACTIONS: OnceLock<IntCounterVec> = OnceLock::new();
    static BUFFER_DEPTH: OnceLock<IntGauge> = OnceLock::new();
    static SYNC_RETRIES: OnceLock<IntCounterVec> = OnceLock::new();
    static SEARCH_LATENCY: OnceLock<Histogram> = OnceLock::new();
    static EXTRACTION_LATENCY: OnceLock<Histogram> = OnceLock::new();

    pub fn init_metrics() {
        let extractions = EXTRACTIONS.get_or_init(|| {
            IntCounterVec::new(
                prometheus::opts!("evermem_extractions_total", "Episode extractions by outcome"),
                &["outcome"],
            )
            .unwrap()
        });
        let buffer_depth = BUFFER_DEPTH.get_or_init(|| {
            IntGauge::new("evermem_buffer_depth", "Unprocessed messages across all conversations").unwrap()
        });
        let sync_retries = SYNC_RETRIES.get_or_init(|| {
            IntCounterVec::new(
                prometheus::opts!("evermem_sync_retries_total", "C8 per-entity projection retries"),
                &["store"],
            )
            .unwrap()
        });
        let search_latency = SEARCH_LATENCY.get_or_init(|| {
            Histogram::with_opts(HistogramOpts::new(
                "evermem_search_latency_seconds",
                "C9 search latency by retrieve_method",
            ))
            .unwrap()
        });
        let extraction_latency = EXTRACTION_LATENCY.get_or_init(|| {
            Histogram::with_opts(HistogramOpts::new(
                "evermem_extraction_latency_seconds",
                "C4 end-to-end extraction latency",
            ))
            .unwrap()
        });

        REGISTRY.register(Box::new(extractions.clone())).ok();
        REGISTRY.register(Box::new(buffer_depth.clone())).ok();
        REGISTRY.register(Box::new(sync_retries.clone())).ok();
        REGISTRY.register(Box::new(search_latency.clone())).ok();
        REGISTRY.register(Box::new(extraction_latency.clone())).ok();
    }

    pub fn inc_extraction(outcome: &str) {
        if let Some(c) = EXTRACTIONS.get() {
            c.with_label_values(&[outcome]).inc();
        }
    }

    pub fn set_buffer_depth(depth: i64) {
        if let Some(g) = BUFFER_DEPTH.get() {
            g.set(depth);
        }
    }

    pub fn inc_sync_retry(store: &str) {
        if let Some(c) = SYNC_RETRIES.get() {
            c.with_label_values(&[store]).inc();
        }
    }

    pub fn observe_search_latency(seconds: f64) {
        if let Some(h) = SEARCH_LATENCY.get() {
            h.observe(seconds);
        }
    }

    pub fn observe_extraction_latency(seconds: f64) {
        if let Some(h) = EXTRACTION_LATENCY.get() {
            h.observe(seconds);
        }
    }

    pub fn render_prometheus_text() -> String {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(feature = "prometheus")]
pub use imp::*;

#[cfg(not(feature = "prometheus"))]
mod noop {
    pub fn init_metrics() {}
    pub fn inc_extraction(_outcome: &str) {}
    pub fn set_buffer_depth(_depth: i64) {}
    pub fn inc_sync_retry(_store: &str) {}
    pub fn observe_search_latency(_seconds: f64) {}
    pub fn observe_extraction_latency(_seconds: f64) {}
    pub fn render_prometheus_text() -> String {
        String::new()
    }
}

#[cfg(not(feature = "prometheus"))]
pub use noop::*;
