use std::sync::Arc;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly is not acceptable for
/// production. Callers provide an implementation that forwards these events
/// to `tracing`, `log`, metrics, or custom sinks.
pub trait IndexEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: IndexEvent);
}

/// Structured events emitted by the index.
#[derive(Debug, Clone)]
pub enum IndexEvent {
    /// A batch of label sets was registered.
    SeriesRegistered { requested: usize, new: usize },

    /// Appending postings for newly registered series failed; the series
    /// IDs remain assigned but the series are not matchable.
    PostingsAppendFailed { error: String },

    /// The index and its stores were closed.
    Closed,
}

#[derive(Debug)]
pub struct NoopEventListener;

impl IndexEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: IndexEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn IndexEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation and in-process scraping.
///
/// ## Key properties
/// - Library-safe: emitting metrics is effectively a no-op until a recorder
///   is installed.
/// - Serverless scraping: callers can render Prometheus exposition text
///   in-process when the `prometheus` feature is enabled.
pub mod index_metrics {
    use metrics::{describe_counter, describe_histogram, Unit};

    // --- metric names ---
    //
    // Counters are exposed as `<name>_total` by the Prometheus exporter.

    pub const ENSURE_SERIES_NEW: &str = "labix_ensure_series_new";
    pub const POSTINGS_APPEND_IDS: &str = "labix_postings_append_ids";
    pub const PAGES_ALLOCATED: &str = "labix_pages_allocated";
    pub const SELECT_DURATION_SECONDS: &str = "labix_select_duration_seconds";

    pub const WAL_BYTES_WRITTEN: &str = "labix_wal_bytes_written";
    pub const WAL_FSYNC_DURATION_SECONDS: &str = "labix_wal_fsync_duration_seconds";

    /// Registers descriptions for every metric the crate emits.
    pub fn describe_all() {
        describe_counter!(
            ENSURE_SERIES_NEW,
            Unit::Count,
            "Series IDs assigned to label sets seen for the first time"
        );
        describe_counter!(
            POSTINGS_APPEND_IDS,
            Unit::Count,
            "Series IDs appended to postings lists"
        );
        describe_counter!(
            PAGES_ALLOCATED,
            Unit::Count,
            "Pages allocated in the page store"
        );
        describe_histogram!(
            SELECT_DURATION_SECONDS,
            Unit::Seconds,
            "Wall time of select() calls"
        );
        describe_counter!(
            WAL_BYTES_WRITTEN,
            Unit::Bytes,
            "Bytes appended to KV write-ahead logs"
        );
        describe_histogram!(
            WAL_FSYNC_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of WAL fsync calls"
        );
    }

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call
    /// [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct InProcessPrometheus {
        handle: metrics_exporter_prometheus::PrometheusHandle,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process) and
        /// registers metric descriptions.
        pub fn install() -> Result<Self, metrics_exporter_prometheus::BuildError> {
            let handle =
                metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
            describe_all();
            Ok(InProcessPrometheus { handle })
        }

        /// Renders the current metrics in Prometheus exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }
}
