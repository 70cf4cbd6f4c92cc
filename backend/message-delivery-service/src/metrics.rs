use prometheus::{Encoder, IntCounter, IntGauge, Opts, TextEncoder};
use tracing::warn;

/// Counters for the produce → persist → acknowledge pipeline.
#[derive(Clone)]
pub struct PipelineMetrics {
    pub queued: IntCounter,
    pub delivered: IntCounter,
    pub duplicates: IntCounter,
    pub persist_failures: IntCounter,
    pub ack_failures: IntCounter,
    pub dead_lettered: IntCounter,
    pub worker_running: IntGauge,
}

fn counter(name: &str, help: &str, service: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help).const_label("service", service.to_string()))
        .expect("valid metric opts for pipeline counter")
}

impl PipelineMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let queued = counter(
            "pipeline_messages_queued_total",
            "Messages appended to the durable log by the producer",
            service,
        );
        let delivered = counter(
            "pipeline_messages_delivered_total",
            "Messages committed to the store and marked delivered",
            service,
        );
        let duplicates = counter(
            "pipeline_duplicate_deliveries_total",
            "Redelivered entries whose message was already persisted",
            service,
        );
        let persist_failures = counter(
            "pipeline_persist_failures_total",
            "Units of work that failed or timed out and were left for redelivery",
            service,
        );
        let ack_failures = counter(
            "pipeline_ack_failures_total",
            "Entries persisted but not acknowledged on the log",
            service,
        );
        let dead_lettered = counter(
            "pipeline_dead_lettered_total",
            "Entries moved to the dead-letter stream",
            service,
        );
        let worker_running = IntGauge::with_opts(
            Opts::new(
                "pipeline_worker_running",
                "1 while the delivery worker is consuming, 0 otherwise",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for pipeline_worker_running");

        for metric in [
            Box::new(queued.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(delivered.clone()),
            Box::new(duplicates.clone()),
            Box::new(persist_failures.clone()),
            Box::new(ack_failures.clone()),
            Box::new(dead_lettered.clone()),
            Box::new(worker_running.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register pipeline metric: {}", e);
            }
        }

        Self {
            queued,
            delivered,
            duplicates,
            persist_failures,
            ack_failures,
            dead_lettered,
            worker_running,
        }
    }
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
