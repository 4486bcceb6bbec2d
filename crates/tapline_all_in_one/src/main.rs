mod config;

use std::sync::Arc;
use std::time::Duration;

use archive_worker::ArchiveWorker;
use common::telemetry::{TelemetryConfig, init_telemetry};
use common::{
    DequeueBroker, FaultReporter, InMemoryBroker, PostgresClient, PostgresQueueBroker,
    PostgresQueuePublisher, QueuePublisher, ensure_queue_schema,
};
use ingestion_service::IngestionService;
use tapline_runner::Runner;
use tracing::{error, info, warn};

use crate::config::{BrokerKind, ServiceConfig};

/// Both sides of the broker the pipelines talk to
struct BrokerHandles {
    publisher: Arc<dyn QueuePublisher>,
    dequeue: Arc<dyn DequeueBroker>,
}

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let telemetry_config = TelemetryConfig {
        service_name: "tapline".to_string(),
        log_level: config.log_level.clone(),
        json: config.log_json,
    };
    if let Err(e) = init_telemetry(&telemetry_config) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!("Starting tapline");
    debug_config(&config);

    let brokers = match tokio::time::timeout(config.startup_timeout(), initialize_broker(&config))
        .await
    {
        Ok(Ok(brokers)) => brokers,
        Ok(Err(e)) => {
            error!(error = %e, "Failed to initialize broker");
            std::process::exit(1);
        }
        Err(_) => {
            error!(
                timeout_secs = config.startup_timeout_secs,
                "Broker initialization timed out"
            );
            std::process::exit(1);
        }
    };

    let faults = FaultReporter::new();
    let mut runner = Runner::new();

    if config.run_ingestion {
        let mut service = IngestionService::new(
            brokers.publisher.clone(),
            config.ingestion_config(),
            faults.clone(),
        );
        if config.demo_enabled {
            service = service.with_tap_generator(config.tap_generator_config());
        }
        for (name, process) in service.into_runner_processes() {
            runner = runner.with_named_process(name, process);
        }
    }

    if config.run_archival {
        let worker = match ArchiveWorker::new(
            brokers.dequeue.clone(),
            config.archive_worker_config(),
            faults.clone(),
        )
        .await
        {
            Ok(worker) => worker,
            Err(e) => {
                error!(error = %e, "Failed to initialize archive worker");
                std::process::exit(1);
            }
        };
        runner = runner.with_named_process("archival_pipeline", worker.into_runner_process());
    }

    if !config.run_ingestion && !config.run_archival {
        warn!("Neither ingestion nor archival is enabled, nothing to run");
    }

    let reporter = faults.clone();
    runner = runner
        .with_closer(move || async move {
            let snapshot = reporter.snapshot();
            info!(
                publish_failures = snapshot.publish_failures,
                loop_failures = snapshot.loop_failures,
                dequeue_failures = snapshot.dequeue_failures,
                archive_write_failures = snapshot.archive_write_failures,
                shutdown_timeouts = snapshot.shutdown_timeouts,
                events_dropped = snapshot.events_dropped,
                "Pipeline fault totals"
            );
            Ok(())
        })
        // Leaves room for the ingestion flush budget
        .with_closer_timeout(config.shutdown_timeout() + Duration::from_secs(5));

    runner.run_and_exit().await;
}

async fn initialize_broker(config: &ServiceConfig) -> anyhow::Result<BrokerHandles> {
    match config.broker {
        BrokerKind::Memory => {
            info!("Using in-memory broker");
            let broker = InMemoryBroker::new();
            Ok(BrokerHandles {
                publisher: Arc::new(broker.clone()),
                dequeue: Arc::new(broker),
            })
        }
        BrokerKind::Postgres => {
            info!(
                host = %config.postgres_host,
                port = config.postgres_port,
                database = %config.postgres_database,
                "Connecting to PostgreSQL broker"
            );
            let client = PostgresClient::new(&config.postgres_config())?;
            client
                .connect_with_retry(config.max_retries, config.retry_delay())
                .await?;
            ensure_queue_schema(&client).await?;
            info!(queue = %config.queue_name, "PostgreSQL broker ready");

            Ok(BrokerHandles {
                publisher: Arc::new(PostgresQueuePublisher::new(
                    client.clone(),
                    config.queue_name.clone(),
                )),
                dequeue: Arc::new(PostgresQueueBroker::new(client, config.queue_name.clone())),
            })
        }
    }
}

fn debug_config(config: &ServiceConfig) {
    tracing::debug!(
        broker = ?config.broker,
        queue = %config.queue_name,
        batch_size = config.batch_size,
        queue_capacity = config.queue_capacity,
        output_path = %config.output_path,
        run_ingestion = config.run_ingestion,
        run_archival = config.run_archival,
        demo_enabled = config.demo_enabled,
        "Loaded configuration"
    );
}
