use std::sync::Arc;

use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{NotificationDispatcher, NotificationMode, SchedulingError};
use shared_storage::RestStore;
use waitlist_cell::{
    ConfirmationService, QueueReleaseSink, RedisJobQueue, WaitlistMatcherService,
    WaitlistWorkerService,
};

const WORKER_CONCURRENCY: usize = 4;

/// Hands notification events to the external messaging gateway. Delivery
/// mechanics live outside this repository; here the event is only logged.
struct LogNotifier;

#[async_trait::async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn send_appointment_notification(
        &self,
        appointment_id: Uuid,
        mode: NotificationMode,
    ) -> Result<(), SchedulingError> {
        info!(
            "notification event: appointment {} mode {}",
            appointment_id, mode
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scheduling worker");

    let config = AppConfig::from_env();
    if !config.is_configured() {
        warn!("storage is not configured; the worker cannot book anything");
    }
    if !config.is_queue_configured() {
        warn!("REDIS_URL not set, falling back to redis://localhost:6379");
    }

    let queue = match RedisJobQueue::new(&config).await {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!("could not connect to the job queue: {}", e);
            std::process::exit(1);
        }
    };
    let store = Arc::new(RestStore::new(&config));
    let notifier = Arc::new(LogNotifier);
    let sink = Arc::new(QueueReleaseSink::new(Arc::clone(&queue)));

    let booking = Arc::new(booking_cell::BookingService::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        sink,
    ));
    let matcher = Arc::new(WaitlistMatcherService::new(
        Arc::clone(&store),
        booking,
        Arc::clone(&queue),
    ));
    let confirmation = Arc::new(ConfirmationService::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        Arc::clone(&queue),
        config.confirmation_timeout_secs,
    ));

    let worker = Arc::new(WaitlistWorkerService::new(
        format!("scheduler-{}", Uuid::new_v4()),
        WORKER_CONCURRENCY,
        queue,
        matcher,
        confirmation,
    ));

    let runner = Arc::clone(&worker);
    tokio::select! {
        result = runner.start() => {
            if let Err(e) = result {
                error!("worker stopped with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            worker.shutdown().await;
        }
    }
    info!("scheduling worker exited");
}
