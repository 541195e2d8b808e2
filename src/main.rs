use std::{process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{MemoryStorage, Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::postgres::PostgresStorage;
use namewright::{
    application::{
        engine::Engine,
        error::AppError,
        propagation::{
            JobQueue, PendingSweepContext, PropagationTask, PropagationWorkerContext,
            process_pending_sweep, process_propagation_task, sweep_pending,
        },
        repos::Repositories,
    },
    cache::{CacheBackend, CacheStore, MemoryCacheStore},
    config,
    infra::{
        db::{PostgresCacheStore, PostgresRepositories},
        error::InfraError,
        http::{self, ApiState},
        memory::MemoryRepositories,
        queue::{MemoryJobQueue, PostgresJobQueue},
        telemetry,
    },
};
use tokio::{signal, sync::watch};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

/// Persistence handles shared by every command.
struct Backend {
    repos: Arc<dyn Repositories>,
    store: Arc<dyn CacheStore>,
    queue: QueueBackend,
    db: Option<Arc<PostgresRepositories>>,
}

/// Storage the propagation workers consume, matching the queue jobs are offered to.
enum QueueBackend {
    Memory(MemoryJobQueue),
    Postgres(PostgresJobQueue),
}

impl QueueBackend {
    fn offering_side(&self) -> Arc<dyn JobQueue> {
        match self {
            Self::Memory(queue) => Arc::new(queue.clone()),
            Self::Postgres(queue) => Arc::new(queue.clone()),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Retry(args) => run_retry(settings, args).await,
        config::Command::Cancel(args) => run_cancel(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let backend = init_backend(&settings).await?;
    let engine = Arc::new(build_engine(&backend, &settings));

    match sweep_pending(&engine.propagation).await {
        Ok(offered) => info!(offered, "Pending jobs recovered at startup"),
        Err(err) => warn!(error = %err, "Startup sweep of pending jobs failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = spawn_job_monitor(&engine, &backend.queue, &settings, shutdown_rx);

    info!(
        workers = settings.propagation.workers.get(),
        cache_backend = ?settings.cache.backend,
        persistent = backend.db.is_some(),
        "Propagation engine started"
    );

    let state = ApiState::new(engine, backend.db.clone());
    let result = serve_http(&settings, state).await;

    if shutdown_tx.send(true).is_err() {
        warn!("Job monitor stopped before shutdown was requested");
    }
    if monitor.await.is_err() {
        warn!("Job monitor task panicked during shutdown");
    }

    result
}

fn spawn_job_monitor(
    engine: &Engine,
    queue: &QueueBackend,
    settings: &config::Settings,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let concurrency = settings.propagation.workers.get() as usize;
    let context = PropagationWorkerContext {
        runner: engine.runner.clone(),
    };

    let monitor = match queue {
        QueueBackend::Memory(queue) => {
            let storage: MemoryStorage<PropagationTask> = queue.storage();
            Monitor::new().register(
                WorkerBuilder::new("propagation-worker")
                    .concurrency(concurrency)
                    .data(context)
                    .backend(storage)
                    .build_fn(process_propagation_task),
            )
        }
        QueueBackend::Postgres(queue) => {
            let storage: PostgresStorage<PropagationTask> = queue.storage();
            Monitor::new().register(
                WorkerBuilder::new("propagation-worker")
                    .concurrency(concurrency)
                    .data(context)
                    .backend(storage)
                    .build_fn(process_propagation_task),
            )
        }
    };

    let sweeper = WorkerBuilder::new("pending-job-sweeper")
        .data(PendingSweepContext {
            propagation: engine.propagation.clone(),
        })
        .backend(CronStream::new(settings.propagation.sweep_schedule.clone()))
        .build_fn(process_pending_sweep);

    let monitor = monitor
        .register(sweeper)
        .shutdown_timeout(settings.server.graceful_shutdown);

    tokio::spawn(async move {
        let stop = async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            Ok(())
        };
        if let Err(err) = monitor.run_with_signal(stop).await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

async fn run_retry(settings: config::Settings, args: config::RetryArgs) -> Result<(), AppError> {
    let backend = init_persistent_backend(&settings).await?;
    let engine = build_engine(&backend, &settings);

    let job = engine.propagation.retry(args.job_id, args.failed_only).await?;
    info!(
        job_id = %job.id,
        retry_of = %args.job_id,
        failed_only = args.failed_only,
        affected_strings = job.affected_strings_count,
        status = job.status.as_str(),
        "Retry job queued for the serving instances"
    );
    Ok(())
}

async fn run_cancel(settings: config::Settings, args: config::CancelArgs) -> Result<(), AppError> {
    let backend = init_persistent_backend(&settings).await?;
    let engine = build_engine(&backend, &settings);

    let job = engine.propagation.cancel(args.job_id).await?;
    info!(
        job_id = %job.id,
        processed = job.processed_count,
        affected_strings = job.affected_strings_count,
        "Job cancelled"
    );
    Ok(())
}

fn build_engine(backend: &Backend, settings: &config::Settings) -> Engine {
    Engine::build(
        backend.repos.clone(),
        backend.store.clone(),
        settings.cache.ttl(),
        backend.queue.offering_side(),
    )
}

async fn init_backend(settings: &config::Settings) -> Result<Backend, AppError> {
    if settings.database.url.is_some() {
        return init_persistent_backend(settings).await;
    }

    warn!("database.url is not configured; running on in-memory repositories");
    Ok(Backend {
        repos: Arc::new(MemoryRepositories::new()),
        store: Arc::new(MemoryCacheStore::new(&settings.cache)),
        queue: QueueBackend::Memory(MemoryJobQueue::new()),
        db: None,
    })
}

async fn init_persistent_backend(settings: &config::Settings) -> Result<Backend, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    PostgresJobQueue::setup(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let store: Arc<dyn CacheStore> = match settings.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new(&settings.cache)),
        CacheBackend::Postgres => {
            let store = PostgresCacheStore::new(pool.clone());
            match store.purge_expired().await {
                Ok(purged) => info!(purged, "Expired catalog cache rows purged"),
                Err(err) => warn!(error = %err, "Failed to purge expired catalog cache rows"),
            }
            Arc::new(store)
        }
    };

    let queue = QueueBackend::Postgres(PostgresJobQueue::new(pool.clone()));
    let db = Arc::new(PostgresRepositories::new(pool));
    Ok(Backend {
        repos: db.clone(),
        store,
        queue,
        db: Some(db),
    })
}

async fn serve_http(settings: &config::Settings, state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.public_addr, "HTTP server listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::from(InfraError::Server(err.to_string())))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
