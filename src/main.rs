use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use wikimirror::{
    application::{error::AppError, repos::ContentStore, services::MirrorServices},
    cache::{HttpFetcher, ReconcileReport, SubmitError},
    config,
    infra::{
        error::InfraError, http, memory::MemoryContentStore, rest::RestContentStore, telemetry,
    },
};

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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Rebuild(args) => run_rebuild(settings, args).await,
    }
}

fn build_services(settings: &config::Settings) -> Result<MirrorServices, AppError> {
    let mirror = Arc::new(settings.mirror.clone());
    let credentials = mirror.credentials.clone().unwrap_or_default();

    let fetcher = HttpFetcher::new(credentials.clone(), mirror.request_timeout)
        .map_err(|err| InfraError::http_client(err.to_string()))?;

    let store: Arc<dyn ContentStore> = match settings.content.api_url.clone() {
        Some(api_url) if mirror.is_configured() => Arc::new(
            RestContentStore::new(
                api_url,
                credentials,
                settings.content.page_limit,
                mirror.request_timeout,
            )
            .map_err(|err| InfraError::http_client(err.to_string()))?,
        ),
        _ => {
            warn!("Mirror is not configured; events and rebuilds will be ignored");
            Arc::new(MemoryContentStore::new())
        }
    };

    Ok(MirrorServices::new(mirror, store, Arc::new(fetcher)))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let services = build_services(&settings)?;
    services.scheduler.start();

    if settings.mirror.reconcile_on_startup && settings.mirror.is_configured() {
        let reconciler = Arc::clone(&services.reconciler);
        tokio::spawn(async move {
            match reconciler.reconcile_all().await {
                Ok(reports) => log_reports(&reports),
                Err(err) => error!(error = %err, "Startup reconciliation failed"),
            }
        });
    }

    let admin_router = http::build_admin_router(services.admin_state());
    let listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.admin_addr, "Admin listener bound");

    axum::serve(listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    let graceful = settings.server.graceful_shutdown;
    if tokio::time::timeout(graceful, services.scheduler.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = graceful.as_secs(),
            "Regeneration worker did not stop in time"
        );
    }

    Ok(())
}

async fn run_rebuild(
    settings: config::Settings,
    args: config::RebuildArgs,
) -> Result<(), AppError> {
    if !settings.mirror.is_configured() {
        return Err(SubmitError::NotConfigured.into());
    }

    let services = build_services(&settings)?;
    services.scheduler.start();

    let reports = match args.space.as_deref() {
        Some(space) => {
            let report = services
                .reconciler
                .reconcile_key(space)
                .await?
                .ok_or_else(|| AppError::not_found(format!("space `{space}`")))?;
            vec![report]
        }
        None => services.reconciler.reconcile_all().await?,
    };
    log_reports(&reports);

    info!(
        pending = services.scheduler.pending_len(),
        "Waiting for regeneration queue to drain"
    );
    services.scheduler.wait_idle().await;
    services.scheduler.shutdown().await;
    Ok(())
}

fn log_reports(reports: &[ReconcileReport]) {
    for report in reports {
        if let Some(err) = report.error.as_deref() {
            warn!(space = %report.space_key, error = err, "Space was not reconciled");
            continue;
        }
        info!(
            space = %report.space_key,
            skipped = report.skipped,
            scheduled = report.scheduled,
            orphans = report.orphans_removed.len(),
            "Reconciliation report"
        );
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => {
            error!(error = %err, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
