//! Boot sequence: configuration, probe, recovery, wiring, serve.

use std::sync::Arc;

use tracing::info;

use fetcharr_api::{ApiServer, ApiState, JobHandles, Preferences};
use fetcharr_config::AppConfig;
use fetcharr_core::{DebridGateway, DiskKind, JobInspector, JobStore, JobWorkflow, TuningProfile};
use fetcharr_data::SqliteJobStore;
use fetcharr_debrid::{AllDebridClient, GatewayConfig};
use fetcharr_engine::{EngineConfig, JobManager};
use fetcharr_events::EventBus;
use fetcharr_fetch::detect_disk_kind;
use fetcharr_telemetry::{LoggingConfig, Metrics, init_logging};

use crate::error::{AppError, AppResult};

/// Agent identifier sent on every unrestricting-service call.
const GATEWAY_AGENT: &str = "fetcharr";

/// Boot the broker from the process environment and serve until SIGINT or
/// SIGTERM.
///
/// # Errors
///
/// Returns an error when configuration, recovery, or the HTTP listener
/// fails; worker failures after boot surface through job states instead.
pub async fn run_app() -> AppResult<()> {
    init_logging(&LoggingConfig::default())
        .map_err(|err| AppError::init("telemetry", err))?;
    let config = fetcharr_config::load_from_env()?;
    info!("fetcharr bootstrap starting");

    let metrics = Metrics::new().map_err(|err| AppError::init("metrics", err))?;
    let events = EventBus::new();

    tokio::fs::create_dir_all(&config.download_path)
        .await
        .map_err(|err| AppError::init("download_root", err.into()))?;
    let profile = resolve_profile(&config).await;
    info!(
        disk = ?profile.disk,
        connections = profile.max_connections_per_job,
        large_slots = profile.concurrent_large,
        small_slots = profile.concurrent_small,
        buffer_bytes = profile.disk_buffer_bytes,
        preallocate = profile.preallocate,
        "storage profile resolved"
    );

    let store = SqliteJobStore::open(&config.state_path)
        .await
        .map_err(|err| AppError::init("job_store", err))?;
    let recovered = store
        .recover()
        .await
        .map_err(|err| AppError::init("job_store", err))?;
    info!(jobs = recovered.len(), "job records recovered");

    let gateway = AllDebridClient::new(
        GatewayConfig {
            base_url: config.debrid_base_url.clone(),
            api_key: config.debrid_api_key.clone(),
            agent: GATEWAY_AGENT.to_string(),
        },
        metrics.clone(),
    )
    .map_err(|err| AppError::init("gateway", err.into()))?;

    let manager = JobManager::new(
        EngineConfig::new(profile, config.download_path.clone()),
        Arc::new(gateway) as Arc<dyn DebridGateway>,
        Arc::new(store) as Arc<dyn JobStore>,
        events.clone(),
        metrics.clone(),
    )
    .map_err(|err| AppError::init("job_manager", err))?;
    manager.start(recovered).await;

    let handles = JobHandles::new(
        Arc::new(manager.clone()) as Arc<dyn JobWorkflow>,
        Arc::new(manager.clone()) as Arc<dyn JobInspector>,
    );
    let api_state = ApiState::new(
        handles,
        events.clone(),
        metrics.clone(),
        preferences_for(&config, &profile),
    );
    let server = ApiServer::new(api_state);

    let serve_result = server.serve(config.api_bind, shutdown_signal()).await;
    manager.shutdown().await;
    serve_result.map_err(|err| AppError::runtime("api_server", err))?;
    info!("fetcharr shutdown complete");
    Ok(())
}

/// Resolve the tuning profile: forced preference wins, otherwise the probe
/// classifies the download directory.
async fn resolve_profile(config: &AppConfig) -> TuningProfile {
    let detected = match config.storage_type.forced_kind() {
        Some(kind) => kind,
        None => {
            let path = config.download_path.clone();
            tokio::task::spawn_blocking(move || detect_disk_kind(&path))
                .await
                .unwrap_or(DiskKind::Rotational)
        }
    };
    config.tuning(detected)
}

fn preferences_for(config: &AppConfig, profile: &TuningProfile) -> Preferences {
    Preferences {
        save_path: config.download_path.display().to_string(),
        max_active_downloads: i64::from(profile.concurrent_large + profile.concurrent_small),
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                let _ = signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetcharr_config::{StoragePreference, load_from};
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        load_from(&vars).expect("config")
    }

    #[tokio::test]
    async fn forced_storage_type_skips_the_probe() {
        let config = config_from(&[("DEBRID_API_KEY", "k"), ("STORAGE_TYPE", "ssd")]);
        assert_eq!(config.storage_type, StoragePreference::Ssd);
        let profile = resolve_profile(&config).await;
        assert_eq!(profile.disk, DiskKind::Solid);
        assert_eq!(profile.max_connections_per_job, 4);
    }

    #[test]
    fn preferences_report_total_run_slots() {
        let config = config_from(&[("DEBRID_API_KEY", "k")]);
        let preferences = preferences_for(&config, &TuningProfile::hdd());
        assert_eq!(preferences.save_path, "/downloads");
        assert_eq!(preferences.max_active_downloads, 4);
    }
}
