use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use pgcluster_operator::OperatorConfig;
use pgcluster_operator::health::{HealthState, run_health_server};
use pgcluster_operator::{build_context, run_controllers};

const LEASE_NAME: &str = "pgcluster-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to in-flight reconciliations after a shutdown signal
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A provider may already be installed when embedded in tests
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("no rustls crypto provider available".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pgcluster_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    let config = OperatorConfig::from_env()?;
    let client = Client::try_default().await?;

    let holder_id = env_or("POD_NAME", || {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let lease_namespace = env_or("POD_NAMESPACE", || "default".to_string());
    let watch_namespace = std::env::var("WATCH_NAMESPACE")
        .ok()
        .filter(|ns| !ns.is_empty());
    info!(
        holder_id = %holder_id,
        lease_namespace = %lease_namespace,
        watch_namespace = watch_namespace.as_deref().unwrap_or("all"),
        "starting pgcluster-operator"
    );

    // Health endpoints must answer before leadership is acquired
    let health_state = Arc::new(HealthState::new());
    let health_handle = tokio::spawn(run_health_server(health_state.clone()));

    let lease = Arc::new(LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    ));
    acquire_leadership(&lease).await;
    let renewal_handle = tokio::spawn(hold_leadership(lease));

    let ctx = build_context(client.clone(), config, Some(health_state.clone()));
    let controller_handle = tokio::spawn(async move {
        run_controllers(client, ctx, watch_namespace.as_deref()).await;
    });

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            match result {
                Ok(Err(e)) => error!("health server failed: {}", e),
                Err(e) => error!("health server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        Err(e) = renewal_handle => {
            error!("lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining for {:?}", SHUTDOWN_GRACE_PERIOD);
            health_state.set_ready(false);
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    info!("operator stopped");
    Ok(())
}

fn env_or(key: &str, fallback: impl FnOnce() -> String) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        let value = fallback();
        warn!("{} not set, using {}", key, value);
        value
    })
}

async fn acquire_leadership(lease: &LeaseLock) {
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("acquired leadership");
                return;
            }
            Ok(_) => info!("another instance holds {}, waiting", LEASE_NAME),
            Err(e) => warn!("failed to acquire lease: {}", e),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew the lease until it is lost, then exit so the pod re-enters election
async fn hold_leadership(lease: Arc<LeaseLock>) {
    loop {
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => {
                error!("lost leadership, exiting");
                std::process::exit(1);
            }
            Err(e) => {
                error!("failed to renew lease: {}, exiting", e);
                std::process::exit(1);
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
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
}
