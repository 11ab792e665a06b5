/**
 * TERMHUB MONITOR - Moniteur de télémétrie sans interface
 *
 * RÔLE : S'abonne à chaque serveur configuré (ou aux ids passés en arguments)
 * et journalise échantillons, latence et transitions de statut.
 *
 * ARRÊT : Ctrl-C détache tous les abonnements, ce qui ferme les sockets.
 */

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use termhub_telemetry::{
    load_config, validate_server_id, EnvToken, LatencySample, Listener, MetricsSample,
    StatusEvent, SubscriptionHub, WsConnector,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn log_sample(server_id: &str, sample: &MetricsSample) {
    let ram_pct = if sample.memory.ram_total_bytes > 0 {
        sample.memory.ram_used_bytes as f64 * 100.0 / sample.memory.ram_total_bytes as f64
    } else {
        0.0
    };
    info!(
        "[monitor] {} cpu={:.1}% ram={:.1}% disk={:.1}% rx={}B/s tx={}B/s load={}",
        server_id,
        sample.cpu.usage_percent,
        ram_pct,
        sample.disk_total_percent,
        sample.network.bytes_recv_per_sec,
        sample.network.bytes_sent_per_sec,
        sample.system_info.load_avg
    );
}

fn log_latency(server_id: &str, latency: &LatencySample) {
    info!(
        "[monitor] {} rtt={}ms srtt={}ms jitter={}ms offset={}ms up={}ms down={}ms{}",
        server_id,
        latency.rtt_ms,
        latency.smoothed_rtt_ms,
        latency.jitter_ms,
        latency.clock_offset_ms,
        latency.up_ms,
        latency.down_ms,
        if latency.degraded { " (degraded)" } else { "" }
    );
}

fn log_status(event: &StatusEvent) {
    if event.is_terminal() {
        error!("[monitor] {} {} {:?}", event.server_id, event.status, event.detail);
    } else {
        info!("[monitor] {} {} {:?}", event.server_id, event.status, event.detail);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("termhub=info")),
        )
        .init();

    let mut cfg = load_config().await;
    let cli_servers: Vec<String> = std::env::args().skip(1).collect();
    if !cli_servers.is_empty() {
        for id in &cli_servers {
            validate_server_id(id).with_context(|| format!("invalid server id on command line: {}", id))?;
        }
        cfg.servers = cli_servers;
    }
    if cfg.servers.is_empty() {
        bail!("no servers to monitor (set `servers` in the config file or pass ids as arguments)");
    }

    info!(
        "[monitor] base_url={} servers={:?} heartbeat={}ms",
        cfg.base_url, cfg.servers, cfg.heartbeat_interval_ms
    );

    let credentials = Arc::new(EnvToken::new(cfg.token_env.clone()));
    let servers = cfg.servers.clone();
    let hub = SubscriptionHub::new(cfg, Arc::new(WsConnector::new()), credentials)
        .context("failed to start telemetry hub")?;

    let subscriptions: Vec<_> = servers
        .iter()
        .map(|server_id| {
            let (a, b) = (server_id.clone(), server_id.clone());
            hub.subscribe(
                server_id,
                Listener::new()
                    .on_sample(move |s| log_sample(&a, s))
                    .on_latency(move |l| log_latency(&b, l))
                    .on_status(log_status),
            )
        })
        .collect();

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    warn!("[monitor] shutting down {} subscriptions", subscriptions.len());

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    // laisse aux acteurs le temps d'envoyer leurs trames de fermeture
    tokio::time::sleep(Duration::from_millis(250)).await;

    for snapshot in hub.snapshot() {
        warn!("[monitor] {} still registered after shutdown", snapshot.server_id);
    }
    Ok(())
}
