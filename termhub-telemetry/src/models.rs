use serde::{Deserialize, Serialize};

/// Snapshot immuable des métriques d'un serveur, un par tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub system_info: SystemInfo,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub network: NetworkStats,
    /// Ordre de la trame source conservé
    pub disks: Vec<DiskUsage>,
    pub disk_total_percent: f64,
    /// Latence SSH mesurée côté serveur
    pub ssh_latency_ms: i64,
    /// Epoch ms côté serveur
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub hostname: String,
    pub cpu_model: String,
    pub arch: String,
    /// Format libre fourni par l'agent ("0.42 0.37 0.30")
    pub load_avg: String,
    pub uptime_seconds: u64,
    pub cpu_cores: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    pub usage_percent: f64,
    pub core_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub ram_used_bytes: u64,
    pub ram_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub swap_total_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub bytes_recv_per_sec: u64,
    pub bytes_sent_per_sec: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub mount_point: String,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Résultat d'un échange d'écho, recalculé à chaque pong
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySample {
    pub rtt_ms: u64,
    pub smoothed_rtt_ms: u64,
    pub jitter_ms: u64,
    /// Positif quand l'horloge serveur est en avance sur le client
    pub clock_offset_ms: i64,
    pub up_ms: u64,
    pub down_ms: u64,
    /// true si le dernier pong n'avait pas les timestamps serveur
    pub degraded: bool,
}

/// Statut d'une connexion de monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Contexte d'une transition de statut relayée aux abonnés
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusDetail {
    None,
    /// Reconnexion programmée après un échec
    Retrying { attempt: u32, delay_ms: u64 },
    /// Tentatives épuisées, état terminal de l'épisode
    GaveUp { attempts: u32, reason: String },
    /// Échec de configuration, aucune tentative
    Rejected { reason: String },
    /// Fermeture propre initiée par le serveur
    ClosedByServer,
    /// Fermeture demandée localement
    ClosedByUser,
    /// Erreur de connexion ou de session avant retry
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub server_id: String,
    pub status: ConnectionStatus,
    pub detail: StatusDetail,
}

impl StatusEvent {
    /// Vrai pour l'unique notification de fin d'épisode
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.detail,
            StatusDetail::GaveUp { .. } | StatusDetail::Rejected { .. }
        )
    }
}

/// Vue publique d'un enregistrement de connexion
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub server_id: String,
    pub instance_id: String,
    pub status: ConnectionStatus,
    pub subscriber_count: u32,
    pub reconnect_attempts: u32,
    pub last_sample: Option<MetricsSample>,
    pub last_latency: Option<LatencySample>,
    pub created_at: time::OffsetDateTime,
    pub last_update_at: Option<time::OffsetDateTime>,
}
