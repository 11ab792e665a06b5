/*!
Builders d'échantillons et de messages de contrôle pour les tests
*/

use termhub_telemetry::codec;
use termhub_telemetry::{
    ControlMessage, CpuStats, DiskUsage, Echo, MemoryStats, MetricsSample, NetworkStats, SystemInfo,
};

/// Construit un MetricsSample réaliste, champ par champ
#[derive(Debug, Clone)]
pub struct SampleBuilder {
    sample: MetricsSample,
}

impl SampleBuilder {
    pub fn new(hostname: &str) -> Self {
        Self {
            sample: MetricsSample {
                system_info: SystemInfo {
                    os: "Ubuntu 22.04".into(),
                    hostname: hostname.into(),
                    cpu_model: "Intel Xeon E-2288G".into(),
                    arch: "x86_64".into(),
                    load_avg: "0.10 0.05 0.01".into(),
                    uptime_seconds: 3_600,
                    cpu_cores: 8,
                },
                cpu: CpuStats { usage_percent: 12.5, core_count: 8 },
                memory: MemoryStats {
                    ram_used_bytes: 4 << 30,
                    ram_total_bytes: 16 << 30,
                    swap_used_bytes: 0,
                    swap_total_bytes: 2 << 30,
                },
                network: NetworkStats::default(),
                disks: Vec::new(),
                disk_total_percent: 0.0,
                ssh_latency_ms: 0,
                timestamp: 0,
            },
        }
    }

    pub fn timestamp(mut self, ts: i64) -> Self {
        self.sample.timestamp = ts;
        self
    }

    pub fn cpu(mut self, usage_percent: f64) -> Self {
        self.sample.cpu.usage_percent = usage_percent;
        self
    }

    pub fn memory(mut self, used: u64, total: u64) -> Self {
        self.sample.memory.ram_used_bytes = used;
        self.sample.memory.ram_total_bytes = total;
        self
    }

    pub fn network(mut self, recv_per_sec: u64, sent_per_sec: u64) -> Self {
        self.sample.network = NetworkStats { bytes_recv_per_sec: recv_per_sec, bytes_sent_per_sec: sent_per_sec };
        self
    }

    /// Ajoute un disque et recalcule le pourcentage global
    pub fn disk(mut self, mount_point: &str, used: u64, total: u64) -> Self {
        self.sample.disks.push(DiskUsage { mount_point: mount_point.into(), used_bytes: used, total_bytes: total });
        let (used, total) = self
            .sample
            .disks
            .iter()
            .fold((0u64, 0u64), |(u, t), d| (u + d.used_bytes, t + d.total_bytes));
        self.sample.disk_total_percent = if total > 0 { used as f64 * 100.0 / total as f64 } else { 0.0 };
        self
    }

    pub fn build(self) -> MetricsSample {
        self.sample
    }

    /// Trame binaire prête à envoyer
    pub fn frame(self) -> Vec<u8> {
        codec::encode(&self.sample)
    }
}

/// Pong d'un serveur dont l'horloge est décalée de `server_ahead_ms`
/// (négatif = en retard) et qui met `processing_ms` à répondre
pub fn pong_for(ping: &Echo, server_ahead_ms: i64, processing_ms: i64) -> ControlMessage {
    let received = ping.ts + server_ahead_ms;
    ControlMessage::Pong(Echo {
        ts: ping.ts,
        server_recv_ts: Some(received),
        server_send_ts: Some(received + processing_ms),
    })
}

/// Pong d'un serveur ancien, sans timestamps
pub fn legacy_pong(ping: &Echo) -> ControlMessage {
    ControlMessage::Pong(Echo::request(ping.ts))
}
