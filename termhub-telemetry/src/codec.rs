/**
 * FRAME CODEC - Décodage des trames binaires de métriques
 *
 * RÔLE :
 * Transforme une trame binaire complète (déjà délimitée par le transport)
 * en MetricsSample typé. Fonction pure, sans état, sans I/O.
 *
 * FORMAT FIL (compatible protobuf) :
 * - tags varint, chaînes et sous-messages length-delimited
 * - compteurs d'octets en fixed64, pourcentages en double IEEE-754
 * - uptime / coeurs / timestamps en varint (u64/i64 natifs, jamais f64)
 * - tags inconnus ignorés pour l'évolution du schéma côté agent
 *
 * ```text
 * MetricsFrame { 1 system_info, 2 cpu, 3 memory, 4 network,
 *                5 disks (repeated), 6 disk_total_percent,
 *                7 ssh_latency_ms, 8 timestamp }
 * ```
 */

use crate::error::DecodeError;
use crate::models::{CpuStats, DiskUsage, MemoryStats, MetricsSample, NetworkStats, SystemInfo};
use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct MetricsFrame {
    #[prost(message, optional, tag = "1")]
    pub system_info: Option<SystemInfoFrame>,
    #[prost(message, optional, tag = "2")]
    pub cpu: Option<CpuFrame>,
    #[prost(message, optional, tag = "3")]
    pub memory: Option<MemoryFrame>,
    #[prost(message, optional, tag = "4")]
    pub network: Option<NetworkFrame>,
    #[prost(message, repeated, tag = "5")]
    pub disks: Vec<DiskFrame>,
    #[prost(double, tag = "6")]
    pub disk_total_percent: f64,
    #[prost(int64, tag = "7")]
    pub ssh_latency_ms: i64,
    #[prost(int64, tag = "8")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct SystemInfoFrame {
    #[prost(string, tag = "1")]
    pub os: String,
    #[prost(string, tag = "2")]
    pub hostname: String,
    #[prost(string, tag = "3")]
    pub cpu_model: String,
    #[prost(string, tag = "4")]
    pub arch: String,
    #[prost(string, tag = "5")]
    pub load_avg: String,
    #[prost(uint64, tag = "6")]
    pub uptime_seconds: u64,
    #[prost(uint32, tag = "7")]
    pub cpu_cores: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct CpuFrame {
    #[prost(double, tag = "1")]
    pub usage_percent: f64,
    #[prost(uint32, tag = "2")]
    pub core_count: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct MemoryFrame {
    #[prost(fixed64, tag = "1")]
    pub ram_used_bytes: u64,
    #[prost(fixed64, tag = "2")]
    pub ram_total_bytes: u64,
    #[prost(fixed64, tag = "3")]
    pub swap_used_bytes: u64,
    #[prost(fixed64, tag = "4")]
    pub swap_total_bytes: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct NetworkFrame {
    #[prost(fixed64, tag = "1")]
    pub bytes_recv_per_sec: u64,
    #[prost(fixed64, tag = "2")]
    pub bytes_sent_per_sec: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct DiskFrame {
    #[prost(string, tag = "1")]
    pub mount_point: String,
    #[prost(fixed64, tag = "2")]
    pub used_bytes: u64,
    #[prost(fixed64, tag = "3")]
    pub total_bytes: u64,
}

/// Décode une trame complète en échantillon
///
/// Une trame vide est un message sans aucun champ : échantillon à zéro.
pub fn decode(buffer: &[u8]) -> Result<MetricsSample, DecodeError> {
    let frame = MetricsFrame::decode(buffer)?;
    Ok(frame.into())
}

/// Encode un échantillon (devkit, tests, agents de simulation)
pub fn encode(sample: &MetricsSample) -> Vec<u8> {
    MetricsFrame::from(sample).encode_to_vec()
}

impl From<MetricsFrame> for MetricsSample {
    fn from(frame: MetricsFrame) -> Self {
        let system_info = frame.system_info.unwrap_or_default();
        let cpu = frame.cpu.unwrap_or_default();
        let memory = frame.memory.unwrap_or_default();
        let network = frame.network.unwrap_or_default();

        MetricsSample {
            system_info: SystemInfo {
                os: system_info.os,
                hostname: system_info.hostname,
                cpu_model: system_info.cpu_model,
                arch: system_info.arch,
                load_avg: system_info.load_avg,
                uptime_seconds: system_info.uptime_seconds,
                cpu_cores: system_info.cpu_cores,
            },
            cpu: CpuStats {
                usage_percent: cpu.usage_percent,
                core_count: cpu.core_count,
            },
            memory: MemoryStats {
                ram_used_bytes: memory.ram_used_bytes,
                ram_total_bytes: memory.ram_total_bytes,
                swap_used_bytes: memory.swap_used_bytes,
                swap_total_bytes: memory.swap_total_bytes,
            },
            network: NetworkStats {
                bytes_recv_per_sec: network.bytes_recv_per_sec,
                bytes_sent_per_sec: network.bytes_sent_per_sec,
            },
            disks: frame
                .disks
                .into_iter()
                .map(|d| DiskUsage {
                    mount_point: d.mount_point,
                    used_bytes: d.used_bytes,
                    total_bytes: d.total_bytes,
                })
                .collect(),
            disk_total_percent: frame.disk_total_percent,
            ssh_latency_ms: frame.ssh_latency_ms,
            timestamp: frame.timestamp,
        }
    }
}

impl From<&MetricsSample> for MetricsFrame {
    fn from(sample: &MetricsSample) -> Self {
        let info = &sample.system_info;
        MetricsFrame {
            system_info: Some(SystemInfoFrame {
                os: info.os.clone(),
                hostname: info.hostname.clone(),
                cpu_model: info.cpu_model.clone(),
                arch: info.arch.clone(),
                load_avg: info.load_avg.clone(),
                uptime_seconds: info.uptime_seconds,
                cpu_cores: info.cpu_cores,
            }),
            cpu: Some(CpuFrame {
                usage_percent: sample.cpu.usage_percent,
                core_count: sample.cpu.core_count,
            }),
            memory: Some(MemoryFrame {
                ram_used_bytes: sample.memory.ram_used_bytes,
                ram_total_bytes: sample.memory.ram_total_bytes,
                swap_used_bytes: sample.memory.swap_used_bytes,
                swap_total_bytes: sample.memory.swap_total_bytes,
            }),
            network: Some(NetworkFrame {
                bytes_recv_per_sec: sample.network.bytes_recv_per_sec,
                bytes_sent_per_sec: sample.network.bytes_sent_per_sec,
            }),
            disks: sample
                .disks
                .iter()
                .map(|d| DiskFrame {
                    mount_point: d.mount_point.clone(),
                    used_bytes: d.used_bytes,
                    total_bytes: d.total_bytes,
                })
                .collect(),
            disk_total_percent: sample.disk_total_percent,
            ssh_latency_ms: sample.ssh_latency_ms,
            timestamp: sample.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::encoding::{encode_key, encode_varint, WireType};

    fn full_sample(disks: Vec<DiskUsage>) -> MetricsSample {
        MetricsSample {
            system_info: SystemInfo {
                os: "Ubuntu 22.04".into(),
                hostname: "web-01".into(),
                cpu_model: "AMD EPYC 7763".into(),
                arch: "x86_64".into(),
                load_avg: "0.42 0.37 0.30".into(),
                uptime_seconds: 8_640_000,
                cpu_cores: 16,
            },
            cpu: CpuStats { usage_percent: 37.5, core_count: 16 },
            memory: MemoryStats {
                ram_used_bytes: 12_884_901_888,
                ram_total_bytes: 34_359_738_368,
                swap_used_bytes: 0,
                swap_total_bytes: u64::MAX,
            },
            network: NetworkStats { bytes_recv_per_sec: 1_250_000, bytes_sent_per_sec: 98_000 },
            disks,
            disk_total_percent: 61.25,
            ssh_latency_ms: -3,
            timestamp: 1_700_000_000_123,
        }
    }

    #[test]
    fn test_round_trip_without_disks() {
        let sample = full_sample(vec![]);
        let decoded = decode(&encode(&sample)).unwrap();
        assert_eq!(decoded, sample);
        assert!(decoded.disks.is_empty());
    }

    #[test]
    fn test_round_trip_preserves_disk_order() {
        let disks = vec![
            DiskUsage { mount_point: "/".into(), used_bytes: 40, total_bytes: 100 },
            DiskUsage { mount_point: "/var".into(), used_bytes: 5, total_bytes: 50 },
            DiskUsage { mount_point: "/home".into(), used_bytes: 70, total_bytes: 80 },
        ];
        let decoded = decode(&encode(&full_sample(disks.clone()))).unwrap();
        let mounts: Vec<&str> = decoded.disks.iter().map(|d| d.mount_point.as_str()).collect();
        assert_eq!(mounts, vec!["/", "/var", "/home"]);
        assert_eq!(decoded.disks, disks);
    }

    #[test]
    fn test_absent_fields_decode_to_zero_values() {
        let frame = MetricsFrame { timestamp: 42, ..Default::default() };
        let decoded = decode(&frame.encode_to_vec()).unwrap();
        assert_eq!(decoded.timestamp, 42);
        assert_eq!(decoded.system_info.hostname, "");
        assert_eq!(decoded.memory.ram_total_bytes, 0);
        assert!(decoded.disks.is_empty());
    }

    #[test]
    fn test_unknown_tags_are_skipped() {
        let sample = full_sample(vec![]);
        let mut buf = encode(&sample);
        encode_key(99, WireType::Varint, &mut buf);
        encode_varint(7, &mut buf);
        encode_key(100, WireType::LengthDelimited, &mut buf);
        encode_varint(3, &mut buf);
        buf.extend_from_slice(b"new");

        assert_eq!(decode(&buf).unwrap(), sample);
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let buf = encode(&full_sample(vec![]));
        assert!(matches!(decode(&buf[..buf.len() - 1]), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(&buf[..5]), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_wrong_wire_type_for_known_tag() {
        let mut buf = Vec::new();
        encode_key(8, WireType::LengthDelimited, &mut buf);
        encode_varint(1, &mut buf);
        buf.push(0x01);
        assert!(matches!(decode(&buf), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_empty_frame_decodes_to_zero_sample() {
        assert_eq!(decode(&[]).unwrap(), MetricsSample::default());
    }

    #[test]
    fn test_large_counters_keep_full_precision() {
        let mut sample = full_sample(vec![]);
        sample.memory.ram_total_bytes = (1u64 << 53) + 1;
        sample.timestamp = i64::MAX;
        let decoded = decode(&encode(&sample)).unwrap();
        assert_eq!(decoded.memory.ram_total_bytes, (1u64 << 53) + 1);
        assert_eq!(decoded.timestamp, i64::MAX);
    }
}
