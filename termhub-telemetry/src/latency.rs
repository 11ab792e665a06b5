/**
 * LATENCY ESTIMATOR - RTT et offset d'horloge client/serveur
 *
 * RÔLE :
 * Exploite l'échange d'écho à 4 timestamps (style NTP) qui circule sur la
 * connexion de monitoring existante pour estimer RTT, délais aller/retour
 * et décalage d'horloge, puis lisse le RTT (EWMA façon TCP).
 *
 * FONCTIONNEMENT :
 * ```text
 *  client  t0 ──ping──▶ t1  serveur
 *  client  t3 ◀──pong── t2  serveur
 *
 *  rtt    = (t3 - t0) - (t2 - t1)
 *  offset = ((t1 - t0) + (t2 - t3)) / 2     (> 0 : serveur en avance)
 *  up     = t1 - (t0 + offset)
 *  down   = t3 - (t2 - offset)
 * ```
 * Sans t1/t2 (mode dégradé) : rtt = t3 - t0, offset/up/down inchangés.
 *
 * LISSAGE (RTT uniquement) :
 * srtt   += (rtt - srtt) / 8
 * jitter += (|rtt - srtt| - jitter) / 4   (srtt avant mise à jour)
 * Premier point : srtt = rtt, jitter = 0.
 */

use crate::models::LatencySample;
use std::time::Duration;

const ALPHA: f64 = 1.0 / 8.0;
const BETA: f64 = 1.0 / 4.0;

/// Les quatre timestamps d'un échange, en epoch ms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoExchange {
    pub t0: i64,
    pub t1: Option<i64>,
    pub t2: Option<i64>,
    pub t3: i64,
}

impl EchoExchange {
    fn server_times(&self) -> Option<(i64, i64)> {
        match (self.t1, self.t2) {
            (Some(t1), Some(t2)) => Some((t1, t2)),
            _ => None,
        }
    }
}

/// Estimateur avec état : srtt/jitter et dernier offset persistent entre échanges
#[derive(Debug, Clone, Default)]
pub struct LatencyEstimator {
    smoothed_rtt: Option<f64>,
    jitter: f64,
    clock_offset_ms: i64,
    up_ms: u64,
    down_ms: u64,
}

impl LatencyEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intègre un échange et retourne l'échantillon mis à jour
    pub fn observe(&mut self, exchange: EchoExchange) -> LatencySample {
        let degraded = match exchange.server_times() {
            Some((t1, t2)) => {
                let offset = midpoint(t1.saturating_sub(exchange.t0), t2.saturating_sub(exchange.t3));
                self.clock_offset_ms = offset;
                self.up_ms = clamp_ms(t1.saturating_sub(exchange.t0.saturating_add(offset)));
                self.down_ms = clamp_ms(exchange.t3.saturating_sub(t2.saturating_sub(offset)));
                false
            }
            None => true,
        };

        let rtt = clamp_ms(raw_rtt(&exchange)) as f64;
        match self.smoothed_rtt {
            None => {
                self.smoothed_rtt = Some(rtt);
                self.jitter = 0.0;
            }
            Some(srtt) => {
                self.jitter += BETA * ((rtt - srtt).abs() - self.jitter);
                self.smoothed_rtt = Some(srtt + ALPHA * (rtt - srtt));
            }
        }

        LatencySample {
            rtt_ms: rtt as u64,
            smoothed_rtt_ms: self.smoothed_rtt.unwrap_or(rtt).round().max(0.0) as u64,
            jitter_ms: self.jitter.round().max(0.0) as u64,
            clock_offset_ms: self.clock_offset_ms,
            up_ms: self.up_ms,
            down_ms: self.down_ms,
            degraded,
        }
    }
}

fn raw_rtt(exchange: &EchoExchange) -> i64 {
    let total = exchange.t3.saturating_sub(exchange.t0);
    match exchange.server_times() {
        Some((t1, t2)) => total.saturating_sub(t2.saturating_sub(t1)),
        None => total,
    }
}

fn midpoint(a: i64, b: i64) -> i64 {
    ((a as f64 + b as f64) / 2.0).round() as i64
}

fn clamp_ms(value: i64) -> u64 {
    value.max(0) as u64
}

/// Visibilité de la vue consommatrice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

/// Cadence des pings selon la visibilité
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatCadence {
    pub interval: Duration,
    pub background_floor: Duration,
}

impl HeartbeatCadence {
    pub fn new(interval: Duration, background_floor: Duration) -> Self {
        Self { interval, background_floor }
    }

    pub fn interval_for(&self, visibility: Visibility) -> Duration {
        match visibility {
            Visibility::Foreground => self.interval,
            Visibility::Background => self.interval.max(self.background_floor),
        }
    }
}

/// Horloge murale client en epoch ms
pub fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(t0: i64, t1: i64, t2: i64, t3: i64) -> EchoExchange {
        EchoExchange { t0, t1: Some(t1), t2: Some(t2), t3 }
    }

    fn rtt_only(rtt: i64) -> EchoExchange {
        EchoExchange { t0: 1_000, t1: None, t2: None, t3: 1_000 + rtt }
    }

    #[test]
    fn test_rtt_excludes_server_processing() {
        let mut est = LatencyEstimator::new();
        // 20ms aller, 5ms de traitement, 20ms retour, horloges alignées
        let s = est.observe(echo(1_000, 1_020, 1_025, 1_045));
        assert_eq!(s.rtt_ms, 40);
        assert_eq!(s.clock_offset_ms, 0);
        assert_eq!(s.up_ms, 20);
        assert_eq!(s.down_ms, 20);
        assert!(!s.degraded);
    }

    #[test]
    fn test_clock_offset_server_ahead() {
        let mut est = LatencyEstimator::new();
        // serveur +50ms, 10ms symétrique
        let s = est.observe(echo(1_000, 1_060, 1_062, 1_022));
        assert_eq!(s.clock_offset_ms, 50);
        assert_eq!(s.rtt_ms, 20);
        assert_eq!(s.up_ms, 10);
        assert_eq!(s.down_ms, 10);
    }

    #[test]
    fn test_clock_offset_server_behind() {
        let mut est = LatencyEstimator::new();
        // serveur -50ms, 10ms symétrique
        let s = est.observe(echo(1_000, 960, 962, 1_022));
        assert_eq!(s.clock_offset_ms, -50);
        assert_eq!(s.up_ms, 10);
        assert_eq!(s.down_ms, 10);
    }

    #[test]
    fn test_first_sample_initializes_without_smoothing() {
        let mut est = LatencyEstimator::new();
        let s = est.observe(rtt_only(250));
        assert_eq!(s.smoothed_rtt_ms, 250);
        assert_eq!(s.jitter_ms, 0);
    }

    #[test]
    fn test_constant_rtt_converges() {
        let mut est = LatencyEstimator::new();
        let mut last = LatencySample::default();
        for _ in 0..4 {
            last = est.observe(rtt_only(100));
        }
        assert_eq!(last.smoothed_rtt_ms, 100);
        assert_eq!(last.jitter_ms, 0);
    }

    #[test]
    fn test_outlier_spikes_then_decays() {
        let mut est = LatencyEstimator::new();
        for _ in 0..3 {
            est.observe(rtt_only(100));
        }
        let spike = est.observe(rtt_only(500));
        assert_eq!(spike.smoothed_rtt_ms, 150);
        assert_eq!(spike.jitter_ms, 100);

        let mut previous = spike.smoothed_rtt_ms;
        for _ in 0..40 {
            let s = est.observe(rtt_only(100));
            assert!(s.smoothed_rtt_ms <= previous);
            assert!(s.smoothed_rtt_ms >= 100);
            assert!(s.smoothed_rtt_ms <= 500);
            previous = s.smoothed_rtt_ms;
        }
        assert!(previous <= 101);
    }

    #[test]
    fn test_degraded_mode_keeps_last_offset() {
        let mut est = LatencyEstimator::new();
        est.observe(echo(1_000, 1_060, 1_062, 1_022));
        let s = est.observe(rtt_only(80));
        assert!(s.degraded);
        assert_eq!(s.rtt_ms, 80);
        assert_eq!(s.clock_offset_ms, 50);
        assert_eq!(s.up_ms, 10);
        assert_eq!(s.down_ms, 10);
        // le lissage continue sur le RTT brut
        assert_eq!(s.smoothed_rtt_ms, 28);
    }

    #[test]
    fn test_negative_values_are_clamped() {
        let mut est = LatencyEstimator::new();
        // traitement serveur annoncé plus long que l'aller-retour total
        let s = est.observe(echo(1_000, 1_000, 1_100, 1_010));
        assert_eq!(s.rtt_ms, 0);
        assert_eq!(s.smoothed_rtt_ms, 0);
    }

    #[test]
    fn test_background_cadence_has_floor() {
        let cadence = HeartbeatCadence::new(Duration::from_secs(5), Duration::from_secs(30));
        assert_eq!(cadence.interval_for(Visibility::Foreground), Duration::from_secs(5));
        assert_eq!(cadence.interval_for(Visibility::Background), Duration::from_secs(30));

        let slow = HeartbeatCadence::new(Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(slow.interval_for(Visibility::Background), Duration::from_secs(60));
    }
}
