//! Politique de reconnexion : backoff exponentiel plafonné, tentatives bornées.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// Tentative n attend `min(base * 2^n, max)` : la première attend donc base * 2
    pub fn exponential(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.base_delay_ms.saturating_mul(2)),
            max_interval: Duration::from_millis(self.max_delay_ms),
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }

    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            max_attempts: self.max_attempts,
            max_delay: Duration::from_millis(self.max_delay_ms),
            attempts: 0,
            backoff: self.exponential(),
        }
    }
}

/// État de retry d'une connexion, remis à zéro à chaque connexion réussie
pub struct RetrySchedule {
    max_attempts: u32,
    max_delay: Duration,
    attempts: u32,
    backoff: ExponentialBackoff,
}

impl RetrySchedule {
    /// Incrémente le compteur et retourne le délai, ou None quand les tentatives sont épuisées
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = self.backoff.next_backoff()?.min(self.max_delay);
        self.attempts += 1;
        // millisecondes entières : le timer tokio arrondit au ms supérieur
        Some(Duration::from_millis(delay.as_millis() as u64))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.backoff.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(schedule: &mut RetrySchedule) -> Vec<u64> {
        let mut delays = Vec::new();
        while let Some(delay) = schedule.next_delay() {
            delays.push(delay.as_millis() as u64);
        }
        delays
    }

    #[test]
    fn test_default_sequence_is_capped() {
        let mut schedule = ReconnectPolicy::default().schedule();
        assert_eq!(drain(&mut schedule), vec![2_000, 4_000, 8_000, 16_000, 30_000]);
        assert_eq!(schedule.attempts(), 5);
        assert!(schedule.next_delay().is_none());
    }

    #[test]
    fn test_reset_restarts_from_first_delay() {
        let mut schedule = ReconnectPolicy::default().schedule();
        schedule.next_delay();
        schedule.next_delay();
        schedule.reset();
        assert_eq!(schedule.attempts(), 0);
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(2_000)));
    }

    #[test]
    fn test_large_base_is_capped_from_first_attempt() {
        let policy = ReconnectPolicy { base_delay_ms: 60_000, ..Default::default() };
        let mut schedule = policy.schedule();
        assert_eq!(drain(&mut schedule), vec![30_000; 5]);
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let policy = ReconnectPolicy { max_attempts: 0, ..Default::default() };
        assert!(policy.schedule().next_delay().is_none());
    }
}
