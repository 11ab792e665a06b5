/*!
Test Harness pour le transport de télémétrie

Facilite l'écriture de scénarios avec:
- Hub branché sur un MockConnector et un token statique
- Listener qui enregistre tous les événements reçus
- Attentes bornées, compatibles avec le temps tokio en pause
*/

use crate::ws_stub::MockConnector;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use termhub_telemetry::{
    ConnectionStatus, CredentialProvider, LatencySample, Listener, MetricsSample, StaticToken,
    StatusDetail, StatusEvent, Subscription, SubscriptionHub, TelemetryConfig,
};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

const WAIT_LIMIT: Duration = Duration::from_secs(300);

/// Initialise tracing une seule fois pour les tests (RUST_LOG respecté)
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("termhub=debug")),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    Sample(MetricsSample),
    Latency(LatencySample),
    Status(StatusEvent),
}

#[derive(Default)]
struct Recorded {
    events: Mutex<Vec<RecordedEvent>>,
    changed: Notify,
}

/// Listener qui garde tout ce qu'il reçoit, dans l'ordre
#[derive(Clone, Default)]
pub struct RecordingListener {
    inner: Arc<Recorded>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: RecordedEvent) {
        self.inner.events.lock().push(event);
        self.inner.changed.notify_one();
    }

    pub fn listener(&self) -> Listener {
        let (a, b, c) = (self.clone(), self.clone(), self.clone());
        Listener::new()
            .on_sample(move |s| a.record(RecordedEvent::Sample(s.clone())))
            .on_latency(move |l| b.record(RecordedEvent::Latency(*l)))
            .on_status(move |e| c.record(RecordedEvent::Status(e.clone())))
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.inner.events.lock().clone()
    }

    pub fn samples(&self) -> Vec<MetricsSample> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::Sample(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn sample_timestamps(&self) -> Vec<i64> {
        self.samples().iter().map(|s| s.timestamp).collect()
    }

    pub fn latencies(&self) -> Vec<LatencySample> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::Latency(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<StatusEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn count_details(&self, detail: &StatusDetail) -> usize {
        self.statuses().iter().filter(|e| &e.detail == detail).count()
    }

    /// Attend que `predicate` soit vrai sur les événements reçus ; false au bout de 5 min tokio
    pub async fn wait_until(&self, predicate: impl Fn(&[RecordedEvent]) -> bool) -> bool {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            if predicate(self.inner.events.lock().as_slice()) {
                return true;
            }
            if timeout_at(deadline, self.inner.changed.notified()).await.is_err() {
                return predicate(self.inner.events.lock().as_slice());
            }
        }
    }

    pub async fn wait_for_samples(&self, count: usize) -> bool {
        self.wait_until(|events| {
            events.iter().filter(|e| matches!(e, RecordedEvent::Sample(_))).count() >= count
        })
        .await
    }

    pub async fn wait_for_latencies(&self, count: usize) -> bool {
        self.wait_until(|events| {
            events.iter().filter(|e| matches!(e, RecordedEvent::Latency(_))).count() >= count
        })
        .await
    }

    pub async fn wait_for_status(&self, predicate: impl Fn(&StatusEvent) -> bool) -> bool {
        self.wait_until(|events| {
            events.iter().any(|e| matches!(e, RecordedEvent::Status(s) if predicate(s)))
        })
        .await
    }

    pub async fn wait_for_connected(&self) -> bool {
        self.wait_for_status(|e| e.status == ConnectionStatus::Connected).await
    }
}

/// Hub complet sur transport simulé
pub struct TestHarness {
    pub connector: MockConnector,
    pub hub: SubscriptionHub,
    pub config: TelemetryConfig,
}

impl TestHarness {
    /// Connecteur qui accepte tout, token "test-token"
    pub fn new() -> Self {
        Self::with_connector(MockConnector::accepting())
    }

    pub fn with_connector(connector: MockConnector) -> Self {
        Self::build(Self::default_config(), connector, Arc::new(StaticToken::new("test-token")))
    }

    /// Panique si la config est invalide ou hors runtime tokio
    pub fn build(
        config: TelemetryConfig,
        connector: MockConnector,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        match Self::try_build(config, connector, credentials) {
            Ok(harness) => harness,
            Err(e) => panic!("test harness setup failed: {:#}", e),
        }
    }

    pub fn try_build(
        config: TelemetryConfig,
        connector: MockConnector,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        init_test_logging();
        let hub = SubscriptionHub::new(config.clone(), Arc::new(connector.clone()), credentials)
            .context("failed to build subscription hub")?;
        Ok(Self { connector, hub, config })
    }

    pub fn default_config() -> TelemetryConfig {
        TelemetryConfig {
            base_url: "ws://mock.test".into(),
            ..Default::default()
        }
    }

    pub fn subscribe_recording(&self, server_id: &str) -> (Subscription, RecordingListener) {
        let recorder = RecordingListener::new();
        let subscription = self.hub.subscribe(server_id, recorder.listener());
        (subscription, recorder)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_listener_wakes_waiter() {
        let recorder = RecordingListener::new();
        let waiter = {
            let recorder = recorder.clone();
            tokio::spawn(async move { recorder.wait_for_samples(2).await })
        };

        for ts in 1..=2 {
            tokio::task::yield_now().await;
            recorder.record(RecordedEvent::Sample(MetricsSample { timestamp: ts, ..Default::default() }));
        }

        assert!(waiter.await.unwrap());
        assert_eq!(recorder.sample_timestamps(), vec![1, 2]);
    }

    #[test]
    fn test_harness_outside_runtime_fails() {
        let result = TestHarness::try_build(
            TestHarness::default_config(),
            MockConnector::accepting(),
            Arc::new(StaticToken::new("t")),
        );
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_after_limit() {
        let recorder = RecordingListener::new();
        assert!(!recorder.wait_for_samples(1).await);
    }
}
