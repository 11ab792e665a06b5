/**
 * SUBSCRIPTION HUB - Multiplexage d'une connexion vers N consommateurs
 *
 * RÔLE :
 * Compte les abonnés par serveur (seule autorité sur la durée de vie de la
 * connexion), distribue échantillons / latence / statut dans l'ordre
 * d'attachement, et libère la connexion au départ du dernier abonné.
 *
 * FONCTIONNEMENT :
 * - subscribe : crée ou rejoint l'enregistrement, attache le listener et lui
 *   rejoue le statut courant, le dernier échantillon et la dernière latence
 * - Subscription::unsubscribe (ou drop) : détache une seule fois
 * - un listener qui panique est isolé, les suivants reçoivent l'événement
 * - visibilité : la connexion reste au premier plan tant qu'un abonné l'est
 */

use crate::auth::CredentialProvider;
use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::latency::Visibility;
use crate::lifecycle::{Command, ConnectionManager, ConnectionRecord, EventSink};
use crate::models::{
    ConnectionSnapshot, ConnectionStatus, LatencySample, MetricsSample, StatusDetail, StatusEvent,
};
use crate::transport::Connector;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

type SampleFn = Box<dyn Fn(&MetricsSample) + Send + Sync>;
type LatencyFn = Box<dyn Fn(&LatencySample) + Send + Sync>;
type StatusFn = Box<dyn Fn(&StatusEvent) + Send + Sync>;

/// Callbacks d'un abonné, tous optionnels
#[derive(Default)]
pub struct Listener {
    on_sample: Option<SampleFn>,
    on_latency: Option<LatencyFn>,
    on_status: Option<StatusFn>,
}

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_sample(mut self, f: impl Fn(&MetricsSample) + Send + Sync + 'static) -> Self {
        self.on_sample = Some(Box::new(f));
        self
    }

    pub fn on_latency(mut self, f: impl Fn(&LatencySample) + Send + Sync + 'static) -> Self {
        self.on_latency = Some(Box::new(f));
        self
    }

    pub fn on_status(mut self, f: impl Fn(&StatusEvent) + Send + Sync + 'static) -> Self {
        self.on_status = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("on_sample", &self.on_sample.is_some())
            .field("on_latency", &self.on_latency.is_some())
            .field("on_status", &self.on_status.is_some())
            .finish()
    }
}

struct Entry {
    id: u64,
    listener: Arc<Listener>,
    visibility: Visibility,
}

/// Listeners d'un serveur, dans l'ordre d'attachement
pub struct Fanout {
    server_id: String,
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl Fanout {
    pub fn new(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn attach(&self, listener: Arc<Listener>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry { id, listener, visibility: Visibility::Foreground });
        id
    }

    fn detach(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Retourne la visibilité agrégée après mise à jour
    fn set_visibility(&self, id: u64, visibility: Visibility) -> Visibility {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.visibility = visibility;
        }
        aggregate(&entries)
    }

    fn visibility(&self) -> Visibility {
        aggregate(&self.entries.lock())
    }

    /// Copie des listeners : aucun verrou tenu pendant les callbacks
    fn listeners(&self) -> Vec<Arc<Listener>> {
        self.entries.lock().iter().map(|e| e.listener.clone()).collect()
    }

    pub fn notify(&self, sample: &MetricsSample) {
        for listener in self.listeners() {
            deliver_sample(&self.server_id, &listener, sample);
        }
    }

    pub fn notify_latency(&self, latency: &LatencySample) {
        for listener in self.listeners() {
            deliver_latency(&self.server_id, &listener, latency);
        }
    }

    pub fn notify_status(&self, event: &StatusEvent) {
        for listener in self.listeners() {
            deliver_status(&self.server_id, &listener, event);
        }
    }
}

impl EventSink for Fanout {
    fn on_sample(&self, _server_id: &str, sample: &MetricsSample) {
        self.notify(sample);
    }

    fn on_latency(&self, _server_id: &str, latency: &LatencySample) {
        self.notify_latency(latency);
    }

    fn on_status(&self, event: &StatusEvent) {
        self.notify_status(event);
    }
}

fn aggregate(entries: &[Entry]) -> Visibility {
    if entries.is_empty() || entries.iter().any(|e| e.visibility == Visibility::Foreground) {
        Visibility::Foreground
    } else {
        Visibility::Background
    }
}

fn deliver_sample(server_id: &str, listener: &Listener, sample: &MetricsSample) {
    if let Some(f) = &listener.on_sample {
        guarded(server_id, "sample", || f(sample));
    }
}

fn deliver_latency(server_id: &str, listener: &Listener, latency: &LatencySample) {
    if let Some(f) = &listener.on_latency {
        guarded(server_id, "latency", || f(latency));
    }
}

fn deliver_status(server_id: &str, listener: &Listener, event: &StatusEvent) {
    if let Some(f) = &listener.on_status {
        guarded(server_id, "status", || f(event));
    }
}

fn guarded(server_id: &str, kind: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("[hub] {} listener panicked on {} event, skipped", server_id, kind);
    }
}

/// Point d'entrée des consommateurs
#[derive(Clone)]
pub struct SubscriptionHub {
    manager: Arc<ConnectionManager<Fanout>>,
}

impl SubscriptionHub {
    /// Doit être appelé depuis un runtime tokio
    pub fn new(
        config: TelemetryConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, TelemetryError> {
        let manager = ConnectionManager::new(config, connector, credentials)?;
        Ok(Self { manager: Arc::new(manager) })
    }

    /// Ne retourne jamais d'erreur : les échecs arrivent en événements de statut
    pub fn subscribe(&self, server_id: &str, listener: Listener) -> Subscription {
        let listener = Arc::new(listener);
        let (record, listener_id) = self.manager.acquire(
            server_id,
            || Arc::new(Fanout::new(server_id)),
            |record| {
                let id = record.sink().attach(listener.clone());
                let status = record.status_event();
                if status.status != ConnectionStatus::Disconnected || status.detail != StatusDetail::None {
                    deliver_status(server_id, &listener, &status);
                }
                if let Some(sample) = record.last_sample() {
                    deliver_sample(server_id, &listener, &sample);
                }
                if let Some(latency) = record.last_latency() {
                    deliver_latency(server_id, &listener, &latency);
                }
                id
            },
        );
        self.sync_visibility(&record);
        debug!(
            "[hub] {} subscribed (listener {}, {} total)",
            server_id,
            listener_id,
            record.subscriber_count()
        );

        Subscription {
            manager: self.manager.clone(),
            record,
            listener_id,
            detached: false,
        }
    }

    pub fn subscribe_fn(
        &self,
        server_id: &str,
        on_sample: impl Fn(&MetricsSample) + Send + Sync + 'static,
        on_latency: impl Fn(&LatencySample) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(server_id, Listener::new().on_sample(on_sample).on_latency(on_latency))
    }

    pub fn last_sample(&self, server_id: &str) -> Option<MetricsSample> {
        self.manager.get(server_id)?.last_sample()
    }

    pub fn last_latency(&self, server_id: &str) -> Option<LatencySample> {
        self.manager.get(server_id)?.last_latency()
    }

    /// Plus ancien en tête
    pub fn history(&self, server_id: &str) -> Vec<MetricsSample> {
        self.manager.get(server_id).map(|r| r.history()).unwrap_or_default()
    }

    /// Disconnected pour un serveur sans abonné
    pub fn status(&self, server_id: &str) -> ConnectionStatus {
        self.manager
            .get(server_id)
            .map(|r| r.status())
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    pub fn subscriber_count(&self, server_id: &str) -> u32 {
        self.manager.get(server_id).map(|r| r.subscriber_count()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        self.manager.snapshot()
    }

    /// Ferme la connexion sans détacher les abonnés
    pub fn disconnect(&self, server_id: &str) -> bool {
        self.manager.disconnect(server_id)
    }

    pub fn reconnect(&self, server_id: &str) -> bool {
        self.manager.reconnect(server_id)
    }

    fn sync_visibility(&self, record: &ConnectionRecord<Fanout>) {
        record.send(Command::SetVisibility(record.sink().visibility()));
    }
}

/// Abonnement actif ; détaché au plus une fois, explicitement ou au drop
pub struct Subscription {
    manager: Arc<ConnectionManager<Fanout>>,
    record: Arc<ConnectionRecord<Fanout>>,
    listener_id: u64,
    detached: bool,
}

impl Subscription {
    pub fn server_id(&self) -> &str {
        self.record.server_id()
    }

    pub fn is_active(&self) -> bool {
        !self.detached
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        if self.detached {
            return;
        }
        let aggregated = self.record.sink().set_visibility(self.listener_id, visibility);
        self.record.send(Command::SetVisibility(aggregated));
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.record.sink().detach(self.listener_id);
        let remaining = self.manager.release(&self.record);
        if remaining > 0 {
            let visibility = self.record.sink().visibility();
            self.record.send(Command::SetVisibility(visibility));
        }
        debug!(
            "[hub] {} unsubscribed (listener {}, {} left)",
            self.record.server_id(),
            self.listener_id,
            remaining
        );
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("server_id", &self.record.server_id())
            .field("listener_id", &self.listener_id)
            .field("detached", &self.detached)
            .finish()
    }
}
