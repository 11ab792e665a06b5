/**
 * CONNECTION LIFECYCLE - Une connexion de monitoring par serveur
 *
 * RÔLE :
 * Table des ConnectionRecord (au plus un vivant par server_id) et un acteur
 * tokio par enregistrement : handshake authentifié, heartbeat ping/pong,
 * reconnexion avec backoff, fermeture.
 *
 * ÉTATS :
 * ```text
 *  Disconnected ──▶ Connecting ──▶ Connected ──▶ Disconnected
 *                        │              │
 *                        └────▶ Error ◀─┘ ──▶ Disconnected (retry | abandon)
 * ```
 * - credential absent / server_id invalide : Disconnected direct, sans retry
 * - Connected : compteur de tentatives remis à 0, heartbeat démarré
 * - échec : Error puis Disconnected, retry si tentatives < max, sinon abandon
 *   notifié une seule fois
 * - close propre du serveur : Disconnected, pas de retry
 *
 * CONCURRENCE :
 * L'acteur est le seul écrivain du statut / dernier échantillon / latence.
 * Il écrit l'enregistrement AVANT de notifier le sink, le tout sous le verrou
 * de dispatch (réentrant) de l'enregistrement. Un abonné tardif attaché sous
 * ce même verrou lit donc le cache exactement une fois, puis seulement du live.
 * Le verrou de table ne protège que l'appartenance et n'est jamais tenu
 * pendant un await ou un callback.
 */

use crate::auth::CredentialProvider;
use crate::codec;
use crate::config::TelemetryConfig;
use crate::error::{ConfigError, HandshakeError, TelemetryError, TransportError};
use crate::latency::{now_ms, EchoExchange, HeartbeatCadence, LatencyEstimator, Visibility};
use crate::models::{
    ConnectionSnapshot, ConnectionStatus, LatencySample, MetricsSample, StatusDetail, StatusEvent,
};
use crate::protocol::{ControlMessage, Echo};
use crate::retry::RetrySchedule;
use crate::transport::{Channel, ConnectRequest, Connector, Frame};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Destination des événements d'une connexion (le hub en production)
pub trait EventSink: Send + Sync {
    fn on_sample(&self, server_id: &str, sample: &MetricsSample);
    fn on_latency(&self, server_id: &str, latency: &LatencySample);
    fn on_status(&self, event: &StatusEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Fermeture demandée par l'utilisateur, l'acteur reste en attente
    Disconnect,
    /// Retry manuel, remet le compteur de tentatives à 0
    Reconnect,
    SetVisibility(Visibility),
    /// Dernier abonné parti : fermeture et fin de l'acteur
    Shutdown,
}

/// Derniers échantillons d'un serveur, plus ancien en tête
#[derive(Debug)]
struct SampleHistory {
    capacity: usize,
    samples: VecDeque<MetricsSample>,
}

impl SampleHistory {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, samples: VecDeque::with_capacity(capacity) }
    }

    fn push(&mut self, sample: MetricsSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn to_vec(&self) -> Vec<MetricsSample> {
        self.samples.iter().cloned().collect()
    }
}

#[derive(Debug)]
struct RecordState {
    status: ConnectionStatus,
    detail: StatusDetail,
    subscriber_count: u32,
    reconnect_attempts: u32,
    last_sample: Option<MetricsSample>,
    last_latency: Option<LatencySample>,
    history: SampleHistory,
    last_update_at: Option<OffsetDateTime>,
}

pub struct ConnectionRecord<S> {
    server_id: String,
    instance_id: Uuid,
    created_at: OffsetDateTime,
    commands: mpsc::UnboundedSender<Command>,
    state: Mutex<RecordState>,
    dispatch: ReentrantMutex<()>,
    sink: Arc<S>,
}

impl<S: EventSink> ConnectionRecord<S> {
    fn new(server_id: &str, sink: Arc<S>, history_len: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let record = Arc::new(Self {
            server_id: server_id.to_string(),
            instance_id: Uuid::new_v4(),
            created_at: OffsetDateTime::now_utc(),
            commands: tx,
            state: Mutex::new(RecordState {
                status: ConnectionStatus::Disconnected,
                detail: StatusDetail::None,
                subscriber_count: 0,
                reconnect_attempts: 0,
                last_sample: None,
                last_latency: None,
                history: SampleHistory::new(history_len),
                last_update_at: None,
            }),
            dispatch: ReentrantMutex::new(()),
            sink,
        });
        (record, rx)
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub fn status_detail(&self) -> StatusDetail {
        self.state.lock().detail.clone()
    }

    /// Statut courant sous forme d'événement
    pub fn status_event(&self) -> StatusEvent {
        let st = self.state.lock();
        StatusEvent {
            server_id: self.server_id.clone(),
            status: st.status,
            detail: st.detail.clone(),
        }
    }

    pub fn subscriber_count(&self) -> u32 {
        self.state.lock().subscriber_count
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.state.lock().reconnect_attempts
    }

    pub fn last_sample(&self) -> Option<MetricsSample> {
        self.state.lock().last_sample.clone()
    }

    pub fn last_latency(&self) -> Option<LatencySample> {
        self.state.lock().last_latency
    }

    pub fn history(&self) -> Vec<MetricsSample> {
        self.state.lock().history.to_vec()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let st = self.state.lock();
        ConnectionSnapshot {
            server_id: self.server_id.clone(),
            instance_id: self.instance_id.to_string(),
            status: st.status,
            subscriber_count: st.subscriber_count,
            reconnect_attempts: st.reconnect_attempts,
            last_sample: st.last_sample.clone(),
            last_latency: st.last_latency,
            created_at: self.created_at,
            last_update_at: st.last_update_at,
        }
    }

    /// Sans effet si l'acteur est déjà terminé
    pub fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("[lifecycle] {} actor gone, dropped {:?}", self.server_id, command);
        }
    }

    fn publish_sample(&self, sample: MetricsSample) {
        let _dispatch = self.dispatch.lock();
        {
            let mut st = self.state.lock();
            st.history.push(sample.clone());
            st.last_sample = Some(sample.clone());
            st.last_update_at = Some(OffsetDateTime::now_utc());
        }
        self.sink.on_sample(&self.server_id, &sample);
    }

    fn publish_latency(&self, latency: LatencySample) {
        let _dispatch = self.dispatch.lock();
        {
            let mut st = self.state.lock();
            st.last_latency = Some(latency);
            st.last_update_at = Some(OffsetDateTime::now_utc());
        }
        self.sink.on_latency(&self.server_id, &latency);
    }

    /// Notifie uniquement si (statut, détail) change
    fn set_status(&self, status: ConnectionStatus, detail: StatusDetail) {
        let _dispatch = self.dispatch.lock();
        {
            let mut st = self.state.lock();
            if st.status == status && st.detail == detail {
                return;
            }
            st.status = status;
            st.detail = detail.clone();
        }
        self.sink.on_status(&StatusEvent {
            server_id: self.server_id.clone(),
            status,
            detail,
        });
    }

    fn set_attempts(&self, attempts: u32) {
        self.state.lock().reconnect_attempts = attempts;
    }
}

/// Table des connexions + fabrique des acteurs
pub struct ConnectionManager<S> {
    records: Mutex<HashMap<String, Arc<ConnectionRecord<S>>>>,
    config: Arc<TelemetryConfig>,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    runtime: Handle,
}

impl<S: EventSink + 'static> ConnectionManager<S> {
    /// Doit être appelé depuis un runtime tokio
    pub fn new(
        config: TelemetryConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, TelemetryError> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| ConfigError::Invalid(format!("no tokio runtime: {}", e)))?;
        Ok(Self {
            records: Mutex::new(HashMap::new()),
            config: Arc::new(config),
            connector,
            credentials,
            runtime,
        })
    }

    /// Crée ou rejoint l'enregistrement de `server_id` et incrémente le compteur
    ///
    /// `attach` s'exécute sous le verrou de dispatch, avant le démarrage de
    /// l'acteur pour un nouvel enregistrement : aucun événement ne lui échappe.
    pub fn acquire<R>(
        &self,
        server_id: &str,
        make_sink: impl FnOnce() -> Arc<S>,
        attach: impl FnOnce(&Arc<ConnectionRecord<S>>) -> R,
    ) -> (Arc<ConnectionRecord<S>>, R) {
        let (record, pending) = {
            let mut records = self.records.lock();
            match records.get(server_id) {
                Some(record) => {
                    record.state.lock().subscriber_count += 1;
                    (record.clone(), None)
                }
                None => {
                    let (record, rx) =
                        ConnectionRecord::new(server_id, make_sink(), self.config.history_len);
                    record.state.lock().subscriber_count = 1;
                    records.insert(server_id.to_string(), record.clone());
                    info!("[lifecycle] {} record created (instance {})", server_id, record.instance_id);
                    (record, Some(rx))
                }
            }
        };

        let out = {
            let _dispatch = record.dispatch.lock();
            attach(&record)
        };

        if let Some(rx) = pending {
            let actor = Actor {
                record: record.clone(),
                commands: rx,
                connector: self.connector.clone(),
                credentials: self.credentials.clone(),
                config: self.config.clone(),
                retry: self.config.reconnect.schedule(),
                estimator: LatencyEstimator::new(),
                visibility: Visibility::Foreground,
            };
            self.runtime.spawn(actor.run());
        }
        (record, out)
    }

    /// Décrémente ; à 0 retire l'enregistrement de la table et arrête l'acteur
    pub fn release(&self, record: &Arc<ConnectionRecord<S>>) -> u32 {
        let mut records = self.records.lock();
        let remaining = {
            let mut st = record.state.lock();
            st.subscriber_count = st.subscriber_count.saturating_sub(1);
            st.subscriber_count
        };
        if remaining == 0 {
            let current = records
                .get(&record.server_id)
                .map(|r| Arc::ptr_eq(r, record))
                .unwrap_or(false);
            if current {
                records.remove(&record.server_id);
            }
            drop(records);
            record.send(Command::Shutdown);
            info!("[lifecycle] {} last subscriber gone, tearing down", record.server_id);
        }
        remaining
    }

    pub fn get(&self, server_id: &str) -> Option<Arc<ConnectionRecord<S>>> {
        self.records.lock().get(server_id).cloned()
    }

    /// false si aucun enregistrement pour ce serveur
    pub fn disconnect(&self, server_id: &str) -> bool {
        self.command(server_id, Command::Disconnect)
    }

    pub fn reconnect(&self, server_id: &str) -> bool {
        self.command(server_id, Command::Reconnect)
    }

    pub fn set_visibility(&self, server_id: &str, visibility: Visibility) -> bool {
        self.command(server_id, Command::SetVisibility(visibility))
    }

    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let records: Vec<_> = self.records.lock().values().cloned().collect();
        let mut snapshots: Vec<_> = records.iter().map(|r| r.snapshot()).collect();
        snapshots.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        snapshots
    }

    fn command(&self, server_id: &str, command: Command) -> bool {
        match self.get(server_id) {
            Some(record) => {
                record.send(command);
                true
            }
            None => false,
        }
    }
}

impl<S> Drop for ConnectionManager<S> {
    fn drop(&mut self) {
        for record in self.records.get_mut().values() {
            let _ = record.commands.send(Command::Shutdown);
        }
    }
}

enum Phase {
    Connect,
    Backoff(Duration),
    Parked,
    Exit,
}

struct Actor<S> {
    record: Arc<ConnectionRecord<S>>,
    commands: mpsc::UnboundedReceiver<Command>,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    config: Arc<TelemetryConfig>,
    retry: RetrySchedule,
    /// Conservé entre reconnexions : srtt et offset restent pertinents
    estimator: LatencyEstimator,
    visibility: Visibility,
}

impl<S: EventSink> Actor<S> {
    async fn run(mut self) {
        let mut phase = Phase::Connect;
        loop {
            phase = match phase {
                Phase::Connect => self.connect().await,
                Phase::Backoff(delay) => self.backoff(delay).await,
                Phase::Parked => self.parked().await,
                Phase::Exit => break,
            };
        }
        debug!("[lifecycle] {} actor stopped", self.record.server_id);
    }

    fn reset_retry(&mut self) {
        self.retry.reset();
        self.record.set_attempts(0);
    }

    fn cadence(&self) -> HeartbeatCadence {
        self.config.cadence()
    }

    fn request(&self) -> Result<ConnectRequest, ConfigError> {
        let server_id = &self.record.server_id;
        let url = self.config.monitor_url(server_id)?;
        let token = self
            .credentials
            .token(server_id)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::MissingCredential(server_id.clone()))?;
        Ok(ConnectRequest { server_id: server_id.clone(), url, token })
    }

    async fn connect(&mut self) -> Phase {
        let request = match self.request() {
            Ok(request) => request,
            Err(e) => {
                error!("[lifecycle] {} not connecting: {}", self.record.server_id, e);
                self.record.set_status(
                    ConnectionStatus::Disconnected,
                    StatusDetail::Rejected { reason: e.to_string() },
                );
                return Phase::Parked;
            }
        };

        self.record.set_status(ConnectionStatus::Connecting, StatusDetail::None);
        debug!("[lifecycle] {} connecting to {}", self.record.server_id, request.url);

        let connector = self.connector.clone();
        let timeout = self.config.connect_timeout();
        let handshake = async move {
            match tokio::time::timeout(timeout, connector.connect(request)).await {
                Ok(result) => result,
                Err(_) => Err(HandshakeError::Timeout(timeout.as_millis() as u64)),
            }
        };
        tokio::pin!(handshake);

        let result = loop {
            tokio::select! {
                result = &mut handshake => break result,
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return Phase::Exit,
                    Some(Command::Disconnect) => {
                        self.record.set_status(ConnectionStatus::Disconnected, StatusDetail::ClosedByUser);
                        return Phase::Parked;
                    }
                    Some(Command::SetVisibility(v)) => self.visibility = v,
                    Some(Command::Reconnect) => {}
                },
            }
        };

        match result {
            Ok(channel) => self.session(channel).await,
            Err(e) => {
                warn!("[lifecycle] {} handshake failed: {}", self.record.server_id, e);
                self.fail(e.to_string())
            }
        }
    }

    /// Error puis Disconnected ; retry programmé ou abandon définitif
    fn fail(&mut self, reason: String) -> Phase {
        let server_id = &self.record.server_id;
        self.record.set_status(ConnectionStatus::Error, StatusDetail::Failed { reason: reason.clone() });

        let next = self.retry.next_delay();
        let attempts = self.retry.attempts();
        match next {
            Some(delay) => {
                self.record.set_attempts(attempts);
                info!(
                    "[lifecycle] {} reconnect attempt {}/{} in {}ms",
                    server_id,
                    attempts,
                    self.config.reconnect.max_attempts,
                    delay.as_millis()
                );
                self.record.set_status(
                    ConnectionStatus::Disconnected,
                    StatusDetail::Retrying { attempt: attempts, delay_ms: delay.as_millis() as u64 },
                );
                Phase::Backoff(delay)
            }
            None => {
                error!("[lifecycle] {} giving up after {} attempts: {}", server_id, attempts, reason);
                self.record.set_status(
                    ConnectionStatus::Disconnected,
                    StatusDetail::GaveUp { attempts, reason },
                );
                Phase::Parked
            }
        }
    }

    async fn backoff(&mut self, delay: Duration) -> Phase {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return Phase::Connect,
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return Phase::Exit,
                    Some(Command::Disconnect) => {
                        info!("[lifecycle] {} pending reconnect cancelled", self.record.server_id);
                        self.record.set_status(ConnectionStatus::Disconnected, StatusDetail::ClosedByUser);
                        return Phase::Parked;
                    }
                    Some(Command::Reconnect) => {
                        self.reset_retry();
                        return Phase::Connect;
                    }
                    Some(Command::SetVisibility(v)) => self.visibility = v,
                },
            }
        }
    }

    /// Déconnecté sans timer actif : seule une commande nous réveille
    async fn parked(&mut self) -> Phase {
        loop {
            match self.commands.recv().await {
                None | Some(Command::Shutdown) => return Phase::Exit,
                Some(Command::Reconnect) => {
                    info!("[lifecycle] {} manual reconnect", self.record.server_id);
                    self.reset_retry();
                    return Phase::Connect;
                }
                Some(Command::Disconnect) => {}
                Some(Command::SetVisibility(v)) => self.visibility = v,
            }
        }
    }

    async fn session(&mut self, mut channel: Box<dyn Channel>) -> Phase {
        let server_id = self.record.server_id.clone();
        self.reset_retry();
        self.record.set_status(ConnectionStatus::Connected, StatusDetail::None);
        info!("[lifecycle] {} connected", server_id);

        let cadence = self.cadence();
        // premier ping immédiat
        let mut last_ping: Option<Instant> = None;

        loop {
            let deadline = match last_ping {
                Some(at) => at + cadence.interval_for(self.visibility),
                None => Instant::now(),
            };

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        channel.close().await;
                        self.record.set_status(ConnectionStatus::Disconnected, StatusDetail::ClosedByUser);
                        return Phase::Exit;
                    }
                    Some(Command::Disconnect) => {
                        channel.close().await;
                        info!("[lifecycle] {} disconnected by user", server_id);
                        self.record.set_status(ConnectionStatus::Disconnected, StatusDetail::ClosedByUser);
                        return Phase::Parked;
                    }
                    Some(Command::Reconnect) => {
                        channel.close().await;
                        self.reset_retry();
                        return Phase::Connect;
                    }
                    Some(Command::SetVisibility(v)) => {
                        if v != self.visibility {
                            debug!("[lifecycle] {} visibility now {:?}", server_id, v);
                        }
                        self.visibility = v;
                    }
                },

                _ = sleep_until(deadline) => {
                    last_ping = Some(Instant::now());
                    let ping = ControlMessage::Ping(Echo::request(now_ms()));
                    if let Err(e) = self.send_control(&mut *channel, &ping).await {
                        channel.close().await;
                        return self.fail(e.to_string());
                    }
                    debug!("[lifecycle] {} ping sent", server_id);
                }

                frame = channel.recv() => match frame {
                    Some(Ok(Frame::Binary(bytes))) => self.handle_binary(&bytes),
                    Some(Ok(Frame::Text(text))) => {
                        if let Err(e) = self.handle_text(&mut *channel, &text).await {
                            channel.close().await;
                            return self.fail(e.to_string());
                        }
                    }
                    Some(Ok(Frame::Close { clean: true })) => {
                        info!("[lifecycle] {} closed by server", server_id);
                        self.record.set_status(ConnectionStatus::Disconnected, StatusDetail::ClosedByServer);
                        return Phase::Parked;
                    }
                    Some(Ok(Frame::Close { clean: false })) => {
                        return self.fail("closed abnormally by server".to_string());
                    }
                    Some(Err(e)) => {
                        channel.close().await;
                        return self.fail(e.to_string());
                    }
                    None => return self.fail(TransportError::Reset.to_string()),
                },
            }
        }
    }

    fn handle_binary(&self, bytes: &[u8]) {
        match codec::decode(bytes) {
            Ok(sample) => self.record.publish_sample(sample),
            Err(e) => warn!(
                "[codec] {} dropped frame ({} bytes): {}",
                self.record.server_id,
                bytes.len(),
                e
            ),
        }
    }

    async fn handle_text(&mut self, channel: &mut dyn Channel, text: &str) -> Result<(), TransportError> {
        let message = match ControlMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("[lifecycle] {} ignoring control message: {}", self.record.server_id, e);
                return Ok(());
            }
        };

        match message {
            ControlMessage::Pong(echo) => {
                let sample = self.estimator.observe(EchoExchange {
                    t0: echo.ts,
                    t1: echo.server_recv_ts,
                    t2: echo.server_send_ts,
                    t3: now_ms(),
                });
                debug!(
                    "[lifecycle] {} rtt={}ms srtt={}ms offset={}ms",
                    self.record.server_id, sample.rtt_ms, sample.smoothed_rtt_ms, sample.clock_offset_ms
                );
                self.record.publish_latency(sample);
            }
            ControlMessage::Ping(echo) => {
                let received = now_ms();
                let pong = ControlMessage::Pong(Echo {
                    ts: echo.ts,
                    server_recv_ts: Some(received),
                    server_send_ts: Some(now_ms()),
                });
                self.send_control(channel, &pong).await?;
            }
            ControlMessage::Connected { server_id } => {
                debug!("[lifecycle] {} agent ready ({:?})", self.record.server_id, server_id);
            }
            ControlMessage::Error { message } => {
                warn!("[lifecycle] {} agent error: {}", self.record.server_id, message);
            }
            ControlMessage::Closed { reason } => {
                info!("[lifecycle] {} agent closing: {:?}", self.record.server_id, reason);
            }
            ControlMessage::Unknown => {
                debug!("[lifecycle] {} unknown control message ignored", self.record.server_id);
            }
        }
        Ok(())
    }

    async fn send_control(&self, channel: &mut dyn Channel, message: &ControlMessage) -> Result<(), TransportError> {
        let text = message.to_text()?;
        channel.send_text(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<StatusEvent>>,
    }

    impl EventSink for Recorder {
        fn on_sample(&self, _: &str, _: &MetricsSample) {}
        fn on_latency(&self, _: &str, _: &LatencySample) {}
        fn on_status(&self, event: &StatusEvent) {
            self.statuses.lock().push(event.clone());
        }
    }

    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        async fn connect(&self, _: ConnectRequest) -> Result<Box<dyn Channel>, HandshakeError> {
            Err(HandshakeError::Refused("nope".into()))
        }
    }

    fn manager(credentials: StaticToken) -> ConnectionManager<Recorder> {
        ConnectionManager::new(TelemetryConfig::default(), Arc::new(Refusing), Arc::new(credentials)).unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_record_per_server() {
        let manager = manager(StaticToken::new("t"));
        let (a, _) = manager.acquire("web-01", || Arc::new(Recorder::default()), |_| ());
        let (b, _) = manager.acquire("web-01", || Arc::new(Recorder::default()), |_| ());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(a.sink(), b.sink()));
        assert_eq!(a.subscriber_count(), 2);
        assert_eq!(manager.snapshot().len(), 1);

        assert_eq!(manager.release(&a), 1);
        assert!(manager.get("web-01").is_some());
        assert_eq!(manager.release(&b), 0);
        assert!(manager.get("web-01").is_none());
    }

    #[test]
    fn test_history_keeps_most_recent() {
        let mut history = SampleHistory::new(3);
        for ts in 1..=5 {
            history.push(MetricsSample { timestamp: ts, ..Default::default() });
        }
        let kept: Vec<i64> = history.to_vec().iter().map(|s| s.timestamp).collect();
        assert_eq!(kept, vec![3, 4, 5]);
        assert_eq!(SampleHistory::new(0).capacity, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credential_fails_fast() {
        let manager = manager(StaticToken::none());
        let (record, _) = manager.acquire("web-01", || Arc::new(Recorder::default()), |_| ());
        settle().await;

        let statuses = record.sink().statuses.lock().clone();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].is_terminal());
        assert_eq!(statuses[0].status, ConnectionStatus::Disconnected);
        assert_eq!(record.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_server_id_is_rejected() {
        let manager = manager(StaticToken::new("t"));
        let (record, _) = manager.acquire("not a host", || Arc::new(Recorder::default()), |_| ());
        settle().await;
        assert!(matches!(record.status_detail(), StatusDetail::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_failure_goes_through_error() {
        let manager = manager(StaticToken::new("t"));
        let (record, _) = manager.acquire("web-01", || Arc::new(Recorder::default()), |_| ());
        settle().await;

        let statuses: Vec<ConnectionStatus> =
            record.sink().statuses.lock().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![ConnectionStatus::Connecting, ConnectionStatus::Error, ConnectionStatus::Disconnected]
        );
        assert_eq!(
            record.status_detail(),
            StatusDetail::Retrying { attempt: 1, delay_ms: 2_000 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_backoff_is_idempotent() {
        let manager = manager(StaticToken::new("t"));
        let (record, _) = manager.acquire("web-01", || Arc::new(Recorder::default()), |_| ());
        settle().await;

        assert!(manager.disconnect("web-01"));
        assert!(manager.disconnect("web-01"));
        settle().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let events = record.sink().statuses.lock().clone();
        let closed = events.iter().filter(|e| e.detail == StatusDetail::ClosedByUser).count();
        assert_eq!(closed, 1);
        assert_eq!(events.last().map(|e| e.detail.clone()), Some(StatusDetail::ClosedByUser));
        assert_eq!(record.reconnect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_server_commands_report_false() {
        let manager = manager(StaticToken::new("t"));
        assert!(!manager.disconnect("ghost"));
        assert!(!manager.reconnect("ghost"));
        assert!(manager.snapshot().is_empty());
    }
}
