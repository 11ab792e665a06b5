/*!
Mock du transport WebSocket pour développement sans agent

Le MockConnector remplace WsConnector : chaque tentative est enregistrée
(requête + instant tokio) et acceptée ou refusée selon un script. Une
connexion acceptée donne un MockServer au test, qui pousse des trames vers
le client et lit ce que le client envoie (pings, pongs).
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use termhub_telemetry::codec;
use termhub_telemetry::{
    Channel, ConnectRequest, Connector, ControlMessage, Echo, Frame, HandshakeError, MetricsSample,
    TransportError,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Issue scriptée d'une tentative de connexion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Refuse(String),
    /// Handshake HTTP refusé avec ce status
    Reject(u16),
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: ConnectRequest,
    pub at: Instant,
}

struct ConnectorState {
    script: VecDeque<Outcome>,
    fallback: Outcome,
    requests: Vec<RecordedRequest>,
}

#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    servers_tx: mpsc::UnboundedSender<MockServer>,
    servers_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockServer>>>,
}

impl MockConnector {
    fn with_fallback(fallback: Outcome) -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(ConnectorState {
                script: VecDeque::new(),
                fallback,
                requests: Vec::new(),
            })),
            servers_tx,
            servers_rx: Arc::new(tokio::sync::Mutex::new(servers_rx)),
        }
    }

    /// Accepte toute tentative non scriptée
    pub fn accepting() -> Self {
        Self::with_fallback(Outcome::Accept)
    }

    /// Refuse toute tentative non scriptée
    pub fn refusing() -> Self {
        Self::with_fallback(Outcome::Refuse("connection refused".into()))
    }

    /// Issue de la prochaine tentative, avant le fallback
    pub fn push(&self, outcome: Outcome) -> &Self {
        self.state.lock().script.push_back(outcome);
        self
    }

    pub fn set_fallback(&self, outcome: Outcome) {
        self.state.lock().fallback = outcome;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Écarts entre tentatives successives, en ms
    pub fn attempt_gaps_ms(&self) -> Vec<u64> {
        self.requests()
            .windows(2)
            .map(|w| (w[1].at - w[0].at).as_millis() as u64)
            .collect()
    }

    /// Prochaine connexion acceptée (None après 5 min de temps tokio)
    pub async fn next_server(&self) -> Option<MockServer> {
        let mut rx = self.servers_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(300), rx.recv()).await.ok().flatten()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Box<dyn Channel>, HandshakeError> {
        let outcome = {
            let mut state = self.state.lock();
            state.requests.push(RecordedRequest { request: request.clone(), at: Instant::now() });
            let fallback = state.fallback.clone();
            state.script.pop_front().unwrap_or(fallback)
        };
        debug!("[mock] connect {} -> {:?}", request.server_id, outcome);

        match outcome {
            Outcome::Refuse(reason) => Err(HandshakeError::Refused(reason)),
            Outcome::Reject(status) => Err(HandshakeError::Rejected(status)),
            Outcome::Accept => {
                let (to_client, incoming) = mpsc::unbounded_channel();
                let (outgoing, from_client) = mpsc::unbounded_channel();
                let closed = Arc::new(AtomicBool::new(false));
                let server = MockServer { request, to_client, from_client, closed: closed.clone() };
                if self.servers_tx.send(server).is_err() {
                    return Err(HandshakeError::Refused("mock connector dropped".into()));
                }
                Ok(Box::new(MockChannel { incoming, outgoing, closed }))
            }
        }
    }
}

/// Côté client d'une connexion simulée
pub struct MockChannel {
    incoming: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    outgoing: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Channel for MockChannel {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Send("channel closed".into()));
        }
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::Send("mock server dropped".into()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.incoming.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Côté serveur d'une connexion simulée, tenu par le test.
/// Le drop du MockServer termine le flux côté client (fermeture inattendue).
pub struct MockServer {
    pub request: ConnectRequest,
    to_client: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MockServer {
    fn push(&self, frame: Result<Frame, TransportError>) {
        let _ = self.to_client.send(frame);
    }

    pub fn send_sample(&self, sample: &MetricsSample) {
        self.send_binary(codec::encode(sample));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.push(Ok(Frame::Binary(bytes)));
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.push(Ok(Frame::Text(text.into())));
    }

    pub fn send_control(&self, message: &ControlMessage) {
        if let Ok(text) = message.to_text() {
            self.send_text(text);
        }
    }

    pub fn close_clean(&self) {
        self.push(Ok(Frame::Close { clean: true }));
    }

    pub fn close_abnormal(&self) {
        self.push(Ok(Frame::Close { clean: false }));
    }

    pub fn fail(&self, error: TransportError) {
        self.push(Err(error));
    }

    /// Le client a fermé la connexion
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn wait_closed(&self) -> bool {
        let deadline = Instant::now() + Duration::from_secs(300);
        while !self.is_closed() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Prochain message texte envoyé par le client
    pub async fn next_sent(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(300), self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    /// Prochain message de contrôle envoyé par le client, illisibles ignorés
    pub async fn next_control(&mut self) -> Option<ControlMessage> {
        loop {
            let text = self.next_sent().await?;
            if let Ok(message) = ControlMessage::parse(&text) {
                return Some(message);
            }
        }
    }

    /// Prochain ping du heartbeat client
    pub async fn next_ping(&mut self) -> Option<Echo> {
        loop {
            if let ControlMessage::Ping(echo) = self.next_control().await? {
                return Some(echo);
            }
        }
    }

    /// Prochaine réponse pong à un ping serveur
    pub async fn next_pong(&mut self) -> Option<Echo> {
        loop {
            if let ControlMessage::Pong(echo) = self.next_control().await? {
                return Some(echo);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request() -> ConnectRequest {
        ConnectRequest {
            server_id: "web-01".into(),
            url: Url::parse("ws://mock.test/ws/monitor/web-01?interval=3").unwrap(),
            token: "t".into(),
        }
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let connector = MockConnector::accepting();
        connector.push(Outcome::Refuse("down".into())).push(Outcome::Reject(401));

        assert!(matches!(connector.connect(request()).await, Err(HandshakeError::Refused(_))));
        assert!(matches!(connector.connect(request()).await, Err(HandshakeError::Rejected(401))));
        assert!(connector.connect(request()).await.is_ok());
        assert_eq!(connector.connect_count(), 3);
        assert!(connector.next_server().await.is_some());
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let connector = MockConnector::accepting();
        let mut channel = connector.connect(request()).await.unwrap();
        let mut server = connector.next_server().await.unwrap();

        server.send_text("hello");
        assert_eq!(channel.recv().await.unwrap().unwrap(), Frame::Text("hello".into()));

        channel.send_text("world".into()).await.unwrap();
        assert_eq!(server.next_sent().await.as_deref(), Some("world"));

        channel.close().await;
        assert!(server.is_closed());
        assert!(channel.send_text("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_server_ends_stream() {
        let connector = MockConnector::accepting();
        let mut channel = connector.connect(request()).await.unwrap();
        drop(connector.next_server().await);
        assert!(channel.recv().await.is_none());
    }
}
