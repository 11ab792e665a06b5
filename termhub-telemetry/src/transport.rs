/**
 * TRANSPORT - Abstraction de la socket de monitoring
 *
 * RÔLE :
 * Le Connector établit une connexion authentifiée vers l'agent d'un serveur,
 * le Channel expose les trames déjà délimitées (binaire = métriques, texte =
 * contrôle JSON). Le cycle de vie ne voit jamais tokio-tungstenite directement,
 * les tests branchent un connecteur simulé à la place.
 *
 * FERMETURE :
 * Close avec code 1000/1001 (ou sans code) = fermeture propre, pas de retry.
 * Tout autre code, une erreur socket ou la fin du flux = fermeture inattendue.
 */

use crate::error::{HandshakeError, TransportError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

/// Trame applicative reçue du serveur
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
    Close { clean: bool },
}

/// Tout ce qu'il faut pour ouvrir une tentative de connexion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub server_id: String,
    pub url: Url,
    /// Bearer token opaque, relu à chaque tentative
    pub token: String,
}

impl ConnectRequest {
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<Box<dyn Channel>, HandshakeError>;
}

/// Connexion établie. `recv` doit être annulable (utilisé dans un select!).
#[async_trait]
pub trait Channel: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// None quand le flux est terminé
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Tolère une socket déjà fermée
    async fn close(&mut self);
}

/// Connecteur WebSocket réel (ws:// ou wss://)
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Box<dyn Channel>, HandshakeError> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| HandshakeError::InvalidRequest(e.to_string()))?;
        let auth = HeaderValue::from_str(&request.authorization())
            .map_err(|e| HandshakeError::InvalidRequest(format!("authorization header: {}", e)))?;
        ws_request.headers_mut().insert(AUTHORIZATION, auth);

        let (stream, response) = connect_async(ws_request).await.map_err(handshake_error)?;
        debug!(
            "[transport] {} handshake ok ({})",
            request.server_id,
            response.status()
        );
        Ok(Box::new(WsChannel { stream, closed: false }))
    }
}

fn handshake_error(err: WsError) -> HandshakeError {
    match err {
        WsError::Http(response) => HandshakeError::Rejected(response.status().as_u16()),
        WsError::Url(e) => HandshakeError::InvalidRequest(e.to_string()),
        other => HandshakeError::Refused(other.to_string()),
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                    return Some(Err(TransportError::Reset))
                }
                Err(e) => return Some(Err(TransportError::Socket(e.to_string()))),
            };
            match message {
                Message::Binary(bytes) => return Some(Ok(Frame::Binary(bytes))),
                Message::Text(text) => return Some(Ok(Frame::Text(text))),
                Message::Close(frame) => {
                    let clean = frame
                        .map(|f| matches!(f.code, CloseCode::Normal | CloseCode::Away))
                        .unwrap_or(true);
                    return Some(Ok(Frame::Close { clean }));
                }
                // ping/pong protocole gérés par tungstenite
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            debug!("[transport] close on dead socket: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_header_value() {
        let request = ConnectRequest {
            server_id: "web-01".into(),
            url: Url::parse("wss://dash.example.com/ws/monitor/web-01?interval=3").unwrap(),
            token: "s3cr3t".into(),
        };
        assert_eq!(request.authorization(), "Bearer s3cr3t");
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_handshake_error() {
        // port 9 (discard) fermé sur la boucle locale
        let request = ConnectRequest {
            server_id: "web-01".into(),
            url: Url::parse("ws://127.0.0.1:9/ws/monitor/web-01").unwrap(),
            token: "t".into(),
        };
        let result = WsConnector::new().connect(request).await;
        assert!(matches!(result, Err(HandshakeError::Refused(_))));
    }

    #[tokio::test]
    async fn test_header_with_newline_is_invalid() {
        let request = ConnectRequest {
            server_id: "web-01".into(),
            url: Url::parse("ws://127.0.0.1:9/").unwrap(),
            token: "bad\ntoken".into(),
        };
        let result = WsConnector::new().connect(request).await;
        assert!(matches!(result, Err(HandshakeError::InvalidRequest(_))));
    }
}
