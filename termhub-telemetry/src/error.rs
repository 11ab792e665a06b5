/**
 * ERREURS TÉLÉMÉTRIE - Taxonomie des échecs du transport
 *
 * RÔLE :
 * Un enum par préoccupation (décodage, handshake, transport, configuration)
 * pour que chaque couche décide elle-même de la politique : on jette la trame,
 * on relance avec backoff, ou on échoue immédiatement sans retry.
 *
 * PROPAGATION :
 * - DecodeError : locale, loggée, l'échantillon précédent reste "dernier connu"
 * - HandshakeError / TransportError : transition de statut + backoff
 * - ConfigError : pas de retry, DISCONNECTED direct
 * Aucune de ces erreurs ne traverse l'API subscribe/unsubscribe.
 */

/// Trame binaire illisible
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] prost::DecodeError),
}

/// Échec de l'établissement de la connexion
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("handshake rejected with status {0}")]
    Rejected(u16),
    #[error("handshake timed out after {0}ms")]
    Timeout(u64),
    #[error("invalid connect request: {0}")]
    InvalidRequest(String),
}

/// Erreur socket en cours de session
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Socket(String),
    #[error("connection reset without close frame")]
    Reset,
    #[error("send failed: {0}")]
    Send(String),
    #[error("invalid control message: {0}")]
    Control(#[from] serde_json::Error),
}

/// Configuration invalide ou credential absent, jamais retenté
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing credential for server {0}")]
    MissingCredential(String),
    #[error("invalid server id: {0:?}")]
    InvalidServerId(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Erreur agrégée pour les appelants qui ne distinguent pas les couches
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;
