//! Fournisseurs de credential pour le handshake.
//!
//! Le token est opaque : on le relit à chaque tentative de connexion pour
//! suivre une rotation éventuelle, sans jamais le logger.

use std::collections::HashMap;

pub trait CredentialProvider: Send + Sync {
    /// None ou chaîne vide = credential absent, la connexion échoue sans retry
    fn token(&self, server_id: &str) -> Option<String>;
}

/// Token fixe, optionnellement surchargé par serveur
#[derive(Debug, Clone, Default)]
pub struct StaticToken {
    default: Option<String>,
    per_server: HashMap<String, String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self { default: Some(token.into()), per_server: HashMap::new() }
    }

    /// Aucun token : toute connexion est refusée
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, server_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.per_server.insert(server_id.into(), token.into());
        self
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self, server_id: &str) -> Option<String> {
        self.per_server
            .get(server_id)
            .or(self.default.as_ref())
            .filter(|t| !t.is_empty())
            .cloned()
    }
}

/// Lit `<VAR>_<SERVER_ID>` puis `<VAR>` dans l'environnement
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    fn server_var(&self, server_id: &str) -> String {
        let suffix: String = server_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}_{}", self.var, suffix)
    }
}

impl CredentialProvider for EnvToken {
    fn token(&self, server_id: &str) -> Option<String> {
        std::env::var(self.server_var(server_id))
            .or_else(|_| std::env::var(&self.var))
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token_overrides() {
        let provider = StaticToken::new("shared").with_server("db-02", "db-only");
        assert_eq!(provider.token("web-01").as_deref(), Some("shared"));
        assert_eq!(provider.token("db-02").as_deref(), Some("db-only"));
        assert_eq!(StaticToken::none().token("web-01"), None);
        assert_eq!(StaticToken::new("").token("web-01"), None);
    }

    #[test]
    fn test_env_token_lookup_order() {
        let provider = EnvToken::new("TERMHUB_AUTH_TEST_TOKEN");
        assert_eq!(provider.server_var("web-01.prod"), "TERMHUB_AUTH_TEST_TOKEN_WEB_01_PROD");

        std::env::set_var("TERMHUB_AUTH_TEST_TOKEN", "global");
        std::env::set_var("TERMHUB_AUTH_TEST_TOKEN_DB_02", "scoped");
        assert_eq!(provider.token("web-01").as_deref(), Some("global"));
        assert_eq!(provider.token("db-02").as_deref(), Some("scoped"));

        std::env::remove_var("TERMHUB_AUTH_TEST_TOKEN");
        assert_eq!(provider.token("web-01"), None);
        std::env::remove_var("TERMHUB_AUTH_TEST_TOKEN_DB_02");
    }
}
