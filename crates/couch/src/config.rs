//! Connection configuration for the Couch adapter

use serde::Deserialize;

/// Where and how to reach the CouchDB-style server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CouchConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Basic-auth username; empty disables authentication
    pub username: Option<String>,
    /// Basic-auth password
    pub password: Option<String>,
}

impl Default for CouchConfig {
    fn default() -> Self {
        CouchConfig {
            host: "localhost".to_string(),
            port: 5984,
            database: "docent".to_string(),
            username: None,
            password: None,
        }
    }
}

impl CouchConfig {
    /// Base URL of the server, without a trailing slash
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Credentials, when a non-empty username is configured
    pub fn credentials(&self) -> Option<(String, String)> {
        match &self.username {
            Some(user) if !user.is_empty() => Some((
                user.clone(),
                self.password.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }
}
