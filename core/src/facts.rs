//! Client facts exported from the machine that runs the server.
//!
//! Clients need the server's nonce and CA certificate to enroll. Only a host
//! carrying both the server and the client config exports them, so random
//! machines with a stray client config publish nothing.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Keys copied from the `Client` section of the client config.
pub const EXPORTED_KEYS: [&str; 2] = ["nonce", "ca_certificate"];

#[derive(Debug, Error)]
pub enum FactsError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid client config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("client config has no string value for Client.{0}")]
    MissingKey(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientFacts {
    pub nonce: String,
    pub ca_certificate: String,
}

/// Read the exported facts, or `None` when this host is not the server.
pub fn client_settings(
    client_config: &Path,
    server_config: &Path,
) -> Result<Option<ClientFacts>, FactsError> {
    if !(client_config.exists() && server_config.exists()) {
        return Ok(None);
    }
    let content = std::fs::read_to_string(client_config).map_err(|source| FactsError::Io {
        path: client_config.to_path_buf(),
        source,
    })?;
    parse_client_config(&content).map(Some)
}

fn parse_client_config(content: &str) -> Result<ClientFacts, FactsError> {
    let doc: serde_yaml::Value = serde_yaml::from_str(content)?;
    let lookup = |key: &str| {
        doc.get("Client")
            .and_then(|c| c.get(key))
            .and_then(serde_yaml::Value::as_str)
            .map(String::from)
            .ok_or_else(|| FactsError::MissingKey(key.to_string()))
    };
    Ok(ClientFacts {
        nonce: lookup(EXPORTED_KEYS[0])?,
        ca_certificate: lookup(EXPORTED_KEYS[1])?,
    })
}

/// Nest the facts under `velociraptor.client.config`; empty when absent.
pub fn to_document(facts: Option<&ClientFacts>) -> serde_json::Value {
    match facts {
        Some(facts) => serde_json::json!({
            "velociraptor": { "client": { "config": facts } }
        }),
        None => serde_json::json!({}),
    }
}
