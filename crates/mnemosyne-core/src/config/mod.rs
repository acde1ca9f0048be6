//! Configuration system for mnemosyne.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{MnemosyneError, MnemosyneResult};
use crate::traits::VectorDatabaseProvider;

/// Largest number of rows a single Milvus query may return.
pub const MILVUS_MAX_QUERY_WINDOW: usize = 16_384;

/// Connection settings for the vector database.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDatabaseConfig {
    /// Backend kind.
    pub provider: VectorDatabaseProvider,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Full endpoint URI; overrides `host` and `port` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Database name.
    pub database: String,
    /// Access token (`user:password` or an API key).
    #[serde(skip_serializing)]
    pub token: Option<SecretString>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Rows scanned by `get_latest_memory` before sorting.
    pub latest_window: usize,
}

impl Default for VectorDatabaseConfig {
    fn default() -> Self {
        Self {
            provider: VectorDatabaseProvider::Milvus,
            host: "localhost".to_string(),
            port: 19530,
            uri: None,
            database: "default".to_string(),
            token: None,
            timeout_secs: 30,
            latest_window: MILVUS_MAX_QUERY_WINDOW,
        }
    }
}

impl VectorDatabaseConfig {
    /// Base URL of the server, without a trailing slash.
    pub fn base_url(&self) -> String {
        match &self.uri {
            Some(uri) => uri.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    /// An in-process backend configuration, mainly for tests.
    pub fn memory() -> Self {
        Self {
            provider: VectorDatabaseProvider::Memory,
            ..Self::default()
        }
    }
}

/// Main mnemosyne configuration.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemosyneConfig {
    /// Vector database connection.
    pub vector_database: VectorDatabaseConfig,
    /// Collection that stores memories.
    pub collection_name: String,
    /// Dimension of the embedding vectors.
    pub embedding_dim: usize,
    /// Number of memories returned by a recall search.
    pub top_k: usize,
}

impl Default for MnemosyneConfig {
    fn default() -> Self {
        Self {
            vector_database: VectorDatabaseConfig::default(),
            collection_name: "mnemosyne_default".to_string(),
            embedding_dim: 1024,
            top_k: 5,
        }
    }
}

impl MnemosyneConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> MnemosyneResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| MnemosyneError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| MnemosyneError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| MnemosyneError::Configuration(e.to_string()))?,
            _ => {
                return Err(MnemosyneError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `MNEMOSYNE_*` environment variables.
    pub fn from_env() -> MnemosyneResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `MNEMOSYNE_*` environment variables.
    pub fn apply_env(&mut self) -> MnemosyneResult<()> {
        let db = &mut self.vector_database;

        if let Ok(provider) = std::env::var("MNEMOSYNE_VECTOR_DB") {
            db.provider = VectorDatabaseProvider::from_str(&provider).map_err(|_| {
                MnemosyneError::Configuration(format!("Unknown vector database '{}'", provider))
            })?;
        }
        if let Ok(host) = std::env::var("MNEMOSYNE_MILVUS_HOST") {
            db.host = host;
        }
        if let Ok(port) = std::env::var("MNEMOSYNE_MILVUS_PORT") {
            db.port = parse_env("MNEMOSYNE_MILVUS_PORT", &port)?;
        }
        if let Ok(uri) = std::env::var("MNEMOSYNE_MILVUS_URI") {
            db.uri = Some(uri);
        }
        if let Ok(database) = std::env::var("MNEMOSYNE_MILVUS_DATABASE") {
            db.database = database;
        }
        if let Ok(token) = std::env::var("MNEMOSYNE_MILVUS_TOKEN") {
            db.token = Some(SecretString::new(token));
        }
        if let Ok(collection) = std::env::var("MNEMOSYNE_COLLECTION") {
            self.collection_name = collection;
        }
        if let Ok(dim) = std::env::var("MNEMOSYNE_EMBEDDING_DIM") {
            self.embedding_dim = parse_env("MNEMOSYNE_EMBEDDING_DIM", &dim)?;
        }
        if let Ok(top_k) = std::env::var("MNEMOSYNE_TOP_K") {
            self.top_k = parse_env("MNEMOSYNE_TOP_K", &top_k)?;
        }

        Ok(())
    }

    /// Reject settings no backend can work with.
    pub fn validate(&self) -> MnemosyneResult<()> {
        if self.collection_name.trim().is_empty() {
            return Err(MnemosyneError::Configuration(
                "collection_name must not be empty".to_string(),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(MnemosyneError::Configuration(
                "embedding_dim must be greater than zero".to_string(),
            ));
        }
        let window = self.vector_database.latest_window;
        if window == 0 || window > MILVUS_MAX_QUERY_WINDOW {
            return Err(MnemosyneError::Configuration(format!(
                "latest_window must be between 1 and {}",
                MILVUS_MAX_QUERY_WINDOW
            )));
        }
        Ok(())
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> MnemosyneConfigBuilder {
        MnemosyneConfigBuilder::default()
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> MnemosyneResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MnemosyneError::Configuration(format!("{} has invalid value '{}'", name, value)))
}

/// Builder for MnemosyneConfig.
#[derive(Default)]
pub struct MnemosyneConfigBuilder {
    config: MnemosyneConfig,
}

impl MnemosyneConfigBuilder {
    /// Set vector database configuration.
    pub fn vector_database(mut self, config: VectorDatabaseConfig) -> Self {
        self.config.vector_database = config;
        self
    }

    /// Set the memory collection name.
    pub fn collection_name(mut self, name: impl Into<String>) -> Self {
        self.config.collection_name = name.into();
        self
    }

    /// Set the embedding dimension.
    pub fn embedding_dim(mut self, dim: usize) -> Self {
        self.config.embedding_dim = dim;
        self
    }

    /// Set the recall size.
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.config.top_k = top_k;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> MnemosyneResult<MnemosyneConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MnemosyneConfig::default();
        assert_eq!(config.vector_database.provider, VectorDatabaseProvider::Milvus);
        assert_eq!(config.vector_database.base_url(), "http://localhost:19530");
        assert_eq!(config.collection_name, "mnemosyne_default");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_uri_overrides_host() {
        let db = VectorDatabaseConfig {
            uri: Some("https://milvus.example.com/".to_string()),
            ..Default::default()
        };
        assert_eq!(db.base_url(), "https://milvus.example.com");
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
collection_name = "memories"
embedding_dim = 8

[vector_database]
provider = "memory"
port = 19531
token = "root:Milvus"
"#
        )
        .unwrap();

        let config = MnemosyneConfig::from_file(file.path()).unwrap();
        assert_eq!(config.collection_name, "memories");
        assert_eq!(config.embedding_dim, 8);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.vector_database.provider, VectorDatabaseProvider::Memory);
        assert_eq!(config.vector_database.port, 19531);
        assert_eq!(
            config.vector_database.token.as_ref().unwrap().expose_secret(),
            "root:Milvus"
        );
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"top_k": 9, "vector_database": {{"host": "milvus"}}}}"#).unwrap();

        let config = MnemosyneConfig::from_file(file.path()).unwrap();
        assert_eq!(config.top_k, 9);
        assert_eq!(config.vector_database.base_url(), "http://milvus:19530");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            MnemosyneConfig::from_file(file.path()),
            Err(MnemosyneError::Configuration(_))
        ));
    }

    #[test]
    fn test_builder_validates() {
        assert!(MnemosyneConfig::builder().embedding_dim(0).build().is_err());
        let config = MnemosyneConfig::builder()
            .collection_name("c")
            .embedding_dim(4)
            .top_k(3)
            .vector_database(VectorDatabaseConfig::memory())
            .build()
            .unwrap();
        assert_eq!(config.top_k, 3);
        assert_eq!(config.vector_database.provider, VectorDatabaseProvider::Memory);
    }

    #[test]
    fn test_token_is_not_serialized() {
        let db = VectorDatabaseConfig {
            token: Some(SecretString::new("secret".to_string())),
            ..Default::default()
        };
        let json = serde_json::to_string(&db).unwrap();
        assert!(!json.contains("secret"));
    }
}
