//! Factory for creating vector database backends.

use std::sync::Arc;

use mnemosyne_core::config::VectorDatabaseConfig;
use mnemosyne_core::error::{MnemosyneError, MnemosyneResult};
use mnemosyne_core::traits::VectorDatabase;
#[allow(unused_imports)]
use mnemosyne_core::traits::VectorDatabaseProvider;

/// Factory for creating vector database backends.
pub struct VectorDatabaseFactory;

impl VectorDatabaseFactory {
    /// Create a backend from the given configuration without connecting.
    #[allow(unreachable_patterns)]
    pub fn create(config: VectorDatabaseConfig) -> MnemosyneResult<Arc<dyn VectorDatabase>> {
        match config.provider {
            #[cfg(feature = "milvus")]
            VectorDatabaseProvider::Milvus => {
                let db = crate::milvus::MilvusDatabase::new(config)?;
                Ok(Arc::new(db))
            }

            #[cfg(feature = "memory")]
            VectorDatabaseProvider::Memory => Ok(Arc::new(crate::memory::InMemoryDatabase::new())),

            provider => Err(MnemosyneError::UnsupportedProvider {
                provider: provider.to_string(),
            }),
        }
    }

    /// Create a backend and connect it.
    pub async fn connect(config: VectorDatabaseConfig) -> MnemosyneResult<Arc<dyn VectorDatabase>> {
        let db = Self::create(config)?;
        db.connect().await?;
        Ok(db)
    }

    /// Connected Milvus backend at `uri` using the default database.
    #[cfg(feature = "milvus")]
    pub async fn milvus(uri: &str) -> MnemosyneResult<Arc<dyn VectorDatabase>> {
        Self::connect(VectorDatabaseConfig {
            provider: VectorDatabaseProvider::Milvus,
            uri: Some(uri.to_string()),
            ..Default::default()
        })
        .await
    }

    /// Connected in-process backend.
    #[cfg(feature = "memory")]
    pub async fn memory() -> MnemosyneResult<Arc<dyn VectorDatabase>> {
        Self::connect(VectorDatabaseConfig::memory()).await
    }
}
