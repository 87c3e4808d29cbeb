//! Opens the on-disk collaborators described by a [`Config`].

use std::sync::Arc;

use anyhow::Context;
use f2f_core::http_client::HttpServiceFactory;
use f2f_core::protocol::{Protocol, ProtocolConfig};
use f2f_core::sqlite_store::SqliteStore;
use f2f_crypto::FileIdentityStore;

use crate::config::Config;

pub type CliProtocol = Protocol<FileIdentityStore, SqliteStore>;

/// Open (creating if needed) the record database.
pub fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let path = config.db_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SqliteStore::new(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

pub fn http_factory(config: &Config) -> anyhow::Result<Arc<HttpServiceFactory>> {
    let http = config.http_config()?;
    Ok(Arc::new(HttpServiceFactory::new(&http)?))
}

pub struct Runtime {
    pub identity: Arc<FileIdentityStore>,
    pub store: Arc<SqliteStore>,
    pub factory: Arc<HttpServiceFactory>,
    pub protocol_config: ProtocolConfig,
}

impl Runtime {
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            identity: Arc::new(FileIdentityStore::new(config.key_dir()?)),
            store: open_store(config)?,
            factory: http_factory(config)?,
            protocol_config: config.protocol_config(),
        })
    }

    /// A protocol resumed from the stored default device, if any.
    pub async fn protocol(&self) -> anyhow::Result<CliProtocol> {
        let mut protocol = Protocol::new(
            self.identity.clone(),
            self.store.clone(),
            self.protocol_config,
        );
        let phase = protocol.restore().await?;
        tracing::info!(phase = %phase, "protocol restored");
        Ok(protocol)
    }
}
