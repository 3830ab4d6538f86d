use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Error, Result};
use async_trait::async_trait;
use fred::prelude::*;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info};

/// String key/value persistence shared by the level memory and the
/// accumulation history.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
}

/// Async locks keyed by store key. Held across a load, modify, store
/// sequence so writers of the same key apply one after the other.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.lock().await.entry(key.to_string()).or_default());
        lock.lock_owned().await
    }
}

/// Redis when REDIS_URL is set, otherwise a JSON file under DATA_DIR.
pub async fn store_from_env() -> Result<Arc<dyn KvStore>> {
    if std::env::var("REDIS_URL").is_ok() {
        return Ok(Arc::new(RedisStore::from_env().await?));
    }

    let dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let path = Path::new(&dir).join("store.json");
    info!(path = %path.display(), "using file store");
    Ok(Arc::new(FileStore::new(path)))
}

#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    key_prefix: String,
}

impl RedisStore {
    pub async fn new(redis_url: &str, key: impl Into<String>) -> Result<Self, Error> {
        let config = Config::from_url(redis_url)?;

        let client = Builder::from_config(config)
            .with_connection_config(|config| {
                config.connection_timeout = Duration::from_secs(5);
                config.tcp = TcpConfig {
                    nodelay: Some(true),
                    ..Default::default()
                };
            })
            .build()?;

        client.on_error(|(error, server)| async move {
            error!("{:?}: Redis connection error: {:?}", server, error);
            Ok(())
        });

        client.connect();
        client.wait_for_connect().await?;

        Ok(Self {
            client,
            key_prefix: key.into(),
        })
    }

    /// Expects REDIS_URL; REDIS_KEY_PREFIX defaults to `bullnet`.
    pub async fn from_env() -> Result<Self, Error> {
        let redis_url = std::env::var("REDIS_URL")
            .map_err(|_| Error::msg("REDIS_URL environment variable not set"))?;
        let key_prefix =
            std::env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| "bullnet".to_string());

        Self::new(&redis_url, key_prefix).await
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.client.get(self.key(key)).await.map_err(Error::from)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let _: () = self.client.set(self.key(key), value, None, None, false).await?;
        Ok(())
    }
}

/// All keys in one pretty-printed JSON object. Writes are serialised and go
/// through a temp file so a crash never leaves half a document behind.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("parse {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("read {}", self.path.display())),
        }
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut all = self.load().await?;
        all.insert(key.to_string(), value);

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&all)?).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("write {}", self.path.display()))?;

        Ok(())
    }
}
