//! Store construction.

use crate::preferences::{Preferences, Shared};
use binprefs_core::{
    ByteEncryption, Codec, ConfigError, NoOpEncryption, Persistable, PersistableRegistry,
    PrefsError, PrefsResult, StoreConfig, StoreName, VersionClock,
};
use binprefs_events::{EventBridge, EventTransport, ListenerRegistry, NoopTransport, Subscription};
use binprefs_storage::{
    CacheProvider, ConcurrentCacheProvider, DirectoryProvider, FailureHandler, FileAdapter,
    FileTransaction, FixedDirectoryProvider, FsFileAdapter, LoggingFailureHandler,
    MultiProcessTransaction, StoreId, StoreRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Configures and opens a [`Preferences`] store.
///
/// Only the directory is required. Everything else defaults: store name
/// `default`, no encryption, failures logged, no cross-process transport,
/// configuration from the environment, the process-wide store registry.
#[derive(Default)]
pub struct PreferencesBuilder {
    name: Option<String>,
    directory: Option<Arc<dyn DirectoryProvider>>,
    adapter: Option<Arc<dyn FileAdapter>>,
    encryption: Option<Arc<dyn ByteEncryption>>,
    persistables: PersistableRegistry,
    error: Option<PrefsError>,
    failure_handler: Option<Arc<dyn FailureHandler>>,
    transport: Option<Arc<dyn EventTransport>>,
    config: Option<StoreConfig>,
    registry: Option<Arc<StoreRegistry>>,
}

impl PreferencesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Directory holding this store's files.
    pub fn directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.directory = Some(Arc::new(FixedDirectoryProvider::new(path)));
        self
    }

    pub fn directory_provider(mut self, provider: Arc<dyn DirectoryProvider>) -> Self {
        self.directory = Some(provider);
        self
    }

    /// Replace the filesystem adapter. The adapter must operate on the
    /// provider's directory.
    pub fn file_adapter(mut self, adapter: Arc<dyn FileAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn encryption(mut self, encryption: Arc<dyn ByteEncryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Allow `T` to be stored and read back.
    pub fn register_persistable<T: Persistable>(mut self) -> Self {
        if let Err(e) = self.persistables.register::<T>() {
            self.error.get_or_insert(e.into());
        }
        self
    }

    pub fn failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `registry` instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<StoreRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Open the store: create its directory, remove temp files left by
    /// crashed writers, attach to the transport and warm the cache.
    pub fn open(self) -> PrefsResult<Preferences> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let name = match self.name {
            Some(name) => StoreName::new(name)?,
            None => StoreName::default(),
        };
        let provider = self.directory.ok_or_else(|| ConfigError::MissingRequired {
            field: "directory".to_string(),
        })?;
        let config = match self.config {
            Some(config) => config,
            None => StoreConfig::from_env()?,
        };
        config.validate()?;

        let adapter: Arc<dyn FileAdapter> = match self.adapter {
            Some(adapter) => adapter,
            None => Arc::new(FsFileAdapter::open(provider.as_ref(), config.sync_directory)?),
        };
        let registry = self.registry.unwrap_or_else(StoreRegistry::process);
        let id = StoreId::new(name.clone(), provider.base_directory());

        let lock = registry.lock(&id, provider.lock_file(), &config);
        let transaction: Arc<dyn FileTransaction> =
            Arc::new(MultiProcessTransaction::new(adapter, lock));
        let executor = registry.executor(&id, &config)?;

        let codec = Codec::new(
            self.persistables,
            self.encryption.unwrap_or_else(|| Arc::new(NoOpEncryption)),
        );
        let cache: Arc<dyn CacheProvider> = Arc::new(ConcurrentCacheProvider::new());
        let clock = Arc::new(VersionClock::new());
        let listeners = Arc::new(ListenerRegistry::new(name.clone()));
        let transport = self.transport.unwrap_or_else(|| Arc::new(NoopTransport));
        let bridge = Arc::new(
            EventBridge::new(
                name.clone(),
                Uuid::new_v4(),
                codec.clone(),
                Arc::clone(&cache),
                Arc::clone(&clock),
                config.conflict_policy,
                transport,
                Arc::clone(&listeners),
            )
            .with_peers(registry.peers(&id)),
        );

        let swept = transaction.sweep_orphans()?;
        let subscription = bridge.attach().unwrap_or_else(|e| {
            warn!(store = %name, error = %e, "Transport subscription failed, remote changes will not be applied");
            Subscription::detached()
        });

        let shared = Arc::new(Shared {
            id,
            config,
            codec,
            transaction,
            cache,
            clock,
            executor,
            bridge,
            listeners,
            on_failure: self
                .failure_handler
                .unwrap_or_else(|| Arc::new(LoggingFailureHandler)),
        });
        let loaded = if shared.config.warm_up {
            shared.warm_up()?
        } else {
            0
        };

        info!(
            store = %name,
            dir = %provider.base_directory().display(),
            swept,
            loaded,
            "Store opened"
        );
        Ok(Preferences::from_parts(shared, subscription))
    }
}
