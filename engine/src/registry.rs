//! Lookup of committer and syncer implementations by configuration key.
//!
//! Registries are plain maps from key to constructor. The global instances
//! hold the built-in implementations, are created on first use and never
//! change afterwards. Callers that need extra implementations (such as the
//! test harness's `never_commit`) build their own registry from
//! [`CommitterRegistry::builtin`] and pass it to the table sync.

use crate::syncer::{OneWaySyncer, Syncer, TwoWaySyncer};
use crate::{BufferedCommitter, Committer, DefaultCommitter, Error, Result, Session, SyncOptions};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Registry key of the [`DefaultCommitter`].
pub const DEFAULT_COMMIT: &str = "default";
/// Registry key of the [`BufferedCommitter`].
pub const BUFFERED_COMMIT: &str = "buffered_commit";
/// Registry key of the [`OneWaySyncer`].
pub const ONE_WAY: &str = "one_way";
/// Registry key of the [`TwoWaySyncer`].
pub const TWO_WAY: &str = "two_way";

/// Builds a committer for a table sync.
pub type CommitterFactory =
    Arc<dyn Fn(Session, &SyncOptions) -> Result<Box<dyn Committer>> + Send + Sync>;

/// Builds a syncer for a table sync.
pub type SyncerFactory = Arc<dyn Fn(&SyncOptions) -> Result<Box<dyn Syncer>> + Send + Sync>;

/// Committer implementations by key.
#[derive(Clone, Default)]
pub struct CommitterRegistry {
    factories: BTreeMap<String, CommitterFactory>,
}

impl CommitterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `default` and `buffered_commit`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_COMMIT, |session, _options| {
            Ok(Box::new(DefaultCommitter::new(session)) as Box<dyn Committer>)
        });
        registry.register(BUFFERED_COMMIT, |session, options| {
            Ok(Box::new(BufferedCommitter::new(session, options)?) as Box<dyn Committer>)
        });
        registry
    }

    /// The process-wide registry of built-in committers.
    pub fn global() -> &'static CommitterRegistry {
        static GLOBAL: OnceLock<CommitterRegistry> = OnceLock::new();
        GLOBAL.get_or_init(CommitterRegistry::builtin)
    }

    /// Register `factory` under `key`, replacing any previous entry.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(Session, &SyncOptions) -> Result<Box<dyn Committer>> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build the committer registered under `key`.
    pub fn create(
        &self,
        key: &str,
        session: Session,
        options: &SyncOptions,
    ) -> Result<Box<dyn Committer>> {
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| Error::UnknownCommitter(key.to_string()))?;
        factory(session, options)
    }
}

/// Syncer implementations by key.
#[derive(Clone, Default)]
pub struct SyncerRegistry {
    factories: BTreeMap<String, SyncerFactory>,
}

impl SyncerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `one_way` and `two_way`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ONE_WAY, |options| {
            Ok(Box::new(OneWaySyncer::new(options)) as Box<dyn Syncer>)
        });
        registry.register(TWO_WAY, |options| {
            Ok(Box::new(TwoWaySyncer::new(options)?) as Box<dyn Syncer>)
        });
        registry
    }

    /// The process-wide registry of built-in syncers.
    pub fn global() -> &'static SyncerRegistry {
        static GLOBAL: OnceLock<SyncerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SyncerRegistry::builtin)
    }

    /// Register `factory` under `key`, replacing any previous entry.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&SyncOptions) -> Result<Box<dyn Syncer>> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build the syncer registered under `key`.
    pub fn create(&self, key: &str, options: &SyncOptions) -> Result<Box<dyn Syncer>> {
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| Error::UnknownSyncer(key.to_string()))?;
        factory(options)
    }
}
