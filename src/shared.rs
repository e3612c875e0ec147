//! Shared Container Handle
//!
//! A cloneable handle that serializes every operation through one mutex, so
//! several threads can use the same container without interleaving two
//! replacements.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::check::CheckReport;
use crate::config::Config;
use crate::container::Container;
use crate::directory::Entry;
use crate::error::Result;

/// Thread-safe wrapper around a [`Container`]
#[derive(Clone)]
pub struct SharedContainer {
    inner: Arc<Mutex<Container>>,
}

impl SharedContainer {
    pub fn new(container: Container) -> Self {
        Self {
            inner: Arc::new(Mutex::new(container)),
        }
    }

    /// Open a container and wrap it
    pub fn open(config: Config) -> Result<Self> {
        Container::open(config).map(Self::new)
    }

    pub fn lookup(&self, key: u32) -> Result<Option<Entry>> {
        self.inner.lock().lookup(key)
    }

    pub fn read(&self, key: u32) -> Result<Option<Vec<u8>>> {
        self.inner.lock().read(key)
    }

    pub fn replace(&self, key: u32, data: &[u8]) -> Result<Entry> {
        self.inner.lock().replace(key, data)
    }

    pub fn insert(&self, key: u32, data: &[u8]) -> Result<Entry> {
        self.inner.lock().insert(key, data)
    }

    pub fn remove(&self, key: u32) -> Result<Entry> {
        self.inner.lock().remove(key)
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.lock().flush()
    }

    pub fn check(&self) -> Result<CheckReport> {
        self.inner.lock().check()
    }

    /// Run several operations under one lock acquisition
    pub fn with<R>(&self, f: impl FnOnce(&mut Container) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Take the container back once this is the last handle
    pub fn into_inner(self) -> Option<Container> {
        Arc::try_unwrap(self.inner).ok().map(Mutex::into_inner)
    }
}
