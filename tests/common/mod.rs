//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use module_runtime::unit::{ConfigSource, Leaf, SourceError, Unit, UnitContext, UnitError, UnitKind};

/// Ordered record of `start:`, `load:` and `unload:` events.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("{event} not recorded"))
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }
}

/// Leaf that records its lifecycle calls.
pub struct Recording {
    pub name: &'static str,
    pub journal: Journal,
    pub delay: Duration,
    pub fail: bool,
}

#[async_trait]
impl Leaf for Recording {
    async fn load(&self, _ctx: UnitContext) -> Result<(), UnitError> {
        self.journal.push(format!("start:{}", self.name));
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(UnitError::other(format!("{} could not start", self.name)));
        }
        self.journal.push(format!("load:{}", self.name));
        Ok(())
    }

    async fn unload(&self) -> Result<(), UnitError> {
        self.journal.push(format!("unload:{}", self.name));
        Ok(())
    }
}

pub fn service(name: &'static str, journal: &Journal) -> impl Fn() -> Unit + Send + Sync + 'static {
    build(name, journal, Duration::ZERO, false)
}

pub fn slow_service(
    name: &'static str,
    journal: &Journal,
    delay: Duration,
) -> impl Fn() -> Unit + Send + Sync + 'static {
    build(name, journal, delay, false)
}

pub fn failing_service(name: &'static str, journal: &Journal) -> impl Fn() -> Unit + Send + Sync + 'static {
    build(name, journal, Duration::ZERO, true)
}

/// Recording leaf wrapped as `kind`.
pub fn unit_of(kind: UnitKind, name: &'static str, journal: &Journal) -> impl Fn() -> Unit + Send + Sync + 'static {
    build_as(kind, name, journal, false)
}

pub fn failing_unit_of(
    kind: UnitKind,
    name: &'static str,
    journal: &Journal,
) -> impl Fn() -> Unit + Send + Sync + 'static {
    build_as(kind, name, journal, true)
}

fn build_as(
    kind: UnitKind,
    name: &'static str,
    journal: &Journal,
    fail: bool,
) -> impl Fn() -> Unit + Send + Sync + 'static {
    let journal = journal.clone();
    move || {
        let leaf = Recording {
            name,
            journal: journal.clone(),
            delay: Duration::ZERO,
            fail,
        };
        match kind {
            UnitKind::Middleware => Unit::middleware(leaf),
            UnitKind::Component => Unit::component(leaf),
            UnitKind::Utility => Unit::utility(leaf),
            UnitKind::Service | UnitKind::ConfigSource => Unit::service(leaf),
        }
    }
}

fn build(
    name: &'static str,
    journal: &Journal,
    delay: Duration,
    fail: bool,
) -> impl Fn() -> Unit + Send + Sync + 'static {
    let journal = journal.clone();
    move || {
        Unit::service(Recording {
            name,
            journal: journal.clone(),
            delay,
            fail,
        })
    }
}

/// Source that always yields the same tree.
#[derive(Clone)]
pub struct StaticSource(pub Value);

#[async_trait]
impl ConfigSource for StaticSource {
    async fn fetch(&self) -> Result<Value, SourceError> {
        Ok(self.0.clone())
    }
}

/// Source whose backend is never reachable.
#[derive(Clone)]
pub struct UnreachableSource;

#[async_trait]
impl ConfigSource for UnreachableSource {
    async fn fetch(&self) -> Result<Value, SourceError> {
        Err(SourceError::Unavailable("connection refused".to_string()))
    }
}

/// Scratch directory removed on drop.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("module-runtime-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.0.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
