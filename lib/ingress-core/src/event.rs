//! Normalized watch events queued for reconciliation

use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Add => write!(f, "add"),
            EventKind::Update => write!(f, "update"),
            EventKind::Delete => write!(f, "delete"),
        }
    }
}

/// A unit of work for a controller, keyed by `namespace/name`.
///
/// `prior` carries the object as last seen before this event: the previous
/// version for updates, and the tombstone for deletes (the cache no longer
/// holds the object once a delete is delivered).
#[derive(Debug)]
pub struct Event<K> {
    pub kind: EventKind,
    pub key: String,
    pub prior: Option<Arc<K>>,
}

impl<K> Event<K> {
    pub fn add(key: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Add,
            key: key.into(),
            prior: None,
        }
    }

    pub fn update(key: impl Into<String>, prior: Option<Arc<K>>) -> Self {
        Self {
            kind: EventKind::Update,
            key: key.into(),
            prior,
        }
    }

    pub fn delete(key: impl Into<String>, tombstone: Arc<K>) -> Self {
        Self {
            kind: EventKind::Delete,
            key: key.into(),
            prior: Some(tombstone),
        }
    }
}

impl<K> Clone for Event<K> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            key: self.key.clone(),
            prior: self.prior.clone(),
        }
    }
}
