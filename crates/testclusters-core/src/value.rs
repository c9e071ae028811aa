//! Lazily resolved configuration values and insertion-ordered property maps.
//!
//! Settings, secure settings, system properties and environment entries may
//! be literal strings or deferred computations. Deferred values are resolved
//! at the first point of use (config write, keystore setup, environment
//! build), never when they are declared, so a value can depend on setup work
//! that happens later. Every later use sees the same string.

use std::fmt;
use std::sync::{Arc, OnceLock};

/// A supplier and the value it produced on first use.
pub struct Supplier {
    compute: Box<dyn Fn() -> String + Send + Sync>,
    resolved: OnceLock<String>,
}

impl Supplier {
    fn get(&self) -> &str {
        self.resolved.get_or_init(|| (self.compute)())
    }
}

/// A configuration value that is either known now or computed on use.
///
/// Clones of a deferred value share its supplier, so the computation runs
/// at most once however many copies of the spec hold it.
#[derive(Clone)]
pub enum DeferredValue {
    Literal(String),
    Deferred(Arc<Supplier>),
}

impl DeferredValue {
    /// Wrap a closure that is evaluated the first time the value is resolved.
    pub fn deferred<F>(supplier: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::Deferred(Arc::new(Supplier {
            compute: Box::new(supplier),
            resolved: OnceLock::new(),
        }))
    }

    #[must_use]
    pub fn resolve(&self) -> String {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Deferred(supplier) => supplier.get().to_string(),
        }
    }
}

impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Deferred(_) => f.write_str("Deferred(<supplier>)"),
        }
    }
}

impl From<&str> for DeferredValue {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for DeferredValue {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

/// An insertion-ordered map where re-inserting a key replaces the value in place.
#[derive(Debug, Clone)]
pub struct PropertyMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for PropertyMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> PropertyMap<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key`, returning the previous value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<V>) -> Option<V> {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.entries.push((key, value));
        None
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PropertyMap<DeferredValue> {
    /// Resolve every deferred value, preserving declaration order.
    #[must_use]
    pub fn resolve_all(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.resolve()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn put_replaces_in_place() {
        let mut map: PropertyMap<DeferredValue> = PropertyMap::new();
        map.put("a", "1");
        map.put("b", "2");
        let previous = map.put("a", "3");
        assert!(matches!(previous, Some(DeferredValue::Literal(ref v)) if v == "1"));
        assert_eq!(
            map.resolve_all(),
            vec![("a".into(), "3".into()), ("b".into(), "2".into())]
        );
    }

    #[test]
    fn deferred_is_not_evaluated_until_resolved() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut map: PropertyMap<DeferredValue> = PropertyMap::new();
        map.put(
            "password",
            DeferredValue::deferred(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                "generated".to_string()
            }),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(map.resolve_all()[0].1, "generated");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_resolves_once_across_clones() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value = DeferredValue::deferred(move || {
            format!("pw-{}", counter.fetch_add(1, Ordering::SeqCst))
        });
        let copy = value.clone();
        assert_eq!(value.resolve(), "pw-0");
        assert_eq!(copy.resolve(), "pw-0");
        assert_eq!(value.resolve(), "pw-0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_hides_supplier() {
        let value = DeferredValue::deferred(|| "secret".to_string());
        assert_eq!(format!("{value:?}"), "Deferred(<supplier>)");
    }
}
