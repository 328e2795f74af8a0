use std::{cmp::Ordering, collections::HashMap, fmt, hash::Hash, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

/// An entity with a stable identity inside a [`LocalCollection`].
pub trait CollectionItem: Clone + Send + 'static {
    type Key: Clone + Eq + Hash + fmt::Debug + Send;

    fn key(&self) -> Self::Key;

    /// Fold an update for the same key into the stored item.
    fn merge(&mut self, update: Self) {
        *self = update;
    }
}

/// Receives the full collection contents after every mutation.
pub trait CollectionObserver<T>: Send + Sync {
    fn on_snapshot(&self, snapshot: &[T]);
}

impl<T, F> CollectionObserver<T> for F
where
    F: Fn(&[T]) + Send + Sync,
{
    fn on_snapshot(&self, snapshot: &[T]) {
        self(snapshot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionState {
    #[default]
    Empty,
    Loading,
    Synced,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent<T: CollectionItem> {
    Add(T),
    Change(T),
    Remove(T::Key),
    /// Replaces the whole contents.
    Snapshot(Vec<T>),
}

type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

pub struct LocalCollection<T: CollectionItem> {
    items: HashMap<T::Key, T>,
    order: Vec<T::Key>,
    comparator: Option<Comparator<T>>,
    state: CollectionState,
    observer: Option<Arc<dyn CollectionObserver<T>>>,
}

impl<T: CollectionItem> Default for LocalCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CollectionItem> LocalCollection<T> {
    /// Iterates in insertion order.
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            order: Vec::new(),
            comparator: None,
            state: CollectionState::Empty,
            observer: None,
        }
    }

    /// Iterates in `comparator` order; ties keep insertion order.
    pub fn with_ordering<F>(comparator: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        Self {
            comparator: Some(Box::new(comparator)),
            ..Self::new()
        }
    }

    pub fn state(&self) -> CollectionState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.items.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.order.iter().filter_map(|key| self.items.get(key))
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    pub fn has_observer(&self) -> bool {
        self.observer.is_some()
    }

    pub fn set_observer(&mut self, observer: Arc<dyn CollectionObserver<T>>) {
        self.observer = Some(observer);
    }

    /// Only an empty collection moves to `Loading`; a synced one keeps
    /// serving its contents.
    pub fn begin_loading(&mut self) {
        if self.state == CollectionState::Empty {
            self.state = CollectionState::Loading;
        }
    }

    pub fn apply(&mut self, event: CollectionEvent<T>) {
        match event {
            CollectionEvent::Add(item) | CollectionEvent::Change(item) => self.upsert(item),
            CollectionEvent::Remove(key) => self.remove(&key),
            CollectionEvent::Snapshot(items) => self.replace_all(items),
        }
    }

    /// Inserts, or merges into the existing item when the key is present.
    pub fn add(&mut self, item: T) {
        self.upsert(item);
    }

    /// Merges into the existing item, or inserts when the key is absent.
    pub fn change(&mut self, item: T) {
        self.upsert(item);
    }

    fn upsert(&mut self, item: T) {
        let key = item.key();
        match self.items.get_mut(&key) {
            Some(existing) => {
                existing.merge(item);
                if self.comparator.is_some() {
                    self.order.retain(|candidate| candidate != &key);
                    self.place(key);
                }
            }
            None => {
                self.items.insert(key.clone(), item);
                self.place(key);
            }
        }
        self.state = CollectionState::Synced;
        self.notify();
    }

    pub fn remove(&mut self, key: &T::Key) {
        self.state = CollectionState::Synced;
        if self.items.remove(key).is_none() {
            debug!(?key, "collection: remove for unknown key ignored");
            return;
        }
        self.order.retain(|candidate| candidate != key);
        self.notify();
    }

    pub fn replace_all(&mut self, items: Vec<T>) {
        self.items.clear();
        self.order.clear();
        for item in items {
            let key = item.key();
            if let Some(existing) = self.items.get_mut(&key) {
                existing.merge(item);
                continue;
            }
            self.items.insert(key.clone(), item);
            self.place(key);
        }
        self.state = CollectionState::Synced;
        self.notify();
    }

    /// Drops contents and releases the observer without notifying it.
    pub fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
        self.observer = None;
        self.state = CollectionState::Empty;
    }

    fn place(&mut self, key: T::Key) {
        let Some(comparator) = &self.comparator else {
            self.order.push(key);
            return;
        };
        let Some(item) = self.items.get(&key) else {
            return;
        };
        let position = self.order.partition_point(|candidate| {
            self.items
                .get(candidate)
                .map_or(true, |other| comparator(other, item) != Ordering::Greater)
        });
        self.order.insert(position, key);
    }

    fn notify(&self) {
        if let Some(observer) = &self.observer {
            observer.on_snapshot(&self.snapshot());
        }
    }
}

impl<T: CollectionItem + fmt::Debug> fmt::Debug for LocalCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCollection")
            .field("state", &self.state)
            .field("len", &self.order.len())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

/// A pushed record: its `_id` plus the remaining fields as delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    fields: Map<String, Value>,
    /// Field names this update drops from the stored record.
    cleared: Vec<String>,
}

impl Document {
    /// `None` unless the payload is an object with a string `_id`.
    pub fn from_payload(payload: Value) -> Option<Self> {
        let Value::Object(mut fields) = payload else {
            return None;
        };
        let id = match fields.remove("_id") {
            Some(Value::String(id)) => id,
            _ => return None,
        };
        Some(Self {
            id,
            fields,
            cleared: Vec::new(),
        })
    }

    pub fn with_cleared(mut self, cleared: Vec<String>) -> Self {
        self.cleared = cleared;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert("_id".into(), Value::String(self.id.clone()));
        Value::Object(object)
    }

    pub fn decode<D: DeserializeOwned>(&self) -> Result<D, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }
}

impl CollectionItem for Document {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }

    /// Partial updates only carry the changed and cleared fields.
    fn merge(&mut self, update: Self) {
        for field in &update.cleared {
            self.fields.remove(field);
        }
        self.fields.extend(update.fields);
    }
}

#[cfg(test)]
#[path = "tests/collection_tests.rs"]
mod tests;
