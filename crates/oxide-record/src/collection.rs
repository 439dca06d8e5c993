//! Ordered result container.

use std::collections::{BTreeMap, HashMap};
use std::ops::{Index, IndexMut};

use oxide_record_core::Value;
use serde::{Serialize, Serializer};

/// Items that expose named attributes, such as entities and plain rows.
pub trait HasAttributes {
    /// Returns the named attribute, if present.
    fn attribute(&self, key: &str) -> Option<&Value>;
}

impl HasAttributes for BTreeMap<String, Value> {
    fn attribute(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl HasAttributes for HashMap<String, Value> {
    fn attribute(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

/// Items that convert themselves into plain JSON structures.
pub trait ToJson {
    fn to_json(&self) -> serde_json::Value;
}

impl ToJson for Value {
    fn to_json(&self) -> serde_json::Value {
        Self::to_json(self)
    }
}

impl ToJson for BTreeMap<String, Value> {
    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect(),
        )
    }
}

/// An ordered, indexable sequence materialized from one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    items: Vec<T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Collection<T> {
    #[must_use]
    pub const fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// First item matching `predicate`.
    pub fn first_where<F>(&self, mut predicate: F) -> Option<&T>
    where
        F: FnMut(&T) -> bool,
    {
        self.items.iter().find(|item| predicate(item))
    }

    /// Last item matching `predicate`.
    pub fn last_where<F>(&self, mut predicate: F) -> Option<&T>
    where
        F: FnMut(&T) -> bool,
    {
        self.items.iter().rev().find(|item| predicate(item))
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.items
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    /// Transforms every item.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Collection<U>
    where
        F: FnMut(T) -> U,
    {
        Collection::new(self.items.into_iter().map(f).collect())
    }

    /// Keeps the items matching `predicate`, in order.
    #[must_use]
    pub fn filter<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&T) -> bool,
    {
        Self::new(
            self.items
                .into_iter()
                .filter(|item| predicate(item))
                .collect(),
        )
    }

    /// Visits items in order until `f` returns `false`.
    pub fn each<F>(&self, mut f: F) -> &Self
    where
        F: FnMut(&T) -> bool,
    {
        for item in &self.items {
            if !f(item) {
                break;
            }
        }
        self
    }

    /// Folds the items into one value.
    pub fn reduce<A, F>(&self, init: A, f: F) -> A
    where
        F: FnMut(A, &T) -> A,
    {
        self.items.iter().fold(init, f)
    }
}

impl<T: HasAttributes> Collection<T> {
    /// The named attribute of every item; missing attributes read as NULL.
    #[must_use]
    pub fn pluck(&self, key: &str) -> Collection<Value> {
        self.items
            .iter()
            .map(|item| item.attribute(key).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Indexes items by the named attribute. Later items replace earlier
    /// ones with the same key; items without the attribute are dropped.
    #[must_use]
    pub fn key_by(self, key: &str) -> HashMap<String, T> {
        let mut keyed = HashMap::with_capacity(self.items.len());
        for item in self.items {
            if let Some(k) = item.attribute(key).and_then(Value::as_key) {
                keyed.insert(k, item);
            }
        }
        keyed
    }

    /// Partitions items by the named attribute, preserving order within
    /// each group. Items without the attribute are dropped.
    #[must_use]
    pub fn group_by(self, key: &str) -> HashMap<String, Self> {
        let mut groups: HashMap<String, Self> = HashMap::new();
        for item in self.items {
            if let Some(k) = item.attribute(key).and_then(Value::as_key) {
                groups.entry(k).or_default().push(item);
            }
        }
        groups
    }
}

impl<T: ToJson> Collection<T> {
    /// Every item expanded into plain JSON.
    #[must_use]
    pub fn to_array(&self) -> Vec<serde_json::Value> {
        self.items.iter().map(ToJson::to_json).collect()
    }
}

impl<T: ToJson> ToJson for Collection<T> {
    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.to_array())
    }
}

impl<T: Serialize> Serialize for Collection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<T> Index<usize> for Collection<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<T> IndexMut<usize> for Collection<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.items[index]
    }
}

impl<T> From<Vec<T>> for Collection<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T> FromIterator<T> for Collection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T> Extend<T> for Collection<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl<T> IntoIterator for Collection<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Collection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut Collection<T> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter_mut()
    }
}
