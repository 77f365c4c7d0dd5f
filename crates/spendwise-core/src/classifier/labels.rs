//! Category id ↔ label index mapping
//!
//! Category ids are opaque strings (`"an_uong"`), the network only knows
//! output indices. Indices are assigned in registration order and never
//! reused, so a retrain keeps existing categories on the same outputs.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryIndexMap {
    ids: Vec<String>,
}

impl CategoryIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = Self::new();
        for id in ids {
            map.register(&id.into());
        }
        map
    }

    /// Index for `category_id`, assigning the next free index if unseen
    pub fn register(&mut self, category_id: &str) -> usize {
        match self.ids.iter().position(|id| id == category_id) {
            Some(index) => index,
            None => {
                self.ids.push(category_id.to_string());
                self.ids.len() - 1
            }
        }
    }

    /// Index for a known category; unknown ids are an error, never label 0
    pub fn index_of(&self, category_id: &str) -> Result<usize> {
        self.ids
            .iter()
            .position(|id| id == category_id)
            .ok_or_else(|| Error::UnmappedCategory(category_id.to_string()))
    }

    pub fn category_of(&self, index: usize) -> Option<&str> {
        self.ids.get(index).map(String::as_str)
    }

    /// Category id for an output index, or the stringified index when unmapped
    pub fn resolve(&self, index: usize) -> String {
        self.category_of(index)
            .map(str::to_string)
            .unwrap_or_else(|| index.to_string())
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_stable() {
        let mut map = CategoryIndexMap::new();
        assert_eq!(map.register("an_uong"), 0);
        assert_eq!(map.register("di_chuyen"), 1);
        assert_eq!(map.register("an_uong"), 0);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_unmapped_category_is_error() {
        let map = CategoryIndexMap::from_ids(["an_uong"]);
        assert_eq!(map.index_of("an_uong").unwrap(), 0);

        match map.index_of("5") {
            Err(Error::UnmappedCategory(id)) => assert_eq!(id, "5"),
            other => panic!("expected UnmappedCategory, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_falls_back_to_index() {
        let map = CategoryIndexMap::from_ids(["an_uong", "luong"]);
        assert_eq!(map.resolve(1), "luong");
        assert_eq!(map.resolve(7), "7");
    }

    #[test]
    fn test_serializes_as_list() {
        let map = CategoryIndexMap::from_ids(["a", "b"]);
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"["a","b"]"#);
    }
}
