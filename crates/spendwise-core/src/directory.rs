//! Read-only category directory
//!
//! Resolves category ids to display names when rendering a suggestion. The
//! pipeline only depends on the trait; the static implementation is built from
//! the `[[categories]]` list in the configuration.

use crate::models::Category;

pub trait CategoryDirectory: Send + Sync {
    /// All known categories, in display order
    fn categories(&self) -> Vec<Category>;

    fn name_of(&self, category_id: &str) -> Option<String> {
        self.categories()
            .into_iter()
            .find(|c| c.id == category_id)
            .map(|c| c.name)
    }

    fn contains(&self, category_id: &str) -> bool {
        self.name_of(category_id).is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCategoryDirectory {
    categories: Vec<Category>,
}

impl StaticCategoryDirectory {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }
}

impl CategoryDirectory for StaticCategoryDirectory {
    fn categories(&self) -> Vec<Category> {
        self.categories.clone()
    }

    fn name_of(&self, category_id: &str) -> Option<String> {
        self.categories
            .iter()
            .find(|c| c.id == category_id)
            .map(|c| c.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let directory = StaticCategoryDirectory::new(vec![Category {
            id: "an_uong".into(),
            name: "Ăn uống".into(),
        }]);
        assert_eq!(directory.name_of("an_uong").as_deref(), Some("Ăn uống"));
        assert!(directory.contains("an_uong"));
        assert!(!directory.contains("luong"));
    }
}
