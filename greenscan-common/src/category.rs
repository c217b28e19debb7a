//! Plant categories
//!
//! Every string that names a plant (CLI argument, config entry, record
//! field) is parsed here. Nothing past this boundary handles free-form
//! plant names.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subject key under which a tracked entity and its remote record live
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Banana,
    Mango,
    Tomato,
}

impl Category {
    /// Every known category, in display order
    pub const ALL: [Category; 3] = [Category::Banana, Category::Mango, Category::Tomato];

    /// Wire name used in store keys and analysis requests
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Banana => "banana",
            Category::Mango => "mango",
            Category::Tomato => "tomato",
        }
    }

    /// Capitalized name for headings ("Tomato")
    pub fn title(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Store key of this category's record below `root_path`
    pub fn record_key(&self, root_path: &str) -> String {
        let root = root_path.trim_matches('/');
        if root.is_empty() {
            self.as_str().to_string()
        } else {
            format!("{}/{}", root, self.as_str())
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
                Error::InvalidInput(format!(
                    "Unknown plant type '{}'. Must be one of: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}
