//! # Geography Catalog
//!
//! Hierarchical place names used to populate selectable labels:
//! continent > country > region > prefecture > sub-prefecture > quarter.
//!
//! Codes in the source data are unique only among siblings (`P1` is
//! Guinée under `C1` and Chine under `C2`), so a node is addressed by the
//! slash-joined codes of its ancestors and itself: `C1/P1/R2`.
//!
//! The catalog never derives classification codes. Those come from the
//! [`classification`](crate::classification) resolver, by label.

use crate::LineageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Built-in world catalog: one `path<TAB>name` line per node, parents first.
const WORLD_GEOGRAPHY: &str = include_str!("../data/world_geography.tsv");

/// Depth of a node in the catalog tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoLevel {
    Continent,
    Country,
    Region,
    Prefecture,
    SubPrefecture,
    Quarter,
}

impl GeoLevel {
    const ORDER: [GeoLevel; 6] = [
        GeoLevel::Continent,
        GeoLevel::Country,
        GeoLevel::Region,
        GeoLevel::Prefecture,
        GeoLevel::SubPrefecture,
        GeoLevel::Quarter,
    ];

    /// Level of a node whose path has `depth + 1` segments.
    #[must_use]
    pub fn from_depth(depth: usize) -> Option<Self> {
        Self::ORDER.get(depth).copied()
    }

    /// Alphabetic part every code of this level starts with.
    #[must_use]
    pub const fn code_prefix(self) -> &'static str {
        match self {
            Self::Continent => "C",
            Self::Country => "P",
            Self::Region => "R",
            Self::Prefecture => "PR",
            Self::SubPrefecture => "SP",
            Self::Quarter => "Q",
        }
    }
}

impl fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continent => "continent",
            Self::Country => "country",
            Self::Region => "region",
            Self::Prefecture => "prefecture",
            Self::SubPrefecture => "sub_prefecture",
            Self::Quarter => "quarter",
        };
        f.write_str(name)
    }
}

/// One catalog node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoEntry {
    pub path: String,
    pub code: String,
    pub name: String,
    pub level: GeoLevel,
}

/// Read-only place-name tree.
#[derive(Debug, Clone, Default)]
pub struct GeographyCatalog {
    entries: BTreeMap<String, GeoEntry>,
    /// Parent path ("" for the roots) -> child paths, in source order.
    children: BTreeMap<String, Vec<String>>,
}

impl GeographyCatalog {
    /// The built-in world catalog, parsed on first use.
    pub fn builtin() -> &'static Self {
        static CATALOG: OnceLock<GeographyCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| match Self::from_tsv(WORLD_GEOGRAPHY) {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::error!(error = %e, "built-in geography catalog is malformed");
                Self::default()
            }
        })
    }

    /// Parse `path<TAB>name` lines. Blank lines and `#` comments are skipped.
    pub fn from_tsv(text: &str) -> Result<Self, LineageError> {
        let mut catalog = Self::default();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = |why: &str| {
                LineageError::Serialization(format!(
                    "geography line {}: {} ('{}')",
                    number + 1,
                    why,
                    line
                ))
            };

            let (path, name) = line.split_once('\t').ok_or_else(|| malformed("missing tab"))?;
            let name = crate::normalize_text(name);
            if name.is_empty() {
                return Err(malformed("empty name"));
            }

            let segments: Vec<&str> = path.split('/').collect();
            let level = GeoLevel::from_depth(segments.len() - 1)
                .ok_or_else(|| malformed("path too deep"))?;
            let code = segments[segments.len() - 1];
            if !code_matches_level(code, level) {
                return Err(malformed("code does not match its level"));
            }

            let parent = segments[..segments.len() - 1].join("/");
            if !parent.is_empty() && !catalog.entries.contains_key(&parent) {
                return Err(malformed("parent must precede child"));
            }
            if catalog.entries.contains_key(path) {
                return Err(malformed("duplicate path"));
            }

            catalog.children.entry(parent).or_default().push(path.to_string());
            catalog.entries.insert(
                path.to_string(),
                GeoEntry {
                    path: path.to_string(),
                    code: code.to_string(),
                    name,
                    level,
                },
            );
        }
        Ok(catalog)
    }

    /// Children of a node, in catalog order. `""` lists the continents.
    ///
    /// Unknown paths have no children.
    #[must_use]
    pub fn children_of(&self, path: &str) -> Vec<&GeoEntry> {
        self.children
            .get(&normalize_path(path))
            .map(|paths| paths.iter().filter_map(|p| self.entries.get(p)).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn entry(&self, path: &str) -> Option<&GeoEntry> {
        self.entries.get(&normalize_path(path))
    }

    #[must_use]
    pub fn level_of(&self, path: &str) -> Option<GeoLevel> {
        self.entry(path).map(|e| e.level)
    }

    /// The node and its ancestors, root first. Empty for unknown paths.
    #[must_use]
    pub fn trail(&self, path: &str) -> Vec<&GeoEntry> {
        let path = normalize_path(path);
        if !self.entries.contains_key(&path) {
            return Vec::new();
        }
        let segments: Vec<&str> = path.split('/').collect();
        (1..=segments.len())
            .filter_map(|n| self.entries.get(&segments[..n].join("/")))
            .collect()
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

fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn code_matches_level(code: &str, level: GeoLevel) -> bool {
    code.strip_prefix(level.code_prefix())
        .and_then(crate::types::parse_canonical_number)
        .is_some()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_parses_strictly() {
        let catalog = GeographyCatalog::from_tsv(WORLD_GEOGRAPHY).expect("valid catalog");
        assert!(catalog.len() > 1000);
        assert_eq!(GeographyCatalog::builtin().len(), catalog.len());
    }

    #[test]
    fn roots_are_the_five_continents() {
        let names: Vec<&str> = GeographyCatalog::builtin()
            .children_of("")
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, ["Afrique", "Asie", "Europe", "Amérique", "Océanie"]);
    }

    #[test]
    fn sibling_codes_are_scoped_by_path() {
        let catalog = GeographyCatalog::builtin();
        assert_eq!(catalog.entry("C1/P1").unwrap().name, "Guinée");
        assert_eq!(catalog.entry("C2/P1").unwrap().name, "Chine");
    }

    #[test]
    fn walks_down_to_quarters() {
        let catalog = GeographyCatalog::builtin();
        let regions: Vec<&str> = catalog
            .children_of("C1/P1")
            .iter()
            .map(|e| e.code.as_str())
            .collect();
        assert_eq!(regions, ["R1", "R2", "R3", "R4"]);

        let quarters = catalog.children_of(" C1/P1/R1/PR1/SP1/ ");
        assert_eq!(quarters[0].name, "Almamya");
        assert_eq!(quarters[0].level, GeoLevel::Quarter);
        assert!(catalog.children_of("C1/P1/R1/PR1/SP1/Q1").is_empty());
    }

    #[test]
    fn trail_lists_ancestors_root_first() {
        let trail: Vec<&str> = GeographyCatalog::builtin()
            .trail("C1/P1/R2")
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(trail, ["Afrique", "Guinée", "Fouta-Djallon"]);
    }

    #[test]
    fn unknown_paths_are_empty() {
        let catalog = GeographyCatalog::builtin();
        assert!(catalog.children_of("C9").is_empty());
        assert!(catalog.entry("C1/P999").is_none());
        assert!(catalog.level_of("nowhere").is_none());
        assert!(catalog.trail("C1/P999").is_empty());
    }

    #[test]
    fn rejects_orphans_and_bad_codes() {
        assert!(GeographyCatalog::from_tsv("C1/P1\tGuinée\n").is_err());
        assert!(GeographyCatalog::from_tsv("X1\tAtlantide\n").is_err());
        assert!(GeographyCatalog::from_tsv("C1\tAfrique\nC1\tAfrique\n").is_err());
        assert!(GeographyCatalog::from_tsv("C1 Afrique\n").is_err());
    }
}
