//! Cache key definitions.
//!
//! Every derived view is cached under `<kind>:<rule_id>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The fixed family of derived views cached per rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    DimensionCatalog,
    OptimizedDimensionCatalog,
    CompleteRuleData,
    FieldTemplates,
    InheritanceMatrix,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 5] = [
        CatalogKind::DimensionCatalog,
        CatalogKind::OptimizedDimensionCatalog,
        CatalogKind::CompleteRuleData,
        CatalogKind::FieldTemplates,
        CatalogKind::InheritanceMatrix,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CatalogKind::DimensionCatalog => "dimension_catalog",
            CatalogKind::OptimizedDimensionCatalog => "optimized_dimension_catalog",
            CatalogKind::CompleteRuleData => "complete_rule_data",
            CatalogKind::FieldTemplates => "field_templates",
            CatalogKind::InheritanceMatrix => "inheritance_matrix",
        }
    }
}

impl FromStr for CatalogKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        CatalogKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown catalog kind `{value}`"))
    }
}

/// Key of one cached derived view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CatalogKind,
    pub rule_id: i64,
}

impl CacheKey {
    pub fn new(kind: CatalogKind, rule_id: i64) -> Self {
        Self { kind, rule_id }
    }

    /// All five keys owned by a rule.
    pub fn family(rule_id: i64) -> [CacheKey; 5] {
        CatalogKind::ALL.map(|kind| CacheKey::new(kind, rule_id))
    }

    /// Rendered store key, e.g. `dimension_catalog:5`.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.rule_id)
    }
}
