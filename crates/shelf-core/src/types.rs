use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Catalog entities
// =============================================================================

/// A product as supplied by the catalog (ERP) source.
///
/// Only `id` and `name` are mandatory. The remaining fields feed the
/// composite text an embedding is derived from and are never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Immutable catalog identifier.
    pub id: i64,
    /// Display label.
    pub name: String,
    /// Internal reference code (SKU).
    #[serde(default)]
    pub code: Option<String>,
    /// Category name.
    #[serde(default)]
    pub category: Option<String>,
    /// Free-form description, truncated before embedding.
    #[serde(default)]
    pub description: Option<String>,
}

impl Product {
    /// Create a product carrying only an id and a name.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            code: None,
            category: None,
            description: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Build the text the embedding is derived from.
    ///
    /// Joins name, code, category and the first `description_max_chars`
    /// characters of the description, skipping blank fields. Never returns
    /// an empty string: when every field is blank the id is used instead.
    pub fn composite_text(&self, description_max_chars: usize) -> String {
        fn non_blank(field: Option<&str>) -> Option<&str> {
            field.map(str::trim).filter(|f| !f.is_empty())
        }

        let mut parts: Vec<String> = Vec::with_capacity(4);
        if let Some(name) = non_blank(Some(&self.name)) {
            parts.push(name.to_string());
        }
        if let Some(code) = non_blank(self.code.as_deref()) {
            parts.push(format!("code {}", code));
        }
        if let Some(category) = non_blank(self.category.as_deref()) {
            parts.push(format!("category {}", category));
        }
        if let Some(description) = non_blank(self.description.as_deref()) {
            parts.push(description.chars().take(description_max_chars).collect());
        }

        if parts.is_empty() {
            format!("product {}", self.id)
        } else {
            parts.join(" | ")
        }
    }
}

// =============================================================================
// Stored and returned records
// =============================================================================

/// One embedding per entity, keyed by `entity_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub entity_id: i64,
    pub label: String,
    pub vector: Vec<f32>,
    pub updated_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn new(entity_id: i64, label: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            entity_id,
            label: label.into(),
            vector,
            updated_at: Utc::now(),
        }
    }
}

/// A single ranked search hit.
///
/// `similarity` is a cosine score for vector tiers and a fixed constant for
/// lexical tiers; scores from different tiers are not comparable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub entity_id: i64,
    pub label: String,
    pub similarity: f64,
}

/// Outcome counts of a sync run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Entities embedded and stored successfully.
    pub synced: usize,
    /// Entities whose embedding or storage failed.
    pub failed: usize,
    /// Number of sequential batches executed.
    pub batches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_text_name_only() {
        let product = Product::new(1, "Fior di Latte Mozzarella");
        assert_eq!(product.composite_text(500), "Fior di Latte Mozzarella");
    }

    #[test]
    fn test_composite_text_all_fields() {
        let product = Product::new(7, "Grana Padano DOP")
            .with_code("GP-24")
            .with_category("Cheese")
            .with_description("Aged 24 months");
        assert_eq!(
            product.composite_text(500),
            "Grana Padano DOP | code GP-24 | category Cheese | Aged 24 months"
        );
    }

    #[test]
    fn test_composite_text_truncates_description() {
        let product = Product::new(3, "Olive oil").with_description("abcdefghij");
        assert_eq!(product.composite_text(4), "Olive oil | abcd");
    }

    #[test]
    fn test_composite_text_skips_blank_fields() {
        let product = Product::new(3, "Olive oil")
            .with_code("  ")
            .with_category("")
            .with_description("   ");
        assert_eq!(product.composite_text(100), "Olive oil");
    }

    #[test]
    fn test_composite_text_never_empty() {
        let product = Product::new(42, "  ");
        assert_eq!(product.composite_text(100), "product 42");
    }

    #[test]
    fn test_product_deserializes_with_missing_optionals() {
        let product: Product = serde_json::from_str(r#"{"id": 5, "name": "Ricotta"}"#).unwrap();
        assert_eq!(product, Product::new(5, "Ricotta"));
    }

    #[test]
    fn test_query_result_serialization() {
        let result = QueryResult {
            entity_id: 2,
            label: "Grana Padano DOP".to_string(),
            similarity: 0.75,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["entity_id"], 2);
        assert_eq!(json["similarity"], 0.75);
    }

    #[test]
    fn test_sync_report_default() {
        let report = SyncReport::default();
        assert_eq!(report.synced, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.batches, 0);
    }
}
