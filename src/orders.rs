use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::design::DesignSnapshot;
use crate::error::ProductionError;

/// One card of an order with its design record.
#[derive(Debug, Clone, PartialEq)]
pub struct CardRecord {
    pub id: Option<String>,
    pub design: DesignSnapshot,
}

impl CardRecord {
    pub fn new(id: Option<String>, design: DesignSnapshot) -> Self {
        Self { id, design }
    }

    /// Accepts `{"design_data": {...}}`, `{"design_snapshot": {...}}` or a
    /// bare design object.
    pub fn from_value(value: Value) -> Result<Self, ProductionError> {
        let Value::Object(mut fields) = value else {
            return Err(ProductionError::InvalidConfiguration(
                "order card must be a JSON object".to_string(),
            ));
        };
        let id = fields.get("id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        for key in ["design_data", "design_snapshot"] {
            if let Some(Value::Object(design)) = fields.remove(key) {
                return Ok(Self::new(id, DesignSnapshot::new(design)));
            }
        }
        fields.remove("id");
        Ok(Self::new(id, DesignSnapshot::new(fields)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub id: String,
    pub cards: Vec<CardRecord>,
}

impl OrderRecord {
    pub fn new(id: impl Into<String>, cards: Vec<CardRecord>) -> Self {
        Self {
            id: id.into(),
            cards,
        }
    }

    pub fn from_json_str(text: &str, fallback_id: &str) -> Result<Self, ProductionError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut fields) = value else {
            return Err(ProductionError::InvalidConfiguration(format!(
                "order {fallback_id} is not a JSON object"
            )));
        };
        let id = fields
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(fallback_id)
            .to_string();
        let cards = match fields.remove("cards") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(CardRecord::from_value)
                .collect::<Result<Vec<_>, _>>()?,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(ProductionError::InvalidConfiguration(format!(
                    "order {id}: cards must be an array"
                )));
            }
        };
        Ok(Self { id, cards })
    }
}

/// The trimmed id when it names exactly one entry inside a directory: no
/// separators, drive prefixes or dot segments.
pub fn order_path_component(order_id: &str) -> Option<&str> {
    let id = order_id.trim();
    if id.is_empty() || id.contains(['/', '\\', ':']) || id == "." || id == ".." {
        return None;
    }
    Some(id)
}

/// Ordered card designs for an order id.
pub trait OrderStore: Send + Sync {
    /// `OrderNotFound` when the id is unknown. An order with no cards is
    /// returned as-is; the pipeline reports it.
    fn load(&self, order_id: &str) -> Result<OrderRecord, ProductionError>;
}

/// Reads `<root>/<order_id>.json`.
#[derive(Debug, Clone)]
pub struct DirOrderStore {
    root: PathBuf,
}

impl DirOrderStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, order_id: &str) -> Option<PathBuf> {
        let id = order_path_component(order_id)?;
        Some(self.root.join(format!("{id}.json")))
    }
}

impl OrderStore for DirOrderStore {
    fn load(&self, order_id: &str) -> Result<OrderRecord, ProductionError> {
        let path = self
            .path_for(order_id)
            .ok_or_else(|| ProductionError::OrderNotFound(order_id.to_string()))?;
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProductionError::OrderNotFound(order_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        log::debug!("loaded order {} from {}", order_id, path.display());
        OrderRecord::from_json_str(&text, order_id.trim())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryOrderStore {
    orders: BTreeMap<String, OrderRecord>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order: OrderRecord) {
        self.orders.insert(order.id.clone(), order);
    }
}

impl OrderStore for MemoryOrderStore {
    fn load(&self, order_id: &str) -> Result<OrderRecord, ProductionError> {
        self.orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ProductionError::OrderNotFound(order_id.to_string()))
    }
}

/// First eight id characters without hyphens, lowercased; `ord` when blank.
pub fn short_order_id(order_id: &str) -> String {
    let compact: String = order_id.trim().chars().filter(|c| *c != '-').collect();
    let base = if compact.is_empty() {
        "ord".to_string()
    } else {
        compact
    };
    base.to_lowercase().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn card_shapes_are_all_accepted() {
        let a = CardRecord::from_value(json!({"id": "c1", "design_data": {"playerName": "A"}}))
            .expect("design_data");
        assert_eq!(a.id.as_deref(), Some("c1"));
        assert_eq!(a.design.text(&["playerName"]), Some("A"));

        let b = CardRecord::from_value(json!({"design_snapshot": {"teamName": "B"}}))
            .expect("design_snapshot");
        assert_eq!(b.id, None);
        assert_eq!(b.design.text(&["teamName"]), Some("B"));

        let c = CardRecord::from_value(json!({"id": 7, "hero_url": "h.png"})).expect("bare");
        assert_eq!(c.id.as_deref(), Some("7"));
        assert_eq!(c.design.hero_ref(), Some("h.png"));
        assert!(c.design.text(&["id"]).is_none());

        assert!(CardRecord::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn dir_store_distinguishes_missing_from_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("empty.json"), r#"{"id":"empty","cards":[]}"#)
            .expect("write");
        let store = DirOrderStore::new(dir.path());

        let empty = store.load("empty").expect("empty order loads");
        assert!(empty.cards.is_empty());

        assert!(matches!(
            store.load("nope"),
            Err(ProductionError::OrderNotFound(id)) if id == "nope"
        ));
        assert!(matches!(
            store.load("../empty"),
            Err(ProductionError::OrderNotFound(_))
        ));
    }

    #[test]
    fn order_id_defaults_to_file_name() {
        let order = OrderRecord::from_json_str(r#"{"cards":[{"hero_url":"x"}]}"#, "abc")
            .expect("order");
        assert_eq!(order.id, "abc");
        assert_eq!(order.cards.len(), 1);
    }

    #[test]
    fn short_ids_follow_file_naming() {
        assert_eq!(short_order_id("3F2A9C1D-77aa-4b1e-9d0e-123456789abc"), "3f2a9c1d");
        assert_eq!(short_order_id("AB-c"), "abc");
        assert_eq!(short_order_id("  "), "ord");
    }
}
