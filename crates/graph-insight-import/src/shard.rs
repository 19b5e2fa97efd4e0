use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Per-input sharding strategy of a node: one row of split factors per input.
///
/// Exporters write it either as a JSON array or as a JSON-encoded string;
/// both forms are accepted, anything unparsable reads as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ShardStrategy(pub Vec<Vec<i64>>);

impl ShardStrategy {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn rows(&self) -> &[Vec<i64>] {
        &self.0
    }

    /// A row that splits nothing (empty, or every factor 1) carries no information.
    pub fn is_trivial_row(row: &[i64]) -> bool {
        row.is_empty() || row.iter().product::<i64>() == 1
    }

    fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) if text.trim().is_empty() => Self::default(),
            Value::String(text) => serde_json::from_str::<Vec<Vec<i64>>>(&text)
                .map(Self)
                .unwrap_or_default(),
            Value::Array(_) => serde_json::from_value::<Vec<Vec<i64>>>(value)
                .map(Self)
                .unwrap_or_default(),
            _ => Self::default(),
        }
    }
}

impl<'de> Deserialize<'de> for ShardStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_value(Value::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_string_strategy() {
        let strategy: ShardStrategy = serde_json::from_str(r#""[[1, 8], [8, 1]]""#).unwrap();
        assert_eq!(strategy.rows(), &[vec![1, 8], vec![8, 1]]);
    }

    #[test]
    fn test_unparsable_strategy_is_empty() {
        let strategy: ShardStrategy = serde_json::from_str(r#""not a matrix""#).unwrap();
        assert!(strategy.is_empty());
        let strategy: ShardStrategy = serde_json::from_str(r#""""#).unwrap();
        assert!(strategy.is_empty());
        let strategy: ShardStrategy = serde_json::from_str("42").unwrap();
        assert!(strategy.is_empty());
    }

    #[test]
    fn test_trivial_rows() {
        assert!(ShardStrategy::is_trivial_row(&[]));
        assert!(ShardStrategy::is_trivial_row(&[1, 1]));
        assert!(!ShardStrategy::is_trivial_row(&[2, 1]));
    }
}
