use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Indicator values pulled out of one post. Absent indicators are not in the map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSignal {
    values: BTreeMap<String, Decimal>,
}

impl ExtractedSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, indicator: impl Into<String>, value: Decimal) {
        self.values.insert(indicator.into(), value);
    }

    pub fn get(&self, indicator: &str) -> Option<Decimal> {
        self.values.get(indicator).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, Decimal)> for ExtractedSignal {
    fn from_iter<T: IntoIterator<Item = (K, Decimal)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl fmt::Display for ExtractedSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return write!(f, "{{}}");
        }
        let parts: Vec<String> = self.values.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Exchange side for opening a position in this direction.
    pub fn entry_side(&self) -> &'static str {
        match self {
            Direction::Long => "buy",
            Direction::Short => "sell",
        }
    }

    /// Exchange side for closing (protective orders).
    pub fn exit_side(&self) -> &'static str {
        match self {
            Direction::Long => "sell",
            Direction::Short => "buy",
        }
    }
}

/// A single point-in-time judgment. Built once, never retried or mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub instrument: String,
    pub direction: Direction,
    pub quantity: Decimal,
    /// Name of the policy rule that fired.
    pub rule: String,
}
