// =============================================================================
// Shared types used across the Aurora lifecycle governor
// =============================================================================

use std::ops::{Index, IndexMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Forecast horizon. Each horizon has an independently lifecycled model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "7D")]
    SevenDay,
    #[serde(rename = "30D")]
    ThirtyDay,
}

impl Horizon {
    /// Every horizon, in evaluation order.
    pub const ALL: [Horizon; 3] = [Horizon::OneDay, Horizon::SevenDay, Horizon::ThirtyDay];

    fn slot(self) -> usize {
        match self {
            Self::OneDay => 0,
            Self::SevenDay => 1,
            Self::ThirtyDay => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1D",
            Self::SevenDay => "7D",
            Self::ThirtyDay => "30D",
        }
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Horizon {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "1D" => Ok(Self::OneDay),
            "7D" => Ok(Self::SevenDay),
            "30D" => Ok(Self::ThirtyDay),
            _ => Err(format!("Invalid horizon: {}", s)),
        }
    }
}

/// Fixed-size map with one slot per [`Horizon`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HorizonMap<T>([T; 3]);

impl<T> HorizonMap<T> {
    pub fn iter(&self) -> impl Iterator<Item = (Horizon, &T)> {
        Horizon::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<Horizon> for HorizonMap<T> {
    type Output = T;

    fn index(&self, horizon: Horizon) -> &T {
        &self.0[horizon.slot()]
    }
}

impl<T> IndexMut<Horizon> for HorizonMap<T> {
    fn index_mut(&mut self, horizon: Horizon) -> &mut T {
        &mut self.0[horizon.slot()]
    }
}

/// Resolution of a single trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeResult {
    Win,
    Loss,
    Neutral,
}

/// A resolved trade produced by a model. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub time: DateTime<Utc>,
    pub horizon: Horizon,
    pub symbol: String,
    pub model_id: String,
    /// Realised return in percent points (2.5 = +2.5 %).
    pub return_pct: f64,
    pub result: TradeResult,
    #[serde(default)]
    pub is_shadow: bool,
}

/// Per-horizon model triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRegistryEntry {
    #[serde(default)]
    pub active_model_id: Option<String>,
    #[serde(default)]
    pub shadow_model_id: Option<String>,
    #[serde(default)]
    pub prev_model_id: Option<String>,
}

impl ModelRegistryEntry {
    pub fn new(active: impl Into<String>) -> Self {
        Self {
            active_model_id: Some(active.into()),
            shadow_model_id: None,
            prev_model_id: None,
        }
    }

    pub fn with_shadow(mut self, shadow: impl Into<String>) -> Self {
        self.shadow_model_id = Some(shadow.into());
        self
    }

    pub fn with_previous(mut self, prev: impl Into<String>) -> Self {
        self.prev_model_id = Some(prev.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_parse_and_display() {
        for h in Horizon::ALL {
            let parsed: Horizon = h.to_string().parse().unwrap();
            assert_eq!(parsed, h);
        }
        assert_eq!("7d".parse::<Horizon>().unwrap(), Horizon::SevenDay);
        assert!("90D".parse::<Horizon>().is_err());
    }

    #[test]
    fn horizon_serde_uses_short_labels() {
        let json = serde_json::to_string(&Horizon::ThirtyDay).unwrap();
        assert_eq!(json, "\"30D\"");
    }

    #[test]
    fn horizon_map_indexes_each_slot() {
        let mut map: HorizonMap<u32> = HorizonMap::default();
        map[Horizon::SevenDay] = 7;
        assert_eq!(map[Horizon::OneDay], 0);
        assert_eq!(map[Horizon::SevenDay], 7);
        let labels: Vec<_> = map.iter().map(|(h, _)| h.as_str()).collect();
        assert_eq!(labels, vec!["1D", "7D", "30D"]);
    }

    #[test]
    fn trade_result_serde_uppercase() {
        let json = serde_json::to_string(&TradeResult::Loss).unwrap();
        assert_eq!(json, "\"LOSS\"");
    }
}
