use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// スカラー値の集合を 1 つに集約する方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    #[default]
    Mean,
    Median,
    Max,
    Sum,
}

impl Reducer {
    /// 空なら `None`
    pub fn reduce(self, values: &[f32]) -> Option<f32> {
        if values.is_empty() {
            return None;
        }
        let value = match self {
            Reducer::Mean => values.iter().sum::<f32>() / values.len() as f32,
            Reducer::Sum => values.iter().sum(),
            Reducer::Max => values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            Reducer::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        };
        Some(value)
    }
}

impl FromStr for Reducer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "max" => Ok(Self::Max),
            "sum" => Ok(Self::Sum),
            other => anyhow::bail!("Unknown reducer: {}", other),
        }
    }
}
