use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::KeypointIndex;

/// 動き量を計算するキーポイントの部分集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyRegion {
    Full,
    Head,
    Arms,
    Legs,
}

impl BodyRegion {
    pub const ALL: [BodyRegion; 4] = [Self::Full, Self::Head, Self::Arms, Self::Legs];

    pub fn keypoints(self) -> &'static [KeypointIndex] {
        use KeypointIndex::*;
        match self {
            Self::Full => &KeypointIndex::ALL,
            Self::Head => &[Nose, LeftEye, RightEye, LeftEar, RightEar],
            Self::Arms => &[LeftShoulder, RightShoulder, LeftElbow, RightElbow, LeftWrist, RightWrist],
            Self::Legs => &[LeftHip, RightHip, LeftKnee, RightKnee, LeftAnkle, RightAnkle],
        }
    }

    /// 送信アドレスに埋め込むメトリクス名 (`/dance/<metric>_movement`)
    pub fn metric_name(self) -> &'static str {
        match self {
            Self::Full => "total",
            Self::Head => "head",
            Self::Arms => "arms",
            Self::Legs => "legs",
        }
    }

    pub fn from_metric_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.metric_name() == name)
    }
}

impl fmt::Display for BodyRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Full => "full",
            Self::Head => "head",
            Self::Arms => "arms",
            Self::Legs => "legs",
        };
        f.write_str(s)
    }
}

impl FromStr for BodyRegion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "full" | "total" => Ok(Self::Full),
            "head" => Ok(Self::Head),
            "arms" => Ok(Self::Arms),
            "legs" => Ok(Self::Legs),
            other => anyhow::bail!("Unknown body region: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_disjoint_parts_cover_body() {
        let mut covered: Vec<KeypointIndex> = [BodyRegion::Head, BodyRegion::Arms, BodyRegion::Legs]
            .iter()
            .flat_map(|r| r.keypoints().iter().copied())
            .collect();
        covered.sort();
        covered.dedup();
        assert_eq!(covered.len(), KeypointIndex::COUNT);
        assert_eq!(BodyRegion::Full.keypoints().len(), KeypointIndex::COUNT);
    }

    #[test]
    fn test_metric_name_roundtrip() {
        for region in BodyRegion::ALL {
            assert_eq!(BodyRegion::from_metric_name(region.metric_name()), Some(region));
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("arms".parse::<BodyRegion>().unwrap(), BodyRegion::Arms);
        assert_eq!("total".parse::<BodyRegion>().unwrap(), BodyRegion::Full);
        assert!("tail".parse::<BodyRegion>().is_err());
    }
}
