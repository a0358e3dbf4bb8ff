use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::pose::BodyRegion;
use crate::signal::Reducer;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub osc: OscConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub crowd: CrowdConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OscConfig {
    /// 受信 (コントロール) 用バインドアドレス
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// 特徴量の送信先
    #[serde(default = "default_target_addr")]
    pub target_addr: String,
    /// 人物ごとのキーポイントを送信するか
    #[serde(default = "default_true")]
    pub publish_keypoints: bool,
    /// 旧アドレス /pose/keypoints にも送信するか
    #[serde(default = "default_true")]
    pub legacy_keypoints: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalConfig {
    /// 差分計算に必要な有効キーポイント数
    #[serde(default = "default_min_valid_keypoints")]
    pub min_valid_keypoints: usize,
    /// 信頼度列がある場合の有効閾値
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// キーポイント変位の集約方法
    #[serde(default)]
    pub reducer: Reducer,
    /// 動き量を計算する部位 (full は常に含まれる)
    #[serde(default = "default_regions")]
    pub regions: Vec<BodyRegion>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    /// 直近何フレーム以内に観測されたらアクティブとみなすか
    #[serde(default = "default_active_window")]
    pub active_window: u64,
    /// 何フレーム観測がなければトラックを破棄するか
    #[serde(default = "default_evict_after")]
    pub evict_after: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CrowdConfig {
    /// 人物間の集約方法
    #[serde(default)]
    pub reducer: Reducer,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    /// エクスポート時の idx を1始まりにする
    #[serde(default = "default_true")]
    pub one_based_idx: bool,
}

fn default_listen_addr() -> String { "0.0.0.0:5005".to_string() }
fn default_target_addr() -> String { "127.0.0.1:5005".to_string() }
fn default_true() -> bool { true }
fn default_min_valid_keypoints() -> usize { 1 }
fn default_confidence_threshold() -> f32 { 0.3 }
fn default_regions() -> Vec<BodyRegion> { vec![BodyRegion::Full] }
fn default_active_window() -> u64 { 5 }
fn default_evict_after() -> u64 { 30 }

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            target_addr: default_target_addr(),
            publish_keypoints: default_true(),
            legacy_keypoints: default_true(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_valid_keypoints: default_min_valid_keypoints(),
            confidence_threshold: default_confidence_threshold(),
            reducer: Reducer::default(),
            regions: default_regions(),
        }
    }
}

impl SignalConfig {
    /// 重複を除き full を先頭にした部位リスト
    pub fn effective_regions(&self) -> Vec<BodyRegion> {
        let mut regions = vec![BodyRegion::Full];
        for r in &self.regions {
            if !regions.contains(r) {
                regions.push(*r);
            }
        }
        regions
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            active_window: default_active_window(),
            evict_after: default_evict_after(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            one_based_idx: default_true(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// 読めなければデフォルト設定
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("{} not found, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{:#}; using defaults", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.osc.listen_addr, "0.0.0.0:5005");
        assert_eq!(config.signal.min_valid_keypoints, 1);
        assert_eq!(config.signal.reducer, Reducer::Mean);
        assert_eq!(config.tracking.active_window, 5);
        assert!(config.export.one_based_idx);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [osc]
            target_addr = "192.168.0.10:9000"
            legacy_keypoints = false

            [signal]
            reducer = "median"
            regions = ["arms", "legs"]

            [tracking]
            active_window = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.osc.target_addr, "192.168.0.10:9000");
        assert_eq!(config.osc.listen_addr, "0.0.0.0:5005");
        assert!(!config.osc.legacy_keypoints);
        assert_eq!(config.signal.reducer, Reducer::Median);
        assert_eq!(
            config.signal.effective_regions(),
            vec![BodyRegion::Full, BodyRegion::Arms, BodyRegion::Legs]
        );
        assert_eq!(config.tracking.active_window, 2);
        assert_eq!(config.tracking.evict_after, 30);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[crowd]\nreducer = \"max\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.crowd.reducer, Reducer::Max);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("/nonexistent/dancefloor.toml");
        assert_eq!(config.osc.target_addr, "127.0.0.1:5005");
    }

    #[test]
    fn test_invalid_reducer_rejected() {
        let result: Result<Config, _> = toml::from_str("[signal]\nreducer = \"mode\"");
        assert!(result.is_err());
    }
}
