//! オフライン集計ツール向けのポーズ信号テーブル出力

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// [`PoseSignal::as_table`](super::PoseSignal::as_table) のレイアウト
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// (frame, idx) ごとに 1 行、キーポイントごとに列グループ
    Wide,
    /// (frame, idx, keypoint) ごとに 1 行
    Long,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wide" => Ok(Self::Wide),
            "long" => Ok(Self::Long),
            other => anyhow::bail!("Unknown table format: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(u64),
    Float(f32),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Int(v) => write!(f, "{}", v),
            // NaN は空欄
            Cell::Float(v) if v.is_nan() => Ok(()),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// 同じ列構成のテーブルの行を追加する。列が違えば何も追加しない。
    pub fn extend(&mut self, other: Table) -> Result<()> {
        if self.columns.is_empty() {
            self.columns = other.columns;
        } else if self.columns != other.columns {
            anyhow::bail!(
                "column mismatch: {} columns, got {}",
                self.columns.len(),
                other.columns.len()
            );
        }
        if let Some(row) = other.rows.iter().find(|r| r.len() != self.columns.len()) {
            anyhow::bail!("row has {} fields, expected {}", row.len(), self.columns.len());
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|c| c.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }
}
