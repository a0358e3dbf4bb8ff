//! 人物ごとの時系列: キーポイント履歴とそこから導出する動き量

pub mod diff;
pub mod pose_signal;
pub mod reducer;
pub mod store;
pub mod table;

/// 外部トラッカーが振るトラック ID
pub type PersonId = u32;

pub use diff::{DiffEngine, DiffSample, DiffSignal};
pub use pose_signal::PoseSignal;
pub use reducer::Reducer;
pub use store::{DiffUpdate, SignalStore, Track};
pub use table::{Cell, ExportFormat, Table};
