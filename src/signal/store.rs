use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::config::{SignalConfig, TrackingConfig};
use crate::error::{SignalError, SignalResult};
use crate::pose::{BodyRegion, KeypointMatrix, MIN_COORD_WIDTH};

use super::diff::{DiffEngine, DiffSignal};
use super::pose_signal::{table_columns, PoseSignal};
use super::table::{ExportFormat, Table};
use super::PersonId;

/// 追跡中の 1 人分のポーズ履歴と動き量
#[derive(Debug, Clone)]
pub struct Track {
    pose: PoseSignal,
    diffs: BTreeMap<BodyRegion, DiffSignal>,
}

impl Track {
    fn new(person: PersonId, regions: &[BodyRegion]) -> Self {
        Self {
            pose: PoseSignal::new(person),
            diffs: regions.iter().map(|r| (*r, DiffSignal::new())).collect(),
        }
    }

    pub fn person(&self) -> PersonId {
        self.pose.person()
    }

    pub fn pose(&self) -> &PoseSignal {
        &self.pose
    }

    pub fn diff(&self, region: BodyRegion) -> Option<&DiffSignal> {
        self.diffs.get(&region)
    }

    pub fn last_seen(&self) -> Option<u64> {
        self.pose.last_frame()
    }

    /// `now` から `window` フレーム以内に観測されたか
    pub fn is_active(&self, now: u64, window: u64) -> bool {
        self.last_seen()
            .map_or(false, |last| now.saturating_sub(last) < window)
    }
}

/// 差分更新 1 回分の結果
#[derive(Debug, Clone, PartialEq)]
pub struct DiffUpdate {
    pub person: PersonId,
    pub region: BodyRegion,
    pub result: SignalResult<f32>,
}

/// 外部トラック ID をキーにした人物ごとのトラック置き場。
///
/// 破棄したトラックのスロットは再利用し、再登場した ID は空のトラックから始まる。
#[derive(Debug, Clone)]
pub struct SignalStore {
    index: HashMap<PersonId, usize>,
    slots: Vec<Option<Track>>,
    free: Vec<usize>,
    regions: Vec<BodyRegion>,
    evict_after: u64,
}

impl SignalStore {
    pub fn new(regions: Vec<BodyRegion>, evict_after: u64) -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            regions,
            evict_after,
        }
    }

    pub fn from_config(signal: &SignalConfig, tracking: &TrackingConfig) -> Self {
        Self::new(signal.effective_regions(), tracking.evict_after)
    }

    pub fn regions(&self) -> &[BodyRegion] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn track(&self, person: PersonId) -> Option<&Track> {
        self.index.get(&person).and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.slots.iter().flatten()
    }

    /// 昇順の人物 ID
    pub fn persons(&self) -> Vec<PersonId> {
        let mut ids: Vec<PersonId> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// 観測を 1 件追加する。新しい ID は観測が受理されたときだけトラックを得る
    pub fn append(&mut self, frame: u64, person: PersonId, matrix: KeypointMatrix) -> SignalResult<()> {
        if let Some(&slot) = self.index.get(&person) {
            if let Some(track) = self.slots[slot].as_mut() {
                return track.pose.append(frame, matrix);
            }
        }

        let mut track = Track::new(person, &self.regions);
        track.pose.append(frame, matrix)?;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(track);
                slot
            }
            None => {
                self.slots.push(Some(track));
                self.slots.len() - 1
            }
        };
        self.index.insert(person, slot);
        debug!(person = person, frame = frame, slot = slot, "new track");
        Ok(())
    }

    /// `person` の全部位について差分を更新する
    pub fn update_diffs(&mut self, engine: &DiffEngine, person: PersonId) -> Vec<DiffUpdate> {
        let Some(track) = self
            .index
            .get(&person)
            .and_then(|&slot| self.slots[slot].as_mut())
        else {
            return vec![DiffUpdate {
                person,
                region: BodyRegion::Full,
                result: Err(SignalError::UnknownPerson(person)),
            }];
        };

        let Track { pose, diffs } = track;
        diffs
            .iter_mut()
            .map(|(region, diff)| DiffUpdate {
                person,
                region: *region,
                result: engine.update(pose, diff, *region),
            })
            .collect()
    }

    /// トラックを明示的に破棄する (退場、トラッカーのリセット)
    pub fn drop_track(&mut self, person: PersonId) -> Option<Track> {
        let slot = self.index.remove(&person)?;
        self.free.push(slot);
        self.slots[slot].take()
    }

    /// `now` までに `evict_after` フレームを超えて観測のないトラックを破棄する
    pub fn evict_inactive(&mut self, now: u64) -> Vec<PersonId> {
        let stale: Vec<PersonId> = self
            .tracks()
            .filter(|t| {
                t.last_seen()
                    .map_or(true, |last| now.saturating_sub(last) > self.evict_after)
            })
            .map(|t| t.person())
            .collect();
        for person in &stale {
            self.drop_track(*person);
            debug!(person = *person, now = now, "track evicted");
        }
        stale
    }

    /// 全トラックを人物順に連結したテーブル。
    ///
    /// 列は最も広い座標幅に揃え、幅 2 のトラックの信頼度は空欄になる。
    pub fn as_table(&self, format: ExportFormat, one_based_idx: bool) -> Table {
        let width = self
            .tracks()
            .filter_map(|t| t.pose.width())
            .max()
            .unwrap_or(MIN_COORD_WIDTH);
        let mut table = Table::new(table_columns(format, width));
        for person in self.persons() {
            if let Some(track) = self.track(person) {
                if let Err(e) = table.extend(track.pose.as_table_with_width(format, one_based_idx, width)) {
                    warn!(person = person, "skipping track in export: {:#}", e);
                }
            }
        }
        table
    }
}

impl Default for SignalStore {
    fn default() -> Self {
        Self::from_config(&SignalConfig::default(), &TrackingConfig::default())
    }
}
