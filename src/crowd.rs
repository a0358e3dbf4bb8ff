//! 人物ごとの動き量をフロア全体へ集約する。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{CrowdConfig, TrackingConfig};
use crate::pose::BodyRegion;
use crate::signal::{PersonId, Reducer, SignalStore};

/// フレーム単位の群衆状態。毎フレーム計算し直し、保持しない
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrowdSnapshot {
    pub frame: u64,
    pub person_count: usize,
    pub active: Vec<PersonId>,
    /// 部位ごとの集約動き量。ストアが追跡する全部位を持ち、
    /// 有効な値が一つもなければ 0
    pub movement: BTreeMap<BodyRegion, f32>,
}

impl CrowdSnapshot {
    pub fn empty(frame: u64) -> Self {
        Self {
            frame,
            person_count: 0,
            active: Vec::new(),
            movement: BTreeMap::from([(BodyRegion::Full, 0.0)]),
        }
    }

    /// 全身の集約動き量
    pub fn aggregate_movement(&self) -> f32 {
        self.movement(BodyRegion::Full)
    }

    pub fn movement(&self, region: BodyRegion) -> f32 {
        self.movement.get(&region).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct CrowdAggregator {
    active_window: u64,
    reducer: Reducer,
}

impl CrowdAggregator {
    pub fn new(active_window: u64, reducer: Reducer) -> Self {
        Self {
            active_window,
            reducer,
        }
    }

    pub fn from_config(tracking: &TrackingConfig, crowd: &CrowdConfig) -> Self {
        Self::new(tracking.active_window, crowd.reducer)
    }

    pub fn active_window(&self) -> u64 {
        self.active_window
    }

    /// `frame` 時点のアクティブなトラックを集約する。ストアは読むだけ
    pub fn reduce(&self, store: &SignalStore, frame: u64) -> CrowdSnapshot {
        let mut active: Vec<PersonId> = store
            .tracks()
            .filter(|t| t.is_active(frame, self.active_window))
            .map(|t| t.person())
            .collect();
        active.sort_unstable();

        let movement = store
            .regions()
            .iter()
            .map(|&region| {
                let values: Vec<f32> = active
                    .iter()
                    .filter_map(|&p| store.track(p))
                    .filter_map(|t| t.diff(region))
                    .filter_map(|d| d.latest_defined())
                    .map(|(_, v)| v)
                    .collect();
                // 誰もいない、または有効値なしなら 0
                (region, self.reducer.reduce(&values).unwrap_or(0.0))
            })
            .collect();

        CrowdSnapshot {
            frame,
            person_count: active.len(),
            active,
            movement,
        }
    }
}

impl Default for CrowdAggregator {
    fn default() -> Self {
        Self::from_config(&TrackingConfig::default(), &CrowdConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{nose_at, undetected_matrix, KeypointMatrix};
    use crate::signal::DiffEngine;

    fn ingest(store: &mut SignalStore, engine: &DiffEngine, frame: u64, person: PersonId, m: KeypointMatrix) {
        store.append(frame, person, m).unwrap();
        store.update_diffs(engine, person);
    }

    #[test]
    fn test_empty_store_is_zero_not_undefined() {
        let store = SignalStore::default();
        let snapshot = CrowdAggregator::default().reduce(&store, 100);
        assert_eq!(snapshot.person_count, 0);
        assert_eq!(snapshot.aggregate_movement(), 0.0);
    }

    #[test]
    fn test_mean_over_active_people() {
        let mut store = SignalStore::default();
        let engine = DiffEngine::default();
        ingest(&mut store, &engine, 1, 1, nose_at(0.0, 0.0));
        ingest(&mut store, &engine, 1, 2, nose_at(0.0, 0.0));
        ingest(&mut store, &engine, 2, 1, nose_at(1.0, 0.0));
        ingest(&mut store, &engine, 2, 2, nose_at(3.0, 0.0));

        let snapshot = CrowdAggregator::new(5, Reducer::Mean).reduce(&store, 2);
        assert_eq!(snapshot.person_count, 2);
        assert_eq!(snapshot.active, vec![1, 2]);
        assert_eq!(snapshot.aggregate_movement(), 2.0);
    }

    #[test]
    fn test_inactive_people_excluded() {
        let mut store = SignalStore::default();
        let engine = DiffEngine::default();
        ingest(&mut store, &engine, 1, 1, nose_at(0.0, 0.0));
        ingest(&mut store, &engine, 2, 1, nose_at(4.0, 0.0));
        ingest(&mut store, &engine, 9, 2, nose_at(0.0, 0.0));
        ingest(&mut store, &engine, 10, 2, nose_at(1.0, 0.0));

        let snapshot = CrowdAggregator::new(3, Reducer::Mean).reduce(&store, 10);
        assert_eq!(snapshot.active, vec![2]);
        assert_eq!(snapshot.aggregate_movement(), 1.0);
    }

    #[test]
    fn test_undefined_values_ignored() {
        let mut store = SignalStore::default();
        let engine = DiffEngine::default();
        // 人物 1 は差分あり、人物 2 は初回観測のみ
        ingest(&mut store, &engine, 1, 1, nose_at(0.0, 0.0));
        ingest(&mut store, &engine, 2, 1, nose_at(2.0, 0.0));
        ingest(&mut store, &engine, 2, 2, nose_at(5.0, 0.0));

        let snapshot = CrowdAggregator::new(5, Reducer::Mean).reduce(&store, 2);
        assert_eq!(snapshot.person_count, 2);
        assert_eq!(snapshot.aggregate_movement(), 2.0);
    }

    #[test]
    fn test_active_people_without_defined_values_is_zero() {
        let mut store = SignalStore::default();
        let engine = DiffEngine::default();
        ingest(&mut store, &engine, 1, 1, undetected_matrix(2));
        ingest(&mut store, &engine, 2, 1, undetected_matrix(2));

        let snapshot = CrowdAggregator::default().reduce(&store, 2);
        assert_eq!(snapshot.person_count, 1);
        assert_eq!(snapshot.aggregate_movement(), 0.0);
    }

    #[test]
    fn test_reduce_does_not_mutate_store() {
        let mut store = SignalStore::default();
        let engine = DiffEngine::default();
        ingest(&mut store, &engine, 1, 1, nose_at(0.0, 0.0));
        let before = store.track(1).unwrap().pose().len();
        let _ = CrowdAggregator::default().reduce(&store, 50);
        assert_eq!(store.track(1).unwrap().pose().len(), before);
    }

    #[test]
    fn test_snapshot_json() {
        let mut snapshot = CrowdSnapshot::empty(7);
        snapshot.person_count = 2;
        snapshot.active = vec![1, 3];
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["frame"], 7);
        assert_eq!(json["person_count"], 2);
        assert_eq!(json["active"], serde_json::json!([1, 3]));
        assert_eq!(json["movement"]["full"], 0.0);
    }
}
