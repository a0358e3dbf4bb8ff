//! 検出を受け取り、群衆の特徴量を送り出す。
//!
//! 観測はフレーム単位にまとめ、揃ったフレームごとにストアへ追加して差分を取り、
//! 群衆全体で集約してから送信する。

use std::io::BufRead;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::RwLock;
use rosc::OscMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, OscConfig};
use crate::crowd::{CrowdAggregator, CrowdSnapshot};
use crate::error::{SignalError, SignalResult};
use crate::ingest::{FeedReader, Observation};
use crate::osc::message::{build_legacy_keypoints, build_person_keypoints, snapshot_messages};
use crate::osc::OscPublisher;
use crate::pose::KeypointMatrix;
use crate::signal::{DiffEngine, ExportFormat, PersonId, SignalStore, Table};

/// 1 フレーム分の全観測
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBatch {
    pub frame: u64,
    pub observations: Vec<Observation>,
}

/// フレーム順の観測列をフレームごとのバッチにまとめる。
///
/// 後続フレームの観測が届くか [`flush`](Self::flush) でバッチを確定する。
/// 確定済みフレームへの観測は拒否する。
#[derive(Debug, Default)]
pub struct FrameBatcher {
    current: Option<FrameBatch>,
    last_emitted: Option<u64>,
}

impl FrameBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, obs: Observation) -> SignalResult<Option<FrameBatch>> {
        let frame = obs.frame;
        if let Some(batch) = self.current.as_mut() {
            if frame == batch.frame {
                batch.observations.push(obs);
                return Ok(None);
            }
            if frame < batch.frame {
                return Err(SignalError::Order {
                    person: obs.person,
                    frame,
                    last: batch.frame,
                });
            }
        } else if let Some(last) = self.last_emitted.filter(|&last| frame <= last) {
            return Err(SignalError::Order {
                person: obs.person,
                frame,
                last,
            });
        }

        let done = self.current.replace(FrameBatch {
            frame,
            observations: vec![obs],
        });
        if let Some(batch) = &done {
            self.last_emitted = Some(batch.frame);
        }
        Ok(done)
    }

    /// 保留中のバッチを確定する
    pub fn flush(&mut self) -> Option<FrameBatch> {
        let batch = self.current.take()?;
        self.last_emitted = Some(batch.frame);
        Some(batch)
    }
}

/// ストアと最新スナップショット。書き込みはパイプラインのみ、読み出しは他スレッドからも可
#[derive(Debug)]
pub struct SharedSignals {
    store: RwLock<SignalStore>,
    snapshot: RwLock<Option<CrowdSnapshot>>,
}

impl SharedSignals {
    pub fn new(store: SignalStore) -> Self {
        Self {
            store: RwLock::new(store),
            snapshot: RwLock::new(None),
        }
    }

    /// 最新の群衆スナップショット
    pub fn snapshot(&self) -> Option<CrowdSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&SignalStore) -> R) -> R {
        f(&self.store.read())
    }

    pub fn as_table(&self, format: ExportFormat, one_based_idx: bool) -> Table {
        self.store.read().as_table(format, one_based_idx)
    }
}

/// スナップショットに添える人物ごとのメッセージ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    pub keypoints: bool,
    pub legacy: bool,
}

impl From<&OscConfig> for PublishOptions {
    fn from(config: &OscConfig) -> Self {
        Self {
            keypoints: config.publish_keypoints,
            legacy: config.legacy_keypoints,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub observations: u64,
    pub rejected: u64,
    pub undefined_diffs: u64,
    pub evicted: u64,
}

/// 処理済み 1 フレーム分のメッセージ。人数と動き量、続いて更新された人物のキーポイント
pub fn frame_messages(
    snapshot: &CrowdSnapshot,
    keypoints: &[(PersonId, KeypointMatrix)],
    options: PublishOptions,
) -> Vec<OscMessage> {
    let mut msgs = snapshot_messages(snapshot);
    for (person, matrix) in keypoints {
        if options.keypoints {
            msgs.push(build_person_keypoints(*person, matrix));
        }
        if options.legacy {
            msgs.push(build_legacy_keypoints(matrix));
        }
    }
    msgs
}

pub struct Pipeline {
    shared: Arc<SharedSignals>,
    engine: DiffEngine,
    aggregator: CrowdAggregator,
    batcher: FrameBatcher,
    publisher: Option<OscPublisher>,
    options: PublishOptions,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(config: &Config, publisher: Option<OscPublisher>) -> Self {
        Self {
            shared: Arc::new(SharedSignals::new(SignalStore::from_config(
                &config.signal,
                &config.tracking,
            ))),
            engine: DiffEngine::from_config(&config.signal),
            aggregator: CrowdAggregator::from_config(&config.tracking, &config.crowd),
            batcher: FrameBatcher::new(),
            publisher,
            options: PublishOptions::from(&config.osc),
            stats: PipelineStats::default(),
        }
    }

    pub fn shared(&self) -> Arc<SharedSignals> {
        Arc::clone(&self.shared)
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// 観測を 1 件投入する。確定したフレームがあればそのスナップショットを返す
    pub fn push(&mut self, obs: Observation) -> Option<CrowdSnapshot> {
        self.stats.observations += 1;
        match self.batcher.push(obs) {
            Ok(batch) => batch.map(|b| self.process_batch(b)),
            Err(e) => {
                warn!("Dropping observation: {}", e);
                self.stats.rejected += 1;
                None
            }
        }
    }

    /// 入力終端で保留中のフレームを処理する
    pub fn finish(&mut self) -> Option<CrowdSnapshot> {
        let batch = self.batcher.flush()?;
        Some(self.process_batch(batch))
    }

    pub fn process_batch(&mut self, batch: FrameBatch) -> CrowdSnapshot {
        let frame = batch.frame;
        let (snapshot, keypoints) = {
            let mut store = self.shared.store.write();

            let mut persons: Vec<PersonId> = Vec::with_capacity(batch.observations.len());
            for obs in batch.observations {
                match store.append(obs.frame, obs.person, obs.keypoints) {
                    Ok(()) => {
                        if !persons.contains(&obs.person) {
                            persons.push(obs.person);
                        }
                    }
                    Err(e) => {
                        warn!("Frame {}: {}", frame, e);
                        self.stats.rejected += 1;
                    }
                }
            }
            persons.sort_unstable();

            for &person in &persons {
                for update in store.update_diffs(&self.engine, person) {
                    if let Err(e) = update.result {
                        debug!(person = person, region = %update.region, "{}", e);
                        self.stats.undefined_diffs += 1;
                    }
                }
            }

            let evicted = store.evict_inactive(frame);
            if !evicted.is_empty() {
                info!("Frame {}: evicted {:?}", frame, evicted);
                self.stats.evicted += evicted.len() as u64;
            }

            let snapshot = self.aggregator.reduce(&store, frame);
            let keypoints: Vec<(PersonId, KeypointMatrix)> = persons
                .iter()
                .filter_map(|&p| {
                    let (_, matrix) = store.track(p)?.pose().latest()?;
                    Some((p, matrix.clone()))
                })
                .collect();
            (snapshot, keypoints)
        };

        *self.shared.snapshot.write() = Some(snapshot.clone());
        self.stats.frames += 1;

        if let Some(publisher) = &self.publisher {
            for msg in frame_messages(&snapshot, &keypoints, self.options) {
                if let Err(e) = publisher.send(&msg) {
                    warn!("Failed to publish {}: {}", msg.addr, e);
                }
            }
        }
        snapshot
    }

    /// JSON-lines フィードを EOF か `cancel` まで処理する。
    ///
    /// 壊れた行やレコードはログに出して読み飛ばす。`frame_interval` を指定すると
    /// 1 間隔あたり最大 1 フレームに抑える (録画フィードの実時間再生)。
    pub fn run_feed<R: BufRead>(
        &mut self,
        reader: R,
        frame_interval: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<PipelineStats> {
        let mut next_frame_at = Instant::now();
        for record in FeedReader::new(reader) {
            if cancel.is_cancelled() {
                info!("Feed interrupted");
                break;
            }
            let obs = match record.and_then(|r| r.into_observation().map_err(Into::into)) {
                Ok(obs) => obs,
                Err(e) => {
                    warn!("Skipping detection: {:#}", e);
                    self.stats.rejected += 1;
                    continue;
                }
            };
            if let Some(snapshot) = self.push(obs) {
                log_snapshot(&snapshot);
                if let Some(interval) = frame_interval {
                    next_frame_at += interval;
                    let now = Instant::now();
                    if next_frame_at > now {
                        std::thread::sleep(next_frame_at - now);
                    } else {
                        next_frame_at = now;
                    }
                }
            }
        }
        if let Some(snapshot) = self.finish() {
            log_snapshot(&snapshot);
        }
        Ok(self.stats.clone())
    }
}

fn log_snapshot(snapshot: &CrowdSnapshot) {
    match serde_json::to_string(snapshot) {
        Ok(json) => debug!("crowd {}", json),
        Err(e) => warn!("Failed to serialize snapshot for frame {}: {}", snapshot.frame, e),
    }
}
