//! Lifecycle and per-tick wiring: buffer → filter → retargeter → applier.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::buffer::{BufferStats, LandmarkBuffer, LandmarkProducer};
use crate::config::Config;
use crate::error::RigError;
use crate::filter::LandmarkFilter;
use crate::retarget::Retargeter;
use crate::rig::{Rig, RigApplier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    /// 入力が途絶えている。最後の姿勢を保持し、書き込まない
    Degraded,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Stopped => "stopped",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// 1ティックの処理結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub state: PipelineState,
    /// 最後に処理したサンプルのシーケンス番号
    pub sequence: Option<u64>,
    /// このティックで書き込んだボーン数
    pub bones_written: usize,
    /// 追跡中のランドマーク数（保持中を含む）
    pub tracked_landmarks: usize,
}

pub struct Pipeline {
    config: Config,
    state: PipelineState,
    buffer: Arc<LandmarkBuffer>,
    filter: LandmarkFilter,
    retargeter: Option<Retargeter>,
    applier: RigApplier,
    tick: u64,
    last_sequence: Option<u64>,
    tracked_landmarks: usize,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let buffer = Arc::new(LandmarkBuffer::new(Duration::from_millis(
            config.pipeline.stale_after_ms,
        )));
        let filter = LandmarkFilter::from_config(&config.filter, &config.pipeline);
        Self {
            config,
            state: PipelineState::Stopped,
            buffer,
            filter,
            retargeter: None,
            applier: RigApplier::new(),
            tick: 0,
            last_sequence: None,
            tracked_landmarks: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// 検出器コールバック用のハンドル（停止中の push は無視される）
    pub fn producer(&self) -> LandmarkProducer {
        LandmarkProducer::new(self.buffer.clone())
    }

    pub fn applier(&self) -> &RigApplier {
        &self.applier
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    pub fn start(&mut self, rig: &Rig) -> Result<(), RigError> {
        self.start_at(Instant::now(), rig)
    }

    /// 設定を検証しリグに対して解決してから、呼び出しスレッドを所有スレッドとして開始する。
    /// 開始済みなら何もしない。
    pub fn start_at(&mut self, now: Instant, rig: &Rig) -> Result<(), RigError> {
        if self.state != PipelineState::Stopped {
            return Ok(());
        }
        self.transition(PipelineState::Starting);

        let resolved = self
            .config
            .validate()
            .and_then(|_| Retargeter::from_config(&self.config, rig));
        let retargeter = match resolved {
            Ok(r) => r,
            Err(e) => {
                error!("pipeline start failed: {}", e);
                self.transition(PipelineState::Stopped);
                return Err(e);
            }
        };
        info!(
            bones = retargeter.table().len(),
            root = self.config.root.is_some(),
            mirrored = retargeter.basis().is_mirrored(),
            "bone mapping resolved"
        );

        self.retargeter = Some(retargeter);
        self.filter.reset();
        self.last_sequence = None;
        self.tracked_landmarks = 0;
        self.applier.bind();
        self.buffer.attach_at(now);
        self.transition(PipelineState::Running);
        Ok(())
    }

    /// 停止する。戻った後はリグへの書き込みも push の受け付けも起きない。
    pub fn stop(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        // プロデューサーを先に切り離す
        self.buffer.detach();
        self.filter.reset();
        self.retargeter = None;
        self.applier.unbind();
        self.last_sequence = None;
        self.tracked_landmarks = 0;
        self.transition(PipelineState::Stopped);
    }

    pub fn tick(&mut self, rig: &mut Rig) -> Result<TickReport, RigError> {
        self.tick_at(Instant::now(), rig)
    }

    /// 描画ティックごとに1回呼ぶ
    pub fn tick_at(&mut self, now: Instant, rig: &mut Rig) -> Result<TickReport, RigError> {
        if !matches!(self.state, PipelineState::Running | PipelineState::Degraded) {
            return Err(RigError::NotRunning);
        }
        self.tick += 1;
        // 所有スレッド以外からのティックはサンプルもフィルタ状態も消費しない
        self.applier.check(self.tick)?;

        let snapshot = self.buffer.latest_at(now);
        if snapshot.stale {
            if self.state == PipelineState::Running {
                warn!(age_ms = snapshot.age.as_millis() as u64, "landmark input stalled");
                self.transition(PipelineState::Degraded);
            }
            return Ok(self.report(0));
        }
        if self.state == PipelineState::Degraded {
            info!("landmark input resumed");
            self.transition(PipelineState::Running);
        }

        let Some(sample) = snapshot.sample else {
            return Ok(self.report(0));
        };
        // 同じサンプルは二度処理しない
        if self.last_sequence == Some(sample.sequence) {
            return Ok(self.report(0));
        }
        let Some(retargeter) = self.retargeter.as_ref() else {
            return Err(RigError::NotRunning);
        };

        self.last_sequence = Some(sample.sequence);
        let filtered = self.filter.update(&sample);
        self.tracked_landmarks = filtered.tracked_count();
        let transforms = retargeter.solve(&filtered, rig);
        let written = self.applier.apply(rig, self.tick, &transforms)?;
        Ok(self.report(written))
    }

    fn report(&self, bones_written: usize) -> TickReport {
        TickReport {
            state: self.state,
            sequence: self.last_sequence,
            bones_written,
            tracked_landmarks: self.tracked_landmarks,
        }
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "pipeline state");
            if matches!(next, PipelineState::Running | PipelineState::Stopped) {
                info!("pipeline {}", next);
            }
            self.state = next;
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.buffer.detach();
    }
}
