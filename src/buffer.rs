//! Single-slot handoff between the detector callback and the render tick.
//!
//! The slot holds only the newest accepted sample: older in-flight samples are
//! replaced, never queued. Every critical section is an `Arc` swap or clone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::landmark::LandmarkSample;

/// `push` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// シーケンス番号が最後に受け付けたもの以下
    OutOfOrder,
    /// パイプライン停止中（プロデューサー切り離し済み）
    Detached,
}

/// `latest` の結果
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    /// 最新サンプル。初回到着前は None
    pub sample: Option<Arc<LandmarkSample>>,
    /// 最後の受け付けからの経過時間（初回到着前はアタッチからの経過時間）
    pub age: Duration,
    pub stale: bool,
}

struct Slot {
    attached: bool,
    attached_at: Instant,
    latest: Option<Arc<LandmarkSample>>,
    arrived_at: Option<Instant>,
    last_sequence: Option<u64>,
}

/// 受け付け・破棄数（診断用）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub accepted: u64,
    pub out_of_order: u64,
    pub detached: u64,
}

pub struct LandmarkBuffer {
    slot: Mutex<Slot>,
    stale_after: Duration,
    accepted: AtomicU64,
    out_of_order: AtomicU64,
    detached: AtomicU64,
}

impl LandmarkBuffer {
    /// 切り離された状態で作成する。`attach` するまで push は無視される。
    pub fn new(stale_after: Duration) -> Self {
        Self {
            slot: Mutex::new(Slot {
                attached: false,
                attached_at: Instant::now(),
                latest: None,
                arrived_at: None,
                last_sequence: None,
            }),
            stale_after,
            accepted: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
            detached: AtomicU64::new(0),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// 新しいプロデューサーセッションを開始する
    pub fn attach_at(&self, now: Instant) {
        let mut slot = self.slot.lock();
        slot.attached = true;
        slot.attached_at = now;
        slot.latest = None;
        slot.arrived_at = None;
        slot.last_sequence = None;
    }

    pub fn attach(&self) {
        self.attach_at(Instant::now());
    }

    /// push を止めてからスロットを空にする。
    /// 戻った時点以降の push はすべて no-op。
    pub fn detach(&self) {
        let mut slot = self.slot.lock();
        slot.attached = false;
        slot.latest = None;
        slot.arrived_at = None;
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().attached
    }

    pub fn push_at(&self, sample: LandmarkSample, now: Instant) -> PushOutcome {
        let sample = Arc::new(sample);
        let mut replaced = None;
        let outcome = {
            let mut slot = self.slot.lock();
            if !slot.attached {
                PushOutcome::Detached
            } else if slot.last_sequence.is_some_and(|last| sample.sequence <= last) {
                PushOutcome::OutOfOrder
            } else {
                slot.last_sequence = Some(sample.sequence);
                slot.arrived_at = Some(now);
                replaced = slot.latest.replace(sample);
                PushOutcome::Accepted
            }
        };
        // 旧サンプルの解放はロック外で行う
        drop(replaced);
        let counter = match outcome {
            PushOutcome::Accepted => &self.accepted,
            PushOutcome::OutOfOrder => &self.out_of_order,
            PushOutcome::Detached => &self.detached,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    pub fn push(&self, sample: LandmarkSample) -> PushOutcome {
        self.push_at(sample, Instant::now())
    }

    /// 最新サンプルを取得する。待機しない。
    /// サンプルは保持されるので何度でも取得できる。
    pub fn latest_at(&self, now: Instant) -> BufferSnapshot {
        let (sample, since) = {
            let slot = self.slot.lock();
            (slot.latest.clone(), slot.arrived_at.unwrap_or(slot.attached_at))
        };
        let age = now.saturating_duration_since(since);
        BufferSnapshot {
            sample,
            age,
            stale: age > self.stale_after,
        }
    }

    pub fn latest(&self) -> BufferSnapshot {
        self.latest_at(Instant::now())
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            detached: self.detached.load(Ordering::Relaxed),
        }
    }
}

/// 検出器コールバックに渡すハンドル
#[derive(Clone)]
pub struct LandmarkProducer {
    buffer: Arc<LandmarkBuffer>,
}

impl LandmarkProducer {
    pub fn new(buffer: Arc<LandmarkBuffer>) -> Self {
        Self { buffer }
    }

    pub fn push(&self, sample: LandmarkSample) -> PushOutcome {
        self.buffer.push(sample)
    }

    pub fn push_at(&self, sample: LandmarkSample, now: Instant) -> PushOutcome {
        self.buffer.push_at(sample, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::{Landmark, LandmarkId};

    fn sample(seq: u64) -> LandmarkSample {
        LandmarkSample::new(seq, seq * 33_000)
            .with_landmark(LandmarkId::Nose, Landmark::new(0.5, 0.2, 0.0, 0.9))
    }

    fn attached_buffer(t0: Instant) -> LandmarkBuffer {
        let buffer = LandmarkBuffer::new(Duration::from_millis(500));
        buffer.attach_at(t0);
        buffer
    }

    #[test]
    fn test_latest_before_first_arrival() {
        let t0 = Instant::now();
        let buffer = attached_buffer(t0);
        let snap = buffer.latest_at(t0 + Duration::from_millis(100));
        assert!(snap.sample.is_none());
        assert!(!snap.stale);
        assert_eq!(snap.age, Duration::from_millis(100));

        // 一度も届かずに窓を超えたら stale
        assert!(buffer.latest_at(t0 + Duration::from_millis(600)).stale);
    }

    #[test]
    fn test_newest_sample_wins() {
        let t0 = Instant::now();
        let buffer = attached_buffer(t0);
        assert_eq!(buffer.push_at(sample(1), t0), PushOutcome::Accepted);
        assert_eq!(buffer.push_at(sample(2), t0), PushOutcome::Accepted);
        assert_eq!(buffer.push_at(sample(5), t0), PushOutcome::Accepted);
        assert_eq!(buffer.latest_at(t0).sample.unwrap().sequence, 5);
    }

    #[test]
    fn test_monotonic_acceptance() {
        let t0 = Instant::now();
        let buffer = attached_buffer(t0);
        assert_eq!(buffer.push_at(sample(10), t0), PushOutcome::Accepted);
        for seq in [10, 9, 3, 0] {
            assert_eq!(buffer.push_at(sample(seq), t0), PushOutcome::OutOfOrder);
            assert_eq!(buffer.latest_at(t0).sample.unwrap().sequence, 10);
        }
        assert_eq!(buffer.push_at(sample(11), t0), PushOutcome::Accepted);
        assert_eq!(buffer.latest_at(t0).sample.unwrap().sequence, 11);

        let stats = buffer.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.out_of_order, 4);
    }

    #[test]
    fn test_age_and_staleness() {
        let t0 = Instant::now();
        let buffer = attached_buffer(t0);
        buffer.push_at(sample(1), t0);

        let fresh = buffer.latest_at(t0 + Duration::from_millis(499));
        assert!(!fresh.stale);
        assert_eq!(fresh.age, Duration::from_millis(499));

        let stale = buffer.latest_at(t0 + Duration::from_millis(600));
        assert!(stale.stale);
        // stale でも最後のサンプルは返る
        assert_eq!(stale.sample.unwrap().sequence, 1);

        buffer.push_at(sample(2), t0 + Duration::from_millis(650));
        assert!(!buffer.latest_at(t0 + Duration::from_millis(660)).stale);
    }

    #[test]
    fn test_detached_push_is_noop() {
        let t0 = Instant::now();
        let buffer = attached_buffer(t0);
        buffer.push_at(sample(1), t0);
        buffer.detach();

        assert_eq!(buffer.push_at(sample(2), t0), PushOutcome::Detached);
        assert!(buffer.latest_at(t0).sample.is_none());
        assert!(!buffer.is_attached());
        assert_eq!(buffer.stats().detached, 1);
    }

    #[test]
    fn test_attach_starts_new_session() {
        let t0 = Instant::now();
        let buffer = attached_buffer(t0);
        buffer.push_at(sample(100), t0);
        buffer.detach();
        buffer.attach_at(t0);

        // 新セッションではシーケンス番号がリセットされる
        assert_eq!(buffer.push_at(sample(1), t0), PushOutcome::Accepted);
        assert_eq!(buffer.latest_at(t0).sample.unwrap().sequence, 1);
    }

    #[test]
    fn test_push_never_waits_for_consumer() {
        let buffer = Arc::new(LandmarkBuffer::new(Duration::from_millis(500)));
        buffer.attach();
        let producer = LandmarkProducer::new(buffer.clone());

        // コンシューマーは latest を一度も呼ばない
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            for seq in 1..=10_000 {
                producer.push(sample(seq));
            }
            start.elapsed()
        });
        let elapsed = handle.join().unwrap();
        assert!(elapsed < Duration::from_secs(2), "push stalled: {:?}", elapsed);
        assert_eq!(buffer.stats().accepted, 10_000);
        assert_eq!(buffer.latest().sample.unwrap().sequence, 10_000);
    }
}
