//! スケジュールイベント
//!
//! 各チップの「次の期限」を1か所にまとめる。期限はすべて絶対サイクル値で、
//! 未設定は `NEVER`。最小値は変更のたびに再計算する。

/// 期限なし
pub const NEVER: u64 = u64::MAX;

/// イベントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// ANTIC: 次のスキャンラインのフェッチ
    LineFetch = 0,
    /// ANTIC: ディスプレイリスト割り込み
    Dli = 1,
    /// POKEY: シリアル出力要求 (IRQ bit 4)
    SerialOutNeeded = 2,
    /// POKEY: シリアル出力完了 (IRQ bit 3)
    SerialOutDone = 3,
    /// POKEY: シリアル入力準備完了 (IRQ bit 5)
    SerialInReady = 4,
    /// POKEY: タイマー1
    Timer1 = 5,
    /// POKEY: タイマー2
    Timer2 = 6,
    /// POKEY: タイマー4
    Timer4 = 7,
}

const EVENT_COUNT: usize = 8;

const ALL_EVENTS: [EventKind; EVENT_COUNT] = [
    EventKind::LineFetch,
    EventKind::Dli,
    EventKind::SerialOutNeeded,
    EventKind::SerialOutDone,
    EventKind::SerialInReady,
    EventKind::Timer1,
    EventKind::Timer2,
    EventKind::Timer4,
];

/// イベント期限の集合
#[derive(Debug, Clone)]
pub struct EventSchedule {
    deadlines: [u64; EVENT_COUNT],
    /// 全期限の最小値（キャッシュ）
    next: u64,
    /// CPU停止期限（WSYNC / DMAサイクルスチール）
    stall_until: u64,
}

impl Default for EventSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSchedule {
    pub fn new() -> Self {
        EventSchedule {
            deadlines: [NEVER; EVENT_COUNT],
            next: NEVER,
            stall_until: 0,
        }
    }

    /// 期限を設定
    pub fn set(&mut self, kind: EventKind, cycle: u64) {
        self.deadlines[kind as usize] = cycle;
        self.recompute();
    }

    /// 期限を解除
    pub fn clear(&mut self, kind: EventKind) {
        self.set(kind, NEVER);
    }

    /// 期限を取得
    pub fn get(&self, kind: EventKind) -> u64 {
        self.deadlines[kind as usize]
    }

    /// 最も早い期限
    #[inline]
    pub fn next_deadline(&self) -> u64 {
        self.next
    }

    /// `now` 時点で期限に達している最も早いイベント
    pub fn due(&self, now: u64) -> Option<(EventKind, u64)> {
        if self.next > now {
            return None;
        }
        ALL_EVENTS
            .iter()
            .map(|&k| (k, self.deadlines[k as usize]))
            .filter(|&(_, d)| d <= now)
            .min_by_key(|&(_, d)| d)
    }

    /// CPU停止期限
    #[inline]
    pub fn stall_until(&self) -> u64 {
        self.stall_until
    }

    /// CPU停止期限を延長（短縮はしない）
    pub fn stall_to(&mut self, cycle: u64) {
        if cycle > self.stall_until {
            self.stall_until = cycle;
        }
    }

    fn recompute(&mut self) {
        self.next = self.deadlines.iter().copied().min().unwrap_or(NEVER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_deadline_tracks_minimum() {
        let mut events = EventSchedule::new();
        assert_eq!(events.next_deadline(), NEVER);

        events.set(EventKind::Timer1, 500);
        events.set(EventKind::LineFetch, 114);
        assert_eq!(events.next_deadline(), 114);

        events.clear(EventKind::LineFetch);
        assert_eq!(events.next_deadline(), 500);
    }

    #[test]
    fn test_due_returns_earliest() {
        let mut events = EventSchedule::new();
        events.set(EventKind::Timer4, 90);
        events.set(EventKind::SerialInReady, 80);
        events.set(EventKind::LineFetch, 200);

        assert_eq!(events.due(79), None);
        assert_eq!(events.due(100), Some((EventKind::SerialInReady, 80)));
    }

    #[test]
    fn test_stall_never_shrinks() {
        let mut events = EventSchedule::new();
        events.stall_to(228);
        events.stall_to(120);
        assert_eq!(events.stall_until(), 228);
    }
}
