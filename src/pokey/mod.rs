//! POKEY: 音源 / タイマー / シリアル / パドル / 乱数 / キーボード
//!
//! レジスタは $D200-$D20F（$D2xxでミラー）。
//! タイマー期限とシリアル期限は `EventSchedule` に置き、
//! IRQを上げるかどうかだけを呼び出し側へ返す。

pub mod audio;

use crate::disk::SIO_BYTE_CYCLES;
use crate::events::{EventKind, EventSchedule};
use audio::{AudioEngine, AudioParams};

/// 64kHzクロックの周期
pub const BASE_64KHZ: u64 = 28;
/// 15kHzクロックの周期（1スキャンライン）
pub const BASE_15KHZ: u64 = 114;

/// パドルの最大値
pub const POT_MAX: u8 = 228;

/// シリアル出力完了までの追加サイクル（シフトレジスタが空になるまで）
const SEROUT_DONE_EXTRA: u64 = 100;

/// IRQST / IRQEN のビット
pub mod irq {
    pub const TIMER1: u8 = 0x01;
    pub const TIMER2: u8 = 0x02;
    pub const TIMER4: u8 = 0x04;
    pub const SERIAL_OUT_DONE: u8 = 0x08;
    pub const SERIAL_OUT_NEEDED: u8 = 0x10;
    pub const SERIAL_IN_READY: u8 = 0x20;
    pub const KEY: u8 = 0x40;
    pub const BREAK: u8 = 0x80;
}

// 書き込みレジスタ
pub const AUDF1: u8 = 0x00;
pub const AUDC1: u8 = 0x01;
pub const AUDCTL: u8 = 0x08;
pub const STIMER: u8 = 0x09;
pub const SKRES: u8 = 0x0A;
pub const POTGO: u8 = 0x0B;
pub const SEROUT: u8 = 0x0D;
pub const IRQEN: u8 = 0x0E;
pub const SKCTL: u8 = 0x0F;

// 読み出しレジスタ
pub const ALLPOT: u8 = 0x08;
pub const KBCODE: u8 = 0x09;
pub const RANDOM: u8 = 0x0A;
pub const SERIN: u8 = 0x0D;
pub const IRQST: u8 = 0x0E;
pub const SKSTAT: u8 = 0x0F;

/// POKEYの状態
#[derive(Debug, Clone)]
pub struct Pokey {
    audf: [u8; 4],
    audc: [u8; 4],
    audctl: u8,
    skctl: u8,
    irqen: u8,
    /// 割り込み状態（0 = 発生中）
    irqst: u8,
    kbcode: u8,
    skstat: u8,
    serin: u8,
    /// パドルの目標値
    pot_values: [u8; 8],
    /// POTGOを書いたサイクル
    pot_start: u64,
    /// 音源（LFSRを含む）
    pub audio: AudioEngine,
}

impl Pokey {
    pub fn new(cpu_hz: u32, sample_rate: u32, audio_enabled: bool) -> Self {
        Pokey {
            audf: [0; 4],
            audc: [0; 4],
            audctl: 0,
            skctl: 0,
            irqen: 0,
            irqst: 0xFF,
            kbcode: 0xFF,
            skstat: 0xFF,
            serin: 0,
            pot_values: [POT_MAX; 8],
            pot_start: 0,
            audio: AudioEngine::new(cpu_hz, sample_rate, audio_enabled),
        }
    }

    /// 電源投入状態へ
    pub fn reset(&mut self, now: u64) {
        self.audf = [0; 4];
        self.audc = [0; 4];
        self.audctl = 0;
        self.skctl = 0;
        self.irqen = 0;
        self.irqst = 0xFF;
        self.kbcode = 0xFF;
        self.skstat = 0xFF;
        self.serin = 0;
        self.pot_start = now;
        self.audio.reset(now);
    }

    /// SKCTLの下位2ビットが0ならタイマーとLFSRはリセット保持
    #[inline]
    pub fn held_in_reset(&self) -> bool {
        self.skctl & 0x03 == 0
    }

    /// チャンネルごとの分周周期（CPUサイクル）
    ///
    /// 通常: (AUDF+1)×基本周期 / 1.79MHz単独: AUDF+4 /
    /// 1.79MHz連結: AUDF16+7 / 連結: (AUDF16+1)×基本周期
    pub fn channel_periods(&self) -> [u64; 4] {
        let base = if self.audctl & 0x01 != 0 { BASE_15KHZ } else { BASE_64KHZ };
        let f = self.audf.map(|v| v as u64);
        let fast1 = self.audctl & 0x40 != 0;
        let fast3 = self.audctl & 0x20 != 0;

        let mut periods = [(f[0] + 1) * base, (f[1] + 1) * base, (f[2] + 1) * base, (f[3] + 1) * base];
        if fast1 {
            periods[0] = f[0] + 4;
        }
        if fast3 {
            periods[2] = f[2] + 4;
        }
        if self.audctl & 0x10 != 0 {
            let joined = f[1] << 8 | f[0];
            periods[1] = if fast1 { joined + 7 } else { (joined + 1) * base };
        }
        if self.audctl & 0x08 != 0 {
            let joined = f[3] << 8 | f[2];
            periods[3] = if fast3 { joined + 7 } else { (joined + 1) * base };
        }
        periods
    }

    /// 音源用のスナップショット
    pub fn audio_params(&self) -> AudioParams {
        AudioParams {
            audc: self.audc,
            audctl: self.audctl,
            periods: self.channel_periods(),
            held: self.held_in_reset(),
        }
    }

    /// 音源を `now` まで進める
    pub fn catch_up(&mut self, now: u64) {
        let params = self.audio_params();
        self.audio.catch_up(now, &params);
    }

    /// 有効なタイマーの期限を再設定
    fn restart_timers(&mut self, now: u64, events: &mut EventSchedule) {
        if self.held_in_reset() {
            events.clear(EventKind::Timer1);
            events.clear(EventKind::Timer2);
            events.clear(EventKind::Timer4);
            return;
        }
        let periods = self.channel_periods();
        for (kind, bit, period) in [
            (EventKind::Timer1, irq::TIMER1, periods[0]),
            (EventKind::Timer2, irq::TIMER2, periods[1]),
            (EventKind::Timer4, irq::TIMER4, periods[3]),
        ] {
            if self.irqen & bit != 0 {
                events.set(kind, now + period);
            } else {
                events.clear(kind);
            }
        }
    }

    /// IRQENで切り替わったタイマーだけ期限を設定／解除
    fn update_timer_enables(&mut self, changed: u8, now: u64, events: &mut EventSchedule) {
        let periods = self.channel_periods();
        for (kind, bit, period) in [
            (EventKind::Timer1, irq::TIMER1, periods[0]),
            (EventKind::Timer2, irq::TIMER2, periods[1]),
            (EventKind::Timer4, irq::TIMER4, periods[3]),
        ] {
            if changed & bit == 0 {
                continue;
            }
            if self.irqen & bit != 0 && !self.held_in_reset() {
                events.set(kind, now + period);
            } else {
                events.clear(kind);
            }
        }
    }

    /// レジスタ書き込み（SEROUTも受け付ける）
    pub fn write(&mut self, reg: u8, value: u8, now: u64, events: &mut EventSchedule) {
        // 音が変わる前に、ここまでの区間を合成しておく
        self.catch_up(now);

        match reg & 0x0F {
            r @ 0x00..=0x07 => {
                let ch = (r >> 1) as usize;
                if r & 1 == 0 {
                    self.audf[ch] = value;
                } else {
                    self.audc[ch] = value;
                }
            }
            AUDCTL => {
                self.audctl = value;
                let periods = self.channel_periods();
                self.audio.reload_counters(&periods);
                self.restart_timers(now, events);
            }
            STIMER => {
                let periods = self.channel_periods();
                self.audio.reload_counters(&periods);
                self.restart_timers(now, events);
            }
            SKRES => {
                // エラービット（5～7）をクリア
                self.skstat |= 0xE0;
            }
            POTGO => {
                self.pot_start = now;
            }
            SEROUT => self.serout(now, events),
            IRQEN => {
                const TIMERS: u8 = irq::TIMER1 | irq::TIMER2 | irq::TIMER4;
                let changed = (value ^ self.irqen) & TIMERS;
                self.irqen = value;
                // 無効化された要因は解除（bit3はラッチではなく状態）
                self.irqst |= !value & !irq::SERIAL_OUT_DONE;
                if changed != 0 {
                    self.update_timer_enables(changed, now, events);
                }
            }
            SKCTL => {
                let was_held = self.held_in_reset();
                self.skctl = value;
                if self.held_in_reset() {
                    self.audio.reset_polys();
                    self.restart_timers(now, events);
                } else if was_held {
                    self.restart_timers(now, events);
                }
            }
            _ => {}
        }
    }

    /// SEROUT: 送信開始。出力要求／完了の期限を設定する
    pub fn serout(&mut self, now: u64, events: &mut EventSchedule) {
        self.irqst |= irq::SERIAL_OUT_DONE;
        let needed = now + SIO_BYTE_CYCLES as u64;
        events.set(EventKind::SerialOutNeeded, needed);
        events.set(EventKind::SerialOutDone, needed + SEROUT_DONE_EXTRA);
    }

    /// レジスタ読み出し
    pub fn read(&mut self, reg: u8, now: u64) -> u8 {
        match reg & 0x0F {
            r @ 0x00..=0x07 => self.pot_counter(r as usize, now),
            ALLPOT => self.allpot(now),
            KBCODE => self.kbcode,
            RANDOM => {
                if self.held_in_reset() {
                    return 0xFF;
                }
                self.catch_up(now);
                self.audio.polys().random(self.audctl & 0x80 != 0)
            }
            SERIN => self.serin,
            IRQST => self.irqst,
            SKSTAT => self.skstat,
            _ => 0xFF,
        }
    }

    //--------------------------------------------------
    // タイマー
    //--------------------------------------------------

    /// タイマー期限の処理。次の期限を設定し、IRQを上げるべきならtrue
    pub fn timer_event(&mut self, kind: EventKind, deadline: u64, events: &mut EventSchedule) -> bool {
        let periods = self.channel_periods();
        let (bit, period) = match kind {
            EventKind::Timer1 => (irq::TIMER1, periods[0]),
            EventKind::Timer2 => (irq::TIMER2, periods[1]),
            EventKind::Timer4 => (irq::TIMER4, periods[3]),
            _ => return false,
        };
        if self.held_in_reset() || self.irqen & bit == 0 {
            events.clear(kind);
            return false;
        }
        events.set(kind, deadline + period);
        self.irqst &= !bit;
        true
    }

    //--------------------------------------------------
    // シリアル
    //--------------------------------------------------

    /// 出力バッファが空いた
    pub fn serial_out_needed(&mut self, events: &mut EventSchedule) -> bool {
        events.clear(EventKind::SerialOutNeeded);
        self.raise(irq::SERIAL_OUT_NEEDED)
    }

    /// シフトレジスタが空になった（IRQSTのbit3はIRQENと無関係に反映）
    pub fn serial_out_done(&mut self, events: &mut EventSchedule) -> bool {
        events.clear(EventKind::SerialOutDone);
        self.irqst &= !irq::SERIAL_OUT_DONE;
        self.irqen & irq::SERIAL_OUT_DONE != 0
    }

    /// 受信バイトをSERINへ
    pub fn deliver_serin(&mut self, byte: u8) -> bool {
        self.serin = byte;
        self.raise(irq::SERIAL_IN_READY)
    }

    /// 要因が許可されていればIRQSTのビットを落としてtrue
    fn raise(&mut self, bit: u8) -> bool {
        if self.irqen & bit != 0 {
            self.irqst &= !bit;
            true
        } else {
            false
        }
    }

    //--------------------------------------------------
    // キーボード
    //--------------------------------------------------

    /// キー押下（KBCODEはシフト/コントロール込み）
    pub fn key_down(&mut self, kbcode: u8) -> bool {
        self.kbcode = kbcode;
        self.skstat &= !0x04;
        self.raise(irq::KEY)
    }

    pub fn key_up(&mut self) {
        self.skstat |= 0x04;
    }

    /// シフトキー単独の状態（SKSTAT bit3、0 = 押下）
    pub fn set_shift(&mut self, pressed: bool) {
        if pressed {
            self.skstat &= !0x08;
        } else {
            self.skstat |= 0x08;
        }
    }

    /// BREAKキー
    pub fn break_key(&mut self) -> bool {
        self.raise(irq::BREAK)
    }

    //--------------------------------------------------
    // パドル
    //--------------------------------------------------

    pub fn set_paddle(&mut self, n: usize, value: u8) {
        if let Some(pot) = self.pot_values.get_mut(n) {
            *pot = value.min(POT_MAX);
        }
    }

    /// POTGOからの経過カウント（通常は1ライン1カウント、高速モードは1サイクル1カウント）
    fn pot_scan_count(&self, now: u64) -> u64 {
        let elapsed = now.saturating_sub(self.pot_start);
        let count = if self.skctl & 0x04 != 0 { elapsed } else { elapsed / BASE_15KHZ };
        count.min(POT_MAX as u64)
    }

    fn pot_counter(&self, n: usize, now: u64) -> u8 {
        let count = self.pot_scan_count(now);
        let target = self.pot_values[n] as u64;
        count.min(target) as u8
    }

    /// 走査中のチャンネルのビットが1
    fn allpot(&self, now: u64) -> u8 {
        let count = self.pot_scan_count(now);
        self.pot_values
            .iter()
            .enumerate()
            .filter(|&(_, &v)| count < v as u64)
            .fold(0u8, |acc, (i, _)| acc | (1 << i))
    }

    pub fn irqen(&self) -> u8 {
        self.irqen
    }

    pub fn irqst(&self) -> u8 {
        self.irqst
    }

    pub fn audctl(&self) -> u8 {
        self.audctl
    }
}
