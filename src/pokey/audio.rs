//! POKEY 4チャンネル音源
//!
//! CPUサイクル単位で分周カウンタと多項式カウンタ（LFSR）を進め、
//! 4チャンネルの音量を合成する。合成結果は固定小数点の位相アキュムレータで
//! ホストのサンプルレートへ間引き、リングバッファへ積む。

/// リングバッファサイズ（約0.2秒分）
pub const RING_BUFFER_SIZE: usize = 8192;

/// リサンプル比率の最大補正（±4%）
const MAX_RATE_NUDGE: f64 = 0.04;

/// 多項式カウンタの周期
const POLY4_PERIOD: u64 = 15;
const POLY5_PERIOD: u64 = 31;
const POLY9_PERIOD: u64 = 511;
const POLY17_PERIOD: u64 = 131_071;

/// 4/5/9/17ビットの多項式カウンタ
#[derive(Debug, Clone)]
pub struct Polynomials {
    poly4: u32,
    poly5: u32,
    poly9: u32,
    poly17: u32,
}

impl Default for Polynomials {
    fn default() -> Self {
        Self::new()
    }
}

impl Polynomials {
    pub fn new() -> Self {
        Polynomials {
            poly4: 0x0F,
            poly5: 0x1F,
            poly9: 0x1FF,
            poly17: 0x1FFFF,
        }
    }

    /// 1サイクル進める
    #[inline]
    pub fn step(&mut self) {
        self.poly4 = ((self.poly4 << 1) | (((self.poly4 >> 3) ^ (self.poly4 >> 2)) & 1)) & 0xF;
        self.poly5 = ((self.poly5 << 1) | (((self.poly5 >> 4) ^ (self.poly5 >> 2)) & 1)) & 0x1F;
        self.poly9 = ((self.poly9 << 1) | (((self.poly9 >> 8) ^ (self.poly9 >> 4)) & 1)) & 0x1FF;
        self.poly17 = ((self.poly17 << 1) | (((self.poly17 >> 16) ^ (self.poly17 >> 13)) & 1)) & 0x1FFFF;
    }

    /// nサイクル進める（各カウンタは周期で畳み込む）
    pub fn skip(&mut self, cycles: u64) {
        for _ in 0..cycles % POLY4_PERIOD {
            self.poly4 = ((self.poly4 << 1) | (((self.poly4 >> 3) ^ (self.poly4 >> 2)) & 1)) & 0xF;
        }
        for _ in 0..cycles % POLY5_PERIOD {
            self.poly5 = ((self.poly5 << 1) | (((self.poly5 >> 4) ^ (self.poly5 >> 2)) & 1)) & 0x1F;
        }
        for _ in 0..cycles % POLY9_PERIOD {
            self.poly9 = ((self.poly9 << 1) | (((self.poly9 >> 8) ^ (self.poly9 >> 4)) & 1)) & 0x1FF;
        }
        for _ in 0..cycles % POLY17_PERIOD {
            self.poly17 = ((self.poly17 << 1) | (((self.poly17 >> 16) ^ (self.poly17 >> 13)) & 1)) & 0x1FFFF;
        }
    }

    #[inline]
    fn bit4(&self) -> bool {
        self.poly4 & 1 != 0
    }

    #[inline]
    fn bit5(&self) -> bool {
        self.poly5 & 1 != 0
    }

    #[inline]
    fn bit9(&self) -> bool {
        self.poly9 & 1 != 0
    }

    #[inline]
    fn bit17(&self) -> bool {
        self.poly17 & 1 != 0
    }

    /// RANDOMレジスタの値
    pub fn random(&self, nine_bit: bool) -> u8 {
        if nine_bit {
            self.poly9 as u8
        } else {
            (self.poly17 >> 9) as u8
        }
    }
}

/// 1-pole IIR ローパスフィルタ
#[derive(Debug, Clone)]
struct LowPass {
    alpha: f32,
    z: f32,
}

impl LowPass {
    fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
        let dt = 1.0 / sample_rate;
        let alpha = dt / (rc + dt);
        Self { alpha, z: 0.0 }
    }

    fn process(&mut self, input: f32) -> f32 {
        self.z += self.alpha * (input - self.z);
        self.z
    }
}

/// サンプルのリングバッファ（満杯時は新しいサンプルを捨てる）
#[derive(Debug, Clone)]
pub struct SampleRing {
    buf: Vec<f32>,
    read: usize,
    len: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        SampleRing {
            buf: vec![0.0; capacity],
            read: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn push(&mut self, sample: f32) {
        if self.len == self.buf.len() {
            return;
        }
        let write = (self.read + self.len) % self.buf.len();
        self.buf[write] = sample;
        self.len += 1;
    }

    /// 取り出せるだけ `out` へ取り出し、個数を返す
    pub fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.len);
        for slot in out.iter_mut().take(n) {
            *slot = self.buf[self.read];
            self.read = (self.read + 1) % self.buf.len();
        }
        self.len -= n;
        n
    }

    fn clear(&mut self) {
        self.read = 0;
        self.len = 0;
    }
}

/// 音源から見たレジスタのスナップショット
#[derive(Debug, Clone, Copy)]
pub struct AudioParams {
    pub audc: [u8; 4],
    pub audctl: u8,
    /// チャンネルごとの分周周期（CPUサイクル）
    pub periods: [u64; 4],
    /// SKCTLでリセット保持中
    pub held: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    counter: u64,
    output: bool,
}

/// POKEY音源
#[derive(Debug, Clone)]
pub struct AudioEngine {
    enabled: bool,
    polys: Polynomials,
    channels: [Channel; 4],
    /// ハイパスフィルタのフリップフロップ（ch1 / ch2）
    hp_latch: [bool; 2],
    last_cycle: u64,
    /// 公称の1サンプルあたりサイクル（16.16固定小数点）
    nominal_step: u64,
    /// 補正後のステップ
    step: u64,
    phase: u64,
    acc_sum: u32,
    acc_count: u32,
    lpf: LowPass,
    ring: SampleRing,
}

impl AudioEngine {
    pub fn new(cpu_hz: u32, sample_rate: u32, enabled: bool) -> Self {
        let nominal_step = ((cpu_hz as u64) << 16) / sample_rate.max(1) as u64;
        AudioEngine {
            enabled,
            polys: Polynomials::new(),
            channels: [Channel::default(); 4],
            hp_latch: [false; 2],
            last_cycle: 0,
            nominal_step,
            step: nominal_step,
            phase: 0,
            acc_sum: 0,
            acc_count: 0,
            lpf: LowPass::new(8000.0, sample_rate.max(1) as f32),
            ring: SampleRing::new(RING_BUFFER_SIZE),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.ring.clear();
        }
    }

    /// 電源投入状態へ
    pub fn reset(&mut self, now: u64) {
        self.polys = Polynomials::new();
        self.channels = [Channel::default(); 4];
        self.hp_latch = [false; 2];
        self.last_cycle = now;
        self.step = self.nominal_step;
        self.phase = 0;
        self.acc_sum = 0;
        self.acc_count = 0;
        self.ring.clear();
    }

    pub fn polys(&self) -> &Polynomials {
        &self.polys
    }

    /// SKCTLリセット: LFSRを初期値へ
    pub fn reset_polys(&mut self) {
        self.polys = Polynomials::new();
    }

    /// 分周カウンタを再ロード（STIMER / AUDCTL書き込み）
    pub fn reload_counters(&mut self, periods: &[u64; 4]) {
        for (ch, &p) in self.channels.iter_mut().zip(periods.iter()) {
            ch.counter = p;
        }
    }

    /// 現在のリング充填数
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// サンプルを取り出す
    pub fn drain(&mut self, out: &mut [f32]) -> usize {
        self.ring.pop_into(out)
    }

    /// `now` まで音源を進める
    ///
    /// 無効時はLFSRだけを周期で畳み込んで進める（RANDOMの同期用）。
    pub fn catch_up(&mut self, now: u64, params: &AudioParams) {
        if now <= self.last_cycle {
            return;
        }
        let elapsed = now - self.last_cycle;
        self.last_cycle = now;

        if params.held {
            return;
        }
        if !self.enabled {
            self.polys.skip(elapsed);
            return;
        }

        let join12 = params.audctl & 0x10 != 0;
        let join34 = params.audctl & 0x08 != 0;
        let nine_bit = params.audctl & 0x80 != 0;

        for _ in 0..elapsed {
            self.polys.step();

            for i in 0..4 {
                // 16ビット連結時の下位チャンネルは単独では鳴らない
                if (i == 0 && join12) || (i == 2 && join34) {
                    continue;
                }
                let ch = &mut self.channels[i];
                if ch.counter > 1 {
                    ch.counter -= 1;
                    continue;
                }
                ch.counter = params.periods[i].max(1);
                self.clock_channel(i, params.audc[i], nine_bit);

                // ch3はch1を、ch4はch2をハイパス
                if i == 2 && params.audctl & 0x04 != 0 {
                    self.hp_latch[0] = self.channels[0].output;
                }
                if i == 3 && params.audctl & 0x02 != 0 {
                    self.hp_latch[1] = self.channels[1].output;
                }
            }

            let level = self.mix(params);
            self.acc_sum += level;
            self.acc_count += 1;
            self.phase += 1 << 16;
            if self.phase >= self.step {
                self.phase -= self.step;
                self.emit_sample();
            }
        }
    }

    /// 分周器のアンダーフローで出力を更新
    fn clock_channel(&mut self, i: usize, audc: u8, nine_bit: bool) {
        // bit7=0 の場合は5ビット多項式でパルスを間引く
        if audc & 0x80 == 0 && !self.polys.bit5() {
            return;
        }
        let ch = &mut self.channels[i];
        if audc & 0x20 != 0 {
            ch.output = !ch.output;
        } else if audc & 0x40 != 0 {
            ch.output = self.polys.bit4();
        } else if nine_bit {
            ch.output = self.polys.bit9();
        } else {
            ch.output = self.polys.bit17();
        }
    }

    /// 4チャンネルの合計音量（0～60）
    fn mix(&self, params: &AudioParams) -> u32 {
        let mut level = 0;
        for i in 0..4 {
            let audc = params.audc[i];
            let volume = (audc & 0x0F) as u32;
            if volume == 0 {
                continue;
            }
            let mut out = self.channels[i].output;
            if i == 0 && params.audctl & 0x04 != 0 {
                out ^= self.hp_latch[0];
            }
            if i == 1 && params.audctl & 0x02 != 0 {
                out ^= self.hp_latch[1];
            }
            // 音量のみモード
            if audc & 0x10 != 0 || out {
                level += volume;
            }
        }
        level
    }

    /// 平均をとってリングへ積み、充填率でステップを微調整
    fn emit_sample(&mut self) {
        let avg = if self.acc_count > 0 {
            self.acc_sum as f32 / self.acc_count as f32
        } else {
            0.0
        };
        self.acc_sum = 0;
        self.acc_count = 0;

        let sample = self.lpf.process(avg / 60.0) * 0.8;
        self.ring.push(sample);

        // 半分を目標に、充填誤差に比例して±4%まで補正
        let target = self.ring.capacity() as f64 / 2.0;
        let error = ((self.ring.len() as f64 - target) / target).clamp(-1.0, 1.0);
        self.step = (self.nominal_step as f64 * (1.0 + MAX_RATE_NUDGE * error)) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(audc0: u8, period0: u64) -> AudioParams {
        AudioParams {
            audc: [audc0, 0, 0, 0],
            audctl: 0,
            periods: [period0, 28, 28, 28],
            held: false,
        }
    }

    #[test]
    fn test_poly_periods() {
        let mut polys = Polynomials::new();
        let start = polys.poly17;
        for _ in 0..POLY17_PERIOD {
            polys.step();
        }
        assert_eq!(polys.poly17, start);

        let mut a = Polynomials::new();
        let mut b = Polynomials::new();
        for _ in 0..1000 {
            a.step();
        }
        b.skip(1000);
        assert_eq!(a.poly4, b.poly4);
        assert_eq!(a.poly5, b.poly5);
        assert_eq!(a.poly9, b.poly9);
        assert_eq!(a.poly17, b.poly17);
    }

    #[test]
    fn test_pure_tone_toggles() {
        let mut engine = AudioEngine::new(1_789_773, 44100, true);
        let p = params(0xA8, 100);
        engine.reload_counters(&p.periods);
        engine.catch_up(100, &p);
        assert!(engine.channels[0].output);
        engine.catch_up(200, &p);
        assert!(!engine.channels[0].output);
    }

    #[test]
    fn test_sample_rate_conversion() {
        let mut engine = AudioEngine::new(1_789_773, 44100, true);
        let p = params(0x18, 28);
        // 1秒の1/10
        engine.catch_up(178_977, &p);
        let produced = engine.buffered();
        assert!((4300..=4700).contains(&produced), "produced {}", produced);

        let mut out = vec![0.0; 100];
        assert_eq!(engine.drain(&mut out), 100);
        assert_eq!(engine.buffered(), produced - 100);
    }

    #[test]
    fn test_disabled_engine_only_steps_polys() {
        let mut engine = AudioEngine::new(1_789_773, 44100, false);
        let p = params(0xAF, 28);
        engine.catch_up(10_000, &p);
        assert_eq!(engine.buffered(), 0);
        let mut reference = Polynomials::new();
        reference.skip(10_000);
        assert_eq!(engine.polys().random(false), reference.random(false));
    }

    #[test]
    fn test_ring_drops_when_full() {
        let mut ring = SampleRing::new(4);
        for i in 0..6 {
            ring.push(i as f32);
        }
        assert_eq!(ring.len(), 4);
        let mut out = [0.0; 8];
        assert_eq!(ring.pop_into(&mut out), 4);
        assert_eq!(&out[..4], &[0.0, 1.0, 2.0, 3.0]);
        assert!(ring.is_empty());
    }
}
