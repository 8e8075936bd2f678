//! GTIA: プレイヤー/ミサイル、優先順位、衝突検出、カラーレジスタ
//!
//! ANTICが描いたプレイフィールド（色 + 優先ビット）の上に、
//! 4つのプレイヤーと4つのミサイルを1ラインずつ合成する。

use crate::antic::{LineBuffer, LINE_WIDTH, PRI_PF0, PRI_PF1, PRI_PF2, PRI_PF3};
use crate::memory::Memory;

// 書き込みレジスタ ($D000-$D01F)
pub const HPOSP0: u8 = 0x00;
pub const HPOSM0: u8 = 0x04;
pub const SIZEP0: u8 = 0x08;
pub const SIZEM: u8 = 0x0C;
pub const GRAFP0: u8 = 0x0D;
pub const GRAFM: u8 = 0x11;
pub const COLPM0: u8 = 0x12;
pub const COLPF0: u8 = 0x16;
pub const COLBK: u8 = 0x1A;
pub const PRIOR: u8 = 0x1B;
pub const VDELAY: u8 = 0x1C;
pub const GRACTL: u8 = 0x1D;
pub const HITCLR: u8 = 0x1E;
pub const CONSOL: u8 = 0x1F;

// 読み出しレジスタ
pub const M0PF: u8 = 0x00;
pub const P0PF: u8 = 0x04;
pub const M0PL: u8 = 0x08;
pub const P0PL: u8 = 0x0C;
pub const TRIG0: u8 = 0x10;
pub const PAL: u8 = 0x14;

/// 1ラインのカラークロック数
pub const COLOR_CLOCKS: usize = LINE_WIDTH / 2;

/// コンソールキーのビット
pub mod console {
    pub const START: u8 = 0x01;
    pub const SELECT: u8 = 0x02;
    pub const OPTION: u8 = 0x04;
}

/// GTIAの状態
#[derive(Debug, Clone)]
pub struct Gtia {
    hposp: [u8; 4],
    hposm: [u8; 4],
    sizep: [u8; 4],
    sizem: u8,
    grafp: [u8; 4],
    grafm: u8,
    colpm: [u8; 4],
    colpf: [u8; 4],
    colbk: u8,
    prior: u8,
    vdelay: u8,
    gractl: u8,
    consol_out: u8,
    /// 押されているコンソールキー（1 = 押下）
    console_keys: u8,
    /// トリガー入力（true = 押下）
    triggers: [bool; 4],
    /// GRACTL bit2によるトリガーラッチ
    trigger_latch: [bool; 4],
    /// カートリッジ（BASIC）の有無。TRIG3に出る
    pub cart_present: bool,
    pal: bool,
    // 衝突レジスタ
    m_pf: [u8; 4],
    p_pf: [u8; 4],
    m_pl: [u8; 4],
    p_pl: [u8; 4],
}

impl Gtia {
    pub fn new(pal: bool) -> Self {
        Gtia {
            hposp: [0; 4],
            hposm: [0; 4],
            sizep: [0; 4],
            sizem: 0,
            grafp: [0; 4],
            grafm: 0,
            colpm: [0; 4],
            colpf: [0; 4],
            colbk: 0,
            prior: 0,
            vdelay: 0,
            gractl: 0,
            consol_out: 0,
            console_keys: 0,
            triggers: [false; 4],
            trigger_latch: [false; 4],
            cart_present: false,
            pal,
            m_pf: [0; 4],
            p_pf: [0; 4],
            m_pl: [0; 4],
            p_pl: [0; 4],
        }
    }

    /// 電源投入状態へ（入力状態は保持）
    pub fn reset(&mut self) {
        let triggers = self.triggers;
        let console_keys = self.console_keys;
        let cart_present = self.cart_present;
        *self = Gtia::new(self.pal);
        self.triggers = triggers;
        self.console_keys = console_keys;
        self.cart_present = cart_present;
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        let reg = reg & 0x1F;
        match reg {
            0x00..=0x03 => self.hposp[reg as usize] = value,
            0x04..=0x07 => self.hposm[(reg - HPOSM0) as usize] = value,
            0x08..=0x0B => self.sizep[(reg - SIZEP0) as usize] = value & 0x03,
            SIZEM => self.sizem = value,
            0x0D..=0x10 => self.grafp[(reg - GRAFP0) as usize] = value,
            GRAFM => self.grafm = value,
            0x12..=0x15 => self.colpm[(reg - COLPM0) as usize] = value & 0xFE,
            0x16..=0x19 => self.colpf[(reg - COLPF0) as usize] = value & 0xFE,
            COLBK => self.colbk = value & 0xFE,
            PRIOR => self.prior = value,
            VDELAY => self.vdelay = value,
            GRACTL => {
                self.gractl = value;
                if value & 0x04 == 0 {
                    self.trigger_latch = [false; 4];
                }
            }
            HITCLR => {
                self.m_pf = [0; 4];
                self.p_pf = [0; 4];
                self.m_pl = [0; 4];
                self.p_pl = [0; 4];
            }
            _ => self.consol_out = value,
        }
    }

    pub fn read(&self, reg: u8) -> u8 {
        let reg = reg & 0x1F;
        match reg {
            0x00..=0x03 => self.m_pf[reg as usize],
            0x04..=0x07 => self.p_pf[(reg - P0PF) as usize],
            0x08..=0x0B => self.m_pl[(reg - M0PL) as usize],
            0x0C..=0x0F => self.p_pl[(reg - P0PL) as usize],
            0x10..=0x13 => {
                let n = (reg - TRIG0) as usize;
                if n == 3 {
                    return self.cart_present as u8;
                }
                let pressed = self.triggers[n] || self.trigger_latch[n];
                if pressed {
                    0
                } else {
                    1
                }
            }
            PAL => {
                if self.pal {
                    0x01
                } else {
                    0x0F
                }
            }
            CONSOL => {
                // 出力ビットを1にしたキーは押下扱い
                let low = !(self.console_keys | self.consol_out) & 0x07;
                0x08 | low
            }
            _ => 0x0F,
        }
    }

    //--------------------------------------------------
    // 入力
    //--------------------------------------------------

    pub fn set_trigger(&mut self, n: usize, pressed: bool) {
        if n >= 3 {
            return;
        }
        self.triggers[n] = pressed;
        if pressed && self.gractl & 0x04 != 0 {
            self.trigger_latch[n] = true;
        }
    }

    /// コンソールキー（`console::START` などの組み合わせ）
    pub fn set_console(&mut self, keys: u8) {
        self.console_keys = keys & 0x07;
    }

    pub fn set_pal(&mut self, pal: bool) {
        self.pal = pal;
    }

    //--------------------------------------------------
    // ANTICから参照するカラーレジスタ
    //--------------------------------------------------

    #[inline]
    pub fn colpf(&self, n: usize) -> u8 {
        self.colpf[n & 3]
    }

    #[inline]
    pub fn colpm(&self, n: usize) -> u8 {
        self.colpm[n & 3]
    }

    #[inline]
    pub fn colbk(&self) -> u8 {
        self.colbk
    }

    #[inline]
    pub fn prior(&self) -> u8 {
        self.prior
    }

    pub fn grafp(&self, n: usize) -> u8 {
        self.grafp[n & 3]
    }

    pub fn grafm(&self) -> u8 {
        self.grafm
    }

    //--------------------------------------------------
    // プレイヤー/ミサイルDMA
    //--------------------------------------------------

    /// DMACTLとPMBASEに従ってグラフィックスレジスタへ取り込む
    ///
    /// DMACTL bit2 = ミサイル、bit3 = プレイヤー（ミサイルも含む）、bit4 = 1ライン解像度。
    /// 2ライン解像度ではVDELAYのビットが立った対象は偶数ラインで更新しない。
    /// 戻り値は取り込んだバイト数（DMAサイクル）。
    pub fn pm_dma(&mut self, memory: &Memory, scanline: u32, dmactl: u8, pmbase: u8) -> u32 {
        let players = dmactl & 0x08 != 0;
        let missiles = dmactl & 0x0C != 0;
        if !missiles {
            return 0;
        }
        let single = dmactl & 0x10 != 0;
        let (base, line, missile_off, player_off, player_stride) = if single {
            ((pmbase as u16 & 0xF8) << 8, scanline as u16, 0x300u16, 0x400u16, 0x100u16)
        } else {
            ((pmbase as u16 & 0xFC) << 8, scanline as u16 / 2, 0x180, 0x200, 0x80)
        };
        let delayed = |bit: u8| !single && scanline & 1 == 0 && bit != 0;
        let mut cycles = 0;

        if self.gractl & 0x01 != 0 {
            let data = memory.peek(base.wrapping_add(missile_off + line));
            for m in 0..4 {
                if delayed(self.vdelay & (1 << m)) {
                    continue;
                }
                let mask = 0x03 << (m * 2);
                self.grafm = (self.grafm & !mask) | (data & mask);
            }
        }
        cycles += 1;

        if players {
            for p in 0..4 {
                if self.gractl & 0x02 != 0 && !delayed(self.vdelay & (0x10 << p)) {
                    let addr = base.wrapping_add(player_off + player_stride * p as u16 + line);
                    self.grafp[p] = memory.peek(addr);
                }
            }
            cycles += 4;
        }
        cycles
    }

    //--------------------------------------------------
    // 合成
    //--------------------------------------------------

    /// プレイヤーとミサイルをカラークロック単位のマスクに展開
    fn object_masks(&self) -> ([u8; COLOR_CLOCKS], [u8; COLOR_CLOCKS]) {
        let mut players = [0u8; COLOR_CLOCKS];
        let mut missiles = [0u8; COLOR_CLOCKS];

        for p in 0..4 {
            let graf = self.grafp[p];
            if graf == 0 {
                continue;
            }
            let width = object_width(self.sizep[p]);
            let start = self.hposp[p] as usize;
            for bit in 0..8 {
                if graf & (0x80 >> bit) == 0 {
                    continue;
                }
                for w in 0..width {
                    if let Some(cell) = players.get_mut(start + bit * width + w) {
                        *cell |= 1 << p;
                    }
                }
            }
        }

        for m in 0..4 {
            let bits = (self.grafm >> (m * 2)) & 0x03;
            if bits == 0 {
                continue;
            }
            let width = object_width((self.sizem >> (m * 2)) & 0x03);
            let start = self.hposm[m] as usize;
            for bit in 0..2 {
                if bits & (0x02 >> bit) == 0 {
                    continue;
                }
                for w in 0..width {
                    if let Some(cell) = missiles.get_mut(start + bit * width + w) {
                        *cell |= 1 << m;
                    }
                }
            }
        }
        (players, missiles)
    }

    /// ラインバッファへプレイヤー/ミサイルを合成し、衝突を記録
    pub fn draw_line(&mut self, line: &mut LineBuffer) {
        if self.grafm == 0 && self.grafp.iter().all(|&g| g == 0) {
            return;
        }
        let (players, missiles) = self.object_masks();
        let fifth = self.prior & 0x10 != 0;

        for x in 0..LINE_WIDTH {
            let cc = x / 2;
            let p = players[cc];
            let m = missiles[cc];
            if p == 0 && m == 0 {
                continue;
            }
            let pf = line.priority[x];

            // 衝突（奇数ピクセルは同じカラークロックなので偶数のみ）
            if x & 1 == 0 {
                for i in 0..4 {
                    if m & (1 << i) != 0 {
                        self.m_pf[i] |= pf;
                        self.m_pl[i] |= p;
                    }
                    if p & (1 << i) != 0 {
                        self.p_pf[i] |= pf;
                        self.p_pl[i] |= p & !(1 << i);
                    }
                }
            }

            let fifth_missile = fifth && m != 0;
            let (objects, pf) = if fifth {
                (p, if fifth_missile { pf | PRI_PF3 } else { pf })
            } else {
                (p | m, pf)
            };
            if let Some(color) = self.resolve(objects, pf, fifth_missile) {
                line.pixels[x] = color;
            }
        }
    }

    /// 優先順位回路。プレイヤーが選ばれず元のプレイフィールドのままならNone
    fn resolve(&self, objects: u8, pf: u8, fifth_missile: bool) -> Option<u8> {
        let pri = self.prior;
        let pri0 = pri & 0x01 != 0;
        let pri1 = pri & 0x02 != 0;
        let pri2 = pri & 0x04 != 0;
        let pri3 = pri & 0x08 != 0;
        let multi = pri & 0x20 != 0;

        let p0 = objects & 0x01 != 0;
        let p1 = objects & 0x02 != 0;
        let p2 = objects & 0x04 != 0;
        let p3 = objects & 0x08 != 0;
        let pf0 = pf & PRI_PF0 != 0;
        let pf1 = pf & PRI_PF1 != 0;
        let pf2 = pf & PRI_PF2 != 0;
        let pf3 = pf & PRI_PF3 != 0;

        let p01 = p0 || p1;
        let p23 = p2 || p3;
        let pf01 = pf0 || pf1;
        let pf23 = pf2 || pf3;
        let pri01 = pri0 || pri1;
        let pri12 = pri1 || pri2;
        let pri23 = pri2 || pri3;
        let pri03 = pri0 || pri3;

        let sp0 = p0 && !(pf01 && pri23) && !(pri2 && pf23);
        let sp1 = p1 && !(pf01 && pri23) && !(pri2 && pf23) && (!p0 || multi);
        let sp2 = p2 && !p01 && !(pf23 && pri12) && !(pf01 && !pri0);
        let sp3 = p3 && !p01 && !(pf23 && pri12) && !(pf01 && !pri0) && (!p2 || multi);
        let sf3 = pf3 && !(p23 && pri03) && !(p01 && !pri2);
        let sf0 = pf0 && !(p23 && pri0) && !(p01 && pri01) && !sf3;
        let sf1 = pf1 && !(p23 && pri0) && !(p01 && pri01) && !sf3;
        let sf2 = pf2 && !(p23 && pri03) && !(p01 && !pri2) && !sf3;
        let sb = !p01 && !p23 && !pf01 && !pf23;

        if !(sp0 || sp1 || sp2 || sp3) {
            // ミサイルが第5プレイヤーとしてPF3で表示される場合のみ色が変わる
            if fifth_missile && sf3 {
                return Some(self.colpf[3]);
            }
            return None;
        }

        let mut color = 0u8;
        for (selected, value) in [
            (sp0, self.colpm[0]),
            (sp1, self.colpm[1]),
            (sp2, self.colpm[2]),
            (sp3, self.colpm[3]),
            (sf0, self.colpf[0]),
            (sf1, self.colpf[1]),
            (sf2, self.colpf[2]),
            (sf3, self.colpf[3]),
            (sb, self.colbk),
        ] {
            if selected {
                color |= value;
            }
        }
        Some(color)
    }
}

/// SIZEPn / SIZEMのフィールドから1ビットあたりのカラークロック数
fn object_width(size: u8) -> usize {
    match size & 0x03 {
        1 => 2,
        3 => 4,
        _ => 1,
    }
}

/// 256色パレット（0x00RRGGBB）
///
/// 上位4ビットが色相、下位4ビットが輝度。色相0は無彩色。
pub fn palette() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let hue = (i >> 4) as f64;
        let lum = (i & 0x0F) as f64;
        let y = 0.06 + lum / 15.0 * 0.88;
        let (ci, cq) = if i >> 4 == 0 {
            (0.0, 0.0)
        } else {
            let angle = (303.0 + (hue - 1.0) * 25.7).to_radians();
            (0.22 * angle.cos(), 0.22 * angle.sin())
        };
        let r = y + 0.956 * ci + 0.621 * cq;
        let g = y - 0.272 * ci - 0.647 * cq;
        let b = y - 1.106 * ci + 1.703 * cq;
        let to_byte = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        *entry = (to_byte(r) << 16) | (to_byte(g) << 8) | to_byte(b);
    }
    table
}
