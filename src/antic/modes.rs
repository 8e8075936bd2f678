//! モード2〜Fのラスタライザ
//!
//! 文字モード（2-7）は文字セットを経由し、マップモード（8-F）は画面データを
//! そのままピクセルに展開する。PRIORのbit6-7が立っているとモードFは
//! GTIAの16色/16輝度モードになる。

use super::{width_range, Antic, LineBuffer, LINE_WIDTH, PRI_PF0, PRI_PF1, PRI_PF2, PRI_PF3};
use crate::gtia::Gtia;
use crate::memory::Memory;

/// 1バイトが占めるカラークロック数
fn clocks_per_byte(mode: u8) -> usize {
    match mode {
        6 | 7 | 0x0A | 0x0B | 0x0C => 8,
        8 | 9 => 16,
        _ => 4,
    }
}

/// モードラインで取り込む画面データのバイト数
pub(super) fn bytes_per_line(mode: u8, width: u8) -> usize {
    let (left, right) = width_range(width);
    (right - left) / 2 / clocks_per_byte(mode)
}

/// 色インデックス（0 = BAK, 1-4 = PF0-PF3）から色と優先ビット
fn playfield(gtia: &Gtia, index: u8) -> (u8, u8) {
    match index {
        0 => (gtia.colbk(), 0),
        1 => (gtia.colpf(0), PRI_PF0),
        2 => (gtia.colpf(1), PRI_PF1),
        3 => (gtia.colpf(2), PRI_PF2),
        _ => (gtia.colpf(3), PRI_PF3),
    }
}

/// ハイレゾの明るいピクセル（PF2の色相 + PF1の輝度）
fn hires_foreground(gtia: &Gtia) -> u8 {
    (gtia.colpf(2) & 0xF0) | (gtia.colpf(1) & 0x0E)
}

/// 表示窓でクリップしながら左から順に書く
struct Painter<'a> {
    buf: &'a mut LineBuffer,
    x: usize,
    left: usize,
    right: usize,
}

impl Painter<'_> {
    #[inline]
    fn hires(&mut self, color: u8, priority: u8) {
        if self.x >= self.left && self.x < self.right && self.x < LINE_WIDTH {
            self.buf.pixels[self.x] = color;
            self.buf.priority[self.x] = priority;
        }
        self.x += 1;
    }

    fn clocks(&mut self, count: usize, (color, priority): (u8, u8)) {
        for _ in 0..count * 2 {
            self.hires(color, priority);
        }
    }
}

impl Antic {
    /// 現在のモードラインの1スキャンラインを描く。文字フェッチのDMAバイト数を返す
    pub(super) fn render_mode_line(&self, memory: &Memory, gtia: &Gtia, row: u8, buf: &mut LineBuffer) -> u32 {
        let (left, right) = width_range(self.display_width());
        let start = if self.hscroll_line {
            width_range(self.fetch_width()).0 + self.hscrol as usize * 2
        } else {
            left
        };
        let mut painter = Painter { buf, x: start, left, right };

        match self.mode {
            2 => self.text_hires(memory, gtia, row, &mut painter),
            3 => self.text_descender(memory, gtia, row, &mut painter),
            4 => self.text_multicolor(memory, gtia, row, &mut painter),
            5 => self.text_multicolor(memory, gtia, row / 2, &mut painter),
            6 => self.text_wide(memory, gtia, row, &mut painter),
            7 => self.text_wide(memory, gtia, row / 2, &mut painter),
            8 => self.map_four_color(gtia, 4, &mut painter),
            9 => self.map_two_color(gtia, 2, &mut painter),
            0x0A => self.map_four_color(gtia, 2, &mut painter),
            0x0B | 0x0C => self.map_two_color(gtia, 1, &mut painter),
            0x0D | 0x0E => self.map_four_color(gtia, 1, &mut painter),
            _ => {
                if gtia.prior() & 0xC0 != 0 {
                    self.map_gtia(gtia, &mut painter)
                } else {
                    self.map_hires(gtia, &mut painter)
                }
            }
        }

        match self.mode {
            2..=7 => self.line_data.len() as u32,
            _ => 0,
        }
    }

    /// 文字セットの1行（CHACTL bit2で上下反転）
    fn char_row(&self, memory: &Memory, base: u16, code: u8, row: u8) -> u8 {
        let row = if self.chactl & 0x04 != 0 { 7 - (row & 7) } else { row & 7 };
        memory.peek(base.wrapping_add(code as u16 * 8 + row as u16))
    }

    /// bit7の文字に対するCHACTLのブランク/反転
    fn apply_chactl(&self, code: u8, data: u8) -> u8 {
        if code & 0x80 == 0 {
            return data;
        }
        let mut data = data;
        if self.chactl & 0x01 != 0 {
            data = 0;
        }
        if self.chactl & 0x02 != 0 {
            data ^= 0xFF;
        }
        data
    }

    fn hires_bits(data: u8, fg: u8, bg: u8, painter: &mut Painter<'_>) {
        for bit in (0..8).rev() {
            let color = if (data >> bit) & 1 != 0 { fg } else { bg };
            painter.hires(color, PRI_PF2);
        }
    }

    /// モード2: 40桁テキスト
    fn text_hires(&self, memory: &Memory, gtia: &Gtia, row: u8, painter: &mut Painter<'_>) {
        let base = ((self.chbase & 0xFC) as u16) << 8;
        let fg = hires_foreground(gtia);
        let bg = gtia.colpf(2);
        for &code in &self.line_data {
            let data = self.char_row(memory, base, code & 0x7F, row);
            Self::hires_bits(self.apply_chactl(code, data), fg, bg, painter);
        }
    }

    /// モード3: 10ライン文字。$60-$7Fは下2行に先頭2行が出る
    fn text_descender(&self, memory: &Memory, gtia: &Gtia, row: u8, painter: &mut Painter<'_>) {
        let base = ((self.chbase & 0xFC) as u16) << 8;
        let fg = hires_foreground(gtia);
        let bg = gtia.colpf(2);
        for &code in &self.line_data {
            let descender = code & 0x7F >= 0x60;
            let data_row = match (descender, row) {
                (false, 0..=7) | (true, 2..=7) => Some(row),
                (true, 8 | 9) => Some(row - 8),
                _ => None,
            };
            let data = data_row.map_or(0, |r| self.char_row(memory, base, code & 0x7F, r));
            Self::hires_bits(self.apply_chactl(code, data), fg, bg, painter);
        }
    }

    /// モード4/5: 4色文字（bit7の文字は11がPF3）
    fn text_multicolor(&self, memory: &Memory, gtia: &Gtia, row: u8, painter: &mut Painter<'_>) {
        let base = ((self.chbase & 0xFC) as u16) << 8;
        for &code in &self.line_data {
            let data = self.char_row(memory, base, code & 0x7F, row);
            for shift in [6, 4, 2, 0] {
                let value = (data >> shift) & 0x03;
                let index = if value == 3 && code & 0x80 != 0 { 4 } else { value };
                painter.clocks(1, playfield(gtia, index));
            }
        }
    }

    /// モード6/7: 20桁、文字の上位2ビットで色を選ぶ
    fn text_wide(&self, memory: &Memory, gtia: &Gtia, row: u8, painter: &mut Painter<'_>) {
        let base = ((self.chbase & 0xFE) as u16) << 8;
        let background = playfield(gtia, 0);
        for &code in &self.line_data {
            let data = self.char_row(memory, base, code & 0x3F, row);
            let foreground = playfield(gtia, (code >> 6) + 1);
            for bit in (0..8).rev() {
                let color = if (data >> bit) & 1 != 0 { foreground } else { background };
                painter.clocks(1, color);
            }
        }
    }

    /// 2ビット/ピクセル（00 = BAK, 01 = PF0, 10 = PF1, 11 = PF2）
    fn map_four_color(&self, gtia: &Gtia, clocks: usize, painter: &mut Painter<'_>) {
        for &byte in &self.line_data {
            for shift in [6, 4, 2, 0] {
                painter.clocks(clocks, playfield(gtia, (byte >> shift) & 0x03));
            }
        }
    }

    /// 1ビット/ピクセル（1 = PF0）
    fn map_two_color(&self, gtia: &Gtia, clocks: usize, painter: &mut Painter<'_>) {
        for &byte in &self.line_data {
            for bit in (0..8).rev() {
                painter.clocks(clocks, playfield(gtia, (byte >> bit) & 0x01));
            }
        }
    }

    /// モードF: 320ドット
    fn map_hires(&self, gtia: &Gtia, painter: &mut Painter<'_>) {
        let fg = hires_foreground(gtia);
        let bg = gtia.colpf(2);
        for &byte in &self.line_data {
            Self::hires_bits(byte, fg, bg, painter);
        }
    }

    /// GTIAモード9/10/11: 4ビット/ピクセル、2カラークロック幅
    fn map_gtia(&self, gtia: &Gtia, painter: &mut Painter<'_>) {
        let submode = gtia.prior() >> 6;
        for &byte in &self.line_data {
            for nibble in [byte >> 4, byte & 0x0F] {
                let pixel = match submode {
                    // 9: COLBKの色相で16輝度
                    1 => ((gtia.colbk() & 0xF0) | nibble, 0),
                    // 10: 9色のレジスタ選択
                    2 => match nibble {
                        0..=3 => (gtia.colpm(nibble as usize), 0),
                        4..=7 => playfield(gtia, nibble - 3),
                        8..=11 => (gtia.colbk(), 0),
                        _ => playfield(gtia, nibble - 11),
                    },
                    // 11: 16色相、輝度はCOLBK
                    _ => ((nibble << 4) | (gtia.colbk() & 0x0F), 0),
                };
                painter.clocks(2, pixel);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{CHACTL, CHBASE, DMACTL, HSCROL, NTSC_LINES};
    use super::*;
    use crate::events::EventSchedule;
    use crate::gtia::{COLBK, COLPF0, PRIOR};
    use crate::memory::OS_ROM_SIZE;

    fn setup(mode: u8, data: &[u8]) -> (Antic, Gtia, Memory) {
        let mut antic = Antic::new(NTSC_LINES);
        let mut events = EventSchedule::new();
        antic.write(DMACTL, 0x22, &mut events);
        antic.mode = mode;
        antic.line_data = data.to_vec();
        let memory = Memory::new(&vec![0u8; OS_ROM_SIZE], None).unwrap();
        let mut gtia = Gtia::new(false);
        gtia.write(COLPF0, 0x10);
        gtia.write(COLPF0 + 1, 0x2E);
        gtia.write(COLPF0 + 2, 0x30);
        gtia.write(COLPF0 + 3, 0x40);
        gtia.write(COLBK, 0x02);
        (antic, gtia, memory)
    }

    fn render(antic: &Antic, gtia: &Gtia, memory: &Memory, row: u8) -> LineBuffer {
        let mut buf = LineBuffer::new();
        buf.fill(gtia.colbk());
        antic.render_mode_line(memory, gtia, row, &mut buf);
        buf
    }

    #[test]
    fn test_bytes_per_line() {
        assert_eq!(bytes_per_line(2, 1), 32);
        assert_eq!(bytes_per_line(2, 2), 40);
        assert_eq!(bytes_per_line(2, 3), 48);
        assert_eq!(bytes_per_line(7, 2), 20);
        assert_eq!(bytes_per_line(8, 2), 10);
        assert_eq!(bytes_per_line(0x0E, 2), 40);
    }

    #[test]
    fn test_mode2_inverse_and_blank() {
        let (mut antic, gtia, mut memory) = setup(2, &[0x81]);
        let mut events = EventSchedule::new();
        antic.write(CHBASE, 0x20, &mut events);
        memory.poke(0x2008, 0xF0);

        antic.write(CHACTL, 0x02, &mut events);
        let buf = render(&antic, &gtia, &memory, 0);
        // 反転: 左4ドットが背景、右4ドットが前景
        assert_eq!(buf.pixels[96], 0x30);
        assert_eq!(buf.pixels[100], 0x3E);

        antic.write(CHACTL, 0x03, &mut events);
        let buf = render(&antic, &gtia, &memory, 0);
        assert!(buf.pixels[96..104].iter().all(|&c| c == 0x3E));
    }

    #[test]
    fn test_mode3_descender_rows() {
        let (mut antic, gtia, mut memory) = setup(3, &[0x61]);
        let mut events = EventSchedule::new();
        antic.write(CHBASE, 0x20, &mut events);
        memory.poke(0x2000 + 0x61 * 8, 0xFF);

        assert_eq!(render(&antic, &gtia, &memory, 0).pixels[96], 0x30);
        assert_eq!(render(&antic, &gtia, &memory, 8).pixels[96], 0x3E);
    }

    #[test]
    fn test_mode4_bit7_selects_pf3() {
        let (mut antic, gtia, mut memory) = setup(4, &[0x01, 0x81]);
        let mut events = EventSchedule::new();
        antic.write(CHBASE, 0x20, &mut events);
        memory.poke(0x2008, 0xC0);
        let buf = render(&antic, &gtia, &memory, 0);
        assert_eq!(buf.pixels[96], 0x30);
        assert_eq!(buf.priority[96], PRI_PF2);
        assert_eq!(buf.pixels[104], 0x40);
        assert_eq!(buf.priority[104], PRI_PF3);
    }

    #[test]
    fn test_mode7_color_from_code() {
        let (mut antic, gtia, mut memory) = setup(7, &[0xC1]);
        let mut events = EventSchedule::new();
        antic.write(CHBASE, 0x20, &mut events);
        memory.poke(0x2008, 0x80);
        let buf = render(&antic, &gtia, &memory, 1);
        assert_eq!(buf.pixels[96], 0x40);
        assert_eq!(buf.pixels[98], 0x02);
    }

    #[test]
    fn test_map_modes() {
        let (antic, gtia, memory) = setup(8, &[0x1B]);
        let buf = render(&antic, &gtia, &memory, 0);
        // 00 01 10 11 が各4カラークロック
        assert_eq!(buf.pixels[96], 0x02);
        assert_eq!(buf.pixels[104], 0x10);
        assert_eq!(buf.pixels[112], 0x2E);
        assert_eq!(buf.pixels[120], 0x30);

        let (antic, gtia, memory) = setup(0x0B, &[0x80]);
        let buf = render(&antic, &gtia, &memory, 0);
        assert_eq!(buf.pixels[97], 0x10);
        assert_eq!(buf.pixels[98], 0x02);
    }

    #[test]
    fn test_gtia_mode9() {
        let (antic, mut gtia, memory) = setup(0x0F, &[0x5A]);
        gtia.write(COLBK, 0x90);
        gtia.write(PRIOR, 0x40);
        let buf = render(&antic, &gtia, &memory, 0);
        assert_eq!(buf.pixels[96], 0x95);
        assert_eq!(buf.pixels[100], 0x9A);
    }

    #[test]
    fn test_hscrol_shifts_right() {
        let (mut antic, gtia, memory) = setup(0x0E, &[0xFF; 48]);
        let mut events = EventSchedule::new();
        antic.hscroll_line = true;
        antic.write(HSCROL, 2, &mut events);
        let buf = render(&antic, &gtia, &memory, 0);
        // 標準幅の窓の外は描かない
        assert_eq!(buf.pixels[94], 0x02);
        assert_eq!(buf.pixels[96], 0x30);
        assert_eq!(buf.pixels[416], 0x02);
    }
}
