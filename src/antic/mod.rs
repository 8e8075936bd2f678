//! ANTIC: ディスプレイリストプロセッサ
//!
//! 1スキャンライン = 114 CPUサイクル。ラインフェッチの期限ごとに
//! ディスプレイリストを1命令ずつ解釈し、モードごとのラスタライザで
//! 1ライン分の色と優先ビットをラインバッファに描く。
//!
//! - ライン8から247が表示領域（240ライン）
//! - ライン248でVBI
//! - 命令のbit7でDLI（モードラインの最終ライン）

mod modes;

use crate::events::{EventKind, EventSchedule, NEVER};
use crate::gtia::Gtia;
use crate::memory::Memory;
use crate::trace;

/// 1スキャンラインのCPUサイクル数
pub const CYCLES_PER_LINE: u64 = 114;
/// NTSCのライン数
pub const NTSC_LINES: u32 = 262;
/// PALのライン数
pub const PAL_LINES: u32 = 312;
/// ディスプレイリストの開始ライン
pub const FIRST_DISPLAY_LINE: u32 = 8;
/// VBIライン
pub const VBLANK_LINE: u32 = 248;

/// ラインバッファの幅（ハイレゾピクセル、1カラークロック = 2ピクセル）
pub const LINE_WIDTH: usize = 456;
/// フレームバッファのサイズ
pub const SCREEN_WIDTH: usize = 384;
pub const SCREEN_HEIGHT: usize = 240;
/// フレームバッファの左端（ラインバッファ上の位置）
pub const SCREEN_LEFT: usize = 64;

// 優先ビット（プレイフィールドの種類。0 = 背景）
pub const PRI_PF0: u8 = 0x01;
pub const PRI_PF1: u8 = 0x02;
pub const PRI_PF2: u8 = 0x04;
pub const PRI_PF3: u8 = 0x08;

// 書き込みレジスタ ($D400-$D40F)
pub const DMACTL: u8 = 0x00;
pub const CHACTL: u8 = 0x01;
pub const DLISTL: u8 = 0x02;
pub const DLISTH: u8 = 0x03;
pub const HSCROL: u8 = 0x04;
pub const VSCROL: u8 = 0x05;
pub const PMBASE: u8 = 0x07;
pub const CHBASE: u8 = 0x09;
pub const WSYNC: u8 = 0x0A;
pub const NMIEN: u8 = 0x0E;
pub const NMIRES: u8 = 0x0F;

// 読み出しレジスタ
pub const VCOUNT: u8 = 0x0B;
pub const PENH: u8 = 0x0C;
pub const PENV: u8 = 0x0D;
pub const NMIST: u8 = 0x0F;

/// NMIST / NMIEN のビット
pub const NMI_DLI: u8 = 0x80;
pub const NMI_VBI: u8 = 0x40;

/// メモリリフレッシュのサイクル
const REFRESH_CYCLES: u32 = 9;
/// 1ラインで奪うサイクルの上限
const MAX_DMA_CYCLES: u32 = 105;

/// モードごとの1モードラインのスキャンライン数
const MODE_LINES: [u8; 16] = [1, 1, 8, 10, 8, 16, 8, 16, 8, 4, 4, 2, 1, 2, 1, 1];

/// 1ライン分の描画結果
#[derive(Clone)]
pub struct LineBuffer {
    /// 色（GTIAカラー値）
    pub pixels: [u8; LINE_WIDTH],
    /// プレイフィールドの種類（PRI_PF0..PRI_PF3、背景は0）
    pub priority: [u8; LINE_WIDTH],
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer {
            pixels: [0; LINE_WIDTH],
            priority: [0; LINE_WIDTH],
        }
    }

    /// 背景色で塗りつぶす
    pub fn fill(&mut self, background: u8) {
        self.pixels.fill(background);
        self.priority.fill(0);
    }
}

/// ライン処理の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOutcome {
    /// 処理したスキャンライン
    pub scanline: u32,
    /// DMAで奪ったサイクル
    pub dma_cycles: u32,
    /// VBIのNMIを発生させるか
    pub vbi: bool,
    /// このラインでフレームが終わった
    pub frame_done: bool,
}

impl LineOutcome {
    /// フレームバッファ上の行（表示領域外はNone）
    pub fn visible_row(&self) -> Option<usize> {
        if (FIRST_DISPLAY_LINE..VBLANK_LINE).contains(&self.scanline) {
            Some((self.scanline - FIRST_DISPLAY_LINE) as usize)
        } else {
            None
        }
    }
}

/// ANTICの状態
#[derive(Debug, Clone)]
pub struct Antic {
    dmactl: u8,
    chactl: u8,
    /// ディスプレイリストカウンタ（1KB境界内でインクリメント）
    dlist: u16,
    hscrol: u8,
    vscrol: u8,
    pmbase: u8,
    chbase: u8,
    nmien: u8,
    nmist: u8,

    /// これから処理するスキャンライン
    scanline: u32,
    /// 実行中のスキャンライン（VCOUNT用）
    current_line: u32,
    lines_per_frame: u32,

    /// 次に命令をフェッチするライン
    next_trigger: u32,
    /// JVBの後、次のフレームまで停止
    dl_stopped: bool,
    /// 現在のモード（0 = 空白）
    mode: u8,
    /// HSCROLが有効なモードライン
    hscroll_line: bool,
    /// 直前のモードラインでVSCROLが有効だったか
    prev_vscroll: bool,
    row_start: u8,
    /// モードラインの開始スキャンライン
    mode_line_start: u32,
    /// メモリスキャンカウンタ（4KB境界内でインクリメント）
    memscan: u16,
    /// モードラインの画面データ
    line_data: Vec<u8>,
}

impl Antic {
    pub fn new(lines_per_frame: u32) -> Self {
        Antic {
            dmactl: 0,
            chactl: 0,
            dlist: 0,
            hscrol: 0,
            vscrol: 0,
            pmbase: 0,
            chbase: 0,
            nmien: 0,
            nmist: 0,
            scanline: 0,
            current_line: 0,
            lines_per_frame,
            next_trigger: FIRST_DISPLAY_LINE,
            dl_stopped: false,
            mode: 0,
            hscroll_line: false,
            prev_vscroll: false,
            row_start: 0,
            mode_line_start: 0,
            memscan: 0,
            line_data: Vec::with_capacity(48),
        }
    }

    pub fn reset(&mut self) {
        *self = Antic::new(self.lines_per_frame);
    }

    pub fn lines_per_frame(&self) -> u32 {
        self.lines_per_frame
    }

    pub fn set_lines_per_frame(&mut self, lines: u32) {
        self.lines_per_frame = lines;
    }

    pub fn dmactl(&self) -> u8 {
        self.dmactl
    }

    pub fn pmbase(&self) -> u8 {
        self.pmbase
    }

    pub fn dlist(&self) -> u16 {
        self.dlist
    }

    /// 次に処理するスキャンライン
    pub fn scanline(&self) -> u32 {
        self.scanline
    }

    pub fn write(&mut self, reg: u8, value: u8, events: &mut EventSchedule) {
        match reg & 0x0F {
            DMACTL => self.dmactl = value,
            CHACTL => self.chactl = value & 0x07,
            DLISTL => self.dlist = (self.dlist & 0xFF00) | value as u16,
            DLISTH => self.dlist = (self.dlist & 0x00FF) | ((value as u16) << 8),
            HSCROL => self.hscrol = value & 0x0F,
            VSCROL => self.vscrol = value & 0x0F,
            PMBASE => self.pmbase = value,
            CHBASE => self.chbase = value,
            WSYNC => {
                // 次のラインフェッチまでCPUを止める
                let next_line = events.get(EventKind::LineFetch);
                if next_line != NEVER {
                    events.stall_to(next_line);
                }
            }
            NMIEN => self.nmien = value,
            NMIRES => self.nmist = 0,
            _ => {}
        }
    }

    pub fn read(&self, reg: u8) -> u8 {
        match reg & 0x0F {
            VCOUNT => (self.current_line / 2) as u8,
            PENH | PENV => 0x00,
            NMIST => self.nmist | 0x1F,
            _ => 0xFF,
        }
    }

    /// DLIの期限。NMIを発生させるならtrue
    pub fn fire_dli(&mut self) -> bool {
        self.nmist = (self.nmist | NMI_DLI) & !NMI_VBI;
        self.nmien & NMI_DLI != 0
    }

    /// 1スキャンラインを処理
    ///
    /// `line_start` はこのラインのフェッチ期限（DLIの基準）。
    pub fn process_line(
        &mut self,
        memory: &Memory,
        gtia: &mut Gtia,
        line_start: u64,
        events: &mut EventSchedule,
        buf: &mut LineBuffer,
    ) -> LineOutcome {
        let line = self.scanline;
        self.current_line = line;
        buf.fill(gtia.colbk());

        let mut dma = REFRESH_CYCLES;
        if line == FIRST_DISPLAY_LINE {
            self.dl_stopped = false;
            self.next_trigger = FIRST_DISPLAY_LINE;
            self.prev_vscroll = false;
            self.mode = 0;
        }

        if (FIRST_DISPLAY_LINE..VBLANK_LINE).contains(&line) {
            dma += gtia.pm_dma(memory, line, self.dmactl, self.pmbase);

            let dl_dma = self.dmactl & 0x20 != 0;
            if !dl_dma {
                self.mode = 0;
            } else if !self.dl_stopped && line == self.next_trigger {
                dma += self.fetch_instruction(memory, line, line_start, events);
            }

            if self.mode >= 2 && self.dmactl & 0x03 != 0 {
                let row = self.row_start.wrapping_add((line - self.mode_line_start) as u8) & 0x0F;
                if line == self.mode_line_start {
                    dma += self.fetch_screen_data(memory);
                }
                dma += self.render_mode_line(memory, gtia, row, buf);
            }
            gtia.draw_line(buf);
        }

        let mut vbi = false;
        if line == VBLANK_LINE {
            self.nmist = (self.nmist | NMI_VBI) & !NMI_DLI;
            vbi = self.nmien & NMI_VBI != 0;
        }

        self.scanline += 1;
        let frame_done = self.scanline >= self.lines_per_frame;
        if frame_done {
            self.scanline = 0;
        }

        LineOutcome {
            scanline: line,
            dma_cycles: dma.min(MAX_DMA_CYCLES),
            vbi,
            frame_done,
        }
    }

    /// ディスプレイリストから1バイト（1KB境界内で循環）
    fn dl_read(&mut self, memory: &Memory) -> u8 {
        let value = memory.peek(self.dlist);
        self.dlist = (self.dlist & 0xFC00) | (self.dlist.wrapping_add(1) & 0x03FF);
        value
    }

    fn dl_read_word(&mut self, memory: &Memory) -> u16 {
        let low = self.dl_read(memory) as u16;
        let high = self.dl_read(memory) as u16;
        (high << 8) | low
    }

    /// 命令をフェッチして次のトリガーラインを決める。DMAバイト数を返す
    fn fetch_instruction(&mut self, memory: &Memory, line: u32, line_start: u64, events: &mut EventSchedule) -> u32 {
        let addr = self.dlist;
        let cmd = self.dl_read(memory);
        trace::trace_dlist(line, addr, cmd);

        let mut bytes = 1;
        let count = match cmd & 0x0F {
            0 => {
                // 空白ライン
                self.mode = 0;
                self.prev_vscroll = false;
                ((cmd >> 4) & 0x07) as u32 + 1
            }
            1 => {
                // JMP / JVB（どちらも空白1ライン）
                let target = self.dl_read_word(memory);
                bytes += 2;
                self.dlist = target;
                if cmd & 0x40 != 0 {
                    self.dl_stopped = true;
                }
                self.mode = 0;
                self.prev_vscroll = false;
                1
            }
            mode => {
                if cmd & 0x40 != 0 {
                    self.memscan = self.dl_read_word(memory);
                    bytes += 2;
                }
                self.mode = mode;
                self.hscroll_line = cmd & 0x10 != 0;

                let last = MODE_LINES[mode as usize] - 1;
                let vscroll = cmd & 0x20 != 0;
                let (start, end) = match (self.prev_vscroll, vscroll) {
                    (false, true) => (self.vscrol, last),
                    (true, false) => (0, self.vscrol),
                    _ => (0, last),
                };
                self.prev_vscroll = vscroll;
                self.row_start = start;
                (end.wrapping_sub(start) & 0x0F) as u32 + 1
            }
        };

        self.mode_line_start = line;
        self.next_trigger = line + count;

        if cmd & 0x80 != 0 {
            let at = line_start + (count as u64 - 1) * CYCLES_PER_LINE + 8;
            events.set(EventKind::Dli, at);
        }
        bytes
    }

    /// モードラインの画面データを取り込む。DMAバイト数を返す
    fn fetch_screen_data(&mut self, memory: &Memory) -> u32 {
        let count = modes::bytes_per_line(self.mode, self.fetch_width());
        self.line_data.clear();
        for _ in 0..count {
            self.line_data.push(memory.peek(self.memscan));
            self.memscan = (self.memscan & 0xF000) | (self.memscan.wrapping_add(1) & 0x0FFF);
        }
        count as u32
    }

    /// DMACTLのプレイフィールド幅（1 = 狭, 2 = 標準, 3 = 広）
    fn display_width(&self) -> u8 {
        self.dmactl & 0x03
    }

    /// HSCROL有効時は1段階広くフェッチする
    fn fetch_width(&self) -> u8 {
        let width = self.display_width();
        if self.hscroll_line {
            (width + 1).min(3)
        } else {
            width
        }
    }
}

/// プレイフィールド幅のハイレゾ範囲
fn width_range(width: u8) -> (usize, usize) {
    match width {
        1 => (128, 384),
        2 => (96, 416),
        _ => (64, 448),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::OS_ROM_SIZE;

    fn setup() -> (Antic, Gtia, Memory, EventSchedule, LineBuffer) {
        let memory = Memory::new(&vec![0u8; OS_ROM_SIZE], None).unwrap();
        (Antic::new(NTSC_LINES), Gtia::new(false), memory, EventSchedule::new(), LineBuffer::new())
    }

    /// 指定ラインまで進める
    fn run_to(antic: &mut Antic, gtia: &mut Gtia, memory: &Memory, events: &mut EventSchedule, buf: &mut LineBuffer, line: u32) {
        while antic.scanline() != line {
            let start = antic.scanline() as u64 * CYCLES_PER_LINE;
            antic.process_line(memory, gtia, start, events, buf);
        }
    }

    #[test]
    fn test_frame_length_and_vbi() {
        let (mut antic, mut gtia, memory, mut events, mut buf) = setup();
        antic.write(NMIEN, NMI_VBI, &mut events);
        let mut vbi_lines = Vec::new();
        let mut frames = 0;
        for line in 0..NTSC_LINES {
            let out = antic.process_line(&memory, &mut gtia, line as u64 * CYCLES_PER_LINE, &mut events, &mut buf);
            if out.vbi {
                vbi_lines.push(out.scanline);
            }
            if out.frame_done {
                frames += 1;
            }
        }
        assert_eq!(vbi_lines, vec![VBLANK_LINE]);
        assert_eq!(frames, 1);
        assert_eq!(antic.read(NMIST), NMI_VBI | 0x1F);
        antic.write(NMIRES, 0, &mut events);
        assert_eq!(antic.read(NMIST), 0x1F);
    }

    #[test]
    fn test_vcount() {
        let (mut antic, mut gtia, memory, mut events, mut buf) = setup();
        run_to(&mut antic, &mut gtia, &memory, &mut events, &mut buf, 101);
        assert_eq!(antic.read(VCOUNT), 50);
    }

    #[test]
    fn test_wsync_stalls_to_line_boundary() {
        let mut events = EventSchedule::new();
        let mut antic = Antic::new(NTSC_LINES);
        events.set(EventKind::LineFetch, 114 * 30);
        antic.write(WSYNC, 0, &mut events);
        assert_eq!(events.stall_until(), 114 * 30);
        assert_eq!(events.stall_until() % CYCLES_PER_LINE, 0);
    }

    #[test]
    fn test_display_list_mode2_and_dli() {
        let (mut antic, mut gtia, mut memory, mut events, mut buf) = setup();
        // DL: 8空白ライン, mode 2 + LMS $4000 + DLI, JVB
        let dl = [0x70, 0xC2, 0x00, 0x40, 0x41, 0x00, 0x30];
        for (i, &b) in dl.iter().enumerate() {
            memory.poke(0x3000 + i as u16, b);
        }
        memory.poke(0x4000, 0x01);
        antic.write(DLISTL, 0x00, &mut events);
        antic.write(DLISTH, 0x30, &mut events);
        antic.write(DMACTL, 0x22, &mut events);
        antic.write(CHBASE, 0x20, &mut events);
        // 文字1の1行目を$FF
        memory.poke(0x2008, 0xFF);
        gtia.write(crate::gtia::COLPF0 + 1, 0x0E);
        gtia.write(crate::gtia::COLPF0 + 2, 0x94);

        run_to(&mut antic, &mut gtia, &memory, &mut events, &mut buf, 16);
        let out = antic.process_line(&memory, &mut gtia, 16 * CYCLES_PER_LINE, &mut events, &mut buf);
        assert_eq!(out.scanline, 16);
        assert!(out.dma_cycles > REFRESH_CYCLES);

        // 先頭の文字（1）が明るいピクセル
        assert_eq!(buf.pixels[96], 0x9E);
        assert_eq!(buf.priority[96], PRI_PF2);
        // 2文字目（0）は背景のPF2
        assert_eq!(buf.pixels[104], 0x94);

        // DLIは8行目（ライン23）の8サイクル目
        assert_eq!(events.get(EventKind::Dli), 23 * CYCLES_PER_LINE + 8);
    }

    #[test]
    fn test_jvb_stops_until_next_frame() {
        let (mut antic, mut gtia, mut memory, mut events, mut buf) = setup();
        memory.poke(0x3000, 0x41);
        memory.poke(0x3001, 0x00);
        memory.poke(0x3002, 0x30);
        antic.write(DLISTL, 0x00, &mut events);
        antic.write(DLISTH, 0x30, &mut events);
        antic.write(DMACTL, 0x22, &mut events);
        run_to(&mut antic, &mut gtia, &memory, &mut events, &mut buf, 9);
        assert_eq!(antic.dlist(), 0x3000);
        run_to(&mut antic, &mut gtia, &memory, &mut events, &mut buf, 200);
        // 停止中はフェッチしない
        assert_eq!(antic.dlist(), 0x3000);
    }

    #[test]
    fn test_dlist_counter_wraps_in_1k() {
        let (mut antic, _gtia, mut memory, mut events, _buf) = setup();
        memory.poke(0x33FF, 0x70);
        antic.write(DLISTL, 0xFF, &mut events);
        antic.write(DLISTH, 0x33, &mut events);
        antic.fetch_instruction(&memory, 8, 0, &mut events);
        assert_eq!(antic.dlist(), 0x3000);
        assert_eq!(antic.next_trigger, 16);
    }

    #[test]
    fn test_vscroll_clips_first_mode_line() {
        let (mut antic, _gtia, mut memory, mut events, _buf) = setup();
        // mode 2 + VSCROL, mode 2（VSCROLなし）
        memory.poke(0x3000, 0x22);
        memory.poke(0x3001, 0x02);
        antic.write(DLISTL, 0x00, &mut events);
        antic.write(DLISTH, 0x30, &mut events);
        antic.write(VSCROL, 3, &mut events);
        antic.fetch_instruction(&memory, 8, 0, &mut events);
        assert_eq!(antic.next_trigger, 8 + 5);
        antic.fetch_instruction(&memory, 13, 0, &mut events);
        assert_eq!(antic.next_trigger, 13 + 4);
    }
}
