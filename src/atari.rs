//! Atari 800XL エミュレータ
//!
//! CPU、メモリ、ANTIC、GTIA、POKEY、PIA、SIO、H: デバイスを統合。
//! CPUの実行ループにはマシン全体を `SystemBus` として渡し、
//! I/Oレジスタの振り分けとイベント処理はここで行う。

use std::path::Path;

use crate::antic::{Antic, LineBuffer, CYCLES_PER_LINE, SCREEN_HEIGHT, SCREEN_LEFT, SCREEN_WIDTH};
use crate::config::{Config, MachineConfig, VideoStandard};
use crate::cpu::{Cpu, MemoryBus, PcHook, SystemBus};
use crate::disk::Sio;
use crate::error::A8Error;
use crate::events::{EventKind, EventSchedule, NEVER};
use crate::gtia::{self, console, Gtia};
use crate::hdevice::{HDevice, HostFs, MemoryFs, PUT_BYTE_ENTRY};
use crate::input;
use crate::memory::{Access, IoChip, Memory};
use crate::pia::Pia;
use crate::pokey::{self, Pokey};
use crate::trace;

/// CIOV（OSの中央I/Oエントリ）
pub const CIOV: u16 = 0xE456;

const JMP_ABSOLUTE: u8 = 0x4C;

/// Atari 800XLのメイン構造体
pub struct Atari800 {
    /// 6502 CPU
    pub cpu: Cpu,
    /// メモリシステム（ROM・ディスクイメージを所有）
    pub memory: Memory,
    pub antic: Antic,
    pub gtia: Gtia,
    pub pokey: Pokey,
    pub pia: Pia,
    /// SIOディスクドライブ
    pub sio: Sio,
    /// H: 仮想ファイルシステム
    pub hdevice: HDevice,
    /// 期限付きイベント
    events: EventSchedule,
    /// 現在の命令の開始サイクル（I/Oの時刻基準）
    clock: u64,
    line_buf: LineBuffer,
    /// 色インデックスのフレーム（384×240）
    framebuffer: Vec<u8>,
    palette: [u32; 256],
    /// フレームカウンター
    pub frame_count: u64,
    config: MachineConfig,
}

/// メモリバスの実装（I/Oレジスタを各チップに振り分ける）
impl MemoryBus for Atari800 {
    fn read(&mut self, address: u16) -> u8 {
        match self.memory.access(address) {
            Access::Ram | Access::Rom => self.memory.peek(address),
            Access::Io(IoChip::Gtia) => self.gtia.read((address & 0x1F) as u8),
            Access::Io(IoChip::Pokey) => self.pokey.read((address & 0x0F) as u8, self.clock),
            Access::Io(IoChip::Pia) => self.pia.read((address & 0x03) as u8),
            Access::Io(IoChip::Antic) => self.antic.read((address & 0x0F) as u8),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match self.memory.access(address) {
            Access::Ram => self.memory.poke(address, value),
            Access::Rom => {}
            Access::Io(IoChip::Gtia) => self.gtia.write((address & 0x1F) as u8, value),
            Access::Io(IoChip::Pokey) => {
                let reg = (address & 0x0F) as u8;
                let now = self.clock;
                self.pokey.write(reg, value, now, &mut self.events);
                if reg == pokey::SEROUT {
                    if self.sio.put_byte(value, &mut self.memory) {
                        // 古い応答の受信期限は無効
                        self.events.clear(EventKind::SerialInReady);
                    }
                    self.schedule_serial_input(now);
                }
            }
            Access::Io(IoChip::Pia) => {
                self.pia.write((address & 0x03) as u8, value);
                self.apply_pia();
            }
            Access::Io(IoChip::Antic) => {
                self.antic.write((address & 0x0F) as u8, value, &mut self.events);
            }
        }
    }
}

impl SystemBus for Atari800 {
    fn next_event(&self) -> u64 {
        self.events.next_deadline()
    }

    fn service_events(&mut self, cpu: &mut Cpu) {
        while let Some((kind, deadline)) = self.events.due(cpu.total_cycles) {
            self.clock = deadline;
            match kind {
                EventKind::LineFetch => self.line_fetch(cpu, deadline),
                EventKind::Dli => {
                    self.events.clear(EventKind::Dli);
                    if self.antic.fire_dli() {
                        trace::trace_irq("DLI", deadline);
                        cpu.nmi(self);
                    }
                }
                EventKind::Timer1 | EventKind::Timer2 | EventKind::Timer4 => {
                    if self.pokey.timer_event(kind, deadline, &mut self.events) {
                        self.raise_irq(cpu, "TIMER");
                    }
                }
                EventKind::SerialOutNeeded => {
                    if self.pokey.serial_out_needed(&mut self.events) {
                        self.raise_irq(cpu, "SEROUT");
                    }
                }
                EventKind::SerialOutDone => {
                    if self.pokey.serial_out_done(&mut self.events) {
                        self.raise_irq(cpu, "SEROC");
                    }
                }
                EventKind::SerialInReady => {
                    self.events.clear(EventKind::SerialInReady);
                    if let Some(byte) = self.sio.pop_input() {
                        if self.pokey.deliver_serin(byte) {
                            self.raise_irq(cpu, "SERIN");
                        }
                    }
                    if let Some(delay) = self.sio.next_delay() {
                        self.events.set(EventKind::SerialInReady, deadline + delay as u64);
                    }
                }
            }
        }
    }

    fn stall_until(&self) -> u64 {
        self.events.stall_until()
    }

    fn pc_hook(&mut self, cpu: &mut Cpu, hook: PcHook) -> bool {
        match hook {
            PcHook::DeviceCall => self.hdevice.call(cpu, &mut self.memory),
            PcHook::PutByte => self.hdevice.put_byte(cpu, &mut self.memory),
        }
    }

    fn sync_clock(&mut self, cycle: u64) {
        self.clock = cycle;
    }
}

impl Atari800 {
    /// 新しいエミュレータインスタンスを作成してハードリセット
    pub fn new(
        os_rom: &[u8],
        basic_rom: Option<&[u8]>,
        config: MachineConfig,
        fs: Box<dyn HostFs>,
    ) -> Result<Self, A8Error> {
        let memory = Memory::new(os_rom, basic_rom)?;
        let video = config.video;
        let mut atari = Atari800 {
            cpu: Cpu::new(),
            memory,
            antic: Antic::new(video.lines_per_frame()),
            gtia: Gtia::new(video.is_pal()),
            pokey: Pokey::new(video.cpu_hz(), config.sample_rate, config.audio_enabled),
            pia: Pia::new(),
            sio: Sio::new(),
            hdevice: HDevice::new(fs),
            events: EventSchedule::new(),
            clock: 0,
            line_buf: LineBuffer::new(),
            framebuffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            palette: gtia::palette(),
            frame_count: 0,
            config,
        };
        atari.hard_reset();
        Ok(atari)
    }

    /// 設定ファイルの内容からマシンを組み立てる
    ///
    /// ROM・ディスク・H: ディレクトリのパスは `Config::resolve_path` で解決する。
    pub fn from_config(config: &Config) -> Result<Self, A8Error> {
        let os_path = config.resolve_path(&config.os_rom);
        if !os_path.exists() {
            log::error!("OS ROM not found: {:?}", os_path);
            return Err(A8Error::MissingResource("OS ROM"));
        }
        let os = std::fs::read(&os_path)?;
        let basic = match &config.basic_rom {
            Some(path) => Some(std::fs::read(config.resolve_path(path))?),
            None => None,
        };

        let fs: Box<dyn HostFs> = match &config.h_dir {
            Some(dir) => Box::new(MemoryFs::from_dir(&config.resolve_path(dir))?),
            None => Box::new(MemoryFs::new()),
        };

        let mut atari = Atari800::new(&os, basic.as_deref(), config.machine.clone(), fs)?;
        for (slot, path) in config.disks.iter().enumerate() {
            let path = config.resolve_path(path);
            atari.load_disk_file(slot, &path)?;
            atari.mount_disk(slot, slot + 1)?;
        }
        Ok(atari)
    }

    /// ハードリセット（ディスクイメージとH: のファイルは保持）
    pub fn hard_reset(&mut self) {
        self.events = EventSchedule::new();
        self.clock = 0;
        self.memory.reset();
        self.antic.reset();
        self.gtia.reset();
        self.pokey.reset(0);
        self.pia.reset();
        self.sio = Sio::new();
        self.hdevice.close_all();
        self.line_buf = LineBuffer::new();
        self.framebuffer.fill(0);
        self.apply_pia();

        self.cpu = Cpu::new();
        self.cpu.reset(&mut self.memory);
        if self.config.h_device {
            self.install_hooks();
        }

        let now = self.cpu.total_cycles;
        let first_line = now.div_ceil(CYCLES_PER_LINE) * CYCLES_PER_LINE;
        self.events.set(EventKind::LineFetch, first_line);
        log::info!("Hard reset: PC=${:04X}", self.cpu.regs.pc);
    }

    /// CIOVとそのジャンプ先、PUT BYTEベクタにフックを掛ける
    fn install_hooks(&mut self) {
        self.cpu.set_pc_hook(CIOV, PcHook::DeviceCall);
        if self.memory.peek(CIOV) == JMP_ABSOLUTE {
            let target = self.memory.peek_word(CIOV + 1);
            if target != CIOV {
                self.cpu.set_pc_hook(target, PcHook::DeviceCall);
            }
            log::debug!("CIO hook at ${:04X} and ${:04X}", CIOV, target);
        }
        self.cpu.set_pc_hook(PUT_BYTE_ENTRY, PcHook::PutByte);
    }

    /// PIAの出力をバンク切り替え・SIOコマンドライン・TRIG3に反映
    fn apply_pia(&mut self) {
        self.memory.apply_portb(self.pia.portb_output());
        self.sio.set_command_line(self.pia.command_line());
        self.gtia.cart_present = self.memory.basic_mapped();
    }

    /// SIOに応答があり、まだ受信期限がなければ設定する
    fn schedule_serial_input(&mut self, now: u64) {
        if self.events.get(EventKind::SerialInReady) != NEVER {
            return;
        }
        if let Some(delay) = self.sio.next_delay() {
            self.events.set(EventKind::SerialInReady, now + delay as u64);
        }
    }

    fn raise_irq(&mut self, cpu: &mut Cpu, source: &str) {
        trace::trace_irq(source, cpu.total_cycles);
        cpu.irq(self);
    }

    /// 1スキャンライン分のANTIC / GTIA処理
    fn line_fetch(&mut self, cpu: &mut Cpu, deadline: u64) {
        let out = self.antic.process_line(
            &self.memory,
            &mut self.gtia,
            deadline,
            &mut self.events,
            &mut self.line_buf,
        );

        if let Some(row) = out.visible_row() {
            let dst = row * SCREEN_WIDTH;
            self.framebuffer[dst..dst + SCREEN_WIDTH]
                .copy_from_slice(&self.line_buf.pixels[SCREEN_LEFT..SCREEN_LEFT + SCREEN_WIDTH]);
        }

        self.pokey.catch_up(deadline);
        self.events.stall_to(deadline + out.dma_cycles as u64);
        self.events.set(EventKind::LineFetch, deadline + CYCLES_PER_LINE);

        if out.vbi {
            trace::trace_irq("VBI", deadline);
            cpu.nmi(self);
        }
        if out.frame_done {
            self.frame_count += 1;
        }
    }

    //--------------------------------------------------
    // 実行
    //--------------------------------------------------

    /// 指定サイクル数だけ実行
    pub fn run(&mut self, cycles: u64) {
        let target = self.cpu.total_cycles + cycles;
        let mut cpu = std::mem::take(&mut self.cpu);
        cpu.run(self, target);
        self.cpu = cpu;
    }

    /// 1フレーム実行（フレーム終端まで）
    pub fn run_frame(&mut self) {
        let start = self.frame_count;
        let limit = self.antic.lines_per_frame() as u64 * CYCLES_PER_LINE * 2;
        let mut spent = 0;
        while self.frame_count == start && spent < limit {
            self.run(CYCLES_PER_LINE);
            spent += CYCLES_PER_LINE;
        }
    }

    /// 累積サイクル数
    pub fn total_cycles(&self) -> u64 {
        self.cpu.total_cycles
    }

    /// CPU停止期限（WSYNC / DMA）
    pub fn stall_until(&self) -> u64 {
        self.events.stall_until()
    }

    /// イベント期限
    pub fn event_deadline(&self, kind: EventKind) -> u64 {
        self.events.get(kind)
    }

    pub fn video_standard(&self) -> VideoStandard {
        self.config.video
    }

    //--------------------------------------------------
    // 出力
    //--------------------------------------------------

    /// 色インデックスのフレーム
    pub fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }

    /// 0x00RRGGBB形式のフレーム
    pub fn frame_rgb(&self) -> Vec<u32> {
        self.framebuffer.iter().map(|&c| self.palette[c as usize]).collect()
    }

    /// 合成済みの音声サンプルを取り出す（取り出した数を返す）
    pub fn audio_samples(&mut self, out: &mut [f32]) -> usize {
        self.pokey.catch_up(self.cpu.total_cycles);
        self.pokey.audio.drain(out)
    }

    //--------------------------------------------------
    // 入力
    //--------------------------------------------------

    /// キー押下（`code` は下位6ビットのキーコード）
    pub fn key_down(&mut self, code: u8, shift: bool, control: bool) {
        self.pokey.set_shift(shift);
        if self.pokey.key_down(input::kbcode(code, shift, control)) {
            trace::trace_irq("KEY", self.cpu.total_cycles);
            self.cpu.request_irq();
        }
    }

    /// ASCII文字をタイプ（対応するキーがなければfalse）
    pub fn type_char(&mut self, c: char) -> bool {
        match input::keycode_for_ascii(c) {
            Some((code, shift)) => {
                self.key_down(code, shift, false);
                true
            }
            None => false,
        }
    }

    pub fn key_up(&mut self) {
        self.pokey.key_up();
        self.pokey.set_shift(false);
    }

    pub fn break_key(&mut self) {
        if self.pokey.break_key() {
            trace::trace_irq("BREAK", self.cpu.total_cycles);
            self.cpu.request_irq();
        }
    }

    /// コンソールキー（押されていればtrue）
    pub fn set_console(&mut self, start: bool, select: bool, option: bool) {
        let mut keys = 0;
        if start {
            keys |= console::START;
        }
        if select {
            keys |= console::SELECT;
        }
        if option {
            keys |= console::OPTION;
        }
        self.gtia.set_console(keys);
    }

    /// ジョイスティック（`directions` は bit0=上, bit1=下, bit2=左, bit3=右）
    pub fn set_joystick(&mut self, port: usize, directions: u8, fire: bool) {
        self.pia.set_stick(port, directions);
        self.gtia.set_trigger(port, fire);
    }

    pub fn set_paddle(&mut self, n: usize, value: u8) {
        self.pokey.set_paddle(n, value);
    }

    //--------------------------------------------------
    // ディスク
    //--------------------------------------------------

    /// ホストスロットへATRイメージを登録
    pub fn upload_disk(&mut self, slot: usize, name: &str, data: Vec<u8>) -> Result<usize, A8Error> {
        self.memory.upload_disk(slot, name, data)
    }

    /// ファイルからATRイメージを読み込んでスロットに登録
    pub fn load_disk_file(&mut self, slot: usize, path: &Path) -> Result<usize, A8Error> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!("Disk loaded: {} ({} bytes)", name, data.len());
        self.upload_disk(slot, &name, data)
    }

    /// スロットのイメージをDn: にマウント（`device` は1～8）
    pub fn mount_disk(&mut self, slot: usize, device: usize) -> Result<(), A8Error> {
        self.memory.mount_disk(slot, device)
    }

    pub fn unmount_disk(&mut self, device: usize) {
        self.memory.unmount_disk(device);
    }

    /// ホスト保存用にイメージのバイト列を取り出す
    pub fn export_disk(&self, slot: usize) -> Option<&[u8]> {
        self.memory.export_disk(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::antic::{NTSC_LINES, PAL_LINES};
    use crate::memory::{BASIC_ROM_SIZE, OS_ROM_SIZE};

    /// $E000にプログラムを置いた合成OS ROM（NMI / IRQはRTI）
    fn test_os(program: &[u8]) -> Vec<u8> {
        let mut rom = vec![0xEA; OS_ROM_SIZE];
        rom[0x2000..0x2000 + program.len()].copy_from_slice(program);
        // $E100: RTI
        rom[0x2100] = 0x40;
        rom[0x3FFA..0x3FFC].copy_from_slice(&[0x00, 0xE1]);
        rom[0x3FFC..0x3FFE].copy_from_slice(&[0x00, 0xE0]);
        rom[0x3FFE..].copy_from_slice(&[0x00, 0xE1]);
        rom
    }

    fn machine(program: &[u8]) -> Atari800 {
        Atari800::new(&test_os(program), None, MachineConfig::default(), Box::new(MemoryFs::new())).unwrap()
    }

    // JMP $E000
    const IDLE: &[u8] = &[0x4C, 0x00, 0xE0];

    #[test]
    fn test_reset_starts_at_vector() {
        let atari = machine(IDLE);
        assert_eq!(atari.cpu.regs.pc, 0xE000);
        assert_eq!(atari.event_deadline(EventKind::LineFetch), CYCLES_PER_LINE);
    }

    #[test]
    fn test_wsync_stalls_to_line_boundary() {
        let mut atari = machine(IDLE);
        atari.run(500);
        atari.write(0xD40A, 0);
        let stall = atari.stall_until();
        assert_eq!(stall % CYCLES_PER_LINE, 0);
        assert_eq!(stall, atari.event_deadline(EventKind::LineFetch));
        assert!(stall > atari.total_cycles());
    }

    #[test]
    fn test_run_frame_counts_frames() {
        let mut atari = machine(IDLE);
        atari.run_frame();
        assert_eq!(atari.frame_count, 1);
        let before = atari.total_cycles();
        atari.run_frame();
        assert_eq!(atari.frame_count, 2);
        let spent = atari.total_cycles() - before;
        let frame = NTSC_LINES as u64 * CYCLES_PER_LINE;
        assert!(spent.abs_diff(frame) < CYCLES_PER_LINE * 2, "spent {}", spent);
    }

    #[test]
    fn test_pal_frame_length() {
        let config = MachineConfig { video: VideoStandard::Pal, ..MachineConfig::default() };
        let mut atari = Atari800::new(&test_os(IDLE), None, config, Box::new(MemoryFs::new())).unwrap();
        assert_eq!(atari.read(0xD014), 0x01);
        atari.run_frame();
        let before = atari.total_cycles();
        atari.run_frame();
        let spent = atari.total_cycles() - before;
        assert!(spent.abs_diff(PAL_LINES as u64 * CYCLES_PER_LINE) < CYCLES_PER_LINE * 2);
    }

    #[test]
    fn test_vbi_nmi_reaches_handler() {
        // NMIハンドラ $E100: INC $80 / RTI
        let mut rom = test_os(IDLE);
        rom[0x2100..0x2103].copy_from_slice(&[0xE6, 0x80, 0x40]);
        let mut atari = Atari800::new(&rom, None, MachineConfig::default(), Box::new(MemoryFs::new())).unwrap();
        // NMIEN: VBI
        atari.write(0xD40E, 0x40);
        atari.run_frame();
        atari.run_frame();
        assert!(atari.memory.peek(0x80) >= 1);
    }

    #[test]
    fn test_register_dispatch() {
        let mut atari = machine(IDLE);
        // GTIAはミラーされる
        atari.write(0xD01A + 0x20, 0x34);
        assert_eq!(atari.gtia.colbk(), 0x34);
        // PIA PORTBでBASICを有効にするにはBASIC ROMが要る
        assert!(!atari.memory.basic_mapped());
        // VCOUNT
        atari.run(CYCLES_PER_LINE * 20);
        assert!(atari.read(0xD40B) > 0);
        // RAMへの書き込み、ROMへの書き込みは無視
        atari.write(0x4000, 0x12);
        assert_eq!(atari.read(0x4000), 0x12);
        atari.write(0xE000, 0x00);
        assert_eq!(atari.read(0xE000), 0x4C);
    }

    #[test]
    fn test_portb_controls_basic_and_trig3() {
        let basic = vec![0xBA; BASIC_ROM_SIZE];
        let mut atari =
            Atari800::new(&test_os(IDLE), Some(&basic), MachineConfig::default(), Box::new(MemoryFs::new())).unwrap();
        assert_eq!(atari.read(0xD013), 0);
        // PBCTL: DDR選択 → 全出力 → データレジスタへ
        atari.write(0xD303, 0x38);
        atari.write(0xD301, 0xFF);
        atari.write(0xD303, 0x3C);
        atari.write(0xD301, 0xFD);
        assert!(atari.memory.basic_mapped());
        assert_eq!(atari.read(0xA000), 0xBA);
        assert_eq!(atari.read(0xD013), 1);
    }

    #[test]
    fn test_key_down_requests_irq() {
        let mut atari = machine(IDLE);
        // IRQEN: キーボード
        atari.write(0xD20E, pokey::irq::KEY);
        atari.key_down(input::key::RETURN, false, false);
        assert_eq!(atari.read(0xD209), input::key::RETURN);
        assert_eq!(atari.cpu.irq_pending, 1);
        atari.key_up();
    }

    #[test]
    fn test_console_and_joystick() {
        let mut atari = machine(IDLE);
        atari.set_console(true, false, true);
        assert_eq!(atari.read(0xD01F) & 0x07, 0x02);
        atari.set_joystick(0, 0x01, true);
        assert_eq!(atari.read(0xD300) & 0x0F, 0x0E);
        assert_eq!(atari.read(0xD010), 0);
    }

    #[test]
    fn test_hooks_installed_at_ciov_target() {
        // $E456: JMP $E4C0
        let mut rom = test_os(IDLE);
        rom[0x2456..0x2459].copy_from_slice(&[0x4C, 0xC0, 0xE4]);
        let atari = Atari800::new(&rom, None, MachineConfig::default(), Box::new(MemoryFs::new())).unwrap();
        assert_eq!(atari.cpu.pc_hook_at(CIOV), Some(PcHook::DeviceCall));
        assert_eq!(atari.cpu.pc_hook_at(0xE4C0), Some(PcHook::DeviceCall));
        assert_eq!(atari.cpu.pc_hook_at(PUT_BYTE_ENTRY), Some(PcHook::PutByte));

        let config = MachineConfig { h_device: false, ..MachineConfig::default() };
        let plain = Atari800::new(&rom, None, config, Box::new(MemoryFs::new())).unwrap();
        assert_eq!(plain.cpu.pc_hook_at(CIOV), None);
    }

    #[test]
    fn test_frame_rgb_uses_palette() {
        let mut atari = machine(IDLE);
        atari.write(0xD01A, 0x0E);
        atari.run_frame();
        let rgb = atari.frame_rgb();
        assert_eq!(rgb.len(), SCREEN_WIDTH * SCREEN_HEIGHT);
        assert_eq!(rgb[SCREEN_WIDTH * 100], gtia::palette()[0x0E]);
    }
}
