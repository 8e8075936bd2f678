//! MOS 6502 CPU Emulator
//!
//! Atari 8ビット機で使用される NMOS 6502 (SALLY) のエミュレーション実装
//! Based on the MOS 6502 datasheet, including the NMOS illegal opcodes
//!
//! 命令ごとの基本サイクルはテーブルで持ち、インデックス付き読み出しで
//! ページ境界を越えた場合のみ +1 する。

mod opcodes;
pub mod addressing;

pub use opcodes::OPCODE_CYCLES;

use std::collections::HashMap;

/// CPUのステータスレジスタのフラグビット
pub mod flags {
    pub const CARRY: u8 = 0b0000_0001;      // C: キャリーフラグ
    pub const ZERO: u8 = 0b0000_0010;       // Z: ゼロフラグ
    pub const IRQ_DISABLE: u8 = 0b0000_0100; // I: 割り込み禁止フラグ
    pub const DECIMAL: u8 = 0b0000_1000;    // D: BCDモードフラグ
    pub const BREAK: u8 = 0b0001_0000;      // B: ブレークフラグ
    pub const UNUSED: u8 = 0b0010_0000;     // 未使用（常に1）
    pub const OVERFLOW: u8 = 0b0100_0000;   // V: オーバーフローフラグ
    pub const NEGATIVE: u8 = 0b1000_0000;   // N: 負数フラグ
}

/// 割り込みベクタ
pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// 割り込み応答のサイクル数
pub const INTERRUPT_CYCLES: u32 = 7;

/// CPUレジスタの状態
#[derive(Debug, Clone)]
pub struct Registers {
    /// アキュムレータ（A）
    pub a: u8,
    /// Xインデックスレジスタ
    pub x: u8,
    /// Yインデックスレジスタ
    pub y: u8,
    /// スタックポインタ
    pub sp: u8,
    /// プログラムカウンタ
    pub pc: u16,
    /// ステータスレジスタ（プロセッサフラグ）
    pub status: u8,
}

impl Default for Registers {
    fn default() -> Self {
        Registers {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD,  // スタックは$01FDから開始
            pc: 0,
            status: flags::UNUSED | flags::IRQ_DISABLE,
        }
    }
}

impl Registers {
    /// フラグをセット
    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    /// フラグを取得
    pub fn get_flag(&self, flag: u8) -> bool {
        (self.status & flag) != 0
    }

    /// ゼロフラグと負数フラグを値に基づいて更新
    pub fn update_zero_negative_flags(&mut self, value: u8) {
        self.set_flag(flags::ZERO, value == 0);
        self.set_flag(flags::NEGATIVE, (value & 0x80) != 0);
    }
}

/// メモリバスインターフェース
/// CPUがメモリにアクセスするために必要なトレイト
pub trait MemoryBus {
    /// メモリから1バイト読み取り
    fn read(&mut self, address: u16) -> u8;
    /// メモリに1バイト書き込み
    fn write(&mut self, address: u16, value: u8);
}

/// PCフックの種類
///
/// 命令実行の直前にPCがフックアドレスに一致すると、実行ループが
/// `SystemBus::pc_hook` を呼ぶ。ROMを書き換えずにOSコールを横取りする。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcHook {
    /// OSの中央デバイスコール（CIO）
    DeviceCall,
    /// IOCBの高速1バイト出力ベクタ
    PutByte,
}

/// 実行ループから見たマシン全体
pub trait SystemBus: MemoryBus {
    /// 最も早いイベント期限
    fn next_event(&self) -> u64;
    /// 期限に達したイベントをすべて処理
    fn service_events(&mut self, cpu: &mut Cpu);
    /// CPU停止期限（WSYNC / DMA）
    fn stall_until(&self) -> u64;
    /// PCフック。trueを返すとその命令の実行をスキップする
    fn pc_hook(&mut self, cpu: &mut Cpu, hook: PcHook) -> bool;
    /// 命令実行直前の現在サイクルを通知（I/Oレジスタの時刻基準）
    fn sync_clock(&mut self, _cycle: u64) {}
}

/// 6502 CPUエミュレータ
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    /// CPUレジスタ
    pub regs: Registers,
    /// 累積サイクル数
    pub total_cycles: u64,
    /// 現在の命令で消費したサイクル
    pub cycles: u32,
    /// 割り込み禁止中に保留されたIRQの数
    pub irq_pending: u32,
    /// PCフックテーブル
    hooks: HashMap<u16, PcHook>,
}

impl Cpu {
    /// 新しいCPUインスタンスを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// CPUをリセット
    pub fn reset<M: MemoryBus>(&mut self, memory: &mut M) {
        self.regs.sp = 0xFD;
        self.regs.set_flag(flags::DECIMAL, false);
        self.regs.set_flag(flags::BREAK, false);
        self.regs.set_flag(flags::IRQ_DISABLE, true);
        self.regs.status |= flags::UNUSED;
        self.irq_pending = 0;
        self.regs.pc = self.read_vector(memory, RESET_VECTOR);
        self.cycles = INTERRUPT_CYCLES;
        self.total_cycles += INTERRUPT_CYCLES as u64;
    }

    /// PCフックを登録
    pub fn set_pc_hook(&mut self, address: u16, hook: PcHook) {
        self.hooks.insert(address, hook);
    }

    /// PCフックを解除
    pub fn clear_pc_hook(&mut self, address: u16, hook: PcHook) {
        if self.hooks.get(&address) == Some(&hook) {
            self.hooks.remove(&address);
        }
    }

    /// 登録済みのフック
    pub fn pc_hook_at(&self, address: u16) -> Option<PcHook> {
        self.hooks.get(&address).copied()
    }

    /// マスク可能割り込み要求
    ///
    /// Iフラグが立っていれば保留カウンタを増やすだけ。
    /// 解除後の最初のステップでカウンタを1つ消費して処理する。
    pub fn irq<M: MemoryBus>(&mut self, memory: &mut M) {
        if self.regs.get_flag(flags::IRQ_DISABLE) {
            self.irq_pending += 1;
            return;
        }
        self.enter_interrupt(memory, IRQ_VECTOR);
        self.total_cycles += INTERRUPT_CYCLES as u64;
    }

    /// IRQを保留キューに積む（ホストからの入力イベント用）
    pub fn request_irq(&mut self) {
        self.irq_pending += 1;
    }

    /// ノンマスカブル割り込み
    pub fn nmi<M: MemoryBus>(&mut self, memory: &mut M) {
        self.enter_interrupt(memory, NMI_VECTOR);
        self.total_cycles += INTERRUPT_CYCLES as u64;
    }

    /// PCとステータスを積み、ベクタへジャンプ（Bフラグはクリア）
    fn enter_interrupt<M: MemoryBus>(&mut self, memory: &mut M, vector: u16) {
        self.push_word(memory, self.regs.pc);
        let status = (self.regs.status | flags::UNUSED) & !flags::BREAK;
        self.push_byte(memory, status);
        self.regs.set_flag(flags::IRQ_DISABLE, true);
        self.regs.pc = self.read_vector(memory, vector);
    }

    fn read_vector<M: MemoryBus>(&mut self, memory: &mut M, vector: u16) -> u16 {
        let low = memory.read(vector) as u16;
        let high = memory.read(vector.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    /// 1命令を実行し、消費したサイクル数を返す
    pub fn step<M: MemoryBus>(&mut self, memory: &mut M) -> u32 {
        // 保留中のIRQ（Iフラグ解除後）
        if self.irq_pending > 0 && !self.regs.get_flag(flags::IRQ_DISABLE) {
            self.irq_pending -= 1;
            self.enter_interrupt(memory, IRQ_VECTOR);
            self.cycles = INTERRUPT_CYCLES;
            self.total_cycles += self.cycles as u64;
            return self.cycles;
        }

        // 命令をフェッチ
        let opcode = self.fetch_byte(memory);
        self.cycles = OPCODE_CYCLES[opcode as usize] as u32;

        // 命令を実行
        self.execute_opcode(memory, opcode);

        self.total_cycles += self.cycles as u64;
        self.cycles
    }

    /// 目標サイクルまで実行
    ///
    /// 期限に達したイベントを先に処理し、停止期限中は命令を実行せずに
    /// クロックだけを進める。
    pub fn run<B: SystemBus>(&mut self, bus: &mut B, cycle_target: u64) {
        while self.total_cycles < cycle_target {
            if bus.next_event() <= self.total_cycles {
                bus.service_events(self);
                continue;
            }

            let stall = bus.stall_until();
            if stall > self.total_cycles {
                self.total_cycles = stall.min(bus.next_event()).min(cycle_target);
                continue;
            }

            bus.sync_clock(self.total_cycles);

            if !self.hooks.is_empty() {
                if let Some(hook) = self.pc_hook_at(self.regs.pc) {
                    if bus.pc_hook(self, hook) {
                        continue;
                    }
                }
            }

            self.step(bus);
        }
    }

    /// サブルーチンからの復帰を模擬（フック用）
    pub fn simulate_rts<M: MemoryBus>(&mut self, memory: &mut M) {
        self.regs.pc = self.pop_word(memory).wrapping_add(1);
    }

    /// PCから1バイトフェッチしてPCをインクリメント
    fn fetch_byte<M: MemoryBus>(&mut self, memory: &mut M) -> u8 {
        let value = memory.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    /// PCから2バイト（ワード）をフェッチ
    fn fetch_word<M: MemoryBus>(&mut self, memory: &mut M) -> u16 {
        let low = self.fetch_byte(memory) as u16;
        let high = self.fetch_byte(memory) as u16;
        (high << 8) | low
    }

    /// スタックに1バイトプッシュ
    fn push_byte<M: MemoryBus>(&mut self, memory: &mut M, value: u8) {
        memory.write(0x0100 | self.regs.sp as u16, value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    /// スタックから1バイトポップ
    fn pop_byte<M: MemoryBus>(&mut self, memory: &mut M) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        memory.read(0x0100 | self.regs.sp as u16)
    }

    /// スタックに2バイトプッシュ（上位バイト先）
    fn push_word<M: MemoryBus>(&mut self, memory: &mut M, value: u16) {
        self.push_byte(memory, (value >> 8) as u8);
        self.push_byte(memory, value as u8);
    }

    /// スタックから2バイトポップ
    fn pop_word<M: MemoryBus>(&mut self, memory: &mut M) -> u16 {
        let low = self.pop_byte(memory) as u16;
        let high = self.pop_byte(memory) as u16;
        (high << 8) | low
    }
}

#[cfg(test)]
mod tests;
