//! アドレッシングモードの実装
//!
//! 6502の13種類のアドレッシングモードを定義し、命令ごとに
//! 実効アドレス（またはアキュムレータ）を求める

use super::{Cpu, MemoryBus};

/// アドレッシングモードの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// 即値（Immediate） - #$nn
    Immediate,
    /// 絶対 - $nnnn
    Absolute,
    /// ゼロページ - $nn
    ZeroPage,
    /// アキュムレータ - A
    Accumulator,
    /// 暗黙的
    Implied,
    /// 間接,X（プリインデックス） - ($nn,X)
    IndirectX,
    /// 間接,Y（ポストインデックス） - ($nn),Y
    IndirectY,
    /// ゼロページ,X - $nn,X
    ZeroPageX,
    /// ゼロページ,Y - $nn,Y
    ZeroPageY,
    /// 絶対,X - $nnnn,X
    AbsoluteX,
    /// 絶対,Y - $nnnn,Y
    AbsoluteY,
    /// 相対（ブランチ命令用） - $nn
    Relative,
    /// 間接（JMP専用） - ($nnnn)
    Indirect,
}

impl AddressingMode {
    /// オペコードを含む命令長
    pub fn instruction_length(self) -> u16 {
        match self {
            AddressingMode::Accumulator | AddressingMode::Implied => 1,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndirectX
            | AddressingMode::IndirectY
            | AddressingMode::Relative => 2,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => 3,
        }
    }
}

/// 命令のオペランド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// アキュムレータを直接操作
    Accumulator,
    /// メモリアドレス（ページ境界を越えたか）
    Address { addr: u16, page_crossed: bool },
    /// オペランドなし
    None,
}

#[inline]
fn crosses_page(base: u16, addr: u16) -> bool {
    (base & 0xFF00) != (addr & 0xFF00)
}

impl Cpu {
    /// オペランドを解決する（PCはオペランド分だけ進む）
    pub(super) fn resolve_operand<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) -> Operand {
        let (addr, page_crossed) = match mode {
            AddressingMode::Accumulator => return Operand::Accumulator,
            AddressingMode::Implied => return Operand::None,
            AddressingMode::Immediate | AddressingMode::Relative => {
                let addr = self.regs.pc;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                (addr, false)
            }
            AddressingMode::ZeroPage => (self.fetch_byte(memory) as u16, false),
            AddressingMode::ZeroPageX => {
                let base = self.fetch_byte(memory);
                (base.wrapping_add(self.regs.x) as u16, false)
            }
            AddressingMode::ZeroPageY => {
                let base = self.fetch_byte(memory);
                (base.wrapping_add(self.regs.y) as u16, false)
            }
            AddressingMode::Absolute => (self.fetch_word(memory), false),
            AddressingMode::AbsoluteX => {
                let base = self.fetch_word(memory);
                let addr = base.wrapping_add(self.regs.x as u16);
                (addr, crosses_page(base, addr))
            }
            AddressingMode::AbsoluteY => {
                let base = self.fetch_word(memory);
                let addr = base.wrapping_add(self.regs.y as u16);
                (addr, crosses_page(base, addr))
            }
            AddressingMode::IndirectX => {
                let ptr = self.fetch_byte(memory).wrapping_add(self.regs.x);
                (self.read_zp_word(memory, ptr), false)
            }
            AddressingMode::IndirectY => {
                let ptr = self.fetch_byte(memory);
                let base = self.read_zp_word(memory, ptr);
                let addr = base.wrapping_add(self.regs.y as u16);
                (addr, crosses_page(base, addr))
            }
            AddressingMode::Indirect => {
                let ptr = self.fetch_word(memory);
                // NMOSのバグ: 下位バイトが$FFのとき上位は同じページから読む
                let high_ptr = (ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF);
                let low = memory.read(ptr) as u16;
                let high = memory.read(high_ptr) as u16;
                ((high << 8) | low, false)
            }
        };
        Operand::Address { addr, page_crossed }
    }

    /// ゼロページからワードを読む（ページ内でラップ）
    fn read_zp_word<M: MemoryBus>(&mut self, memory: &mut M, ptr: u8) -> u16 {
        let low = memory.read(ptr as u16) as u16;
        let high = memory.read(ptr.wrapping_add(1) as u16) as u16;
        (high << 8) | low
    }

    /// 読み出し命令のオペランド値（ページ境界で +1 サイクル）
    pub(super) fn read_operand<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) -> u8 {
        match self.resolve_operand(memory, mode) {
            Operand::Accumulator => self.regs.a,
            Operand::Address { addr, page_crossed } => {
                if page_crossed {
                    self.cycles += 1;
                }
                memory.read(addr)
            }
            Operand::None => 0,
        }
    }

    /// 書き込み命令の実効アドレス（ペナルティなし、基本サイクルに含まれる）
    pub(super) fn write_address<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) -> u16 {
        match self.resolve_operand(memory, mode) {
            Operand::Address { addr, .. } => addr,
            _ => 0,
        }
    }

    /// リードモディファイライト
    pub(super) fn modify<M, F>(&mut self, memory: &mut M, mode: AddressingMode, f: F) -> u8
    where
        M: MemoryBus,
        F: FnOnce(&mut Cpu, u8) -> u8,
    {
        match self.resolve_operand(memory, mode) {
            Operand::Accumulator => {
                let result = f(self, self.regs.a);
                self.regs.a = result;
                result
            }
            Operand::Address { addr, .. } => {
                let value = memory.read(addr);
                let result = f(self, value);
                memory.write(addr, result);
                result
            }
            Operand::None => 0,
        }
    }

    /// ブランチを実行（共通ロジック）
    pub(super) fn branch<M: MemoryBus>(&mut self, memory: &mut M, condition: bool) {
        let offset = memory.read(self.regs.pc) as i8;
        self.regs.pc = self.regs.pc.wrapping_add(1);

        if condition {
            let old_pc = self.regs.pc;
            self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
            self.cycles += 1;
            // ページ境界を越えた場合、追加サイクル
            if crosses_page(old_pc, self.regs.pc) {
                self.cycles += 1;
            }
        }
    }
}
