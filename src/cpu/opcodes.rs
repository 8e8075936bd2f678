//! オペコードの実装
//!
//! 6502の公式オペコードと、よく使われる非公式オペコードを実装。
//! 未定義（JAMなど）はNOPとして扱い、ソフトウェアを止めない。

use super::addressing::AddressingMode::{self, *};
use super::{flags, Cpu, MemoryBus, IRQ_VECTOR};

/// オペコードごとの基本サイクル数
#[rustfmt::skip]
pub const OPCODE_CYCLES: [u8; 256] = [
    // 0 1  2  3  4  5  6  7  8  9  A  B  C  D  E  F
    7, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 4, 4, 6, 6, // 0x00
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 0x10
    6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 4, 4, 6, 6, // 0x20
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 0x30
    6, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 3, 4, 6, 6, // 0x40
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 0x50
    6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 5, 4, 6, 6, // 0x60
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 0x70
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4, // 0x80
    2, 6, 2, 6, 4, 4, 4, 4, 2, 5, 2, 5, 5, 5, 5, 5, // 0x90
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4, // 0xA0
    2, 5, 2, 5, 4, 4, 4, 4, 2, 4, 2, 4, 4, 4, 4, 4, // 0xB0
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6, // 0xC0
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 0xD0
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6, // 0xE0
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 0xF0
];

impl Cpu {
    /// オペコードを実行
    pub(super) fn execute_opcode<M: MemoryBus>(&mut self, memory: &mut M, opcode: u8) {
        match opcode {
            // LDA - Load Accumulator
            0xA9 => self.lda(memory, Immediate),
            0xA5 => self.lda(memory, ZeroPage),
            0xB5 => self.lda(memory, ZeroPageX),
            0xAD => self.lda(memory, Absolute),
            0xBD => self.lda(memory, AbsoluteX),
            0xB9 => self.lda(memory, AbsoluteY),
            0xA1 => self.lda(memory, IndirectX),
            0xB1 => self.lda(memory, IndirectY),

            // LDX - Load X Register
            0xA2 => self.ldx(memory, Immediate),
            0xA6 => self.ldx(memory, ZeroPage),
            0xB6 => self.ldx(memory, ZeroPageY),
            0xAE => self.ldx(memory, Absolute),
            0xBE => self.ldx(memory, AbsoluteY),

            // LDY - Load Y Register
            0xA0 => self.ldy(memory, Immediate),
            0xA4 => self.ldy(memory, ZeroPage),
            0xB4 => self.ldy(memory, ZeroPageX),
            0xAC => self.ldy(memory, Absolute),
            0xBC => self.ldy(memory, AbsoluteX),

            // STA / STX / STY
            0x85 => self.store(memory, ZeroPage, self.regs.a),
            0x95 => self.store(memory, ZeroPageX, self.regs.a),
            0x8D => self.store(memory, Absolute, self.regs.a),
            0x9D => self.store(memory, AbsoluteX, self.regs.a),
            0x99 => self.store(memory, AbsoluteY, self.regs.a),
            0x81 => self.store(memory, IndirectX, self.regs.a),
            0x91 => self.store(memory, IndirectY, self.regs.a),
            0x86 => self.store(memory, ZeroPage, self.regs.x),
            0x96 => self.store(memory, ZeroPageY, self.regs.x),
            0x8E => self.store(memory, Absolute, self.regs.x),
            0x84 => self.store(memory, ZeroPage, self.regs.y),
            0x94 => self.store(memory, ZeroPageX, self.regs.y),
            0x8C => self.store(memory, Absolute, self.regs.y),

            // Transfer Instructions
            0xAA => { self.regs.x = self.regs.a; self.regs.update_zero_negative_flags(self.regs.x); } // TAX
            0x8A => { self.regs.a = self.regs.x; self.regs.update_zero_negative_flags(self.regs.a); } // TXA
            0xA8 => { self.regs.y = self.regs.a; self.regs.update_zero_negative_flags(self.regs.y); } // TAY
            0x98 => { self.regs.a = self.regs.y; self.regs.update_zero_negative_flags(self.regs.a); } // TYA
            0xBA => { self.regs.x = self.regs.sp; self.regs.update_zero_negative_flags(self.regs.x); } // TSX
            0x9A => self.regs.sp = self.regs.x, // TXS

            // Stack Instructions
            0x48 => self.push_byte(memory, self.regs.a), // PHA
            0x68 => { // PLA
                self.regs.a = self.pop_byte(memory);
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            0x08 => self.push_byte(memory, self.regs.status | flags::BREAK | flags::UNUSED), // PHP
            0x28 => { // PLP
                let value = self.pop_byte(memory);
                self.regs.status = (value | flags::UNUSED) & !flags::BREAK;
            }

            // Arithmetic - ADC
            0x69 => self.adc(memory, Immediate),
            0x65 => self.adc(memory, ZeroPage),
            0x75 => self.adc(memory, ZeroPageX),
            0x6D => self.adc(memory, Absolute),
            0x7D => self.adc(memory, AbsoluteX),
            0x79 => self.adc(memory, AbsoluteY),
            0x61 => self.adc(memory, IndirectX),
            0x71 => self.adc(memory, IndirectY),

            // Arithmetic - SBC（$EBは非公式の同等品）
            0xE9 | 0xEB => self.sbc(memory, Immediate),
            0xE5 => self.sbc(memory, ZeroPage),
            0xF5 => self.sbc(memory, ZeroPageX),
            0xED => self.sbc(memory, Absolute),
            0xFD => self.sbc(memory, AbsoluteX),
            0xF9 => self.sbc(memory, AbsoluteY),
            0xE1 => self.sbc(memory, IndirectX),
            0xF1 => self.sbc(memory, IndirectY),

            // Compare
            0xC9 => self.compare(memory, Immediate, self.regs.a),
            0xC5 => self.compare(memory, ZeroPage, self.regs.a),
            0xD5 => self.compare(memory, ZeroPageX, self.regs.a),
            0xCD => self.compare(memory, Absolute, self.regs.a),
            0xDD => self.compare(memory, AbsoluteX, self.regs.a),
            0xD9 => self.compare(memory, AbsoluteY, self.regs.a),
            0xC1 => self.compare(memory, IndirectX, self.regs.a),
            0xD1 => self.compare(memory, IndirectY, self.regs.a),
            0xE0 => self.compare(memory, Immediate, self.regs.x),
            0xE4 => self.compare(memory, ZeroPage, self.regs.x),
            0xEC => self.compare(memory, Absolute, self.regs.x),
            0xC0 => self.compare(memory, Immediate, self.regs.y),
            0xC4 => self.compare(memory, ZeroPage, self.regs.y),
            0xCC => self.compare(memory, Absolute, self.regs.y),

            // Increment/Decrement
            0xE6 => self.inc(memory, ZeroPage),
            0xF6 => self.inc(memory, ZeroPageX),
            0xEE => self.inc(memory, Absolute),
            0xFE => self.inc(memory, AbsoluteX),
            0xC6 => self.dec(memory, ZeroPage),
            0xD6 => self.dec(memory, ZeroPageX),
            0xCE => self.dec(memory, Absolute),
            0xDE => self.dec(memory, AbsoluteX),
            0xE8 => { self.regs.x = self.regs.x.wrapping_add(1); self.regs.update_zero_negative_flags(self.regs.x); } // INX
            0xC8 => { self.regs.y = self.regs.y.wrapping_add(1); self.regs.update_zero_negative_flags(self.regs.y); } // INY
            0xCA => { self.regs.x = self.regs.x.wrapping_sub(1); self.regs.update_zero_negative_flags(self.regs.x); } // DEX
            0x88 => { self.regs.y = self.regs.y.wrapping_sub(1); self.regs.update_zero_negative_flags(self.regs.y); } // DEY

            // Logical
            0x29 => self.and(memory, Immediate),
            0x25 => self.and(memory, ZeroPage),
            0x35 => self.and(memory, ZeroPageX),
            0x2D => self.and(memory, Absolute),
            0x3D => self.and(memory, AbsoluteX),
            0x39 => self.and(memory, AbsoluteY),
            0x21 => self.and(memory, IndirectX),
            0x31 => self.and(memory, IndirectY),
            0x09 => self.ora(memory, Immediate),
            0x05 => self.ora(memory, ZeroPage),
            0x15 => self.ora(memory, ZeroPageX),
            0x0D => self.ora(memory, Absolute),
            0x1D => self.ora(memory, AbsoluteX),
            0x19 => self.ora(memory, AbsoluteY),
            0x01 => self.ora(memory, IndirectX),
            0x11 => self.ora(memory, IndirectY),
            0x49 => self.eor(memory, Immediate),
            0x45 => self.eor(memory, ZeroPage),
            0x55 => self.eor(memory, ZeroPageX),
            0x4D => self.eor(memory, Absolute),
            0x5D => self.eor(memory, AbsoluteX),
            0x59 => self.eor(memory, AbsoluteY),
            0x41 => self.eor(memory, IndirectX),
            0x51 => self.eor(memory, IndirectY),

            // Shifts
            0x0A => { self.modify(memory, Accumulator, Cpu::asl_value); }
            0x06 => { self.modify(memory, ZeroPage, Cpu::asl_value); }
            0x16 => { self.modify(memory, ZeroPageX, Cpu::asl_value); }
            0x0E => { self.modify(memory, Absolute, Cpu::asl_value); }
            0x1E => { self.modify(memory, AbsoluteX, Cpu::asl_value); }
            0x4A => { self.modify(memory, Accumulator, Cpu::lsr_value); }
            0x46 => { self.modify(memory, ZeroPage, Cpu::lsr_value); }
            0x56 => { self.modify(memory, ZeroPageX, Cpu::lsr_value); }
            0x4E => { self.modify(memory, Absolute, Cpu::lsr_value); }
            0x5E => { self.modify(memory, AbsoluteX, Cpu::lsr_value); }
            0x2A => { self.modify(memory, Accumulator, Cpu::rol_value); }
            0x26 => { self.modify(memory, ZeroPage, Cpu::rol_value); }
            0x36 => { self.modify(memory, ZeroPageX, Cpu::rol_value); }
            0x2E => { self.modify(memory, Absolute, Cpu::rol_value); }
            0x3E => { self.modify(memory, AbsoluteX, Cpu::rol_value); }
            0x6A => { self.modify(memory, Accumulator, Cpu::ror_value); }
            0x66 => { self.modify(memory, ZeroPage, Cpu::ror_value); }
            0x76 => { self.modify(memory, ZeroPageX, Cpu::ror_value); }
            0x6E => { self.modify(memory, Absolute, Cpu::ror_value); }
            0x7E => { self.modify(memory, AbsoluteX, Cpu::ror_value); }

            // BIT test
            0x24 => self.bit(memory, ZeroPage),
            0x2C => self.bit(memory, Absolute),

            // Branch Instructions
            0x10 => self.branch(memory, !self.regs.get_flag(flags::NEGATIVE)), // BPL
            0x30 => self.branch(memory, self.regs.get_flag(flags::NEGATIVE)),  // BMI
            0x50 => self.branch(memory, !self.regs.get_flag(flags::OVERFLOW)), // BVC
            0x70 => self.branch(memory, self.regs.get_flag(flags::OVERFLOW)),  // BVS
            0x90 => self.branch(memory, !self.regs.get_flag(flags::CARRY)),    // BCC
            0xB0 => self.branch(memory, self.regs.get_flag(flags::CARRY)),     // BCS
            0xD0 => self.branch(memory, !self.regs.get_flag(flags::ZERO)),     // BNE
            0xF0 => self.branch(memory, self.regs.get_flag(flags::ZERO)),      // BEQ

            // Jump/Call
            0x4C => self.regs.pc = self.write_address(memory, Absolute),
            0x6C => self.regs.pc = self.write_address(memory, Indirect),
            0x20 => self.jsr(memory),
            0x60 => self.simulate_rts(memory),

            // Interrupts
            0x00 => self.brk(memory),
            0x40 => self.rti(memory),

            // Flag Instructions
            0x18 => self.regs.set_flag(flags::CARRY, false),       // CLC
            0x38 => self.regs.set_flag(flags::CARRY, true),        // SEC
            0x58 => self.regs.set_flag(flags::IRQ_DISABLE, false), // CLI
            0x78 => self.regs.set_flag(flags::IRQ_DISABLE, true),  // SEI
            0xB8 => self.regs.set_flag(flags::OVERFLOW, false),    // CLV
            0xD8 => self.regs.set_flag(flags::DECIMAL, false),     // CLD
            0xF8 => self.regs.set_flag(flags::DECIMAL, true),      // SED

            //--------------------------------------------------
            // 非公式オペコード
            //--------------------------------------------------

            // SLO (ASL + ORA)
            0x07 => self.slo(memory, ZeroPage),
            0x17 => self.slo(memory, ZeroPageX),
            0x0F => self.slo(memory, Absolute),
            0x1F => self.slo(memory, AbsoluteX),
            0x1B => self.slo(memory, AbsoluteY),
            0x03 => self.slo(memory, IndirectX),
            0x13 => self.slo(memory, IndirectY),

            // RLA (ROL + AND)
            0x27 => self.rla(memory, ZeroPage),
            0x37 => self.rla(memory, ZeroPageX),
            0x2F => self.rla(memory, Absolute),
            0x3F => self.rla(memory, AbsoluteX),
            0x3B => self.rla(memory, AbsoluteY),
            0x23 => self.rla(memory, IndirectX),
            0x33 => self.rla(memory, IndirectY),

            // SRE (LSR + EOR)
            0x47 => self.sre(memory, ZeroPage),
            0x57 => self.sre(memory, ZeroPageX),
            0x4F => self.sre(memory, Absolute),
            0x5F => self.sre(memory, AbsoluteX),
            0x5B => self.sre(memory, AbsoluteY),
            0x43 => self.sre(memory, IndirectX),
            0x53 => self.sre(memory, IndirectY),

            // RRA (ROR + ADC)
            0x67 => self.rra(memory, ZeroPage),
            0x77 => self.rra(memory, ZeroPageX),
            0x6F => self.rra(memory, Absolute),
            0x7F => self.rra(memory, AbsoluteX),
            0x7B => self.rra(memory, AbsoluteY),
            0x63 => self.rra(memory, IndirectX),
            0x73 => self.rra(memory, IndirectY),

            // SAX (store A & X)
            0x87 => self.store(memory, ZeroPage, self.regs.a & self.regs.x),
            0x97 => self.store(memory, ZeroPageY, self.regs.a & self.regs.x),
            0x8F => self.store(memory, Absolute, self.regs.a & self.regs.x),
            0x83 => self.store(memory, IndirectX, self.regs.a & self.regs.x),

            // LAX (LDA + LDX)
            0xA7 => self.lax(memory, ZeroPage),
            0xB7 => self.lax(memory, ZeroPageY),
            0xAF => self.lax(memory, Absolute),
            0xBF => self.lax(memory, AbsoluteY),
            0xA3 => self.lax(memory, IndirectX),
            0xB3 => self.lax(memory, IndirectY),

            // DCP (DEC + CMP)
            0xC7 => self.dcp(memory, ZeroPage),
            0xD7 => self.dcp(memory, ZeroPageX),
            0xCF => self.dcp(memory, Absolute),
            0xDF => self.dcp(memory, AbsoluteX),
            0xDB => self.dcp(memory, AbsoluteY),
            0xC3 => self.dcp(memory, IndirectX),
            0xD3 => self.dcp(memory, IndirectY),

            // ISC (INC + SBC)
            0xE7 => self.isc(memory, ZeroPage),
            0xF7 => self.isc(memory, ZeroPageX),
            0xEF => self.isc(memory, Absolute),
            0xFF => self.isc(memory, AbsoluteX),
            0xFB => self.isc(memory, AbsoluteY),
            0xE3 => self.isc(memory, IndirectX),
            0xF3 => self.isc(memory, IndirectY),

            // 即値系
            0x0B | 0x2B => { // ANC
                let value = self.read_operand(memory, Immediate);
                self.regs.a &= value;
                self.regs.update_zero_negative_flags(self.regs.a);
                self.regs.set_flag(flags::CARRY, self.regs.a & 0x80 != 0);
            }
            0x4B => { // ALR
                let value = self.read_operand(memory, Immediate);
                let masked = self.regs.a & value;
                self.regs.a = self.lsr_value(masked);
            }
            0x6B => self.arr(memory),
            0xCB => { // SBX
                let value = self.read_operand(memory, Immediate);
                let ax = self.regs.a & self.regs.x;
                self.regs.set_flag(flags::CARRY, ax >= value);
                self.regs.x = ax.wrapping_sub(value);
                self.regs.update_zero_negative_flags(self.regs.x);
            }
            0x8B => { // ANE（不安定、代表的な定数$EEを使用）
                let value = self.read_operand(memory, Immediate);
                self.regs.a = (self.regs.a | 0xEE) & self.regs.x & value;
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            0xAB => { // LXA（不安定、代表的な定数$EEを使用）
                let value = self.read_operand(memory, Immediate);
                self.regs.a = (self.regs.a | 0xEE) & value;
                self.regs.x = self.regs.a;
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            0xBB => { // LAS
                let value = self.read_operand(memory, AbsoluteY) & self.regs.sp;
                self.regs.a = value;
                self.regs.x = value;
                self.regs.sp = value;
                self.regs.update_zero_negative_flags(value);
            }

            // 上位バイト+1とのANDを書き込む系
            0x93 => self.store_high_and(memory, IndirectY, self.regs.a & self.regs.x), // SHA
            0x9F => self.store_high_and(memory, AbsoluteY, self.regs.a & self.regs.x), // SHA
            0x9C => self.store_high_and(memory, AbsoluteX, self.regs.y),               // SHY
            0x9E => self.store_high_and(memory, AbsoluteY, self.regs.x),               // SHX
            0x9B => { // TAS
                self.regs.sp = self.regs.a & self.regs.x;
                self.store_high_and(memory, AbsoluteY, self.regs.sp);
            }

            // NOP（1バイト）
            0xEA | 0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => {}

            // NOP（オペランド読み飛ばし）
            0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => { self.read_operand(memory, Immediate); }
            0x04 | 0x44 | 0x64 => { self.read_operand(memory, ZeroPage); }
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => { self.read_operand(memory, ZeroPageX); }
            0x0C => { self.read_operand(memory, Absolute); }
            0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => { self.read_operand(memory, AbsoluteX); }

            // JAM: 本物はCPUが停止するが、ここでは1バイトNOP扱い
            0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72
            | 0x92 | 0xB2 | 0xD2 | 0xF2 => {}
        }
    }

    //--------------------------------------------------
    // ロード/ストア
    //--------------------------------------------------
    fn lda<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.a = self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    fn ldx<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.x = self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.x);
    }

    fn ldy<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.y = self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.y);
    }

    fn lax<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let value = self.read_operand(memory, mode);
        self.regs.a = value;
        self.regs.x = value;
        self.regs.update_zero_negative_flags(value);
    }

    fn store<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode, value: u8) {
        let addr = self.write_address(memory, mode);
        memory.write(addr, value);
    }

    /// SHA/SHX/SHY/TAS: 値 & (ベースの上位バイト+1) を書く
    fn store_high_and<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode, value: u8) {
        let addr = self.write_address(memory, mode);
        let high = ((addr.wrapping_sub(match mode {
            AbsoluteX => self.regs.x as u16,
            _ => self.regs.y as u16,
        })) >> 8) as u8;
        memory.write(addr, value & high.wrapping_add(1));
    }

    //--------------------------------------------------
    // ADC - Add with Carry
    //--------------------------------------------------

    /// 加算。BCDモードではNMOSの挙動を再現する:
    /// Zは2進の結果、N/Vは上位桁の補正前の中間値、Cは補正後から求める
    pub(super) fn do_adc(&mut self, value: u8) {
        let a = self.regs.a;
        let carry = if self.regs.get_flag(flags::CARRY) { 1u16 } else { 0u16 };
        let binary = a as u16 + value as u16 + carry;

        if self.regs.get_flag(flags::DECIMAL) {
            let mut low = (a & 0x0F) as u16 + (value & 0x0F) as u16 + carry;
            if low > 9 {
                low += 6;
            }
            let mut high = (a >> 4) as u16 + (value >> 4) as u16 + if low > 0x0F { 1 } else { 0 };

            self.regs.set_flag(flags::ZERO, binary & 0xFF == 0);
            self.regs.set_flag(flags::NEGATIVE, high & 0x08 != 0);
            self.regs.set_flag(
                flags::OVERFLOW,
                ((high << 4) as u8 ^ a) & 0x80 != 0 && (a ^ value) & 0x80 == 0,
            );

            if high > 9 {
                high += 6;
            }
            self.regs.set_flag(flags::CARRY, high > 0x0F);
            self.regs.a = ((high << 4) | (low & 0x0F)) as u8;
        } else {
            let result8 = binary as u8;
            self.regs.set_flag(flags::CARRY, binary > 0xFF);
            self.regs.set_flag(
                flags::OVERFLOW,
                ((a ^ result8) & (value ^ result8) & 0x80) != 0,
            );
            self.regs.update_zero_negative_flags(result8);
            self.regs.a = result8;
        }
    }

    fn adc<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let value = self.read_operand(memory, mode);
        self.do_adc(value);
    }

    //--------------------------------------------------
    // SBC - Subtract with Carry
    //--------------------------------------------------

    /// 減算。BCDモードでもフラグはすべて2進の結果から求め、Aだけ補正する
    pub(super) fn do_sbc(&mut self, value: u8) {
        let a = self.regs.a;
        let borrow = if self.regs.get_flag(flags::CARRY) { 0i16 } else { 1i16 };
        let binary = a as i16 - value as i16 - borrow;
        let result8 = binary as u8;

        self.regs.set_flag(flags::CARRY, binary >= 0);
        self.regs.set_flag(flags::OVERFLOW, ((a ^ value) & (a ^ result8) & 0x80) != 0);
        self.regs.update_zero_negative_flags(result8);

        if self.regs.get_flag(flags::DECIMAL) {
            let mut low = (a & 0x0F) as i16 - (value & 0x0F) as i16 - borrow;
            let mut high = (a >> 4) as i16 - (value >> 4) as i16;
            if low & 0x10 != 0 {
                low -= 6;
                high -= 1;
            }
            if high & 0x10 != 0 {
                high -= 6;
            }
            self.regs.a = (((high << 4) as u8) & 0xF0) | ((low as u8) & 0x0F);
        } else {
            self.regs.a = result8;
        }
    }

    fn sbc<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let value = self.read_operand(memory, mode);
        self.do_sbc(value);
    }

    //--------------------------------------------------
    // 比較・論理
    //--------------------------------------------------
    fn do_compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.regs.set_flag(flags::CARRY, register >= value);
        self.regs.update_zero_negative_flags(result);
    }

    fn compare<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode, register: u8) {
        let value = self.read_operand(memory, mode);
        self.do_compare(register, value);
    }

    fn and<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.a &= self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    fn ora<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.a |= self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    fn eor<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.a ^= self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    fn bit<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let value = self.read_operand(memory, mode);
        self.regs.set_flag(flags::ZERO, (self.regs.a & value) == 0);
        self.regs.set_flag(flags::NEGATIVE, value & 0x80 != 0);
        self.regs.set_flag(flags::OVERFLOW, value & 0x40 != 0);
    }

    //--------------------------------------------------
    // インクリメント/シフト（値を返す形）
    //--------------------------------------------------
    fn inc<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.modify(memory, mode, |cpu, v| {
            let r = v.wrapping_add(1);
            cpu.regs.update_zero_negative_flags(r);
            r
        });
    }

    fn dec<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.modify(memory, mode, |cpu, v| {
            let r = v.wrapping_sub(1);
            cpu.regs.update_zero_negative_flags(r);
            r
        });
    }

    fn asl_value(&mut self, value: u8) -> u8 {
        self.regs.set_flag(flags::CARRY, value & 0x80 != 0);
        let r = value << 1;
        self.regs.update_zero_negative_flags(r);
        r
    }

    fn lsr_value(&mut self, value: u8) -> u8 {
        self.regs.set_flag(flags::CARRY, value & 0x01 != 0);
        let r = value >> 1;
        self.regs.update_zero_negative_flags(r);
        r
    }

    fn rol_value(&mut self, value: u8) -> u8 {
        let carry_in = self.regs.get_flag(flags::CARRY) as u8;
        self.regs.set_flag(flags::CARRY, value & 0x80 != 0);
        let r = (value << 1) | carry_in;
        self.regs.update_zero_negative_flags(r);
        r
    }

    fn ror_value(&mut self, value: u8) -> u8 {
        let carry_in = if self.regs.get_flag(flags::CARRY) { 0x80 } else { 0 };
        self.regs.set_flag(flags::CARRY, value & 0x01 != 0);
        let r = (value >> 1) | carry_in;
        self.regs.update_zero_negative_flags(r);
        r
    }

    //--------------------------------------------------
    // 非公式RMW複合命令
    //--------------------------------------------------
    fn slo<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let r = self.modify(memory, mode, Cpu::asl_value);
        self.regs.a |= r;
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    fn rla<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let r = self.modify(memory, mode, Cpu::rol_value);
        self.regs.a &= r;
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    fn sre<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let r = self.modify(memory, mode, Cpu::lsr_value);
        self.regs.a ^= r;
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    fn rra<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let r = self.modify(memory, mode, Cpu::ror_value);
        self.do_adc(r);
    }

    fn dcp<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let r = self.modify(memory, mode, |_, v| v.wrapping_sub(1));
        self.do_compare(self.regs.a, r);
    }

    fn isc<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let r = self.modify(memory, mode, |_, v| v.wrapping_add(1));
        self.do_sbc(r);
    }

    fn arr<M: MemoryBus>(&mut self, memory: &mut M) {
        let value = self.read_operand(memory, Immediate);
        let carry_in = if self.regs.get_flag(flags::CARRY) { 0x80 } else { 0 };
        let r = ((self.regs.a & value) >> 1) | carry_in;
        self.regs.a = r;
        self.regs.update_zero_negative_flags(r);
        self.regs.set_flag(flags::CARRY, r & 0x40 != 0);
        self.regs.set_flag(flags::OVERFLOW, ((r >> 6) ^ (r >> 5)) & 0x01 != 0);
    }

    //--------------------------------------------------
    // ジャンプ・割り込み
    //--------------------------------------------------
    fn jsr<M: MemoryBus>(&mut self, memory: &mut M) {
        let target = self.fetch_word(memory);
        // 戻りアドレス-1をプッシュ
        self.push_word(memory, self.regs.pc.wrapping_sub(1));
        self.regs.pc = target;
    }

    fn brk<M: MemoryBus>(&mut self, memory: &mut M) {
        // BRKは2バイト命令扱い（パディングバイトを飛ばす）
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.push_word(memory, self.regs.pc);
        self.push_byte(memory, self.regs.status | flags::BREAK | flags::UNUSED);
        self.regs.set_flag(flags::IRQ_DISABLE, true);
        self.regs.pc = self.read_vector(memory, IRQ_VECTOR);
    }

    fn rti<M: MemoryBus>(&mut self, memory: &mut M) {
        let status = self.pop_byte(memory);
        self.regs.status = (status | flags::UNUSED) & !flags::BREAK;
        self.regs.pc = self.pop_word(memory);
    }
}
