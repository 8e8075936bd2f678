use super::*;
use crate::events::NEVER;

/// テスト用のフラットな64KBメモリ
struct TestMemory {
    data: Vec<u8>,
}

impl TestMemory {
    fn new() -> Self {
        TestMemory { data: vec![0; 0x10000] }
    }

    /// プログラムを配置してリセットベクタを向ける
    fn with_program(origin: u16, program: &[u8]) -> Self {
        let mut mem = Self::new();
        mem.data[origin as usize..origin as usize + program.len()].copy_from_slice(program);
        mem.data[RESET_VECTOR as usize] = origin as u8;
        mem.data[RESET_VECTOR as usize + 1] = (origin >> 8) as u8;
        mem
    }
}

impl MemoryBus for TestMemory {
    fn read(&mut self, address: u16) -> u8 {
        self.data[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.data[address as usize] = value;
    }
}

fn boot(origin: u16, program: &[u8]) -> (Cpu, TestMemory) {
    let mut mem = TestMemory::with_program(origin, program);
    let mut cpu = Cpu::new();
    cpu.reset(&mut mem);
    (cpu, mem)
}

#[test]
fn test_reset_reads_vector() {
    let (cpu, _) = boot(0x2000, &[0xEA]);
    assert_eq!(cpu.regs.pc, 0x2000);
    assert_eq!(cpu.regs.sp, 0xFD);
    assert!(cpu.regs.get_flag(flags::IRQ_DISABLE));
    assert_eq!(cpu.total_cycles, 7);
}

#[test]
fn test_lda_immediate() {
    let (mut cpu, mut mem) = boot(0x2000, &[0xA9, 0x80]);
    let cycles = cpu.step(&mut mem);
    assert_eq!(cycles, 2);
    assert_eq!(cpu.regs.a, 0x80);
    assert_eq!(cpu.regs.pc, 0x2002);
    assert!(cpu.regs.get_flag(flags::NEGATIVE));
    assert!(!cpu.regs.get_flag(flags::ZERO));
}

#[test]
fn test_instruction_lengths_advance_pc() {
    // LDA abs / STA zp / NOP / LDX #
    let (mut cpu, mut mem) = boot(0x2000, &[0xAD, 0x00, 0x30, 0x85, 0x10, 0xEA, 0xA2, 0x01]);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.pc, 0x2003);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.pc, 0x2005);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.pc, 0x2006);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.pc, 0x2008);
}

#[test]
fn test_page_cross_adds_cycle() {
    // LDX #$20 ; LDA $20F0,X（ページ越え） ; LDA $2000,X
    let (mut cpu, mut mem) = boot(0x0600, &[0xA2, 0x20, 0xBD, 0xF0, 0x20, 0xBD, 0x00, 0x20]);
    cpu.step(&mut mem);
    assert_eq!(cpu.step(&mut mem), 5);
    assert_eq!(cpu.step(&mut mem), 4);
}

#[test]
fn test_store_never_pays_page_cross() {
    // LDX #$FF ; STA $20F0,X
    let (mut cpu, mut mem) = boot(0x0600, &[0xA2, 0xFF, 0x9D, 0xF0, 0x20]);
    cpu.step(&mut mem);
    assert_eq!(cpu.step(&mut mem), 5);
}

#[test]
fn test_branch_cycles() {
    // BNE +2（Z=0なので分岐）
    let (mut cpu, mut mem) = boot(0x2000, &[0xD0, 0x02]);
    cpu.regs.set_flag(flags::ZERO, false);
    assert_eq!(cpu.step(&mut mem), 3);
    assert_eq!(cpu.regs.pc, 0x2004);

    // 分岐しない場合は2サイクル
    let (mut cpu, mut mem) = boot(0x2000, &[0xD0, 0x02]);
    cpu.regs.set_flag(flags::ZERO, true);
    assert_eq!(cpu.step(&mut mem), 2);
    assert_eq!(cpu.regs.pc, 0x2002);

    // ページを越える分岐は4サイクル
    let (mut cpu, mut mem) = boot(0x20F0, &[0xD0, 0x20]);
    cpu.regs.set_flag(flags::ZERO, false);
    assert_eq!(cpu.step(&mut mem), 4);
    assert_eq!(cpu.regs.pc, 0x2112);
}

#[test]
fn test_decimal_adc_wraps_with_carry() {
    let (mut cpu, mut mem) = boot(0x2000, &[0x69, 0x01]);
    cpu.regs.a = 0x99;
    cpu.regs.set_flag(flags::DECIMAL, true);
    cpu.regs.set_flag(flags::CARRY, true);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.a, 0x01);
    assert!(cpu.regs.get_flag(flags::CARRY));
    assert!(!cpu.regs.get_flag(flags::ZERO));
}

#[test]
fn test_decimal_adc_simple() {
    let (mut cpu, mut mem) = boot(0x2000, &[0x69, 0x27]);
    cpu.regs.a = 0x15;
    cpu.regs.set_flag(flags::DECIMAL, true);
    cpu.regs.set_flag(flags::CARRY, false);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.a, 0x42);
    assert!(!cpu.regs.get_flag(flags::CARRY));
}

#[test]
fn test_decimal_sbc() {
    let (mut cpu, mut mem) = boot(0x2000, &[0xE9, 0x01]);
    cpu.regs.a = 0x10;
    cpu.regs.set_flag(flags::DECIMAL, true);
    cpu.regs.set_flag(flags::CARRY, true);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.a, 0x09);
    assert!(cpu.regs.get_flag(flags::CARRY));

    let (mut cpu, mut mem) = boot(0x2000, &[0xE9, 0x01]);
    cpu.regs.a = 0x00;
    cpu.regs.set_flag(flags::DECIMAL, true);
    cpu.regs.set_flag(flags::CARRY, true);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.a, 0x99);
    assert!(!cpu.regs.get_flag(flags::CARRY));
}

#[test]
fn test_binary_adc_overflow() {
    let (mut cpu, mut mem) = boot(0x2000, &[0x69, 0x50]);
    cpu.regs.a = 0x50;
    cpu.regs.set_flag(flags::CARRY, false);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.a, 0xA0);
    assert!(cpu.regs.get_flag(flags::OVERFLOW));
    assert!(cpu.regs.get_flag(flags::NEGATIVE));
    assert!(!cpu.regs.get_flag(flags::CARRY));
}

#[test]
fn test_jsr_rts() {
    let (mut cpu, mut mem) = boot(0x2000, &[0x20, 0x00, 0x30]);
    mem.data[0x3000] = 0x60;
    assert_eq!(cpu.step(&mut mem), 6);
    assert_eq!(cpu.regs.pc, 0x3000);
    assert_eq!(cpu.regs.sp, 0xFB);
    assert_eq!(cpu.step(&mut mem), 6);
    assert_eq!(cpu.regs.pc, 0x2003);
    assert_eq!(cpu.regs.sp, 0xFD);
}

#[test]
fn test_jmp_indirect_page_bug() {
    let (mut cpu, mut mem) = boot(0x2000, &[0x6C, 0xFF, 0x30]);
    mem.data[0x30FF] = 0x34;
    mem.data[0x3000] = 0x12;
    mem.data[0x3100] = 0x99;
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.pc, 0x1234);
}

#[test]
fn test_brk_and_rti() {
    let (mut cpu, mut mem) = boot(0x2000, &[0x00, 0xEA]);
    mem.data[0xFFFE] = 0x00;
    mem.data[0xFFFF] = 0x40;
    mem.data[0x4000] = 0x40; // RTI
    cpu.regs.set_flag(flags::IRQ_DISABLE, false);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.pc, 0x4000);
    // 積まれたステータスにはBフラグが立つ
    assert_ne!(mem.data[0x01FB] & flags::BREAK, 0);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.pc, 0x2002);
    assert!(!cpu.regs.get_flag(flags::IRQ_DISABLE));
}

#[test]
fn test_illegal_lax_and_sax() {
    // LAX $10 ; SAX $11
    let (mut cpu, mut mem) = boot(0x2000, &[0xA7, 0x10, 0x87, 0x11]);
    mem.data[0x10] = 0xF0;
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.a, 0xF0);
    assert_eq!(cpu.regs.x, 0xF0);
    cpu.regs.x = 0x3C;
    cpu.step(&mut mem);
    assert_eq!(mem.data[0x11], 0x30);
}

#[test]
fn test_illegal_dcp() {
    // DCP $10（メモリ減算してAと比較）
    let (mut cpu, mut mem) = boot(0x2000, &[0xC7, 0x10]);
    mem.data[0x10] = 0x43;
    cpu.regs.a = 0x42;
    assert_eq!(cpu.step(&mut mem), 5);
    assert_eq!(mem.data[0x10], 0x42);
    assert!(cpu.regs.get_flag(flags::ZERO));
    assert!(cpu.regs.get_flag(flags::CARRY));
}

#[test]
fn test_jam_is_one_byte_nop() {
    let (mut cpu, mut mem) = boot(0x2000, &[0x02, 0xEA]);
    cpu.step(&mut mem);
    assert_eq!(cpu.regs.pc, 0x2001);
}

#[test]
fn test_irq_deferred_while_disabled() {
    let (mut cpu, mut mem) = boot(0x2000, &[0xEA, 0x58, 0xEA]);
    mem.data[0xFFFE] = 0x00;
    mem.data[0xFFFF] = 0x50;

    // Iフラグが立っているので保留
    cpu.irq(&mut mem);
    cpu.irq(&mut mem);
    assert_eq!(cpu.irq_pending, 2);
    assert_eq!(cpu.regs.pc, 0x2000);

    cpu.step(&mut mem); // NOP
    cpu.step(&mut mem); // CLI
    assert_eq!(cpu.step(&mut mem), INTERRUPT_CYCLES);
    assert_eq!(cpu.regs.pc, 0x5000);
    assert_eq!(cpu.irq_pending, 1);
}

#[test]
fn test_irq_taken_when_enabled() {
    let (mut cpu, mut mem) = boot(0x2000, &[0xEA]);
    mem.data[0xFFFE] = 0x00;
    mem.data[0xFFFF] = 0x50;
    cpu.regs.set_flag(flags::IRQ_DISABLE, false);
    cpu.irq(&mut mem);
    assert_eq!(cpu.regs.pc, 0x5000);
    assert_eq!(cpu.irq_pending, 0);
    // 積まれたステータスにBフラグは立たない
    assert_eq!(mem.data[0x01FB] & flags::BREAK, 0);
}

#[test]
fn test_nmi_ignores_i_flag() {
    let (mut cpu, mut mem) = boot(0x2000, &[0xEA]);
    mem.data[0xFFFA] = 0x00;
    mem.data[0xFFFB] = 0x60;
    cpu.nmi(&mut mem);
    assert_eq!(cpu.regs.pc, 0x6000);
}

/// 実行ループ検証用のバス
struct TestBus {
    mem: TestMemory,
    event_at: u64,
    events_seen: u32,
    stall: u64,
    hooks_seen: u32,
}

impl MemoryBus for TestBus {
    fn read(&mut self, address: u16) -> u8 {
        self.mem.read(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.mem.write(address, value)
    }
}

impl SystemBus for TestBus {
    fn next_event(&self) -> u64 {
        self.event_at
    }

    fn service_events(&mut self, _cpu: &mut Cpu) {
        self.events_seen += 1;
        self.event_at = NEVER;
    }

    fn stall_until(&self) -> u64 {
        self.stall
    }

    fn pc_hook(&mut self, cpu: &mut Cpu, hook: PcHook) -> bool {
        assert_eq!(hook, PcHook::DeviceCall);
        self.hooks_seen += 1;
        cpu.regs.a = 0x55;
        cpu.simulate_rts(&mut self.mem);
        true
    }
}

fn test_bus(program: &[u8]) -> TestBus {
    TestBus {
        mem: TestMemory::with_program(0x2000, program),
        event_at: NEVER,
        events_seen: 0,
        stall: 0,
        hooks_seen: 0,
    }
}

#[test]
fn test_run_reaches_target() {
    // JMP $2000 の無限ループ
    let mut bus = test_bus(&[0x4C, 0x00, 0x20]);
    let mut cpu = Cpu::new();
    cpu.reset(&mut bus);
    cpu.run(&mut bus, 1000);
    assert!(cpu.total_cycles >= 1000);
    assert!(cpu.total_cycles < 1003);
}

#[test]
fn test_run_services_events() {
    let mut bus = test_bus(&[0x4C, 0x00, 0x20]);
    bus.event_at = 100;
    let mut cpu = Cpu::new();
    cpu.reset(&mut bus);
    cpu.run(&mut bus, 500);
    assert_eq!(bus.events_seen, 1);
}

#[test]
fn test_run_stall_skips_cycles() {
    let mut bus = test_bus(&[0xEA, 0xEA, 0xEA]);
    bus.stall = 200;
    let mut cpu = Cpu::new();
    cpu.reset(&mut bus);
    cpu.run(&mut bus, 201);
    // 停止期限まで命令は実行されない
    assert_eq!(cpu.regs.pc, 0x2001);
    assert_eq!(cpu.total_cycles, 202);
}

#[test]
fn test_run_pc_hook() {
    let mut bus = test_bus(&[0x20, 0x00, 0x30, 0xEA]);
    let mut cpu = Cpu::new();
    cpu.reset(&mut bus);
    cpu.set_pc_hook(0x3000, PcHook::DeviceCall);
    cpu.run(&mut bus, cpu.total_cycles + 8);
    assert_eq!(bus.hooks_seen, 1);
    assert_eq!(cpu.regs.a, 0x55);
    assert_eq!(cpu.regs.pc, 0x2004);

    cpu.clear_pc_hook(0x3000, PcHook::DeviceCall);
    assert_eq!(cpu.pc_hook_at(0x3000), None);
}
