//! Board-level scenarios driven through the public machine interface.

use std::io::Write;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use malta32::cpu::cp0::{self, CAUSE_EXCODE, CAUSE_IP, STATUS_IE, STATUS_IM};
use malta32::cpu::decode::*;
use malta32::cpu::exception::{ExceptionRequest, EX_SYSCALL, EXV_EXCEPTION};
use malta32::cpu::isn;
use malta32::devices::malta::{INT_SOUTHBRIDGE_INTR, IRQ_TIMER};
use malta32::{ByteOrder, Machine, MachineConfig, SystemEvent, KSEG0, KSEG1};

const PIIX4: u32 = KSEG1 + 0x1000_0000;
const PIT_COUNTER0: u32 = PIIX4 + 0x40;
const PIT_TCW: u32 = PIIX4 + 0x43;
const COM1_TX: u32 = PIIX4 + 0x3f8;
const GT_IACK: u32 = KSEG1 + 0x1be0_0000 + 0xc34;

fn machine(order: ByteOrder) -> (Machine, Receiver<SystemEvent>) {
    Machine::new(MachineConfig {
        ram_mb: 64,
        byte_order: order,
    })
}

// hand assembled encodings
fn special(rs: u32, rt: u32, rd: u32, sa: u32, func: u32) -> u32 {
    (rs << 21) | (rt << 16) | (rd << 11) | (sa << 6) | func
}

fn special2(rs: u32, rt: u32, rd: u32, func: u32) -> u32 {
    (OP_SPECIAL2 << 26) | (rs << 21) | (rt << 16) | (rd << 11) | func
}

fn immediate(op: u32, rs: u32, rt: u32, imm16: u32) -> u32 {
    (op << 26) | (rs << 21) | (rt << 16) | (imm16 & 0xffff)
}

const NOP: u32 = 0;

/// Place a program at `base`, point the cpu at it and run `steps`
/// instructions.
fn run_program(m: &mut Machine, base: u32, program: &[u32], steps: usize) {
    for (n, &word) in program.iter().enumerate() {
        m.cpu_mut()
            .memory_mut()
            .store_word(base + (n as u32) * 4, word)
            .unwrap();
    }
    m.cpu_mut().set_pc(base);
    for _ in 0..steps {
        m.cpu_mut().step().unwrap();
    }
}

#[test]
fn addu_wraps_like_64_bit_reference() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    let vectors: [(u32, u32); 6] = [
        (0, 0),
        (1, u32::MAX),
        (0x8000_0000, 0x8000_0000),
        (0xdead_beef, 0x1234_5678),
        (u32::MAX, u32::MAX),
        (0x7fff_ffff, 1),
    ];
    for (a, b) in vectors {
        let cpu = m.cpu_mut();
        cpu.set_register(8, a);
        cpu.set_register(9, b);
        run_program(&mut m, KSEG0 + 0x1000, &[special(8, 9, 10, 0, FN_ADDU)], 1);
        let expected = ((a as u64 + b as u64) & 0xffff_ffff) as u32;
        assert_eq!(m.cpu().register(10), expected, "addu {:#x}+{:#x}", a, b);
    }
}

#[test]
fn sll_matches_reference_for_every_shift() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    for sa_v in 0..32 {
        m.cpu_mut().set_register(9, 0xdead_beef);
        run_program(&mut m, KSEG0 + 0x1000, &[special(0, 9, 10, sa_v, FN_SLL)], 1);
        let expected = ((0xdead_beefu64 << sa_v) & 0xffff_ffff) as u32;
        assert_eq!(m.cpu().register(10), expected, "sll sa={}", sa_v);
    }
}

#[test]
fn mult_family_hi_lo_semantics() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    let (a, b) = (0x8000_0001u32, 0x7fff_fff3u32);

    // signed product split at bit 32
    let cpu = m.cpu_mut();
    cpu.set_register(8, a);
    cpu.set_register(9, b);
    run_program(&mut m, KSEG0 + 0x1000, &[special(8, 9, 0, 0, FN_MULT)], 1);
    let signed = (a as i32 as i64).wrapping_mul(b as i32 as i64) as u64;
    assert_eq!(m.cpu().lo(), signed as u32);
    assert_eq!(m.cpu().hi(), (signed >> 32) as u32);

    // unsigned product
    run_program(&mut m, KSEG0 + 0x1000, &[special(8, 9, 0, 0, FN_MULTU)], 1);
    let unsigned = (a as u64) * (b as u64);
    assert_eq!(m.cpu().lo(), unsigned as u32);
    assert_eq!(m.cpu().hi(), (unsigned >> 32) as u32);

    // special2 mul keeps only the low signed 32 bits and must leave
    // hi/lo alone
    let hi_before = m.cpu().hi();
    let lo_before = m.cpu().lo();
    run_program(&mut m, KSEG0 + 0x1000, &[special2(8, 9, 10, FN2_MUL)], 1);
    assert_eq!(m.cpu().register(10), signed as u32);
    assert_eq!(m.cpu().hi(), hi_before);
    assert_eq!(m.cpu().lo(), lo_before);
}

#[test]
fn divide_by_zero_is_not_a_fault() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    let cpu = m.cpu_mut();
    cpu.set_register(8, 1234);
    cpu.set_register(9, 0);
    run_program(&mut m, KSEG0 + 0x1000, &[special(8, 9, 0, 0, FN_DIV)], 1);
    // i32::MIN / -1 must not trap either
    let cpu = m.cpu_mut();
    cpu.set_register(8, i32::MIN as u32);
    cpu.set_register(9, u32::MAX);
    run_program(&mut m, KSEG0 + 0x1000, &[special(8, 9, 0, 0, FN_DIV)], 1);
    assert_eq!(m.cpu().lo(), i32::MIN as u32);
}

#[test]
fn branch_delay_slot_executes_exactly_once() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    let base = KSEG0 + 0x1000;
    // beq $0,$0 forward; the delay slot increments $t0, the skipped
    // slot would add 100. Offsets count from the delay slot address.
    let program = [
        immediate(OP_BEQ, 0, 0, 3),     // -> base + 0x10
        immediate(OP_ADDIU, 8, 8, 1),   // delay slot
        immediate(OP_ADDIU, 8, 8, 100), // skipped
        NOP,
        immediate(OP_ADDIU, 9, 9, 1), // branch target
    ];
    run_program(&mut m, base, &program, 3);
    assert_eq!(m.cpu().register(8), 1, "delay slot ran exactly once");
    assert_eq!(m.cpu().register(9), 1, "landed on the branch target");
}

#[test]
fn not_taken_branch_still_runs_delay_slot_then_falls_through() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    m.cpu_mut().set_register(10, 5);
    let base = KSEG0 + 0x1000;
    let program = [
        immediate(OP_BEQ, 0, 10, 4), // not taken ($t2 != 0)
        immediate(OP_ADDIU, 8, 8, 1),
        immediate(OP_ADDIU, 9, 9, 1),
    ];
    run_program(&mut m, base, &program, 3);
    assert_eq!(m.cpu().register(8), 1);
    assert_eq!(m.cpu().register(9), 1);
}

#[test]
fn jal_links_past_the_delay_slot() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    let base = KSEG0 + 0x1000;
    let target = KSEG0 + 0x2000;
    let jal = (OP_JAL << 26) | ((target & 0x0fff_ffff) >> 2);
    run_program(&mut m, base, &[jal, immediate(OP_ADDIU, 8, 8, 7)], 2);
    assert_eq!(m.cpu().register(31), base + 8);
    assert_eq!(m.cpu().register(8), 7);
    assert_eq!(m.cpu().pc(), target);
}

#[test]
fn lwl_lwr_reconstruct_unaligned_words() {
    let (mut m, _ev) = machine(ByteOrder::Little);
    let base = KSEG0 + 0x2000;
    let bytes: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    m.cpu_mut().memory_mut().store_bytes(base, &bytes).unwrap();

    for off in 0u32..4 {
        let cpu = m.cpu_mut();
        cpu.set_register(20, base + off);
        cpu.set_register(8, 0);
        // the classic ulw expansion: lwl covers the high end, lwr the low
        let program = [
            immediate(OP_LWL, 20, 8, 3),
            immediate(OP_LWR, 20, 8, 0),
        ];
        run_program(&mut m, KSEG0 + 0x3000, &program, 2);
        let expected = u32::from_le_bytes(bytes[off as usize..off as usize + 4].try_into().unwrap());
        assert_eq!(m.cpu().register(8), expected, "offset {}", off);
    }
}

#[test]
fn swl_swr_store_unaligned_words() {
    let (mut m, _ev) = machine(ByteOrder::Little);
    let base = KSEG0 + 0x2100;
    for off in 0u32..4 {
        m.cpu_mut()
            .memory_mut()
            .store_bytes(base, &[0u8; 8])
            .unwrap();
        let cpu = m.cpu_mut();
        cpu.set_register(20, base + off);
        cpu.set_register(8, 0xaabb_ccdd);
        let program = [
            immediate(OP_SWL, 20, 8, 3),
            immediate(OP_SWR, 20, 8, 0),
        ];
        run_program(&mut m, KSEG0 + 0x3000, &program, 2);
        for n in 0..4u32 {
            let b = m.cpu_mut().memory_mut().load_byte(base + off + n).unwrap();
            assert_eq!(b, (0xaabb_ccddu32 >> (8 * n)) as u8, "offset {} byte {}", off, n);
        }
    }
}

#[test]
fn store_conditional_consumes_the_link() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    let addr = KSEG0 + 0x2200;
    m.cpu_mut().memory_mut().store_word(addr, 5).unwrap();

    let cpu = m.cpu_mut();
    cpu.set_register(20, addr);
    cpu.set_register(8, 0);
    cpu.set_register(9, 42);
    let program = [
        immediate(OP_LL, 20, 8, 0),
        immediate(OP_SC, 20, 9, 0),
    ];
    run_program(&mut m, KSEG0 + 0x3000, &program, 2);
    assert_eq!(m.cpu().register(8), 5);
    assert_eq!(m.cpu().register(9), 1, "first sc succeeds");
    assert_eq!(m.cpu_mut().memory_mut().load_word(addr).unwrap(), 42);

    // a second sc without a fresh ll fails and leaves memory alone
    m.cpu_mut().set_register(9, 99);
    run_program(&mut m, KSEG0 + 0x3000, &[immediate(OP_SC, 20, 9, 0)], 1);
    assert_eq!(m.cpu().register(9), 0, "second sc fails");
    assert_eq!(m.cpu_mut().memory_mut().load_word(addr).unwrap(), 42);
}

fn pit_load(m: &mut Machine, tcw: u32, count: u32) {
    let mem = m.cpu_mut().memory_mut();
    mem.store_byte(PIT_TCW, tcw as u8).unwrap();
    mem.store_byte(PIT_COUNTER0, count as u8).unwrap();
    mem.store_byte(PIT_COUNTER0, (count >> 8) as u8).unwrap();
}

#[test]
fn pit_rate_generator_schedules_and_reschedules() {
    let (mut m, _ev) = machine(ByteOrder::Big);

    // linux's 250 Hz latch value
    pit_load(&mut m, 0x34, 4773);
    let hz: f64 = 1_193_182.0 / (4773.0 - 1.5);
    let expected = Duration::from_nanos((1_000_000_000.0 / hz).round() as u64);
    assert_eq!(m.pending_timer_period(), Some(Some(expected)));

    // reprogramming cancels the pending task and installs the new period
    pit_load(&mut m, 0x34, 1000);
    let hz: f64 = 1_193_182.0 / (1000.0 - 1.5);
    let expected = Duration::from_nanos((1_000_000_000.0 / hz).round() as u64);
    assert_eq!(m.pending_timer_period(), Some(Some(expected)));

    // one shot mode parks a single callback
    pit_load(&mut m, 0x38, 50_000);
    assert_eq!(m.pending_timer_period(), Some(None));
}

#[test]
fn pit_timer_interrupt_reaches_the_cpu() {
    let (mut m, _ev) = machine(ByteOrder::Little);
    // short one shot
    pit_load(&mut m, 0x38, 16);
    std::thread::sleep(Duration::from_millis(50));

    // enable interrupts and take the queued request
    m.cpu_mut()
        .cp0_mut()
        .move_to(12, 0, STATUS_IE.reg_mask() | STATUS_IM.reg_mask())
        .unwrap();
    m.cpu_mut().set_pc(KSEG0 + 0x1000);
    m.cpu_mut().memory_mut().store_word(KSEG0 + 0x1000, NOP).unwrap();
    m.cpu_mut().step().unwrap();

    assert_eq!(m.cpu().pc(), EXV_EXCEPTION);
    assert_eq!(m.cpu().cp0().get(CAUSE_IP), 1 << INT_SOUTHBRIDGE_INTR);
    // the southbridge irq is latched for the kernel's dispatch read
    assert_eq!(
        m.cpu_mut().memory_mut().load_word(GT_IACK).unwrap(),
        IRQ_TIMER
    );
}

#[test]
fn uart_console_line_event() {
    let (mut m, events) = machine(ByteOrder::Big);
    for b in [b'h', b'i', b'\n'] {
        m.cpu_mut().memory_mut().store_byte(COM1_TX, b).unwrap();
    }
    assert_eq!(
        events.try_recv().unwrap(),
        SystemEvent::ConsoleLine("hi".into())
    );
    assert!(events.try_recv().is_err(), "exactly one event");
}

/// Minimal ELF32 image: one PT_LOAD with 16 file bytes, 32 memory
/// bytes, at the given physical address.
fn minimal_elf(paddr: u32, entry: u32) -> Vec<u8> {
    let mut image = Vec::new();
    let file_bytes: Vec<u8> = (0u8..16).collect();
    let file_offset = 52 + 32; // header + one program header

    image.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
    image.extend_from_slice(&[0u8; 8]);
    image.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    image.extend_from_slice(&8u16.to_le_bytes()); // EM_MIPS
    image.extend_from_slice(&1u32.to_le_bytes()); // version
    image.extend_from_slice(&entry.to_le_bytes());
    image.extend_from_slice(&52u32.to_le_bytes()); // phoff
    image.extend_from_slice(&0u32.to_le_bytes()); // shoff
    image.extend_from_slice(&0u32.to_le_bytes()); // flags
    image.extend_from_slice(&52u16.to_le_bytes()); // ehsize
    image.extend_from_slice(&32u16.to_le_bytes()); // phentsize
    image.extend_from_slice(&1u16.to_le_bytes()); // phnum
    image.extend_from_slice(&40u16.to_le_bytes()); // shentsize
    image.extend_from_slice(&0u16.to_le_bytes()); // shnum
    image.extend_from_slice(&0u16.to_le_bytes()); // shstrndx

    image.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    image.extend_from_slice(&(file_offset as u32).to_le_bytes());
    image.extend_from_slice(&paddr.to_le_bytes()); // vaddr
    image.extend_from_slice(&paddr.to_le_bytes()); // paddr
    image.extend_from_slice(&16u32.to_le_bytes()); // filesz
    image.extend_from_slice(&32u32.to_le_bytes()); // memsz
    image.extend_from_slice(&5u32.to_le_bytes()); // flags r+x
    image.extend_from_slice(&4u32.to_le_bytes()); // align

    image.extend_from_slice(&file_bytes);
    image
}

#[test]
fn elf_load_copies_segment_and_sets_entry() {
    let (mut m, _ev) = machine(ByteOrder::Little);
    let image = minimal_elf(0x1000, 0x1000);
    let loaded = m.load_elf(&image).unwrap();
    assert_eq!(loaded.entry, 0x1000);

    for n in 0u32..16 {
        assert_eq!(
            m.cpu_mut().memory_mut().load_byte(0x1000 + n).unwrap(),
            n as u8
        );
    }
    for n in 16u32..32 {
        assert_eq!(m.cpu_mut().memory_mut().load_byte(0x1000 + n).unwrap(), 0);
    }
    assert_eq!(m.cpu().pc(), 0x1000);
}

#[test]
fn gzipped_elf_loads_identically() {
    let (mut m, _ev) = machine(ByteOrder::Little);
    let image = minimal_elf(0x1000, 0x1000);

    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(&image).unwrap();
    let gz = enc.finish().unwrap();

    m.load_elf(&gz).unwrap();
    assert_eq!(m.cpu_mut().memory_mut().load_byte(0x1005).unwrap(), 5);
    assert_eq!(m.cpu().pc(), 0x1000);
}

#[test]
fn bad_magic_is_fatal() {
    let (mut m, _ev) = machine(ByteOrder::Little);
    assert!(m.load_elf(b"\x7fBADromimage").is_err());
}

#[test]
fn syscall_delivers_to_the_general_vector() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    // leave reset: clear BEV/ERL/EXL, keep interrupts masked off
    m.cpu_mut().cp0_mut().move_to(12, 0, 0).unwrap();

    let base = KSEG0 + 0x1000;
    run_program(&mut m, base, &[special(0, 0, 0, 0, FN_SYSCALL)], 1);

    let cpu = m.cpu();
    assert_eq!(cpu.pc(), EXV_EXCEPTION);
    assert_eq!(cpu.cp0().get(CAUSE_EXCODE), EX_SYSCALL);
    assert_eq!(cpu.cp0().reg(cp0::CPR_EPC), base);
}

#[test]
fn posted_interrupt_is_taken_between_instructions() {
    let (mut m, _ev) = machine(ByteOrder::Little);
    m.cpu_mut()
        .cp0_mut()
        .move_to(12, 0, STATUS_IE.reg_mask() | STATUS_IM.reg_mask())
        .unwrap();
    m.post_exception(ExceptionRequest::Interrupt {
        interrupt: INT_SOUTHBRIDGE_INTR,
        irq: 4,
    });

    let base = KSEG0 + 0x1000;
    m.cpu_mut().memory_mut().store_word(base, NOP).unwrap();
    m.cpu_mut().set_pc(base);
    m.cpu_mut().step().unwrap();

    let cpu = m.cpu();
    assert_eq!(cpu.pc(), EXV_EXCEPTION);
    assert_eq!(cpu.cp0().reg(cp0::CPR_EPC), base, "nop re-executes after eret");
    assert_eq!(m.cpu_mut().memory_mut().load_word(GT_IACK).unwrap(), 4);
}

#[test]
fn tlb_refill_request_lands_on_the_refill_vector() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    m.cpu_mut()
        .cp0_mut()
        .move_to(12, 0, STATUS_IE.reg_mask() | STATUS_IM.reg_mask())
        .unwrap();
    m.post_exception(ExceptionRequest::TlbMiss {
        vaddr: 0x0040_1234,
        store: false,
        refill: true,
    });

    m.cpu_mut().set_pc(KSEG0 + 0x1000);
    m.cpu_mut().step().unwrap();

    let cpu = m.cpu();
    assert_eq!(cpu.pc(), 0x8000_0000, "tlb refill vector");
    assert_eq!(cpu.cp0().reg(cp0::CPR_BADVADDR), 0x0040_1234);
}

#[test]
fn unknown_cp0_pair_is_fatal_for_read_and_write() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    let base = KSEG0 + 0x1000;
    // mtc0 $t0 -> reg 7 (HWREna, unmodeled)
    let mtc0 = (OP_COP0 << 26) | (0x04 << 21) | (8 << 16) | (7 << 11);
    m.cpu_mut().memory_mut().store_word(base, mtc0).unwrap();
    m.cpu_mut().set_pc(base);
    assert!(m.cpu_mut().step().is_err());

    // mfc0 from the same register is rejected too
    let mfc0 = (OP_COP0 << 26) | (8 << 16) | (7 << 11);
    m.cpu_mut().memory_mut().store_word(base, mfc0).unwrap();
    m.cpu_mut().set_pc(base);
    assert!(m.cpu_mut().step().is_err());
}

fn small_machine(order: ByteOrder) -> (Machine, Receiver<SystemEvent>) {
    Machine::new(MachineConfig {
        ram_mb: 2,
        byte_order: order,
    })
}

#[test]
fn snapshot_round_trip() {
    let (mut m, _ev) = small_machine(ByteOrder::Big);
    let cpu = m.cpu_mut();
    cpu.set_register(8, 0x1234_5678);
    cpu.set_register(29, 0x8040_0000);
    cpu.set_pc(KSEG0 + 0x4000);
    cpu.memory_mut()
        .store_word(KSEG0 + 0x8000, 0xcafe_f00d)
        .unwrap();
    cpu.fpu_mut().set_double(4, 2.75).unwrap();

    let blob = m.save_state().unwrap();

    let (mut m2, _ev2) = small_machine(ByteOrder::Big);
    m2.restore_state(&blob).unwrap();
    let cpu = m2.cpu_mut();
    assert_eq!(cpu.register(8), 0x1234_5678);
    assert_eq!(cpu.register(29), 0x8040_0000);
    assert_eq!(cpu.pc(), KSEG0 + 0x4000);
    assert_eq!(cpu.fpu().double(4).unwrap(), 2.75);
    assert_eq!(
        cpu.memory_mut().load_word(KSEG0 + 0x8000).unwrap(),
        0xcafe_f00d
    );
}

#[test]
fn snapshot_byte_order_mismatch_rejected() {
    let (m, _ev) = small_machine(ByteOrder::Big);
    let blob = m.save_state().unwrap();
    let (mut le, _ev2) = small_machine(ByteOrder::Little);
    assert!(le.restore_state(&blob).is_err());
}

#[test]
fn disassembly_uses_symbol_names() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    let target = KSEG0 + 0x2000;
    m.cpu_mut().symbols_mut().put_sized(target, "start_kernel", 0x100);
    let jal = (OP_JAL << 26) | ((target & 0x0fff_ffff) >> 2);
    let line = isn::isn_string(m.cpu(), KSEG0 + 0x1000, jal);
    assert!(line.contains("jal"), "line: {}", line);
    assert!(line.contains("start_kernel"), "line: {}", line);
}

#[test]
fn keyboard_controller_over_the_bus() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    let data = PIIX4 + 0x60;
    let cmdstatus = PIIX4 + 0x64;
    // self test
    m.cpu_mut().memory_mut().store_byte(cmdstatus, 0xaa).unwrap();
    let st = m.cpu_mut().memory_mut().load_byte(cmdstatus).unwrap();
    assert_eq!(st & 0x01, 0x01, "output buffer full");
    assert_eq!(m.cpu_mut().memory_mut().load_byte(data).unwrap(), 0x55);
}

#[test]
fn pic_imr_readback_over_the_bus() {
    let (mut m, _ev) = machine(ByteOrder::Big);
    let cmd = PIIX4 + 0x20;
    let imr = PIIX4 + 0x21;
    let mem = m.cpu_mut().memory_mut();
    mem.store_byte(cmd, 0x11).unwrap();
    mem.store_byte(imr, 0x20).unwrap(); // icw2
    mem.store_byte(imr, 0x04).unwrap(); // icw3
    mem.store_byte(imr, 0x01).unwrap(); // icw4
    mem.store_byte(imr, 0xfa).unwrap(); // ocw1
    assert_eq!(mem.load_byte(imr).unwrap(), 0xfa);
}
