//! Machine orchestrator
//!
//! Brings together the cpu, memory, board and timer service, wires the
//! exception and event channels between them and drives batched
//! execution. The event receiver returned from `Machine::new` is the
//! only outbound surface: console lines and display text flow through
//! it to whatever front-end is attached.

use log::info;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use crate::cpu::exception::ExceptionRequest;
use crate::cpu::Cpu;
use crate::devices::malta::Malta;
use crate::errors::MachineError;
use crate::loader::{self, LoadedImage};
use crate::memory::{ByteOrder, Memory, PAGE_BYTES};
use crate::snapshot::{CpuState, MachineSnapshot, SNAPSHOT_VERSION};
use crate::symbols::Symbols;
use crate::timer::TimerService;

/// kseg0: cached direct mapping, where the kernel lives
pub const KSEG0: u32 = 0x8000_0000;
/// kseg1: uncached direct mapping, intercepted by the board
pub const KSEG1: u32 = 0xa000_0000;
pub const KSEG2: u32 = 0xc000_0000;
pub const KSEG3: u32 = 0xe000_0000;

/// Outbound events for the front-end consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    /// A completed console line from the board uart (newline stripped).
    ConsoleLine(String),
    /// The combined text of the Malta status display.
    DisplayText(String),
}

#[derive(Clone, Copy, Debug)]
pub struct MachineConfig {
    pub ram_mb: u32,
    pub byte_order: ByteOrder,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            ram_mb: 64,
            byte_order: ByteOrder::Big,
        }
    }
}

pub struct Machine {
    cpu: Cpu,
    timer: TimerService,
    exceptions: Sender<ExceptionRequest>,
    config: MachineConfig,
}

impl Machine {
    pub fn new(config: MachineConfig) -> (Machine, Receiver<SystemEvent>) {
        let (exc_tx, exc_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let timer = TimerService::new(exc_tx.clone());

        let mut symbols = Symbols::new();
        symbols.put(KSEG0, "KSEG0");
        symbols.put(KSEG1, "KSEG1");
        symbols.put(KSEG2, "KSEG2");
        symbols.put(KSEG3, "KSEG3");

        let malta = Malta::new(
            config.byte_order,
            exc_tx.clone(),
            event_tx,
            timer.handle(),
            &mut symbols,
        );
        let mut memory = Memory::new(config.byte_order, malta);
        for n in 0..config.ram_mb {
            memory.init_page(KSEG0 + n * PAGE_BYTES as u32);
        }
        info!(
            "machine with {} MB ram, {:?} endian",
            config.ram_mb, config.byte_order
        );

        let cpu = Cpu::new(memory, symbols, exc_rx, exc_tx.clone());
        (
            Machine {
                cpu,
                timer,
                exceptions: exc_tx,
                config,
            },
            event_rx,
        )
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn config(&self) -> MachineConfig {
        self.config
    }

    /// Load a kernel image (optionally gzip/zstd compressed ELF).
    pub fn load_elf(&mut self, image: &[u8]) -> Result<LoadedImage, MachineError> {
        loader::load_elf(&mut self.cpu, image)
    }

    /// Run up to `cycles` instructions. Fatal errors come back decorated
    /// with the cycle and symbolised pc they struck at.
    pub fn run(&mut self, cycles: u64) -> Result<u64, MachineError> {
        for _ in 0..cycles {
            if let Err(e) = self.cpu.step() {
                let pc = self.cpu.pc();
                return Err(MachineError::Run {
                    cycle: self.cpu.cycle(),
                    pc: self.cpu.symbols().name_addr_offset(pc),
                    source: Box::new(e),
                });
            }
        }
        Ok(cycles)
    }

    /// Host keyboard input into the console uart.
    pub fn uart_input(&mut self, b: u8) {
        self.cpu.memory_mut().malta_mut().uart_input(b);
    }

    /// Post an exception request as a device would.
    pub fn post_exception(&self, req: ExceptionRequest) {
        let _ = self.exceptions.send(req);
    }

    /// Period of the pending PIT task: `Some(Some(d))` for a rate
    /// generator, `Some(None)` for a pending one-shot, `None` when idle.
    pub fn pending_timer_period(&self) -> Option<Option<Duration>> {
        self.timer.handle().pending()
    }

    /// Serialize cpu and memory state to a compressed blob.
    pub fn save_state(&self) -> Result<Vec<u8>, MachineError> {
        let cpu = &self.cpu;
        let snapshot = MachineSnapshot {
            version: SNAPSHOT_VERSION,
            byte_order: self.config.byte_order,
            cpu: CpuState {
                reg: cpu.reg,
                hi: cpu.hi,
                lo: cpu.lo,
                pc: cpu.pc,
                next_pc: cpu.next_pc,
                cycle: cpu.cycle,
                ll_bit: cpu.ll_bit,
                ll_addr: cpu.ll_addr,
                cp0: cpu.cp0.registers().to_vec(),
                fpu_reg: *cpu.fpu.registers(),
                fcsr: cpu.fpu.fcsr(),
                fir: cpu.fpu.fir(),
            },
            pages: cpu.memory.snapshot_pages(),
        };
        snapshot.to_bytes()
    }

    /// Restore cpu and memory state saved by `save_state`. Devices
    /// restart from reset; reload the same kernel first for a faithful
    /// resume.
    pub fn restore_state(&mut self, data: &[u8]) -> Result<(), MachineError> {
        let snapshot = MachineSnapshot::from_bytes(data)?;
        if snapshot.byte_order != self.config.byte_order {
            return Err(MachineError::BadSnapshot(format!(
                "byte order {:?} (machine is {:?})",
                snapshot.byte_order, self.config.byte_order
            )));
        }

        let cpu = &mut self.cpu;
        let state = snapshot.cpu;
        cpu.reg = state.reg;
        cpu.hi = state.hi;
        cpu.lo = state.lo;
        cpu.pc = state.pc;
        cpu.next_pc = state.next_pc;
        cpu.cycle = state.cycle;
        cpu.ll_bit = state.ll_bit;
        cpu.ll_addr = state.ll_addr;
        cpu.cp0.restore(state.cp0)?;
        cpu.fpu.restore(state.fpu_reg, state.fcsr, state.fir);
        cpu.memory.restore_pages(&snapshot.pages)?;
        Ok(())
    }
}
