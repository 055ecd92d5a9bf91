//! MIPS32 4K-style cpu core
//!
//! Owns the general register file, HI/LO, the program counter pair, the
//! system and floating point coprocessors and the memory it executes
//! from. Each step rotates the counter pair before executing, which is
//! what gives branches their delay slot: the instruction after a branch
//! always runs before the branch takes effect.

pub mod cp0;
pub mod decode;
pub mod exception;
pub mod execute;
pub mod fpu;
pub mod isn;

use log::debug;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

use crate::errors::MachineError;
use crate::memory::Memory;
use crate::symbols::Symbols;
use cp0::Cp0;
use exception::ExceptionRequest;
use execute::ExecuteOutcome;
use fpu::Fpu;

pub struct Cpu {
    /// general purpose registers, index 0 pinned to zero
    pub(crate) reg: [u32; 32],
    pub(crate) hi: u32,
    pub(crate) lo: u32,
    /// address of the next instruction to fetch
    pub(crate) pc: u32,
    /// address after that; branches redirect this one
    pub(crate) next_pc: u32,
    pub(crate) cycle: u64,
    pub(crate) memory: Memory,
    pub(crate) cp0: Cp0,
    pub(crate) fpu: Fpu,
    pub(crate) symbols: Symbols,
    pub(crate) word_addr_xor: u32,

    pub(crate) ll_bit: bool,
    pub(crate) ll_addr: u32,

    exceptions: Receiver<ExceptionRequest>,
    /// kept alive so the channel never disconnects while the cpu waits
    exceptions_tx: Sender<ExceptionRequest>,
    pending: Option<ExceptionRequest>,

    /// disassemble this many upcoming instructions into the log
    trace: u64,
    count_isns: bool,
    isn_counts: HashMap<&'static str, u64>,
}

impl Cpu {
    pub fn new(
        memory: Memory,
        symbols: Symbols,
        exceptions: Receiver<ExceptionRequest>,
        exceptions_tx: Sender<ExceptionRequest>,
    ) -> Self {
        let word_addr_xor = memory.byte_order().word_addr_xor();
        let little_endian = memory.byte_order().is_little();
        Cpu {
            reg: [0; 32],
            hi: 0,
            lo: 0,
            pc: 0,
            next_pc: 4,
            cycle: 1,
            memory,
            cp0: Cp0::new(little_endian),
            fpu: Fpu::new(),
            symbols,
            word_addr_xor,
            ll_bit: false,
            ll_addr: 0,
            exceptions,
            exceptions_tx,
            pending: None,
            trace: 0,
            count_isns: false,
            isn_counts: HashMap::new(),
        }
    }

    pub fn register(&self, n: u32) -> u32 {
        self.reg[n as usize & 0x1f]
    }

    pub fn set_register(&mut self, n: u32, value: u32) {
        self.set_reg(n, value);
    }

    #[inline(always)]
    pub(crate) fn set_reg(&mut self, n: u32, value: u32) {
        if n != 0 {
            self.reg[n as usize & 0x1f] = value;
        }
    }

    pub fn hi(&self) -> u32 {
        self.hi
    }

    pub fn lo(&self) -> u32 {
        self.lo
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Load the counter pair, discarding any in-flight delay slot.
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
        self.next_pc = pc.wrapping_add(4);
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut Symbols {
        &mut self.symbols
    }

    pub fn fpu(&self) -> &Fpu {
        &self.fpu
    }

    pub fn fpu_mut(&mut self) -> &mut Fpu {
        &mut self.fpu
    }

    pub fn cp0(&self) -> &Cp0 {
        &self.cp0
    }

    pub fn cp0_mut(&mut self) -> &mut Cp0 {
        &mut self.cp0
    }

    pub fn set_trace(&mut self, count: u64) {
        self.trace = count;
    }

    pub fn set_count_isns(&mut self, enable: bool) {
        self.count_isns = enable;
    }

    pub fn isn_counts(&self) -> &HashMap<&'static str, u64> {
        &self.isn_counts
    }

    /// Post an exception request from the cpu's own thread (devices use
    /// their cloned sender instead).
    pub fn add_exception(&mut self, req: ExceptionRequest) {
        let _ = self.exceptions_tx.send(req);
    }

    fn poll_exception(&mut self) -> Option<ExceptionRequest> {
        self.pending
            .take()
            .or_else(|| self.exceptions.try_recv().ok())
    }

    /// Park until a device or timer posts an exception request. Used by
    /// the wait instruction.
    pub(crate) fn wait_for_exception(&mut self) -> Result<(), MachineError> {
        if self.pending.is_some() {
            return Ok(());
        }
        debug!("waiting at {}", self.symbols.name_offset(self.pc));
        match self.exceptions.recv_timeout(Duration::from_secs(5)) {
            Ok(req) => {
                self.pending = Some(req);
                Ok(())
            }
            Err(_) => Err(MachineError::WaitTimeout),
        }
    }

    /// One fetch-decode-execute cycle.
    pub fn step(&mut self) -> Result<(), MachineError> {
        self.reg[0] = 0;

        let pc = self.pc;
        self.pc = self.next_pc;
        self.next_pc = self.next_pc.wrapping_add(4);

        if self.cp0.interrupts_enabled() {
            if let Some(req) = self.poll_exception() {
                // the instruction at pc re-executes after the handler
                exception::deliver(self, pc, req)?;
                self.cycle += 1;
                return Ok(());
            }
        }

        let word = self.memory.load_word(pc)?;

        if self.trace > 0 {
            self.trace -= 1;
            debug!("{}", isn::isn_string(self, pc, word));
        }
        if self.count_isns {
            *self.isn_counts.entry(isn::mnemonic(word)).or_insert(0) += 1;
        }

        match execute::execute(self, word)? {
            ExecuteOutcome::Continue => {}
            ExecuteOutcome::Exception(req) => exception::deliver(self, pc, req)?,
        }

        // the count/compare timer is not wired up as an interrupt
        // source; a hit while interrupts are live is a model gap
        if self.cp0.reg(cp0::CPR_COMPARE) == (self.cycle >> 1) as u32
            && self.cp0.interrupts_enabled()
        {
            return Err(MachineError::CompareHit(self.cycle));
        }

        self.cycle += 1;
        Ok(())
    }
}
