//! MIPS32 Malta board emulator
//!
//! Emulates a MIPS32 4K-style processor and the Malta reference board
//! well enough to boot an unmodified Linux kernel: an interpreting cpu
//! core with system and floating point coprocessors, paged physical
//! memory with the board's devices mapped above kseg1, and an ELF
//! loader. The front-end consumes console and display output through
//! the event channel returned from `Machine::new`.

pub mod cpu;
pub mod devices;
mod errors;
pub mod loader;
pub mod memory;
pub mod snapshot;
mod symbols;
mod system;
mod timer;

pub use cpu::exception::ExceptionRequest;
pub use cpu::Cpu;
pub use errors::MachineError;
pub use memory::ByteOrder;
pub use symbols::Symbols;
pub use system::{Machine, MachineConfig, SystemEvent, KSEG0, KSEG1};
pub use timer::{TimerHandle, TimerService};
