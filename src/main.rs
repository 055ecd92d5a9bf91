use std::env;
use std::fs::File;
use std::io::{self, Read, Write};

use malta32::{ByteOrder, Machine, MachineConfig, SystemEvent};

/// Minimal stderr logger; level comes from MALTA32_LOG (error..trace).
struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logger() {
    let level = match env::var("MALTA32_LOG").as_deref() {
        Ok("trace") => log::LevelFilter::Trace,
        Ok("debug") => log::LevelFilter::Debug,
        Ok("info") => log::LevelFilter::Info,
        Ok("error") => log::LevelFilter::Error,
        _ => log::LevelFilter::Warn,
    };
    log::set_logger(&LOGGER).expect("logger");
    log::set_max_level(level);
}

fn main() -> io::Result<()> {
    init_logger();

    let args: Vec<String> = env::args().collect();
    let mut kernel_path = String::new();
    let mut ram_mb = 64u32;
    let mut byte_order = ByteOrder::Big;
    let mut trace = 0u64;
    let mut max_cycles = u64::MAX;
    let mut count_isns = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--ram" => {
                i += 1;
                ram_mb = args[i].parse().expect("invalid ram size");
            }
            "--little-endian" => {
                byte_order = ByteOrder::Little;
            }
            "--trace" => {
                i += 1;
                trace = args[i].parse().expect("invalid trace count");
            }
            "--max-cycles" => {
                i += 1;
                max_cycles = args[i].parse().expect("invalid cycle count");
            }
            "--count-isns" => {
                count_isns = true;
            }
            arg if !arg.starts_with('-') => {
                kernel_path = arg.to_string();
            }
            other => {
                eprintln!("unknown argument: {}", other);
            }
        }
        i += 1;
    }

    if kernel_path.is_empty() {
        eprintln!(
            "usage: {} <kernel-elf> [--ram <mb>] [--little-endian] [--trace <n>] [--max-cycles <n>] [--count-isns]",
            args[0]
        );
        std::process::exit(1);
    }

    println!("malta32");
    println!("loading kernel: {}", kernel_path);
    println!("ram size: {} MB", ram_mb);

    let (mut machine, events) = Machine::new(MachineConfig { ram_mb, byte_order });
    if trace > 0 {
        machine.cpu_mut().set_trace(trace);
    }
    machine.cpu_mut().set_count_isns(count_isns);

    let mut kernel = Vec::new();
    File::open(&kernel_path)?.read_to_end(&mut kernel)?;
    let image = machine
        .load_elf(&kernel)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    println!(
        "entry {:#010x}, top {:#010x}, {} symbols",
        image.entry, image.top, image.symbols
    );
    println!("-------------------------------------");

    let stdout = io::stdout();
    let mut executed = 0u64;
    let result = loop {
        let batch = 100_000.min(max_cycles - executed);
        if batch == 0 {
            break Ok(());
        }
        let run = machine.run(batch);

        // drain console/display output between batches
        let mut out = stdout.lock();
        while let Ok(event) = events.try_recv() {
            match event {
                SystemEvent::ConsoleLine(line) => writeln!(out, "{}", line)?,
                SystemEvent::DisplayText(text) => log::info!("display: {}", text),
            }
        }
        out.flush()?;

        match run {
            Ok(n) => executed += n,
            Err(e) => break Err(e),
        }
    };

    if count_isns {
        let mut counts: Vec<_> = machine
            .cpu()
            .isn_counts()
            .iter()
            .map(|(&name, &n)| (name, n))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        eprintln!("top instructions:");
        for (name, n) in counts.iter().take(20) {
            eprintln!("  {:<10} {}", name, n);
        }
    }

    match result {
        Ok(()) => {
            println!("\nstopped after {} cycles", executed);
            Ok(())
        }
        Err(e) => {
            eprintln!("\nmachine halted: {}", e);
            std::process::exit(1);
        }
    }
}
