//! ELF32 loader
//!
//! Parses the header, program headers and symbol table of a 32-bit ELF
//! image, copies each PT_LOAD segment into memory at its physical
//! address (zero filling the tail up to the memory size), records every
//! global symbol with a nonzero size and points the cpu at the entry
//! address. Multi-byte header fields follow the ELF ident
//! data-encoding byte, swapped when it disagrees with what we read
//! natively. Gzip- and zstd-wrapped images are decompressed
//! transparently.

use log::{debug, info};
use std::io::Read;

use crate::cpu::Cpu;
use crate::errors::MachineError;
use crate::memory::PAGE_BYTES;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

const PT_LOAD: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_RELA: u32 = 4;
const SHT_REL: u32 = 9;

const STB_GLOBAL: u8 = 1;

/// What the loader found, for the caller's logs.
pub struct LoadedImage {
    pub entry: u32,
    /// first address past the highest loaded segment
    pub top: u32,
    pub symbols: usize,
}

/// Little cursor over the image with the header's byte order.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    little: bool,
}

impl<'a> Reader<'a> {
    fn seek(&mut self, pos: usize) -> Result<(), MachineError> {
        if pos > self.data.len() {
            return Err(MachineError::BadImage(format!(
                "offset {} past end of image",
                pos
            )));
        }
        self.pos = pos;
        Ok(())
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], MachineError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => {
                let s = &self.data[self.pos..end];
                self.pos = end;
                Ok(s)
            }
            None => Err(MachineError::BadImage("truncated image".into())),
        }
    }

    fn u8(&mut self) -> Result<u8, MachineError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, MachineError> {
        let b: [u8; 2] = self.bytes(2)?.try_into().unwrap();
        Ok(if self.little {
            u16::from_le_bytes(b)
        } else {
            u16::from_be_bytes(b)
        })
    }

    fn u32(&mut self) -> Result<u32, MachineError> {
        let b: [u8; 4] = self.bytes(4)?.try_into().unwrap();
        Ok(if self.little {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }
}

struct Program {
    kind: u32,
    file_offset: u32,
    _vaddr: u32,
    paddr: u32,
    file_size: u32,
    mem_size: u32,
}

struct Section {
    kind: u32,
    file_offset: u32,
    file_size: u32,
    linked: u32,
    entry_size: u32,
}

fn nul_string(data: &[u8], index: usize) -> String {
    let tail = &data[index.min(data.len())..];
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

fn decompress(data: &[u8]) -> Result<Option<Vec<u8>>, MachineError> {
    if data.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| MachineError::BadImage(format!("gzip: {}", e)))?;
        return Ok(Some(out));
    }
    if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        let out = zstd::stream::decode_all(data)
            .map_err(|e| MachineError::BadImage(format!("zstd: {}", e)))?;
        return Ok(Some(out));
    }
    Ok(None)
}

/// Load an ELF image into the cpu's memory and set the entry point.
pub fn load_elf(cpu: &mut Cpu, image: &[u8]) -> Result<LoadedImage, MachineError> {
    if let Some(raw) = decompress(image)? {
        return load_elf(cpu, &raw);
    }

    if image.len() < 52 || image[..4] != ELF_MAGIC {
        return Err(MachineError::BadImage("not an elf file".into()));
    }
    if image[4] != ELFCLASS32 {
        return Err(MachineError::BadImage(format!(
            "not a 32 bit image (class {})",
            image[4]
        )));
    }
    let little = match image[5] {
        ELFDATA2LSB => true,
        ELFDATA2MSB => false,
        enc => {
            return Err(MachineError::BadImage(format!(
                "bad data encoding {}",
                enc
            )))
        }
    };

    let mut r = Reader {
        data: image,
        pos: 16,
        little,
    };
    let _type = r.u16()?;
    let machine = r.u16()?;
    let _version = r.u32()?;
    let entry = r.u32()?;
    let ph_offset = r.u32()?;
    let sh_offset = r.u32()?;
    let _flags = r.u32()?;
    let _eh_size = r.u16()?;
    let _ph_size = r.u16()?;
    let ph_count = r.u16()?;
    let _sh_size = r.u16()?;
    let sh_count = r.u16()?;
    let _sh_strings = r.u16()?;
    info!(
        "elf machine {} entry {:#x} programs {} sections {}",
        machine, entry, ph_count, sh_count
    );

    // program headers
    let mut programs = Vec::with_capacity(ph_count as usize);
    r.seek(ph_offset as usize)?;
    for _ in 0..ph_count {
        programs.push(Program {
            kind: r.u32()?,
            file_offset: r.u32()?,
            _vaddr: r.u32()?,
            paddr: r.u32()?,
            file_size: r.u32()?,
            mem_size: r.u32()?,
        });
        let _flags = r.u32()?;
        let _align = r.u32()?;
    }

    // section headers
    let mut sections = Vec::with_capacity(sh_count as usize);
    r.seek(sh_offset as usize)?;
    for _ in 0..sh_count {
        let _name = r.u32()?;
        let kind = r.u32()?;
        let _flags = r.u32()?;
        let _addr = r.u32()?;
        let file_offset = r.u32()?;
        let file_size = r.u32()?;
        let linked = r.u32()?;
        let _info = r.u32()?;
        let _align = r.u32()?;
        let entry_size = r.u32()?;
        sections.push(Section {
            kind,
            file_offset,
            file_size,
            linked,
            entry_size,
        });
    }

    // loadable segments
    let mut top = 0u32;
    for p in programs.iter().filter(|p| p.kind == PT_LOAD) {
        if p.mem_size < p.file_size {
            return Err(MachineError::BadImage("memsz below filesz".into()));
        }
        r.seek(p.file_offset as usize)?;
        let file_bytes = r.bytes(p.file_size as usize)?;
        let mut data = vec![0u8; p.mem_size as usize];
        data[..file_bytes.len()].copy_from_slice(file_bytes);

        let mut page = p.paddr & !(PAGE_BYTES as u32 - 1);
        let end = p.paddr.wrapping_add(p.mem_size);
        while page < end {
            cpu.memory_mut().init_page(page);
            page = page.wrapping_add(PAGE_BYTES as u32);
        }
        cpu.memory_mut().store_bytes(p.paddr, &data)?;
        debug!(
            "loaded segment at {:#010x} file {:#x} mem {:#x}",
            p.paddr, p.file_size, p.mem_size
        );
        top = top.max(end);
    }

    // symbols, with their string table
    let mut symbol_count = 0usize;
    let mut relocation_count = 0usize;
    for s in &sections {
        match s.kind {
            SHT_SYMTAB => {
                let strings = {
                    let link = sections.get(s.linked as usize).ok_or_else(|| {
                        MachineError::BadImage("symtab links missing strtab".into())
                    })?;
                    r.seek(link.file_offset as usize)?;
                    r.bytes(link.file_size as usize)?
                };
                if s.entry_size == 0 {
                    return Err(MachineError::BadImage("symtab entry size zero".into()));
                }
                let count = s.file_size / s.entry_size;
                for n in 0..count {
                    r.seek((s.file_offset + n * s.entry_size) as usize)?;
                    let name_index = r.u32()?;
                    let value = r.u32()?;
                    let size = r.u32()?;
                    let info = r.u8()?;
                    let _other = r.u8()?;
                    let _section = r.u16()?;
                    if info >> 4 == STB_GLOBAL && size > 0 {
                        let name = nul_string(strings, name_index as usize);
                        cpu.symbols_mut().put_sized(value, &name, size);
                        symbol_count += 1;
                    }
                }
            }
            SHT_REL | SHT_RELA => {
                // parsed but never applied
                if s.entry_size != 0 {
                    relocation_count += (s.file_size / s.entry_size) as usize;
                }
            }
            _ => {}
        }
    }
    if relocation_count > 0 {
        debug!("ignoring {} relocations", relocation_count);
    }

    cpu.set_pc(entry);
    info!(
        "entry {} with {} symbols",
        cpu.symbols().name_addr_offset(entry),
        symbol_count
    );

    Ok(LoadedImage {
        entry,
        top,
        symbols: symbol_count,
    })
}
