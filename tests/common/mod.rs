//! Common test utilities and helpers.
//!
//! [`MachoBuilder`] lays out a 64-bit Mach-O image from segment, section and
//! symbol descriptions, [`arm64`] encodes the handful of instructions the
//! interpreter models, and [`objc_fixture`] combines both into a small but
//! complete Objective-C executable.

#![allow(dead_code)]

use machscope::formats::macho::*;

pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;
pub const CPU_TYPE_ARM: u32 = 12;
pub const MH_EXECUTE: u32 = 2;

// Section types and attributes used by the fixtures.
pub const S_REGULAR: u32 = 0x0;
pub const S_CSTRING_LITERALS: u32 = 0x2;
pub const S_LITERAL_POINTERS: u32 = 0x5;
pub const S_LAZY_SYMBOL_POINTERS: u32 = 0x7;
pub const S_SYMBOL_STUBS: u32 = 0x8;
pub const S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
pub const S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;

struct SectionSpec {
    name: String,
    addr: u64,
    data: Vec<u8>,
    flags: u32,
    reserved1: u32,
    reserved2: u32,
}

struct SegmentSpec {
    name: String,
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    sections: Vec<SectionSpec>,
}

struct SymbolSpec {
    name: String,
    n_type: u8,
    n_sect: u8,
    value: u64,
}

/// Builds a little-endian 64-bit Mach-O image.
///
/// Section data is placed at `segment.fileoff + (addr - segment.vmaddr)`.
/// Symbol, string and indirect symbol tables are appended after the last
/// segment.
pub struct MachoBuilder {
    magic: u32,
    cputype: u32,
    filetype: u32,
    flags: u32,
    segments: Vec<SegmentSpec>,
    symbols: Vec<SymbolSpec>,
    indirect: Vec<u32>,
    dylibs: Vec<(u32, String)>,
    encryption: Option<(u32, u32, u32)>,
    raw_commands: Vec<Vec<u8>>,
}

impl Default for MachoBuilder {
    fn default() -> Self {
        Self::arm64()
    }
}

fn push32(b: &mut Vec<u8>, v: u32) {
    b.extend_from_slice(&v.to_le_bytes());
}

fn push64(b: &mut Vec<u8>, v: u64) {
    b.extend_from_slice(&v.to_le_bytes());
}

fn name16(b: &mut Vec<u8>, name: &str) {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    b.extend_from_slice(&out);
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

impl MachoBuilder {
    pub fn arm64() -> Self {
        Self {
            magic: MH_MAGIC_64,
            cputype: CPU_TYPE_ARM64,
            filetype: MH_EXECUTE,
            flags: 0x0020_0085,
            segments: Vec::new(),
            symbols: Vec::new(),
            indirect: Vec::new(),
            dylibs: Vec::new(),
            encryption: None,
            raw_commands: Vec::new(),
        }
    }

    pub fn magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub fn cputype(mut self, cputype: u32) -> Self {
        self.cputype = cputype;
        self
    }

    pub fn segment(mut self, name: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64) -> Self {
        self.segments.push(SegmentSpec {
            name: name.to_string(),
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            sections: Vec::new(),
        });
        self
    }

    /// Add a section to the most recently added segment.
    pub fn section(mut self, name: &str, addr: u64, data: Vec<u8>, flags: u32) -> Self {
        let segment = self.segments.last_mut().expect("section added before any segment");
        segment.sections.push(SectionSpec {
            name: name.to_string(),
            addr,
            data,
            flags,
            reserved1: 0,
            reserved2: 0,
        });
        self
    }

    /// Set `reserved1`/`reserved2` of the most recently added section.
    pub fn reserved(mut self, reserved1: u32, reserved2: u32) -> Self {
        let section = self
            .segments
            .last_mut()
            .and_then(|s| s.sections.last_mut())
            .expect("reserved set before any section");
        section.reserved1 = reserved1;
        section.reserved2 = reserved2;
        self
    }

    pub fn symbol(mut self, name: &str, n_type: u8, n_sect: u8, value: u64) -> Self {
        self.symbols.push(SymbolSpec {
            name: name.to_string(),
            n_type,
            n_sect,
            value,
        });
        self
    }

    pub fn import(self, name: &str) -> Self {
        self.symbol(name, N_UNDF | N_EXT, 0, 0)
    }

    pub fn indirect_symbols(mut self, indices: &[u32]) -> Self {
        self.indirect = indices.to_vec();
        self
    }

    pub fn dylib(mut self, name: &str) -> Self {
        self.dylibs.push((LC_LOAD_DYLIB, name.to_string()));
        self
    }

    pub fn weak_dylib(mut self, name: &str) -> Self {
        self.dylibs.push((LC_LOAD_WEAK_DYLIB, name.to_string()));
        self
    }

    pub fn encryption(mut self, cryptoff: u32, cryptsize: u32, cryptid: u32) -> Self {
        self.encryption = Some((cryptoff, cryptsize, cryptid));
        self
    }

    /// Append an arbitrary, already encoded load command.
    pub fn raw_command(mut self, bytes: Vec<u8>) -> Self {
        self.raw_commands.push(bytes);
        self
    }

    fn segment_commands(&self) -> Vec<Vec<u8>> {
        self.segments
            .iter()
            .map(|seg| {
                let mut b = Vec::new();
                push32(&mut b, LC_SEGMENT_64);
                push32(&mut b, (SEGMENT_COMMAND_64_SIZE + SECTION_64_SIZE * seg.sections.len()) as u32);
                name16(&mut b, &seg.name);
                push64(&mut b, seg.vmaddr);
                push64(&mut b, seg.vmsize);
                push64(&mut b, seg.fileoff);
                push64(&mut b, seg.filesize);
                push32(&mut b, 7);
                push32(&mut b, 5);
                push32(&mut b, seg.sections.len() as u32);
                push32(&mut b, 0);
                for sect in &seg.sections {
                    name16(&mut b, &sect.name);
                    name16(&mut b, &seg.name);
                    push64(&mut b, sect.addr);
                    push64(&mut b, sect.data.len() as u64);
                    push32(&mut b, (seg.fileoff + (sect.addr - seg.vmaddr)) as u32);
                    push32(&mut b, 3);
                    push32(&mut b, 0);
                    push32(&mut b, 0);
                    push32(&mut b, sect.flags);
                    push32(&mut b, sect.reserved1);
                    push32(&mut b, sect.reserved2);
                    push32(&mut b, 0);
                }
                b
            })
            .collect()
    }

    fn dylib_commands(&self) -> Vec<Vec<u8>> {
        self.dylibs
            .iter()
            .map(|(cmd, name)| {
                let size = align8(DYLIB_COMMAND_SIZE + name.len() + 1);
                let mut b = Vec::new();
                push32(&mut b, *cmd);
                push32(&mut b, size as u32);
                push32(&mut b, DYLIB_COMMAND_SIZE as u32);
                push32(&mut b, 2);
                push32(&mut b, 0x0001_0000);
                push32(&mut b, 0x0001_0000);
                b.extend_from_slice(name.as_bytes());
                b.resize(size, 0);
                b
            })
            .collect()
    }

    pub fn build(self) -> Vec<u8> {
        let segments = self.segment_commands();
        let dylibs = self.dylib_commands();
        let has_symtab = !self.symbols.is_empty();

        let mut sizeofcmds: usize = segments.iter().chain(&dylibs).chain(&self.raw_commands).map(Vec::len).sum();
        let mut ncmds = segments.len() + dylibs.len() + self.raw_commands.len();
        if has_symtab {
            sizeofcmds += SYMTAB_COMMAND_SIZE + DYSYMTAB_COMMAND_SIZE;
            ncmds += 2;
        }
        if self.encryption.is_some() {
            sizeofcmds += ENCRYPTION_INFO_64_SIZE;
            ncmds += 1;
        }

        // Symbol tables go after everything the segments map.
        let mut linkedit = MACH_HEADER_64_SIZE + sizeofcmds;
        for seg in &self.segments {
            linkedit = linkedit.max((seg.fileoff + seg.filesize) as usize);
            for sect in &seg.sections {
                let end = seg.fileoff + (sect.addr - seg.vmaddr) + sect.data.len() as u64;
                linkedit = linkedit.max(end as usize);
            }
        }
        let linkedit = align8(linkedit);

        let mut strings = vec![0u8];
        let mut nlists = Vec::new();
        for sym in &self.symbols {
            push32(&mut nlists, strings.len() as u32);
            nlists.push(sym.n_type);
            nlists.push(sym.n_sect);
            nlists.extend_from_slice(&0u16.to_le_bytes());
            push64(&mut nlists, sym.value);
            strings.extend_from_slice(sym.name.as_bytes());
            strings.push(0);
        }
        let symoff = linkedit;
        let stroff = symoff + nlists.len();
        let indirectoff = align8(stroff + strings.len());

        let mut out = Vec::new();
        for v in [
            self.magic,
            self.cputype,
            0,
            self.filetype,
            ncmds as u32,
            sizeofcmds as u32,
            self.flags,
            0,
        ] {
            push32(&mut out, v);
        }
        for cmd in &segments {
            out.extend_from_slice(cmd);
        }
        if has_symtab {
            push32(&mut out, LC_SYMTAB);
            push32(&mut out, SYMTAB_COMMAND_SIZE as u32);
            push32(&mut out, symoff as u32);
            push32(&mut out, self.symbols.len() as u32);
            push32(&mut out, stroff as u32);
            push32(&mut out, strings.len() as u32);

            push32(&mut out, LC_DYSYMTAB);
            push32(&mut out, DYSYMTAB_COMMAND_SIZE as u32);
            let undefined = self.symbols.iter().filter(|s| s.n_type & N_TYPE == N_UNDF).count() as u32;
            // ilocalsym..nundefsym, then toc/modtab/extref, then indirect.
            for v in [0, 0, 0, 0, 0, undefined, 0, 0, 0, 0, 0, 0] {
                push32(&mut out, v);
            }
            push32(&mut out, indirectoff as u32);
            push32(&mut out, self.indirect.len() as u32);
            for _ in 0..4 {
                push32(&mut out, 0);
            }
        }
        for cmd in &dylibs {
            out.extend_from_slice(cmd);
        }
        if let Some((cryptoff, cryptsize, cryptid)) = self.encryption {
            push32(&mut out, LC_ENCRYPTION_INFO_64);
            push32(&mut out, ENCRYPTION_INFO_64_SIZE as u32);
            push32(&mut out, cryptoff);
            push32(&mut out, cryptsize);
            push32(&mut out, cryptid);
            push32(&mut out, 0);
        }
        for cmd in &self.raw_commands {
            out.extend_from_slice(cmd);
        }

        out.resize(linkedit, 0);
        for seg in &self.segments {
            for sect in &seg.sections {
                let at = (seg.fileoff + (sect.addr - seg.vmaddr)) as usize;
                out[at..at + sect.data.len()].copy_from_slice(&sect.data);
            }
        }
        out.extend_from_slice(&nlists);
        out.extend_from_slice(&strings);
        out.resize(indirectoff, 0);
        for index in &self.indirect {
            push32(&mut out, *index);
        }
        out
    }
}

/// Wrap thin slices in a fat container, one page-aligned slice per entry.
pub fn fat_container(slices: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
    out.extend_from_slice(&(slices.len() as u32).to_be_bytes());
    let mut offset = 0x4000usize;
    let mut placed = Vec::new();
    for (cputype, body) in slices {
        for v in [*cputype, 0, offset as u32, body.len() as u32, 14] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        placed.push((offset, body));
        offset = (offset + body.len() + 0x3fff) & !0x3fff;
    }
    for (offset, body) in placed {
        out.resize(offset, 0);
        out.extend_from_slice(body);
    }
    out
}

/// AArch64 encoders for the instructions the fixtures use.
pub mod arm64 {
    pub const NOP: u32 = 0xd503_201f;
    pub const RET: u32 = 0xd65f_03c0;
    /// `add x29, sp, #0x10`
    pub const ADD_FP_SP_16: u32 = 0x9100_43fd;

    /// `adr x<rd>, #to` placed at `from`.
    pub fn adr(rd: u32, from: u64, to: u64) -> u32 {
        let imm = (to as i64 - from as i64) as u32;
        ((imm & 3) << 29) | (0b10000 << 24) | (((imm >> 2) & 0x7_ffff) << 5) | rd
    }

    /// `bl #to` placed at `from`.
    pub fn bl(from: u64, to: u64) -> u32 {
        let words = ((to as i64 - from as i64) >> 2) as u32;
        0x9400_0000 | (words & 0x03ff_ffff)
    }

    /// `str x<rt>, [sp, #offset]`
    pub fn str_sp(rt: u32, offset: u32) -> u32 {
        0xf900_03e0 | ((offset / 8) << 10) | rt
    }

    /// `ldr x<rt>, [sp, #offset]`
    pub fn ldr_sp(rt: u32, offset: u32) -> u32 {
        0xf940_03e0 | ((offset / 8) << 10) | rt
    }

    /// `mov x<rd>, x<rm>`
    pub fn mov(rd: u32, rm: u32) -> u32 {
        0xaa00_03e0 | (rm << 16) | rd
    }

    pub fn assemble(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// Addresses inside [`objc_fixture`].
pub mod layout {
    pub const TEXT: u64 = 0x1_0000_0000;
    pub const CODE: u64 = 0x1_0000_1000;
    pub const STUBS: u64 = 0x1_0000_2000;
    pub const STUB_MSGSEND: u64 = STUBS;
    pub const STUB_NSLOG: u64 = STUBS + 12;
    pub const METHNAME: u64 = 0x1_0000_3000;
    pub const CSTRING: u64 = 0x1_0000_3100;
    pub const FORMAT: u64 = CSTRING;
    pub const DATA: u64 = 0x1_0000_4000;
    pub const LAZY_POINTERS: u64 = DATA;
    pub const SELREFS: u64 = 0x1_0000_5000;
    pub const SELREF_ALLOC: u64 = SELREFS;
    pub const SELREF_INIT: u64 = SELREFS + 8;
    pub const SELREF_NAME: u64 = SELREFS + 16;
    pub const CLASSREFS: u64 = 0x1_0000_5100;
    pub const CLASSREF_FOO: u64 = CLASSREFS;
    pub const CFSTRINGS: u64 = 0x1_0000_5200;
    pub const FORMAT_CFSTRING: u64 = CFSTRINGS;
}

/// Function body in the fixture's `__text`:
///
/// ```text
/// add  x29, sp, #0x10
/// adr  x0, classref(Foo)
/// adr  x1, selref(alloc)
/// bl   _objc_msgSend        ; foo = [Foo alloc]
/// adr  x1, selref(init)
/// bl   _objc_msgSend        ; foo = [foo init]
/// str  x0, [sp]
/// adr  x0, "value: %@"
/// bl   _NSLog               ; _NSLog("value: %@", foo)
/// nop
/// adr  x1, selref(name)
/// ldr  x0, [sp]
/// bl   _objc_msgSend        ; _unknown1 = [foo name]
/// ret
/// ```
pub fn fixture_code() -> Vec<u32> {
    use arm64::*;
    use layout::*;
    let at = |i: u64| CODE + 4 * i;
    vec![
        ADD_FP_SP_16,
        adr(0, at(1), CLASSREF_FOO),
        adr(1, at(2), SELREF_ALLOC),
        bl(at(3), STUB_MSGSEND),
        adr(1, at(4), SELREF_INIT),
        bl(at(5), STUB_MSGSEND),
        str_sp(0, 0),
        adr(0, at(7), FORMAT),
        bl(at(8), STUB_NSLOG),
        NOP,
        adr(1, at(10), SELREF_NAME),
        ldr_sp(0, 0),
        bl(at(12), STUB_MSGSEND),
        RET,
    ]
}

/// Index of the last `bl _objc_msgSend` in [`fixture_code`].
pub const FIXTURE_TARGET_INDEX: usize = 12;

/// A small arm64 Objective-C executable:
///
/// - `__PAGEZERO`, `__TEXT` (code, stubs, selector names, C strings),
///   `__DATA` (lazy pointers, selector refs, class refs, CFStrings),
/// - imports `_objc_msgSend` and `_NSLog` through two stubs,
/// - links libobjc and Foundation.
pub fn objc_fixture() -> Vec<u8> {
    use layout::*;

    let mut stubs = Vec::new();
    for _ in 0..2 {
        stubs.extend(arm64::assemble(&[arm64::NOP, arm64::NOP, arm64::RET]));
    }
    let methname = b"alloc\0init\0name\0".to_vec();
    let selrefs: Vec<u8> = [METHNAME, METHNAME + 6, METHNAME + 11]
        .iter()
        .flat_map(|p| p.to_le_bytes())
        .collect();
    let mut cfstring = Vec::new();
    for v in [0u64, 0x7c8, FORMAT, 9] {
        cfstring.extend_from_slice(&v.to_le_bytes());
    }

    MachoBuilder::arm64()
        .segment("__PAGEZERO", 0, TEXT, 0, 0)
        .segment("__TEXT", TEXT, 0x4000, 0, 0x4000)
        .section(
            "__text",
            CODE,
            arm64::assemble(&fixture_code()),
            S_REGULAR | S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS,
        )
        .section(
            "__stubs",
            STUBS,
            stubs,
            S_SYMBOL_STUBS | S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS,
        )
        .reserved(0, 12)
        .section("__objc_methname", METHNAME, methname, S_CSTRING_LITERALS)
        .section("__cstring", CSTRING, b"value: %@\0".to_vec(), S_CSTRING_LITERALS)
        .segment("__DATA", DATA, 0x4000, 0x4000, 0x4000)
        .section("__la_symbol_ptr", LAZY_POINTERS, vec![0u8; 16], S_LAZY_SYMBOL_POINTERS)
        .reserved(2, 0)
        .section("__objc_selrefs", SELREFS, selrefs, S_LITERAL_POINTERS)
        .section("__objc_classrefs", CLASSREFS, vec![0u8; 8], S_REGULAR)
        .section("__cfstring", CFSTRINGS, cfstring, S_REGULAR)
        .import("_objc_msgSend")
        .import("_NSLog")
        .symbol("_main", N_SECT | N_EXT, 1, CODE)
        .indirect_symbols(&[0, 1, 0, 1])
        .dylib("/usr/lib/libobjc.A.dylib")
        .dylib("/System/Library/Frameworks/Foundation.framework/Foundation")
        .build()
}
