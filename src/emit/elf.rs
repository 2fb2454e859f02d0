//! Minimal ELF64 executable emitter.
//!
//! One loadable segment carries the whole file — headers and code
//! together — mapped read+execute at a fixed base address. There is no
//! dynamic linker, no section-to-segment indirection, no relocations:
//! the code buffer is already position-dependent machine code addressed
//! relative to this one fixed base.

use bitflags::bitflags;

const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;

/// Base address of the single `PT_LOAD` segment. Low enough to stay clear
/// of typical high-address mmap regions, page-aligned as the kernel's ELF
/// loader requires when `p_offset` is zero.
pub const LOAD_ADDR: u64 = 0x40_0000;

bitflags! {
    struct PFlags: u32 {
        const X = 0x1;
        const W = 0x2;
        const R = 0x4;
    }
}

/// Assemble a complete ELF64 image embedding `code` as the tail of the
/// single loadable segment. Byte-identical on every call for the same
/// `code` — nothing here reads the clock or the
/// filesystem.
pub fn build(code: &[u8]) -> Vec<u8> {
    let headers_size = EHDR_SIZE + PHDR_SIZE;
    let entry = LOAD_ADDR + headers_size;
    let file_size = headers_size + code.len() as u64;

    let mut out = Vec::with_capacity(file_size as usize);

    // ELF header.
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
    out.push(2); // EI_CLASS: ELFCLASS64
    out.push(1); // EI_DATA: ELFDATA2LSB
    out.push(1); // EI_VERSION: EV_CURRENT
    out.push(0); // EI_OSABI: ELFOSABI_SYSV
    out.extend_from_slice(&[0u8; 8]); // EI_ABIVERSION + padding
    out.extend_from_slice(&2u16.to_le_bytes()); // e_type: ET_EXEC
    out.extend_from_slice(&0x3Eu16.to_le_bytes()); // e_machine: EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&entry.to_le_bytes()); // e_entry
    out.extend_from_slice(&EHDR_SIZE.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
    out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    debug_assert_eq!(out.len() as u64, EHDR_SIZE);

    // Program header: one PT_LOAD, R-X, spanning the whole file.
    out.extend_from_slice(&1u32.to_le_bytes()); // p_type: PT_LOAD
    out.extend_from_slice(&(PFlags::R | PFlags::X).bits().to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // p_offset
    out.extend_from_slice(&LOAD_ADDR.to_le_bytes()); // p_vaddr
    out.extend_from_slice(&LOAD_ADDR.to_le_bytes()); // p_paddr
    out.extend_from_slice(&file_size.to_le_bytes()); // p_filesz
    out.extend_from_slice(&file_size.to_le_bytes()); // p_memsz
    out.extend_from_slice(&0x1000u64.to_le_bytes()); // p_align
    debug_assert_eq!(out.len() as u64, headers_size);

    out.extend_from_slice(code);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_elf_magic() {
        let img = build(&[0x90, 0xc3]);
        assert_eq!(&img[0..4], &[0x7f, b'E', b'L', b'F']);
        assert_eq!(img[4], 2);
        assert_eq!(img[5], 1);
    }

    #[test]
    fn entry_point_follows_headers() {
        let img = build(&[0xc3]);
        let entry = u64::from_le_bytes(img[24..32].try_into().unwrap());
        assert_eq!(entry, LOAD_ADDR + EHDR_SIZE + PHDR_SIZE);
    }

    #[test]
    fn program_header_spans_whole_file() {
        let code = [0x90u8; 5];
        let img = build(&code);
        let filesz = u64::from_le_bytes(img[96..104].try_into().unwrap());
        assert_eq!(filesz, img.len() as u64);
    }

    #[test]
    fn deterministic_across_calls() {
        let code = [0x48, 0x31, 0xc0, 0xc3];
        assert_eq!(build(&code), build(&code));
    }
}
