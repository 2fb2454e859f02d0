//! x86-64 instruction encoding primitives: REX prefixes, ModR/M/SIB
//! construction, and the small instruction set codegen actually needs.
//!
//! The prefix-flag/opcode-word scheme and the ModR/M/SIB builders below are
//! adapted from the pattern used by reference TCG-style x86-64 backends:
//! opcodes are `u32` words with prefix requirements OR'd into the high
//! bits, decoded by one central `emit_opc`. Those backends target a JIT
//! emitting arbitrary register combinations from a register allocator;
//! this compiler has no allocator, so the instruction builders below are
//! narrower — only the operand shapes codegen's stack-machine expression
//! evaluator actually produces (reg-reg, reg-imm, reg-[rbp+disp], rel32
//! branches).

use super::buffer::CodeBuffer;

pub const P_EXT: u32 = 0x100;
pub const P_DATA16: u32 = 0x400;
pub const P_REXW: u32 = 0x1000;
pub const P_SIMDF3: u32 = 0x20000;
pub const P_SIMDF2: u32 = 0x40000;

/// General-purpose 64-bit registers, numbered to match their encoding (0-15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    pub fn low3(self) -> u8 {
        (self as u8) & 0x7
    }
}

/// Scalar-double (XMM) registers, used only as SSE2 float operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
}

impl Xmm {
    pub fn low3(self) -> u8 {
        (self as u8) & 0x7
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Shl = 4,
    Sar = 7,
}

/// x86 condition codes for Jcc/SETcc, indexed by the low nibble of the
/// opcode (0x80+cc for Jcc long form, 0x90+cc for SETcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

#[inline]
fn rexw_flag(rexw: bool) -> u32 {
    if rexw {
        P_REXW
    } else {
        0
    }
}

/// Emit opcode with REX prefix. `r` is the reg field, `rm` is the r/m field,
/// raw register numbers 0-15 (pass 0 for an unused field).
pub fn emit_opc(buf: &mut CodeBuffer, opc: u32, r: u8, rm: u8) {
    let mut rex: u8 = 0;
    if opc & P_REXW != 0 {
        rex |= 0x08;
    }
    if r >= 8 {
        rex |= 0x04;
    }
    if rm >= 8 {
        rex |= 0x01;
    }

    if opc & P_DATA16 != 0 {
        buf.emit_u8(0x66);
    }
    if opc & P_SIMDF3 != 0 {
        buf.emit_u8(0xF3);
    } else if opc & P_SIMDF2 != 0 {
        buf.emit_u8(0xF2);
    }
    if rex != 0 {
        buf.emit_u8(0x40 | rex);
    }
    if opc & P_EXT != 0 {
        buf.emit_u8(0x0F);
    }
    buf.emit_u8(opc as u8);
}

/// opcode + ModR/M for a register-register operation.
pub fn emit_modrm(buf: &mut CodeBuffer, opc: u32, r: u8, rm: u8) {
    emit_opc(buf, opc, r, rm);
    buf.emit_u8(0xC0 | ((r & 7) << 3) | (rm & 7));
}

/// opcode + ModR/M with a `/r` group extension in the reg field.
pub fn emit_modrm_ext(buf: &mut CodeBuffer, opc: u32, ext: u8, rm: u8) {
    emit_opc(buf, opc, ext, rm);
    buf.emit_u8(0xC0 | (ext << 3) | (rm & 7));
}

/// opcode + ModR/M + displacement for memory `[base + offset]`. RBP/R13
/// need an explicit disp8=0 (mod=00 with r/m=101 means RIP-relative, not
/// `[rbp]`); RSP/R12 need a SIB byte since r/m=100 is the SIB escape.
pub fn emit_modrm_offset(buf: &mut CodeBuffer, opc: u32, r: u8, base: Reg, offset: i32) {
    emit_opc(buf, opc, r, base as u8);
    let r3 = r & 7;
    let b3 = base.low3();

    if offset == 0 && b3 != 5 {
        if b3 == 4 {
            buf.emit_u8((r3 << 3) | 0x04);
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8((r3 << 3) | b3);
        }
    } else if (-128..=127).contains(&offset) {
        if b3 == 4 {
            buf.emit_u8(0x44 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x40 | (r3 << 3) | b3);
        }
        buf.emit_u8(offset as u8);
    } else {
        if b3 == 4 {
            buf.emit_u8(0x84 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x80 | (r3 << 3) | b3);
        }
        buf.emit_u32(offset as u32);
    }
}

// -- GPR arithmetic / data movement --

pub fn mov_rr(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    emit_modrm(buf, 0x89 | P_REXW, src as u8, dst as u8);
}

pub fn mov_ri64(buf: &mut CodeBuffer, dst: Reg, imm: i64) {
    emit_opc(buf, 0xB8 | P_REXW, 0, dst as u8);
    buf.emit_i64(imm);
}

pub fn mov_load(buf: &mut CodeBuffer, dst: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, 0x8B | P_REXW, dst as u8, base, offset);
}

pub fn mov_store(buf: &mut CodeBuffer, base: Reg, offset: i32, src: Reg) {
    emit_modrm_offset(buf, 0x89 | P_REXW, src as u8, base, offset);
}

/// `mov dst, [rip+disp32]`, returning the patch-site offset. This is how
/// the Windows codegen path calls through the IAT (`mov rax,
/// [rip+disp32]; call rax`) — the displacement is only known once the
/// binary emitter has laid out `.idata`, so the site is patched after the
/// fact rather than at emission time.
pub fn mov_load_rip(buf: &mut CodeBuffer, dst: Reg) -> u32 {
    emit_opc(buf, 0x8B | P_REXW, dst as u8, 0);
    buf.emit_u8(0x05 | (dst.low3() << 3));
    buf.reserve_i32()
}

pub fn lea(buf: &mut CodeBuffer, dst: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, 0x8D | P_REXW, dst as u8, base, offset);
}

/// `lea dst, [rip+disp32]`, returning the offset of the reserved
/// displacement for later patching with [`CodeBuffer::patch_rel32_to`]
/// (mod=00, r/m=101 is the RIP-relative form in 64-bit mode — the same
/// encoding `emit_modrm_offset` has to special-case away from when the base
/// register happens to be RBP/R13). Used to address inline-embedded string
/// data.
pub fn lea_rip(buf: &mut CodeBuffer, dst: Reg) -> u32 {
    emit_opc(buf, 0x8D | P_REXW, dst as u8, 0);
    buf.emit_u8(0x05 | (dst.low3() << 3));
    buf.reserve_i32()
}

/// `lea dst, [base + index*scale]` — the SIB-addressed form the ×3/5/9
/// peephole needs (`lea rax, [rax + rax*2/4/8]`). `scale` must be 1,
/// 2, 4, or 8. Narrower than a general addressing-mode encoder: no
/// displacement field, since the peephole never needs one.
pub fn lea_scaled(buf: &mut CodeBuffer, dst: Reg, base: Reg, index: Reg, scale: u8) {
    let ss: u8 = match scale {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => panic!("lea_scaled: scale must be 1, 2, 4, or 8"),
    };
    let mut rex = 0x48u8; // REX.W always set (64-bit lea)
    if (dst as u8) >= 8 {
        rex |= 0x04; // REX.R
    }
    if (index as u8) >= 8 {
        rex |= 0x02; // REX.X
    }
    if (base as u8) >= 8 {
        rex |= 0x01; // REX.B
    }
    buf.emit_u8(rex);
    buf.emit_u8(0x8D);
    buf.emit_u8(0x04 | (dst.low3() << 3)); // mod=00, reg=dst, rm=100 (SIB escape)
    buf.emit_u8((ss << 6) | (index.low3() << 3) | base.low3());
}

pub fn push(buf: &mut CodeBuffer, reg: Reg) {
    emit_opc(buf, 0x50, 0, reg as u8);
}

pub fn pop(buf: &mut CodeBuffer, reg: Reg) {
    emit_opc(buf, 0x58, 0, reg as u8);
}

pub fn arith_rr(buf: &mut CodeBuffer, op: ArithOp, dst: Reg, src: Reg) {
    let opc = (0x03 + ((op as u32) << 3)) | P_REXW;
    emit_modrm(buf, opc, dst as u8, src as u8);
}

pub fn arith_ri(buf: &mut CodeBuffer, op: ArithOp, dst: Reg, imm: i32) {
    if (-128..=127).contains(&imm) {
        emit_modrm_ext(buf, 0x83 | P_REXW, op as u8, dst as u8);
        buf.emit_u8(imm as u8);
    } else {
        emit_modrm_ext(buf, 0x81 | P_REXW, op as u8, dst as u8);
        buf.emit_i32(imm);
    }
}

/// `imul dst, src` (two-operand form, multiplicative ops).
pub fn imul_rr(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    emit_modrm(buf, 0xAF | P_EXT | P_REXW, dst as u8, src as u8);
}

/// `cqo; idiv divisor` sequence: sign-extends rax into rdx:rax then divides.
/// Quotient ends up in rax, remainder in rdx.
pub fn cqo(buf: &mut CodeBuffer) {
    emit_opc(buf, 0x99 | P_REXW, 0, 0);
}

pub fn idiv(buf: &mut CodeBuffer, divisor: Reg) {
    emit_modrm_ext(buf, 0xF7 | P_REXW, 7, divisor as u8);
}

pub fn neg(buf: &mut CodeBuffer, reg: Reg) {
    emit_modrm_ext(buf, 0xF7 | P_REXW, 3, reg as u8);
}

pub fn not_(buf: &mut CodeBuffer, reg: Reg) {
    emit_modrm_ext(buf, 0xF7 | P_REXW, 2, reg as u8);
}

pub fn inc(buf: &mut CodeBuffer, reg: Reg) {
    emit_modrm_ext(buf, 0xFF | P_REXW, 0, reg as u8);
}

pub fn dec(buf: &mut CodeBuffer, reg: Reg) {
    emit_modrm_ext(buf, 0xFF | P_REXW, 1, reg as u8);
}

pub fn shift_ri(buf: &mut CodeBuffer, op: ShiftOp, reg: Reg, imm: u8) {
    if imm == 1 {
        emit_modrm_ext(buf, 0xD1 | P_REXW, op as u8, reg as u8);
    } else {
        emit_modrm_ext(buf, 0xC1 | P_REXW, op as u8, reg as u8);
        buf.emit_u8(imm);
    }
}

pub fn test_rr(buf: &mut CodeBuffer, a: Reg, b: Reg) {
    emit_modrm(buf, 0x85 | P_REXW, b as u8, a as u8);
}

pub fn cmp_rr(buf: &mut CodeBuffer, a: Reg, b: Reg) {
    arith_rr(buf, ArithOp::Cmp, a, b);
}

/// `setcc al; movzx dst, al` — materializes a condition flag as a 0/1
/// integer.
pub fn setcc_zx(buf: &mut CodeBuffer, cond: Cond, dst: Reg) {
    emit_modrm_ext(buf, 0x90 | (cond as u32) | P_EXT, 0, Reg::Rax as u8);
    emit_modrm(buf, 0xB6 | P_EXT | P_REXW, dst as u8, Reg::Rax as u8);
}

/// Emit `jmp rel32`, returning the offset of the reserved displacement for
/// later patching.
pub fn jmp_rel32(buf: &mut CodeBuffer) -> u32 {
    buf.emit_u8(0xE9);
    buf.reserve_i32()
}

/// Emit `jcc rel32`, returning the patch offset.
pub fn jcc_rel32(buf: &mut CodeBuffer, cond: Cond) -> u32 {
    buf.emit_u8(0x0F);
    buf.emit_u8(0x80 | cond as u8);
    buf.reserve_i32()
}

/// Emit `call rel32`, returning the patch offset.
pub fn call_rel32(buf: &mut CodeBuffer) -> u32 {
    buf.emit_u8(0xE8);
    buf.reserve_i32()
}

/// Emit an indirect call through a register (used for the Windows IAT
/// thunk, where the callee address is loaded from the import table).
pub fn call_indirect(buf: &mut CodeBuffer, reg: Reg) {
    emit_modrm_ext(buf, 0xFF, 2, reg as u8);
}

pub fn ret(buf: &mut CodeBuffer) {
    buf.emit_u8(0xC3);
}

pub fn syscall(buf: &mut CodeBuffer) {
    buf.emit_u8(0x0F);
    buf.emit_u8(0x05);
}

// -- Stack frame prologue/epilogue --

pub fn push_rbp_mov_rbp_rsp(buf: &mut CodeBuffer) {
    push(buf, Reg::Rbp);
    mov_rr(buf, Reg::Rbp, Reg::Rsp);
}

pub fn leave(buf: &mut CodeBuffer) {
    buf.emit_u8(0xC9);
}

// -- SSE2 scalar-double operations --

fn emit_xmm_modrm(buf: &mut CodeBuffer, opc: u32, r: Xmm, rm: Xmm) {
    emit_opc(buf, opc, r as u8, rm as u8);
    buf.emit_u8(0xC0 | (r.low3() << 3) | rm.low3());
}

fn emit_xmm_modrm_offset(buf: &mut CodeBuffer, opc: u32, r: Xmm, base: Reg, offset: i32) {
    emit_opc(buf, opc, r as u8, base as u8);
    let r3 = r.low3();
    let b3 = base.low3();
    if offset == 0 && b3 != 5 {
        if b3 == 4 {
            buf.emit_u8((r3 << 3) | 0x04);
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8((r3 << 3) | b3);
        }
    } else if (-128..=127).contains(&offset) {
        if b3 == 4 {
            buf.emit_u8(0x44 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x40 | (r3 << 3) | b3);
        }
        buf.emit_u8(offset as u8);
    } else {
        if b3 == 4 {
            buf.emit_u8(0x84 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x80 | (r3 << 3) | b3);
        }
        buf.emit_u32(offset as u32);
    }
}

pub fn movsd_rr(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_xmm_modrm(buf, 0x10 | P_EXT | P_SIMDF2, dst, src);
}

pub fn movsd_load(buf: &mut CodeBuffer, dst: Xmm, base: Reg, offset: i32) {
    emit_xmm_modrm_offset(buf, 0x10 | P_EXT | P_SIMDF2, dst, base, offset);
}

pub fn movsd_store(buf: &mut CodeBuffer, base: Reg, offset: i32, src: Xmm) {
    emit_xmm_modrm_offset(buf, 0x11 | P_EXT | P_SIMDF2, src, base, offset);
}

pub fn addsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_xmm_modrm(buf, 0x58 | P_EXT | P_SIMDF2, dst, src);
}

pub fn subsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_xmm_modrm(buf, 0x5C | P_EXT | P_SIMDF2, dst, src);
}

pub fn mulsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_xmm_modrm(buf, 0x59 | P_EXT | P_SIMDF2, dst, src);
}

pub fn divsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_xmm_modrm(buf, 0x5E | P_EXT | P_SIMDF2, dst, src);
}

/// `comisd dst, src` — sets flags for Jcc/SETcc the same way `cmp` does for
/// integers.
pub fn comisd(buf: &mut CodeBuffer, a: Xmm, b: Xmm) {
    emit_xmm_modrm(buf, 0x2F | P_EXT | P_DATA16, a, b);
}

pub fn cvtsi2sd(buf: &mut CodeBuffer, dst: Xmm, src: Reg) {
    emit_opc(buf, 0x2A | P_EXT | P_SIMDF2 | P_REXW, dst as u8, src as u8);
    buf.emit_u8(0xC0 | (dst.low3() << 3) | src.low3());
}

pub fn cvttsd2si(buf: &mut CodeBuffer, dst: Reg, src: Xmm) {
    emit_opc(buf, 0x2C | P_EXT | P_SIMDF2 | P_REXW, dst as u8, src as u8);
    buf.emit_u8(0xC0 | (dst.low3() << 3) | src.low3());
}

/// `sqrtsd dst, src` — backs the one `math.` builtin (`math.sqrt`) this
/// freestanding backend can implement without a libm to link against.
pub fn sqrtsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_xmm_modrm(buf, 0x51 | P_EXT | P_SIMDF2, dst, src);
}

/// `pxor dst, dst` — the idiomatic way to zero an XMM register.
pub fn pxor_zero(buf: &mut CodeBuffer, reg: Xmm) {
    emit_xmm_modrm(buf, 0xEF | P_EXT | P_DATA16, reg, reg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_ri64_emits_rexw_and_imm() {
        let mut buf = CodeBuffer::new();
        mov_ri64(&mut buf, Reg::Rax, 42);
        let bytes = buf.as_bytes();
        assert_eq!(bytes[0], 0x48); // REX.W
        assert_eq!(bytes[1], 0xB8); // MOV RAX, imm64
        assert_eq!(&bytes[2..10], &42i64.to_le_bytes());
    }

    #[test]
    fn mov_load_rbp_uses_disp8_even_at_zero_offset() {
        let mut buf = CodeBuffer::new();
        mov_load(&mut buf, Reg::Rax, Reg::Rbp, 0);
        // mod=01 (disp8) forced for rbp even though offset is 0.
        let bytes = buf.as_bytes();
        assert_eq!(bytes[2] & 0xC0, 0x40);
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn mov_load_rsp_emits_sib_byte() {
        let mut buf = CodeBuffer::new();
        mov_load(&mut buf, Reg::Rax, Reg::Rsp, 8);
        let bytes = buf.as_bytes();
        // modrm byte's r/m field is 100 (SIB escape), followed by a SIB byte.
        assert_eq!(bytes[2] & 0x07, 0x04);
        assert_eq!(bytes[3], 0x24);
    }

    #[test]
    fn lea_rip_emits_modrm_101_and_reserves_site() {
        let mut buf = CodeBuffer::new();
        let site = lea_rip(&mut buf, Reg::Rax);
        let bytes = buf.as_bytes();
        assert_eq!(bytes[1], 0x8D);
        assert_eq!(bytes[2], 0x05);
        assert_eq!(site, 3);
    }

    #[test]
    fn jmp_rel32_reserves_patchable_site() {
        let mut buf = CodeBuffer::new();
        let site = jmp_rel32(&mut buf);
        assert_eq!(site, 1);
        assert_eq!(buf.offset(), 5);
    }
}
