//! Runtime print helpers, emitted inline into every function.
//!
//! There is no runtime library to link against — everything a compiled
//! program needs at execution time (decimal conversion, character output)
//! is machine code this module asks [`super::expr`]/[`super::stmt`] to
//! splice directly into the function that needs it.

use crate::config::Target;
use crate::pool::StrSpan;

use super::encoder::{self, ArithOp, Cond, Reg, Xmm};
use super::state::{CodeGen, IatImport};

/// Emit a self-contained `jmp`-over-data sequence for a string literal,
/// leaving its address in RAX and its length in RDX (Output: "takes
/// their address via RIP-relative LEA"). The two-register convention
/// (pointer, length) is this rewrite's canonical string value, since the
/// source data is never NUL-padded to a fixed width.
pub fn emit_string_address(cg: &mut CodeGen, text: StrSpan) {
    let bytes = cg.strings.get_bytes(text).to_vec();
    emit_data_address(cg, &bytes, Reg::Rax);
    encoder::mov_ri64(&mut cg.buf, Reg::Rdx, bytes.len() as i64);
}

/// `jmp`-over-data, landing `dst` on the embedded bytes' address.
fn emit_data_address(cg: &mut CodeGen, bytes: &[u8], dst: Reg) {
    let skip_site = encoder::jmp_rel32(&mut cg.buf);
    let data_start = cg.buf.offset();
    cg.buf.emit_bytes(bytes);
    let data_end = cg.buf.offset();
    cg.buf.patch_rel32_to(skip_site, data_end);
    let lea_site = encoder::lea_rip(&mut cg.buf, dst);
    cg.buf.patch_rel32_to(lea_site, data_start);
}

/// Write `len` bytes (RDX) at address `RSI` to stdout/console, per target
///. Clobbers RAX, RCX, RDX, RSI, R8-R11.
fn emit_write(cg: &mut CodeGen) {
    match cg.config.target {
        Target::Linux => {
            encoder::mov_ri64(&mut cg.buf, Reg::Rdi, 1); // fd 1 = stdout
            encoder::mov_ri64(&mut cg.buf, Reg::Rax, 1); // sys_write
            encoder::syscall(&mut cg.buf);
        }
        Target::Windows => {
            // WriteConsoleA(handle, buf, count, &written, NULL). Shadow
            // space (0x20) + scratch for the out-param + padding keeps RSP
            // 16-byte aligned at the call.
            encoder::arith_ri(&mut cg.buf, ArithOp::Sub, Reg::Rsp, 0x30);
            encoder::mov_rr(&mut cg.buf, Reg::R14, Reg::Rsi); // preserve buf ptr
            encoder::mov_rr(&mut cg.buf, Reg::R15, Reg::Rdx); // preserve len

            encoder::mov_ri64(&mut cg.buf, Reg::Rcx, -11); // STD_OUTPUT_HANDLE
            cg.emit_iat_call(IatImport::GetStdHandle);

            encoder::mov_rr(&mut cg.buf, Reg::Rcx, Reg::Rax); // handle
            encoder::mov_rr(&mut cg.buf, Reg::Rdx, Reg::R14); // buf
            encoder::mov_rr(&mut cg.buf, Reg::R8, Reg::R15); // count
            encoder::lea(&mut cg.buf, Reg::R9, Reg::Rsp, 0x28); // &written (scratch)
            cg.emit_iat_call(IatImport::WriteConsoleA);

            encoder::arith_ri(&mut cg.buf, ArithOp::Add, Reg::Rsp, 0x30);
        }
    }
}

/// Write one byte already sitting at `[rsp]` (used by the digit-by-digit
/// integer printer).
fn emit_write_byte_at_rsp(cg: &mut CodeGen) {
    encoder::mov_rr(&mut cg.buf, Reg::Rsi, Reg::Rsp);
    encoder::mov_ri64(&mut cg.buf, Reg::Rdx, 1);
    emit_write(cg);
}

/// Push decimal digits of the (non-negative) value in `src` onto the stack,
/// least-significant-first, and leave the digit count in R15. Shared by the
/// integer printer and the float printer's integer part.
fn emit_push_digits(cg: &mut CodeGen, src: Reg) {
    encoder::mov_rr(&mut cg.buf, Reg::Rbx, src);
    encoder::mov_ri64(&mut cg.buf, Reg::R15, 0);
    encoder::test_rr(&mut cg.buf, Reg::Rbx, Reg::Rbx);
    let nonzero_site = encoder::jcc_rel32(&mut cg.buf, Cond::Ne);
    // Zero: push a single '0' and skip the division loop.
    encoder::mov_ri64(&mut cg.buf, Reg::Rdx, b'0' as i64);
    encoder::push(&mut cg.buf, Reg::Rdx);
    encoder::mov_ri64(&mut cg.buf, Reg::R15, 1);
    let skip_loop_site = encoder::jmp_rel32(&mut cg.buf);

    let loop_top = cg.buf.offset();
    cg.buf.patch_rel32_to(nonzero_site, loop_top);
    encoder::mov_rr(&mut cg.buf, Reg::Rax, Reg::Rbx);
    encoder::cqo(&mut cg.buf);
    encoder::mov_ri64(&mut cg.buf, Reg::Rcx, 10);
    encoder::idiv(&mut cg.buf, Reg::Rcx);
    encoder::arith_ri(&mut cg.buf, ArithOp::Add, Reg::Rdx, b'0' as i32);
    encoder::push(&mut cg.buf, Reg::Rdx);
    encoder::inc(&mut cg.buf, Reg::R15);
    encoder::mov_rr(&mut cg.buf, Reg::Rbx, Reg::Rax);
    encoder::test_rr(&mut cg.buf, Reg::Rbx, Reg::Rbx);
    let loop_back_site = encoder::jcc_rel32(&mut cg.buf, Cond::Ne);
    cg.buf.patch_rel32_to(loop_back_site, loop_top);

    let after = cg.buf.offset();
    cg.buf.patch_rel32_to(skip_loop_site, after);
}

/// Same as [`emit_push_digits`] but always pushes exactly `width` digits
/// (zero-padded on the left), used for the fractional part of float
/// printing where leading zeros must be preserved.
fn emit_push_fixed_width_digits(cg: &mut CodeGen, src: Reg, width: i64) {
    encoder::mov_rr(&mut cg.buf, Reg::Rbx, src);
    encoder::mov_ri64(&mut cg.buf, Reg::R15, 0);
    encoder::mov_ri64(&mut cg.buf, Reg::R14, width);
    let loop_top = cg.buf.offset();
    encoder::mov_rr(&mut cg.buf, Reg::Rax, Reg::Rbx);
    encoder::cqo(&mut cg.buf);
    encoder::mov_ri64(&mut cg.buf, Reg::Rcx, 10);
    encoder::idiv(&mut cg.buf, Reg::Rcx);
    encoder::arith_ri(&mut cg.buf, ArithOp::Add, Reg::Rdx, b'0' as i32);
    encoder::push(&mut cg.buf, Reg::Rdx);
    encoder::inc(&mut cg.buf, Reg::R15);
    encoder::mov_rr(&mut cg.buf, Reg::Rbx, Reg::Rax);
    encoder::cmp_rr(&mut cg.buf, Reg::R15, Reg::R14);
    let loop_back_site = encoder::jcc_rel32(&mut cg.buf, Cond::L);
    cg.buf.patch_rel32_to(loop_back_site, loop_top);
}

/// Pop and write `count` (R15) bytes previously pushed by
/// [`emit_push_digits`]/[`emit_push_fixed_width_digits`]. Digits are pushed
/// least-significant-first, so popping LIFO writes them most-significant
/// first — no separate reversal pass needed.
fn emit_drain_digits(cg: &mut CodeGen) {
    let write_top = cg.buf.offset();
    encoder::test_rr(&mut cg.buf, Reg::R15, Reg::R15);
    let done_site = encoder::jcc_rel32(&mut cg.buf, Cond::E);
    emit_write_byte_at_rsp(cg);
    encoder::arith_ri(&mut cg.buf, ArithOp::Add, Reg::Rsp, 8);
    encoder::dec(&mut cg.buf, Reg::R15);
    let write_back_site = encoder::jmp_rel32(&mut cg.buf);
    cg.buf.patch_rel32_to(write_back_site, write_top);
    let done = cg.buf.offset();
    cg.buf.patch_rel32_to(done_site, done);
}

/// Print the integer in RAX as decimal digits followed by a newline (
/// property 7). No sign handling — "no sign support is required at this
/// phase".
pub fn emit_print_int(cg: &mut CodeGen) {
    emit_push_digits(cg, Reg::Rax);
    emit_drain_digits(cg);
    emit_newline(cg);
}

/// Print `true`/`false` followed by a newline.
pub fn emit_print_bool(cg: &mut CodeGen) {
    encoder::test_rr(&mut cg.buf, Reg::Rax, Reg::Rax);
    let false_site = encoder::jcc_rel32(&mut cg.buf, Cond::E);
    emit_print_literal_bytes(cg, b"true");
    let end_site = encoder::jmp_rel32(&mut cg.buf);
    let false_target = cg.buf.offset();
    cg.buf.patch_rel32_to(false_site, false_target);
    emit_print_literal_bytes(cg, b"false");
    let end = cg.buf.offset();
    cg.buf.patch_rel32_to(end_site, end);
    emit_newline(cg);
}

/// Print the double in XMM0 followed by a newline. The exact format is an
/// open question; this rewrite picks a fixed six-digit
/// fractional-part decimal rendering and records the choice in DESIGN.md.
pub fn emit_print_float(cg: &mut CodeGen) {
    // Sign: comisd against a zeroed xmm register; print '-' and negate if
    // below zero.
    encoder::pxor_zero(&mut cg.buf, Xmm::Xmm1);
    encoder::comisd(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1);
    let not_negative_site = encoder::jcc_rel32(&mut cg.buf, Cond::Ae);
    emit_print_literal_bytes(cg, b"-");
    encoder::pxor_zero(&mut cg.buf, Xmm::Xmm1);
    encoder::subsd(&mut cg.buf, Xmm::Xmm1, Xmm::Xmm0);
    encoder::movsd_rr(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1);
    let not_negative = cg.buf.offset();
    cg.buf.patch_rel32_to(not_negative_site, not_negative);

    // Integer part, kept in R13 across the fractional-part computation.
    encoder::cvttsd2si(&mut cg.buf, Reg::R13, Xmm::Xmm0);
    emit_push_digits(cg, Reg::R13);
    emit_drain_digits(cg);

    emit_print_literal_bytes(cg, b".");

    // Fractional part: (value - floor(value)) * 1_000_000, truncated,
    // printed zero-padded to six digits.
    encoder::cvtsi2sd(&mut cg.buf, Xmm::Xmm1, Reg::R13);
    encoder::subsd(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1);
    encoder::mov_ri64(&mut cg.buf, Reg::R13, 1_000_000i64);
    encoder::cvtsi2sd(&mut cg.buf, Xmm::Xmm1, Reg::R13);
    encoder::mulsd(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1);
    encoder::cvttsd2si(&mut cg.buf, Reg::R13, Xmm::Xmm0);
    emit_push_fixed_width_digits(cg, Reg::R13, 6);
    emit_drain_digits(cg);

    emit_newline(cg);
}

/// Print a compile-time-known byte string (used for `"true"`/`"false"`/`"-"`/`"."`).
fn emit_print_literal_bytes(cg: &mut CodeGen, bytes: &[u8]) {
    emit_data_address(cg, bytes, Reg::Rsi);
    encoder::mov_ri64(&mut cg.buf, Reg::Rdx, bytes.len() as i64);
    emit_write(cg);
}

fn emit_newline(cg: &mut CodeGen) {
    emit_print_literal_bytes(cg, b"\n");
}

/// Print raw bytes whose address is in RAX and length in RDX (a string
/// value produced by [`emit_string_address`]). No trailing newline is
/// added, per E1/E7 (`print "hello\n"` → `hello\n`, the newline is part of
/// the literal, not appended by the printer).
pub fn emit_print_string_value(cg: &mut CodeGen) {
    encoder::mov_rr(&mut cg.buf, Reg::Rsi, Reg::Rax);
    emit_write(cg);
}

/// Emit the program's final exit, per platform. `code` is the
/// low 8 bits of the process exit status.
pub fn emit_exit(cg: &mut CodeGen, code: i64) {
    match cg.config.target {
        Target::Linux => {
            encoder::mov_ri64(&mut cg.buf, Reg::Rax, 60); // sys_exit
            encoder::mov_ri64(&mut cg.buf, Reg::Rdi, code);
            encoder::syscall(&mut cg.buf);
        }
        Target::Windows => {
            encoder::arith_ri(&mut cg.buf, ArithOp::Sub, Reg::Rsp, 0x20);
            encoder::mov_ri64(&mut cg.buf, Reg::Rcx, code);
            cg.emit_iat_call(IatImport::ExitProcess);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::generate;
    use crate::config::{CompilerConfig, Target};
    use crate::parser::Parser;
    use crate::resolver::Resolver;

    fn generate_src(src: &str, target: Target) -> crate::codegen::GenerateOutput {
        let parsed = Parser::new(src).parse().expect("parse");
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        let resolved = Resolver::new(&parsed.nodes, &parsed.strings).resolve(parsed.root);
        assert!(
            resolved.warnings.is_empty(),
            "resolve warnings: {:?}",
            resolved.warnings
        );
        let config = CompilerConfig::new(target);
        generate(&parsed.nodes, &parsed.strings, parsed.root, &config)
    }

    #[test]
    fn print_int_lowers_on_linux() {
        let out = generate_src("print 42", Target::Linux);
        assert!(out.errors.is_empty());
        assert!(!out.code.is_empty());
    }

    #[test]
    fn print_bool_lowers_on_linux() {
        let out = generate_src("print true", Target::Linux);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn print_float_lowers_on_linux() {
        let out = generate_src("print 1.5", Target::Linux);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn print_string_lowers_and_patches_iat_on_windows() {
        let out = generate_src("print \"hi\"", Target::Windows);
        assert!(out.errors.is_empty());
        assert!(out.iat_patches.iter().any(|(_, imp)| matches!(
            imp,
            crate::codegen::IatImport::WriteConsoleA
        )));
    }
}
