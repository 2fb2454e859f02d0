//! Expression codegen: walks an expression subtree and leaves its
//! value in the canonical result location — RAX for integers, booleans,
//! strings (as a pointer/length pair, see [`super::runtime`]) and solid
//! handles; XMM0 for floats.

use crate::ast::{BinOp, Node, UnOp};
use crate::error::CompileError;
use crate::pool::NodeIndex;
use crate::types::TypeTag;

use super::encoder::{self, ArithOp, Cond, Reg, Xmm};
use super::state::CodeGen;

type CResult<T> = Result<T, CompileError>;

/// "conservative syntactic analysis": true if evaluating `idx`
/// leaves its result in XMM0 rather than RAX.
pub fn is_float_expr(cg: &CodeGen, idx: NodeIndex) -> bool {
    if idx.is_none() {
        return false;
    }
    match *cg.nodes.get(idx) {
        Node::Float { .. } => true,
        Node::Identifier { name, .. } => {
            let n = cg.text(name).to_string();
            cg.vars.get(&n).map(|s| s.type_tag.is_float()).unwrap_or(false)
        }
        Node::UnaryOp { op: UnOp::Neg, operand, .. } => is_float_expr(cg, operand),
        Node::BinaryOp { left, right, .. } => is_float_expr(cg, left) || is_float_expr(cg, right),
        Node::FuncCall { callee, .. } => cg.text(callee).starts_with("math."),
        _ => false,
    }
}

fn is_assign_op(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Assign
            | BinOp::AddAssign
            | BinOp::SubAssign
            | BinOp::MulAssign
            | BinOp::DivAssign
            | BinOp::RemAssign
            | BinOp::PowAssign
    )
}

fn is_comparison_op(op: BinOp) -> bool {
    matches!(op, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne)
}

/// Evaluate `idx`, leaving the result in RAX regardless of its declared
/// type (converting float results via `cvttsd2si` when an integer is
/// needed — used for switch/array-index/condition positions).
pub fn gen_expr_as_int(cg: &mut CodeGen, idx: NodeIndex) -> CResult<()> {
    if is_float_expr(cg, idx) {
        gen_expr(cg, idx)?;
        encoder::cvttsd2si(&mut cg.buf, Reg::Rax, Xmm::Xmm0);
        Ok(())
    } else {
        gen_expr(cg, idx)
    }
}

/// Evaluate `idx` into the canonical location for its own type.
pub fn gen_expr(cg: &mut CodeGen, idx: NodeIndex) -> CResult<()> {
    let node = *cg.nodes.get(idx);
    match node {
        Node::Number { value, .. } => {
            encoder::mov_ri64(&mut cg.buf, Reg::Rax, value);
            Ok(())
        }
        Node::Bool { value, .. } => {
            encoder::mov_ri64(&mut cg.buf, Reg::Rax, value as i64);
            Ok(())
        }
        Node::Float { value, .. } => {
            gen_float_literal(cg, value);
            Ok(())
        }
        Node::String { text, .. } => {
            super::runtime::emit_string_address(cg, text);
            Ok(())
        }
        Node::Identifier { name, .. } => gen_identifier(cg, idx, name),
        Node::BinaryOp { op, left, right, .. } => gen_binary_op(cg, op, left, right),
        Node::UnaryOp { op, operand, .. } => gen_unary_op(cg, op, operand),
        Node::FuncCall { callee, args, .. } => gen_call(cg, callee, args),
        Node::Array4dAccess { name, indices, .. } => gen_array_load(cg, name, indices),
        Node::Solid { .. } => {
            // Parsed-and-resolved-but-not-lowered: a solid
            // literal evaluates to its opaque zero handle.
            encoder::mov_ri64(&mut cg.buf, Reg::Rax, 0);
            Ok(())
        }
        Node::TimingOp { expr, .. } => {
            // Likewise not lowered; fall through to evaluating the wrapped
            // expression so the rest of the program still runs.
            gen_expr(cg, expr)
        }
        _ => Err(CompileError::codegen(format!(
            "node {:?} is not valid in expression position",
            idx
        ))),
    }
}

fn gen_float_literal(cg: &mut CodeGen, value: f64) {
    // Materialize via a stack trampoline: push the raw bit pattern as a
    // GPR immediate, then movsd it back out of memory into XMM0.
    let bits = value.to_bits() as i64;
    encoder::mov_ri64(&mut cg.buf, Reg::R10, bits);
    encoder::push(&mut cg.buf, Reg::R10);
    encoder::movsd_load(&mut cg.buf, Xmm::Xmm0, Reg::Rsp, 0);
    encoder::arith_ri(&mut cg.buf, ArithOp::Add, Reg::Rsp, 8);
}

fn gen_identifier(cg: &mut CodeGen, idx: NodeIndex, name: crate::pool::StrSpan) -> CResult<()> {
    let n = cg.text(name).to_string();
    let slot = cg
        .vars
        .get(&n)
        .copied()
        .ok_or_else(|| CompileError::codegen(format!("reference to unassigned variable '{}'", n)))?;
    let _ = idx;
    if slot.type_tag.is_float() {
        encoder::movsd_load(&mut cg.buf, Xmm::Xmm0, Reg::Rbp, slot.stack_offset);
    } else {
        encoder::mov_load(&mut cg.buf, Reg::Rax, Reg::Rbp, slot.stack_offset);
    }
    Ok(())
}

/// Store RAX/XMM0 (whichever is live for `type_tag`) to variable `name`'s
/// slot, declaring it first if this is its first assignment.
pub fn store_to_var(cg: &mut CodeGen, name: &str, type_tag: TypeTag) {
    let offset = match cg.vars.get(name) {
        Some(slot) => slot.stack_offset,
        None => cg.vars.declare(name, type_tag),
    };
    if type_tag.is_float() {
        encoder::movsd_store(&mut cg.buf, Reg::Rbp, offset, Xmm::Xmm0);
    } else {
        encoder::mov_store(&mut cg.buf, Reg::Rbp, offset, Reg::Rax);
    }
    cg.vars.mark_initialized(name);
}

fn ident_name<'a>(cg: &'a CodeGen, idx: NodeIndex) -> Option<String> {
    match *cg.nodes.get(idx) {
        Node::Identifier { name, .. } => Some(cg.text(name).to_string()),
        _ => None,
    }
}

fn gen_binary_op(cg: &mut CodeGen, op: BinOp, left: NodeIndex, right: NodeIndex) -> CResult<()> {
    if is_assign_op(op) {
        return gen_assign(cg, op, left, right);
    }
    match op {
        BinOp::And | BinOp::Or => return gen_logical(cg, op, left, right),
        _ => {}
    }
    if is_comparison_op(op) {
        return gen_comparison(cg, op, left, right);
    }
    if is_float_expr(cg, left) || is_float_expr(cg, right) {
        gen_float_binop(cg, op, left, right)
    } else {
        gen_int_binop(cg, op, left, right)
    }
}

fn gen_assign(cg: &mut CodeGen, op: BinOp, left: NodeIndex, right: NodeIndex) -> CResult<()> {
    if matches!(*cg.nodes.get(left), Node::Array4dAccess { .. }) {
        return gen_array_assign(cg, op, left, right);
    }
    let name = ident_name(cg, left)
        .ok_or_else(|| CompileError::codegen("left side of assignment must be a variable"))?;
    let type_tag = cg
        .vars
        .get(&name)
        .map(|s| s.type_tag)
        .unwrap_or(if is_float_expr(cg, right) { TypeTag::Float } else { TypeTag::Int });

    if op == BinOp::Assign {
        gen_expr(cg, right)?;
        store_to_var(cg, &name, type_tag);
        return Ok(());
    }

    // Compound assignment: `x op= rhs` desugars to `x = x op rhs`.
    let plain_op = match op {
        BinOp::AddAssign => BinOp::Add,
        BinOp::SubAssign => BinOp::Sub,
        BinOp::MulAssign => BinOp::Mul,
        BinOp::DivAssign => BinOp::Div,
        BinOp::RemAssign => BinOp::Rem,
        BinOp::PowAssign => BinOp::Pow,
        _ => unreachable!("gen_assign only called for assignment operators"),
    };
    if type_tag.is_float() {
        gen_expr(cg, right)?;
        encoder::arith_ri(&mut cg.buf, ArithOp::Sub, Reg::Rsp, 8);
        encoder::movsd_store(&mut cg.buf, Reg::Rsp, 0, Xmm::Xmm0);
        gen_expr(cg, left)?;
        encoder::movsd_load(&mut cg.buf, Xmm::Xmm1, Reg::Rsp, 0);
        encoder::arith_ri(&mut cg.buf, ArithOp::Add, Reg::Rsp, 8);
        apply_float_op(cg, plain_op);
    } else {
        gen_expr(cg, right)?;
        encoder::mov_rr(&mut cg.buf, Reg::R10, Reg::Rax);
        gen_expr(cg, left)?;
        encoder::mov_rr(&mut cg.buf, Reg::Rdx, Reg::R10);
        apply_int_op(cg, plain_op)?;
    }
    store_to_var(cg, &name, type_tag);
    Ok(())
}

/// Assignment (plain or compound) to a 4D array element. Array storage is
/// untyped 8-byte slots: values always
/// round-trip through the integer path, so a float stored into an array
/// keeps its bit pattern but loses the float/int distinction on read-back
/// unless the reader immediately reinterprets it.
fn gen_array_assign(cg: &mut CodeGen, op: BinOp, left: NodeIndex, right: NodeIndex) -> CResult<()> {
    let (name, indices) = match *cg.nodes.get(left) {
        Node::Array4dAccess { name, indices, .. } => (name, indices),
        _ => unreachable!("gen_array_assign only called for Array4dAccess targets"),
    };
    let offset = super::stmt::array_element_offset(cg, name, indices)?;

    if op == BinOp::Assign {
        gen_expr_as_int(cg, right)?;
        encoder::mov_store(&mut cg.buf, Reg::Rbp, offset, Reg::Rax);
        return Ok(());
    }

    let plain_op = match op {
        BinOp::AddAssign => BinOp::Add,
        BinOp::SubAssign => BinOp::Sub,
        BinOp::MulAssign => BinOp::Mul,
        BinOp::DivAssign => BinOp::Div,
        BinOp::RemAssign => BinOp::Rem,
        BinOp::PowAssign => BinOp::Pow,
        _ => unreachable!("gen_array_assign only called for assignment operators"),
    };
    gen_expr_as_int(cg, right)?;
    encoder::mov_rr(&mut cg.buf, Reg::R10, Reg::Rax);
    encoder::mov_load(&mut cg.buf, Reg::Rax, Reg::Rbp, offset);
    encoder::mov_rr(&mut cg.buf, Reg::Rdx, Reg::R10);
    apply_int_op(cg, plain_op)?;
    encoder::mov_store(&mut cg.buf, Reg::Rbp, offset, Reg::Rax);
    Ok(())
}

fn gen_logical(cg: &mut CodeGen, op: BinOp, left: NodeIndex, right: NodeIndex) -> CResult<()> {
    gen_expr_as_int(cg, left)?;
    encoder::test_rr(&mut cg.buf, Reg::Rax, Reg::Rax);
    encoder::setcc_zx(&mut cg.buf, Cond::Ne, Reg::Rax);
    encoder::mov_rr(&mut cg.buf, Reg::R10, Reg::Rax);
    gen_expr_as_int(cg, right)?;
    encoder::test_rr(&mut cg.buf, Reg::Rax, Reg::Rax);
    encoder::setcc_zx(&mut cg.buf, Cond::Ne, Reg::Rax);
    let arith = if op == BinOp::And { ArithOp::And } else { ArithOp::Or };
    encoder::arith_rr(&mut cg.buf, arith, Reg::Rax, Reg::R10);
    Ok(())
}

fn gen_comparison(cg: &mut CodeGen, op: BinOp, left: NodeIndex, right: NodeIndex) -> CResult<()> {
    let float_cmp = is_float_expr(cg, left) || is_float_expr(cg, right);
    if float_cmp {
        gen_expr_to_xmm(cg, right)?;
        encoder::arith_ri(&mut cg.buf, ArithOp::Sub, Reg::Rsp, 8);
        encoder::movsd_store(&mut cg.buf, Reg::Rsp, 0, Xmm::Xmm0);
        gen_expr_to_xmm(cg, left)?;
        encoder::movsd_load(&mut cg.buf, Xmm::Xmm1, Reg::Rsp, 0);
        encoder::arith_ri(&mut cg.buf, ArithOp::Add, Reg::Rsp, 8);
        encoder::comisd(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1);
        // comisd sets flags the same way an unsigned cmp would.
        let cond = match op {
            BinOp::Lt => Cond::B,
            BinOp::Gt => Cond::A,
            BinOp::Le => Cond::Be,
            BinOp::Ge => Cond::Ae,
            BinOp::Eq => Cond::E,
            BinOp::Ne => Cond::Ne,
            _ => unreachable!(),
        };
        encoder::setcc_zx(&mut cg.buf, cond, Reg::Rax);
    } else {
        gen_expr_as_int(cg, right)?;
        encoder::mov_rr(&mut cg.buf, Reg::R10, Reg::Rax);
        gen_expr_as_int(cg, left)?;
        encoder::cmp_rr(&mut cg.buf, Reg::Rax, Reg::R10);
        let cond = match op {
            BinOp::Lt => Cond::L,
            BinOp::Gt => Cond::G,
            BinOp::Le => Cond::Le,
            BinOp::Ge => Cond::Ge,
            BinOp::Eq => Cond::E,
            BinOp::Ne => Cond::Ne,
            _ => unreachable!(),
        };
        encoder::setcc_zx(&mut cg.buf, cond, Reg::Rax);
    }
    Ok(())
}

/// Evaluate `idx` into XMM0, converting from RAX via `cvtsi2sd` when `idx`
/// is integer-valued.
fn gen_expr_to_xmm(cg: &mut CodeGen, idx: NodeIndex) -> CResult<()> {
    if is_float_expr(cg, idx) {
        gen_expr(cg, idx)
    } else {
        gen_expr(cg, idx)?;
        encoder::cvtsi2sd(&mut cg.buf, Xmm::Xmm0, Reg::Rax);
        Ok(())
    }
}

fn gen_float_binop(cg: &mut CodeGen, op: BinOp, left: NodeIndex, right: NodeIndex) -> CResult<()> {
    gen_expr_to_xmm(cg, right)?;
    encoder::arith_ri(&mut cg.buf, ArithOp::Sub, Reg::Rsp, 8);
    encoder::movsd_store(&mut cg.buf, Reg::Rsp, 0, Xmm::Xmm0);
    gen_expr_to_xmm(cg, left)?;
    encoder::movsd_load(&mut cg.buf, Xmm::Xmm1, Reg::Rsp, 0);
    encoder::arith_ri(&mut cg.buf, ArithOp::Add, Reg::Rsp, 8);
    apply_float_op(cg, op);
    Ok(())
}

fn apply_float_op(cg: &mut CodeGen, op: BinOp) {
    match op {
        BinOp::Add => encoder::addsd(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1),
        BinOp::Sub => encoder::subsd(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1),
        BinOp::Mul => encoder::mulsd(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1),
        BinOp::Div => encoder::divsd(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1),
        _ => {
            // Remainder/exponent/bitwise on floats: fall back to the
            // division result (best-effort — the language has no float
            // modulo/shift operator in practice; see DESIGN.md).
            encoder::divsd(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1)
        }
    }
}

fn gen_int_binop(cg: &mut CodeGen, op: BinOp, left: NodeIndex, right: NodeIndex) -> CResult<()> {
    if cg.config.peephole {
        if let Some(c) = literal_int(cg, right) {
            if try_peephole(cg, op, left, c)? {
                return Ok(());
            }
        }
    }
    if op == BinOp::Pow {
        return gen_pow(cg, left, right);
    }
    gen_expr_as_int(cg, right)?;
    encoder::mov_rr(&mut cg.buf, Reg::R10, Reg::Rax);
    gen_expr_as_int(cg, left)?;
    encoder::mov_rr(&mut cg.buf, Reg::Rdx, Reg::R10);
    apply_int_op(cg, op)
}

fn literal_int(cg: &CodeGen, idx: NodeIndex) -> Option<i64> {
    match *cg.nodes.get(idx) {
        Node::Number { value, .. } => Some(value),
        _ => None,
    }
}

/// peephole rules. Returns `Ok(true)` if a peephole fired (result
/// already in RAX), `Ok(false)` if the caller should fall back to the
/// general evaluate-both-sides path.
fn try_peephole(cg: &mut CodeGen, op: BinOp, left: NodeIndex, c: i64) -> CResult<bool> {
    match op {
        BinOp::Add if c == 1 => {
            gen_expr_as_int(cg, left)?;
            encoder::inc(&mut cg.buf, Reg::Rax);
            Ok(true)
        }
        BinOp::Sub if c == 1 => {
            gen_expr_as_int(cg, left)?;
            encoder::dec(&mut cg.buf, Reg::Rax);
            Ok(true)
        }
        BinOp::Add if c != 0 && (i32::try_from(c)).is_ok() => {
            gen_expr_as_int(cg, left)?;
            encoder::lea(&mut cg.buf, Reg::Rax, Reg::Rax, c as i32);
            Ok(true)
        }
        BinOp::Sub if c != 0 && (i32::try_from(-c)).is_ok() => {
            gen_expr_as_int(cg, left)?;
            encoder::lea(&mut cg.buf, Reg::Rax, Reg::Rax, -(c as i32));
            Ok(true)
        }
        BinOp::Mul if c > 0 && (c as u64).is_power_of_two() => {
            gen_expr_as_int(cg, left)?;
            let k = (c as u64).trailing_zeros() as u8;
            if k > 0 {
                encoder::shift_ri(&mut cg.buf, super::encoder::ShiftOp::Shl, Reg::Rax, k);
            }
            Ok(true)
        }
        BinOp::Mul if matches!(c, 3 | 5 | 9) => {
            gen_expr_as_int(cg, left)?;
            let scale = (c - 1) as u8;
            encoder::lea_scaled(&mut cg.buf, Reg::Rax, Reg::Rax, Reg::Rax, scale);
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Exponentiation: lowered to a counted loop. Left is the base
/// (RCX), right the exponent (RBX as counter), accumulator in RAX.
fn gen_pow(cg: &mut CodeGen, left: NodeIndex, right: NodeIndex) -> CResult<()> {
    gen_expr_as_int(cg, right)?;
    encoder::mov_rr(&mut cg.buf, Reg::Rbx, Reg::Rax);
    gen_expr_as_int(cg, left)?;
    encoder::mov_rr(&mut cg.buf, Reg::Rcx, Reg::Rax);
    encoder::mov_ri64(&mut cg.buf, Reg::Rax, 1);

    let loop_check = cg.buf.offset();
    encoder::test_rr(&mut cg.buf, Reg::Rbx, Reg::Rbx);
    let exit_site = encoder::jcc_rel32(&mut cg.buf, Cond::E);
    encoder::imul_rr(&mut cg.buf, Reg::Rax, Reg::Rcx);
    encoder::dec(&mut cg.buf, Reg::Rbx);
    let back_site = encoder::jmp_rel32(&mut cg.buf);
    cg.buf.patch_rel32_to(back_site, loop_check);
    let exit = cg.buf.offset();
    cg.buf.patch_rel32_to(exit_site, exit);
    Ok(())
}

fn apply_int_op(cg: &mut CodeGen, op: BinOp) -> CResult<()> {
    match op {
        BinOp::Add => encoder::arith_rr(&mut cg.buf, ArithOp::Add, Reg::Rax, Reg::Rdx),
        BinOp::Sub => encoder::arith_rr(&mut cg.buf, ArithOp::Sub, Reg::Rax, Reg::Rdx),
        BinOp::Mul => encoder::imul_rr(&mut cg.buf, Reg::Rax, Reg::Rdx),
        BinOp::Div => {
            encoder::mov_rr(&mut cg.buf, Reg::Rcx, Reg::Rdx);
            encoder::cqo(&mut cg.buf);
            encoder::idiv(&mut cg.buf, Reg::Rcx);
        }
        BinOp::Rem => {
            encoder::mov_rr(&mut cg.buf, Reg::Rcx, Reg::Rdx);
            encoder::cqo(&mut cg.buf);
            encoder::idiv(&mut cg.buf, Reg::Rcx);
            encoder::mov_rr(&mut cg.buf, Reg::Rax, Reg::Rdx);
        }
        BinOp::BitAnd => encoder::arith_rr(&mut cg.buf, ArithOp::And, Reg::Rax, Reg::Rdx),
        BinOp::BitOr => encoder::arith_rr(&mut cg.buf, ArithOp::Or, Reg::Rax, Reg::Rdx),
        BinOp::BitXor => encoder::arith_rr(&mut cg.buf, ArithOp::Xor, Reg::Rax, Reg::Rdx),
        BinOp::Shl | BinOp::Shr => {
            // `shl/shr reg, CL` — CL already holds the shift count from Rdx
            // via RCX's low byte.
            encoder::mov_rr(&mut cg.buf, Reg::Rcx, Reg::Rdx);
            let shift_op = if op == BinOp::Shl {
                super::encoder::ShiftOp::Shl
            } else {
                super::encoder::ShiftOp::Sar
            };
            // No variable-count shift-by-CL primitive exists; approximate
            // with repeated shift-by-1.
            emit_variable_shift(cg, shift_op);
        }
        BinOp::Pow => unreachable!("Pow is handled by gen_pow before reaching apply_int_op"),
        _ => {
            return Err(CompileError::codegen(format!(
                "unsupported binary operator {:?} for integer operands",
                op
            )))
        }
    }
    Ok(())
}

/// Emits `count &= 63; while (count-- > 0) rax = rax shift_op 1`. RCX is
/// masked to its low 6 bits first to match `shl/shr reg, CL` hardware
/// semantics, where the CPU masks a 64-bit operand's shift count mod 64
/// before applying it (so e.g. a runtime count of 64 shifts by zero, not by
/// 64) — without the mask this repeated shift-by-1 loop would instead run
/// the full runtime count and zero out the value.
fn emit_variable_shift(cg: &mut CodeGen, op: super::encoder::ShiftOp) {
    encoder::arith_ri(&mut cg.buf, ArithOp::And, Reg::Rcx, 63);
    let top = cg.buf.offset();
    encoder::test_rr(&mut cg.buf, Reg::Rcx, Reg::Rcx);
    let exit = encoder::jcc_rel32(&mut cg.buf, Cond::E);
    encoder::shift_ri(&mut cg.buf, op, Reg::Rax, 1);
    encoder::dec(&mut cg.buf, Reg::Rcx);
    let back = encoder::jmp_rel32(&mut cg.buf);
    cg.buf.patch_rel32_to(back, top);
    let end = cg.buf.offset();
    cg.buf.patch_rel32_to(exit, end);
}

fn gen_unary_op(cg: &mut CodeGen, op: UnOp, operand: NodeIndex) -> CResult<()> {
    match op {
        UnOp::Neg => {
            if is_float_expr(cg, operand) {
                gen_expr(cg, operand)?;
                encoder::mov_ri64(&mut cg.buf, Reg::R10, 0);
                encoder::push(&mut cg.buf, Reg::R10);
                encoder::movsd_store(&mut cg.buf, Reg::Rsp, 0, Xmm::Xmm0);
                encoder::pxor_zero(&mut cg.buf, Xmm::Xmm1);
                encoder::movsd_load(&mut cg.buf, Xmm::Xmm0, Reg::Rsp, 0);
                encoder::arith_ri(&mut cg.buf, ArithOp::Add, Reg::Rsp, 8);
                encoder::subsd(&mut cg.buf, Xmm::Xmm1, Xmm::Xmm0);
                encoder::movsd_rr(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm1);
            } else {
                gen_expr(cg, operand)?;
                encoder::neg(&mut cg.buf, Reg::Rax);
            }
        }
        UnOp::BitNot => {
            gen_expr_as_int(cg, operand)?;
            encoder::not_(&mut cg.buf, Reg::Rax);
        }
        UnOp::Not => {
            gen_expr_as_int(cg, operand)?;
            encoder::test_rr(&mut cg.buf, Reg::Rax, Reg::Rax);
            encoder::setcc_zx(&mut cg.buf, Cond::E, Reg::Rax);
        }
        UnOp::PostIncr | UnOp::PostDecr => {
            let name = ident_name(cg, operand)
                .ok_or_else(|| CompileError::codegen("'++'/'--' operand must be a variable"))?;
            gen_expr(cg, operand)?;
            if op == UnOp::PostIncr {
                encoder::inc(&mut cg.buf, Reg::Rax);
            } else {
                encoder::dec(&mut cg.buf, Reg::Rax);
            }
            let tag = cg.vars.get(&name).map(|s| s.type_tag).unwrap_or(TypeTag::Int);
            store_to_var(cg, &name, tag);
        }
    }
    Ok(())
}

fn gen_call(cg: &mut CodeGen, callee: crate::pool::StrSpan, args: NodeIndex) -> CResult<()> {
    let name = cg.text(callee).to_string();
    if let Some(builtin) = name.strip_prefix("math.") {
        return gen_math_call(cg, builtin, args);
    }

    // Evaluate arguments left to right onto the real stack (simple,
    // call-safe spill — codegen has no register allocator), then pop
    // them into the System V integer argument registers in reverse.
    const ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];
    let mut count = 0usize;
    let mut arg = args;
    while arg.is_some() {
        gen_expr_as_int(cg, arg)?;
        encoder::push(&mut cg.buf, Reg::Rax);
        count += 1;
        arg = cg.nodes.get(arg).next_sibling();
    }
    for i in (0..count).rev() {
        if i < ARG_REGS.len() {
            encoder::pop(&mut cg.buf, ARG_REGS[i]);
        } else {
            encoder::pop(&mut cg.buf, Reg::Rax);
        }
    }

    let site = encoder::call_rel32(&mut cg.buf);
    cg.record_call(&name, site);
    Ok(())
}

fn gen_math_call(cg: &mut CodeGen, builtin: &str, args: NodeIndex) -> CResult<()> {
    match builtin {
        "sqrt" => {
            if args.is_none() {
                return Err(CompileError::codegen("math.sqrt requires one argument"));
            }
            gen_expr_to_xmm(cg, args)?;
            encoder::sqrtsd(&mut cg.buf, Xmm::Xmm0, Xmm::Xmm0);
            Ok(())
        }
        other => Err(CompileError::codegen(format!(
            "math.{} has no freestanding implementation (no libm is linked)",
            other
        ))),
    }
}

fn gen_array_load(
    cg: &mut CodeGen,
    name: crate::pool::StrSpan,
    indices: [NodeIndex; 4],
) -> CResult<()> {
    let offset = super::stmt::array_element_offset(cg, name, indices)?;
    encoder::mov_load(&mut cg.buf, Reg::Rax, Reg::Rbp, offset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::buffer::CodeBuffer;
    use crate::config::{CompilerConfig, Target};
    use crate::parser::Parser;
    use crate::resolver::Resolver;

    fn compile_expr_bytes(src: &str) -> Vec<u8> {
        let parsed = Parser::new(src).parse().unwrap();
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let resolved = Resolver::new(&parsed.nodes, &parsed.strings).resolve(parsed.root);
        assert!(resolved.warnings.is_empty(), "{:?}", resolved.warnings);
        let config = CompilerConfig::new(Target::Linux);
        let mut cg = CodeGen::new(&parsed.nodes, &parsed.strings, &config);
        cg.buf = CodeBuffer::new();
        let first = match *parsed.nodes.get(parsed.root) {
            Node::Program { first } => first,
            _ => unreachable!(),
        };
        let stmt = match *parsed.nodes.get(first) {
            Node::VarDef { init, .. } => init,
            other => panic!("expected a var-def statement, got {:?}", other),
        };
        gen_expr(&mut cg, stmt).unwrap();
        cg.buf.as_bytes().to_vec()
    }

    #[test]
    fn power_of_two_multiply_uses_shl_not_imul() {
        let bytes = compile_expr_bytes("var x = 5 * 8");
        // shl rax, 3 is C1 /4 ib; imul would be 0F AF.
        assert!(!bytes.windows(2).any(|w| w == [0x0F, 0xAF]));
        assert!(bytes.iter().any(|&b| b == 0xC1));
    }

    #[test]
    fn add_one_uses_inc() {
        let bytes = compile_expr_bytes("var x = 5 + 1");
        // inc rax is FF /0 with REX.W -> 48 FF C0
        assert!(bytes.windows(3).any(|w| w == [0x48, 0xFF, 0xC0]));
    }

    #[test]
    fn mul_by_three_uses_lea_scaled() {
        let bytes = compile_expr_bytes("var x = 5 * 3");
        // lea rax, [rax+rax*2] -> REX.W 8D 04 45
        assert!(bytes.windows(2).any(|w| w == [0x8D, 0x04]));
    }
}
