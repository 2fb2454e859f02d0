//! Statement codegen: control flow, declarations, function bodies,
//! output, and 4D array storage.

use crate::ast::{ConditionalKind, Node, OutputKind, VarType};
use crate::error::CompileError;
use crate::pool::{NodeIndex, StrSpan};
use crate::types::{TypeTag, VarEnv};

use super::encoder::{self, ArithOp, Cond, Reg};
use super::state::{ArrayInfo, CodeGen};

type CResult<T> = Result<T, CompileError>;

/// Walk a sibling chain starting at `first`, generating each statement in
/// order. Every chain-bearing block (`Program`, `ActionBlock`, loop/
/// conditional bodies, case bodies) is just a chain head, so this one
/// walker serves all of them.
pub fn gen_block(cg: &mut CodeGen, first: NodeIndex) -> CResult<()> {
    let mut cur = first;
    while cur.is_some() {
        gen_stmt(cg, cur)?;
        cur = cg.nodes.get(cur).next_sibling();
    }
    Ok(())
}

pub fn gen_stmt(cg: &mut CodeGen, idx: NodeIndex) -> CResult<()> {
    match *cg.nodes.get(idx) {
        Node::ActionBlock { first, .. } => gen_block(cg, first),
        Node::DeclareBlock { first, .. } => gen_block(cg, first),
        Node::VarDef { name, var_type, init, .. } => gen_var_def(cg, name, var_type, init),
        Node::FuncDef { name, body, params, .. } => gen_func_def(cg, name, body, params),
        Node::Conditional { kind, cond, body, else_body, .. } => {
            gen_conditional(cg, kind, cond, body, else_body)
        }
        Node::WhileLoop { cond, body, .. } => gen_while(cg, cond, body),
        Node::ForLoop { init, cond, incr, body, .. } => gen_for(cg, init, cond, incr, body),
        Node::Break { .. } => {
            let site = encoder::jmp_rel32(&mut cg.buf);
            cg.buf.record_break(site)
        }
        Node::Continue { .. } => {
            let site = encoder::jmp_rel32(&mut cg.buf);
            cg.buf.record_continue(site)
        }
        Node::Return { value, .. } => gen_return(cg, value),
        Node::Output { kind, content, .. } => gen_output(cg, kind, content),
        Node::Array4dDef { name, dims, .. } => gen_array_def(cg, name, dims),
        Node::Switch { value, first_case, default, .. } => gen_switch(cg, value, first_case, default),
        Node::InlineAsm { .. } => Err(CompileError::codegen(
            "inline asm blocks have no encoding in this backend",
        )),
        // Bare expressions used as statements: assignments, post-incr/decr,
        // and function calls made for their side effects.
        Node::BinaryOp { .. } | Node::FuncCall { .. } | Node::UnaryOp { .. } => {
            super::expr::gen_expr(cg, idx)?;
            Ok(())
        }
        other => Err(CompileError::codegen(format!(
            "node {:?} is not valid in statement position",
            other
        ))),
    }
}

fn gen_var_def(cg: &mut CodeGen, name: StrSpan, var_type: VarType, init: NodeIndex) -> CResult<()> {
    let name_str = cg.text(name).to_string();
    let type_tag = infer_var_type(cg, var_type, init);

    if init.is_some() {
        super::expr::gen_expr(cg, init)?;
        super::expr::store_to_var(cg, &name_str, type_tag);
    } else {
        cg.vars.declare(&name_str, type_tag);
    }
    Ok(())
}

/// Resolve a `VarDef`'s declared type, inferring it from the initializer
/// when the source wrote `var.x = ...` with no explicit type annotation
/// (`VarType::Inferred`).
fn infer_var_type(cg: &CodeGen, var_type: VarType, init: NodeIndex) -> TypeTag {
    if var_type != VarType::Inferred {
        return TypeTag::from(var_type);
    }
    if init.is_none() {
        return TypeTag::Int;
    }
    match *cg.nodes.get(init) {
        Node::String { .. } => TypeTag::String,
        Node::Bool { .. } => TypeTag::Bool,
        _ if super::expr::is_float_expr(cg, init) => TypeTag::Float,
        _ => TypeTag::Int,
    }
}

/// All seven [`ConditionalKind`] variants lower to the same test/jump
/// shape. The assertion-flavored kinds (`Ensure`/`Check`/`Try`/`Guard`/
/// `Until`/`Verify`/`Measure`) carry distinct failure-reporting semantics
/// in the source language that this backend doesn't model — treating them
/// as plain `if`/`else` preserves control flow while leaving the assertion
/// behavior itself out of scope (see DESIGN.md).
fn gen_conditional(
    cg: &mut CodeGen,
    _kind: ConditionalKind,
    cond: NodeIndex,
    body: NodeIndex,
    else_body: NodeIndex,
) -> CResult<()> {
    super::expr::gen_expr_as_int(cg, cond)?;
    encoder::test_rr(&mut cg.buf, Reg::Rax, Reg::Rax);
    let else_site = encoder::jcc_rel32(&mut cg.buf, Cond::E);
    gen_block(cg, body)?;
    if else_body.is_some() {
        let end_site = encoder::jmp_rel32(&mut cg.buf);
        let else_target = cg.buf.offset();
        cg.buf.patch_rel32_to(else_site, else_target);
        gen_block(cg, else_body)?;
        let end = cg.buf.offset();
        cg.buf.patch_rel32_to(end_site, end);
    } else {
        let end = cg.buf.offset();
        cg.buf.patch_rel32_to(else_site, end);
    }
    Ok(())
}

fn gen_while(cg: &mut CodeGen, cond: NodeIndex, body: NodeIndex) -> CResult<()> {
    cg.buf.push_loop()?;
    let loop_top = cg.buf.offset();
    super::expr::gen_expr_as_int(cg, cond)?;
    encoder::test_rr(&mut cg.buf, Reg::Rax, Reg::Rax);
    let exit_site = encoder::jcc_rel32(&mut cg.buf, Cond::E);
    gen_block(cg, body)?;
    let back_site = encoder::jmp_rel32(&mut cg.buf);
    cg.buf.patch_rel32_to(back_site, loop_top);
    let exit_target = cg.buf.offset();
    cg.buf.patch_rel32_to(exit_site, exit_target);
    // `continue` re-checks the condition; `break` exits past it.
    cg.buf.pop_loop(loop_top, exit_target);
    Ok(())
}

fn gen_for(
    cg: &mut CodeGen,
    init: NodeIndex,
    cond: NodeIndex,
    incr: NodeIndex,
    body: NodeIndex,
) -> CResult<()> {
    if init.is_some() {
        gen_stmt(cg, init)?;
    }
    cg.buf.push_loop()?;
    let cond_check = cg.buf.offset();
    let exit_site = if cond.is_some() {
        super::expr::gen_expr_as_int(cg, cond)?;
        encoder::test_rr(&mut cg.buf, Reg::Rax, Reg::Rax);
        Some(encoder::jcc_rel32(&mut cg.buf, Cond::E))
    } else {
        None
    };
    gen_block(cg, body)?;
    let incr_target = cg.buf.offset();
    if incr.is_some() {
        super::expr::gen_expr(cg, incr)?;
    }
    let back_site = encoder::jmp_rel32(&mut cg.buf);
    cg.buf.patch_rel32_to(back_site, cond_check);
    let exit_target = cg.buf.offset();
    if let Some(site) = exit_site {
        cg.buf.patch_rel32_to(site, exit_target);
    }
    // `continue` runs the increment step before re-checking the condition.
    cg.buf.pop_loop(incr_target, exit_target);
    Ok(())
}

/// `return` inside a user function emits a plain epilogue; at top level
/// (no enclosing `FuncDef`, e.g. the implicit program entry) there is no
/// caller to return to, so it lowers to the platform program-exit sequence
/// instead. The two cases aren't disambiguated by any external contract;
/// this choice is recorded in DESIGN.md.
fn gen_return(cg: &mut CodeGen, value: NodeIndex) -> CResult<()> {
    if value.is_some() {
        super::expr::gen_expr(cg, value)?;
    }
    if cg.in_function {
        encoder::leave(&mut cg.buf);
        encoder::ret(&mut cg.buf);
    } else {
        super::runtime::emit_exit(cg, 0);
    }
    Ok(())
}

const ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Reserve a `sub rsp, imm32` whose immediate is patched once the
/// function's frame size is known (mirrors [`super::encoder::arith_ri`]'s
/// 32-bit immediate form but with a fixed, patchable width).
pub(crate) fn reserve_frame_sub(cg: &mut CodeGen) -> u32 {
    encoder::emit_modrm_ext(
        &mut cg.buf,
        0x81 | encoder::P_REXW,
        ArithOp::Sub as u8,
        Reg::Rsp as u8,
    );
    cg.buf.reserve_i32()
}

fn gen_func_def(cg: &mut CodeGen, name: StrSpan, body: NodeIndex, params: NodeIndex) -> CResult<()> {
    let fname = cg.text(name).to_string();

    // Skip over the function body at the call site that falls through to
    // here; functions are only ever reached via `call`.
    let skip_site = encoder::jmp_rel32(&mut cg.buf);
    let entry = cg.buf.offset();
    cg.define_function_entry(&fname, entry);

    let outer_vars = std::mem::replace(&mut cg.vars, VarEnv::new());
    let outer_arrays = std::mem::take(&mut cg.arrays);
    let outer_in_function = cg.in_function;
    cg.in_function = true;

    encoder::push_rbp_mov_rbp_rsp(&mut cg.buf);
    let frame_site = reserve_frame_sub(cg);

    let mut param_count = 0usize;
    let mut p = params;
    while p.is_some() {
        let pname = match *cg.nodes.get(p) {
            Node::Identifier { name, .. } => cg.text(name).to_string(),
            other => {
                return Err(CompileError::codegen(format!(
                    "expected an identifier in a function's parameter list, got {:?}",
                    other
                )))
            }
        };
        if param_count >= ARG_REGS.len() {
            return Err(CompileError::codegen(format!(
                "function '{}' has more than {} parameters (stack-passed arguments are not supported)",
                fname,
                ARG_REGS.len()
            )));
        }
        let offset = cg.vars.declare(&pname, TypeTag::Int);
        encoder::mov_store(&mut cg.buf, Reg::Rbp, offset, ARG_REGS[param_count]);
        cg.vars.mark_initialized(&pname);
        param_count += 1;
        p = cg.nodes.get(p).next_sibling();
    }
    if let Some(info) = cg.functions.get_mut(&fname) {
        info.param_count = param_count;
    }

    gen_stmt(cg, body)?;

    // Implicit fall-off-the-end return (unreachable if the body always
    // returns explicitly, harmless otherwise).
    encoder::leave(&mut cg.buf);
    encoder::ret(&mut cg.buf);

    cg.buf.patch_i32(frame_site, cg.vars.frame_size());
    let after = cg.buf.offset();
    cg.buf.patch_rel32_to(skip_site, after);

    cg.vars = outer_vars;
    cg.arrays = outer_arrays;
    cg.in_function = outer_in_function;
    Ok(())
}

/// Dispatch to the print helper matching `content`'s result type. All
/// five [`OutputKind`] surface forms (`print`/`txt`/`out`/`fmt`/`dyn`)
/// lower identically at this tier — their distinct formatting conventions
/// in the source language are a surface-syntax concern this backend
/// doesn't differentiate (see DESIGN.md).
fn gen_output(cg: &mut CodeGen, _kind: OutputKind, content: NodeIndex) -> CResult<()> {
    match result_type_tag(cg, content) {
        TypeTag::String => {
            super::expr::gen_expr(cg, content)?;
            super::runtime::emit_print_string_value(cg);
        }
        TypeTag::Float => {
            super::expr::gen_expr(cg, content)?;
            super::runtime::emit_print_float(cg);
        }
        TypeTag::Bool => {
            super::expr::gen_expr_as_int(cg, content)?;
            super::runtime::emit_print_bool(cg);
        }
        TypeTag::Int | TypeTag::Solid => {
            super::expr::gen_expr_as_int(cg, content)?;
            super::runtime::emit_print_int(cg);
        }
    }
    Ok(())
}

/// Best-effort static type of an expression for `Output` dispatch — needs
/// only enough precision to pick the right print helper, unlike
/// [`super::expr::is_float_expr`] which only needs the float/not-float
/// split.
fn result_type_tag(cg: &CodeGen, idx: NodeIndex) -> TypeTag {
    use crate::ast::{BinOp, UnOp};
    match *cg.nodes.get(idx) {
        Node::String { .. } => TypeTag::String,
        Node::Bool { .. } => TypeTag::Bool,
        Node::Float { .. } => TypeTag::Float,
        Node::Identifier { name, .. } => {
            let n = cg.text(name).to_string();
            cg.vars.get(&n).map(|s| s.type_tag).unwrap_or(TypeTag::Int)
        }
        Node::UnaryOp { op: UnOp::Not, .. } => TypeTag::Bool,
        Node::BinaryOp { op, .. }
            if matches!(
                op,
                BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or
            ) =>
        {
            TypeTag::Bool
        }
        _ if super::expr::is_float_expr(cg, idx) => TypeTag::Float,
        _ => TypeTag::Int,
    }
}

/// A 4D array's dimensions must be compile-time positive integer literals:
/// a general dynamic-size stack allocation would need a runtime
/// `sub rsp, <computed>` this backend's fixed-frame model doesn't support.
/// See DESIGN.md.
fn gen_array_def(cg: &mut CodeGen, name: StrSpan, dims: [NodeIndex; 4]) -> CResult<()> {
    let mut concrete = [1i64; 4];
    for (i, d) in dims.iter().enumerate() {
        if d.is_some() {
            let v = literal_int_const(cg, *d)?;
            if v <= 0 {
                return Err(CompileError::codegen("4D array dimensions must be positive"));
            }
            concrete[i] = v;
        }
    }
    let total_cells = concrete[0] * concrete[1] * concrete[2] * concrete[3];
    let base_offset = cg.vars.alloc_block(total_cells);
    let name_str = cg.text(name).to_string();
    cg.arrays.insert(
        name_str,
        ArrayInfo {
            base_offset,
            dims: concrete,
        },
    );
    Ok(())
}

/// Compute the stack offset of one element of a previously-declared 4D
/// array. Indices, like dimensions, must be compile-time integer literals:
/// this backend has no general-purpose register-indexed addressing path
/// and no register allocator, so a runtime-variable index is rejected
/// rather than silently mis-addressed.
pub fn array_element_offset(cg: &mut CodeGen, name: StrSpan, indices: [NodeIndex; 4]) -> CResult<i32> {
    let name_str = cg.text(name).to_string();
    let info: ArrayInfo = *cg.arrays.get(&name_str).ok_or_else(|| {
        CompileError::codegen(format!("reference to undeclared array '{}'", name_str))
    })?;

    let mut idx_vals = [0i64; 4];
    for (i, idx) in indices.iter().enumerate() {
        if idx.is_some() {
            idx_vals[i] = literal_int_const(cg, *idx)?;
        }
        if idx_vals[i] < 0 || idx_vals[i] >= info.dims[i] {
            return Err(CompileError::codegen(format!(
                "index {} out of bounds for array '{}' (dimension {} has size {})",
                idx_vals[i], name_str, i, info.dims[i]
            )));
        }
    }
    let flat = ((idx_vals[0] * info.dims[1] + idx_vals[1]) * info.dims[2] + idx_vals[2]) * info.dims[3]
        + idx_vals[3];
    Ok(info.base_offset + (flat * 8) as i32)
}

fn literal_int_const(cg: &CodeGen, idx: NodeIndex) -> CResult<i64> {
    match *cg.nodes.get(idx) {
        Node::Number { value, .. } => Ok(value),
        other => Err(CompileError::codegen(format!(
            "expected a compile-time integer literal here, got {:?}",
            other
        ))),
    }
}

/// Switch/case/default/in-case. The switch value is evaluated
/// once and spilled to the real stack so a case-value expression with a
/// function call can't clobber it (flags the RAX-only original as
/// unsafe). Cases fall through into each other and into `default` with no
/// implicit `break` — matching the resolver's loop-depth tracking, which
/// `Switch` never increments, so there is no `break` target inside a
/// switch that isn't also an enclosing loop's. `InCase` clauses are pure
/// fallthrough: they participate in the body sequence but never gain a
/// compare/jump of their own.
fn gen_switch(cg: &mut CodeGen, value: NodeIndex, first_case: NodeIndex, default: NodeIndex) -> CResult<()> {
    super::expr::gen_expr_as_int(cg, value)?;
    encoder::push(&mut cg.buf, Reg::Rax);

    enum Entry {
        Case { node: NodeIndex, jsite: u32 },
        InCase { node: NodeIndex },
    }

    let mut entries = Vec::new();
    let mut cur = first_case;
    while cur.is_some() {
        match *cg.nodes.get(cur) {
            Node::Case { value: case_value, .. } => {
                super::expr::gen_expr_as_int(cg, case_value)?;
                encoder::mov_rr(&mut cg.buf, Reg::R10, Reg::Rax);
                encoder::mov_load(&mut cg.buf, Reg::Rax, Reg::Rsp, 0);
                encoder::cmp_rr(&mut cg.buf, Reg::Rax, Reg::R10);
                let jsite = encoder::jcc_rel32(&mut cg.buf, Cond::E);
                entries.push(Entry::Case { node: cur, jsite });
            }
            Node::InCase { .. } => entries.push(Entry::InCase { node: cur }),
            ref other => {
                return Err(CompileError::codegen(format!(
                    "expected Case or InCase in a switch's case list, got {:?}",
                    other
                )))
            }
        }
        cur = cg.nodes.get(cur).next_sibling();
    }

    // No case matched: fall to `default` (or straight past all bodies).
    let no_match_site = encoder::jmp_rel32(&mut cg.buf);

    for entry in &entries {
        let target = cg.buf.offset();
        let (node, jsite) = match *entry {
            Entry::Case { node, jsite } => (node, Some(jsite)),
            Entry::InCase { node } => (node, None),
        };
        if let Some(site) = jsite {
            cg.buf.patch_rel32_to(site, target);
        }
        let body = match *cg.nodes.get(node) {
            Node::Case { body, .. } => body,
            Node::InCase { body, .. } => body,
            _ => unreachable!(),
        };
        gen_block(cg, body)?;
    }

    let default_target = cg.buf.offset();
    cg.buf.patch_rel32_to(no_match_site, default_target);
    if default.is_some() {
        let body = match *cg.nodes.get(default) {
            Node::Default { body, .. } => body,
            ref other => {
                return Err(CompileError::codegen(format!(
                    "expected a Default node, got {:?}",
                    other
                )))
            }
        };
        gen_block(cg, body)?;
    }

    encoder::arith_ri(&mut cg.buf, ArithOp::Add, Reg::Rsp, 8);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::codegen::generate;
    use crate::config::{CompilerConfig, Target};
    use crate::parser::Parser;
    use crate::resolver::Resolver;

    fn codegen_ok(src: &str) -> Vec<u8> {
        let parsed = Parser::new(src).parse().expect("parse");
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        let resolved = Resolver::new(&parsed.nodes, &parsed.strings).resolve(parsed.root);
        assert!(
            resolved.warnings.is_empty(),
            "resolve warnings: {:?}",
            resolved.warnings
        );
        let config = CompilerConfig::new(Target::Linux);
        let out = generate(&parsed.nodes, &parsed.strings, parsed.root, &config);
        assert!(out.errors.is_empty(), "codegen errors: {:?}", out.errors);
        out.code
    }

    #[test]
    fn while_loop_lowers_without_error() {
        let code = codegen_ok("var i = 0\nwhile (i < 3) do/ i = i + 1 \\");
        assert!(!code.is_empty());
    }

    #[test]
    fn for_loop_lowers_without_error() {
        let code = codegen_ok("for (var i = 0; i < 3; i = i + 1) do/ print i \\");
        assert!(!code.is_empty());
    }

    #[test]
    fn conditional_kinds_all_lower_the_same_way() {
        let if_code = codegen_ok("var x = 1\nif (x == 1) do/ print x \\");
        let ensure_code = codegen_ok("var x = 1\nf.ens (x == 1) do/ print x \\");
        assert_eq!(if_code, ensure_code);
    }

    #[test]
    fn break_and_continue_inside_loop_lower_without_error() {
        let code = codegen_ok(
            "var i = 0\nwhile (i < 10) do/ i = i + 1\nif (i == 5) do/ break \\\ncontinue \\",
        );
        assert!(!code.is_empty());
    }

    #[test]
    fn function_def_and_call_lower_without_error() {
        let code = codegen_ok("declare/ |add| < do/ return 1 \\ :> \\\nprint add()");
        assert!(!code.is_empty());
    }

    #[test]
    fn switch_with_default_lowers_without_error() {
        let code = codegen_ok("var x = 2\nswitch (x) { case 1: print 1 default: print 0 }");
        assert!(!code.is_empty());
    }
}
