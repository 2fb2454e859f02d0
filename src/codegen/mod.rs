//! Single-pass code generation: walks the resolved AST once and emits x86-64
//! machine code directly into a [`buffer::CodeBuffer`]. No IR,
//! no separate register-allocation pass — every node is visited exactly
//! once and turns into bytes as it's visited.
//!
//! Submodules split by concern, not by pass: [`encoder`] is the pure
//! instruction-encoding layer (knows nothing about the AST), [`state`]
//! holds what's threaded through a single compilation, [`expr`]/[`stmt`]
//! walk the tree, and [`runtime`] emits the platform-specific syscall/IAT
//! sequences backing `output`/program exit.

pub mod buffer;
pub mod encoder;
pub mod expr;
pub mod runtime;
pub mod state;
pub mod stmt;

use crate::ast::Node;
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::pool::{NodeIndex, NodePool, StringPool};

pub use state::{CodeGen, IatImport};

/// Everything the binary emitter needs out of codegen: the finished
/// instruction stream and the Windows IAT call sites still awaiting a real
/// displacement (empty on a Linux target, since syscalls need no patching).
pub struct GenerateOutput {
    pub code: Vec<u8>,
    pub iat_patches: Vec<(u32, IatImport)>,
    pub errors: Vec<CompileError>,
}

/// Generate machine code for the whole program (top-level entry
/// point). Builds an implicit top-level frame exactly like a user function
/// body — `push rbp; mov rbp, rsp; sub rsp, <frame>` — since locals
/// declared outside any `FuncDef` still need stack slots.
pub fn generate(
    nodes: &NodePool<Node>,
    strings: &StringPool,
    root: NodeIndex,
    config: &CompilerConfig,
) -> GenerateOutput {
    let mut cg = CodeGen::new(nodes, strings, config);

    encoder::push_rbp_mov_rbp_rsp(&mut cg.buf);
    let frame_patch = stmt::reserve_frame_sub(&mut cg);

    let first = match nodes.get(root) {
        Node::Program { first } => *first,
        _ => {
            cg.errors
                .push(CompileError::codegen("program root is not a Program node"));
            NodeIndex::NONE
        }
    };

    if first.is_some() {
        if let Err(e) = stmt::gen_block(&mut cg, first) {
            cg.errors.push(e);
        }
    }

    // Fall-off-the-end of the top-level program exits cleanly: a program
    // with no explicit `return` still terminates.
    runtime::emit_exit(&mut cg, 0);

    cg.buf.patch_i32(frame_patch, cg.vars.frame_size());

    GenerateOutput {
        code: cg.buf.as_bytes().to_vec(),
        iat_patches: cg.iat_patches,
        errors: cg.errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Target;
    use crate::parser::Parser;
    use crate::resolver::Resolver;

    fn generate_src(src: &str) -> GenerateOutput {
        let parsed = Parser::new(src).parse().expect("parse");
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        let resolved = Resolver::new(&parsed.nodes, &parsed.strings).resolve(parsed.root);
        assert!(
            resolved.warnings.is_empty(),
            "resolve warnings: {:?}",
            resolved.warnings
        );
        let config = CompilerConfig::new(Target::Linux);
        generate(&parsed.nodes, &parsed.strings, parsed.root, &config)
    }

    #[test]
    fn empty_program_still_emits_a_valid_frame_and_exit() {
        let out = generate_src("");
        assert!(out.errors.is_empty());
        assert!(!out.code.is_empty());
        assert!(out.iat_patches.is_empty());
    }

    #[test]
    fn top_level_locals_get_frame_slots_without_a_wrapping_function() {
        let out = generate_src("var x = 1\nvar y = 2\nprint x + y");
        assert!(out.errors.is_empty());
        assert!(!out.code.is_empty());
    }

    #[test]
    fn windows_target_records_iat_patch_sites_for_print() {
        let parsed = Parser::new("print \"hi\"").parse().expect("parse");
        let config = CompilerConfig::new(Target::Windows);
        let out = generate(&parsed.nodes, &parsed.strings, parsed.root, &config);
        assert!(out.errors.is_empty());
        assert!(!out.iat_patches.is_empty());
    }
}
