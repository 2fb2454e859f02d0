//! Shared mutable state threaded through expression/statement codegen:
//! the code buffer, the current function's variable environment, the
//! forward-reference function table, and the 4D-array name →
//! base-offset/dimensions map.

use std::collections::HashMap;

use crate::ast::Node;
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::pool::{NodePool, StringPool};
use crate::types::VarEnv;

use super::buffer::CodeBuffer;

/// A user function's codegen-time bookkeeping. Functions may be called
/// before their body is emitted (forward/temporal references), so a
/// call site whose target isn't known yet is recorded in `pending_calls`
/// and patched once the function's entry offset is filled in.
#[derive(Debug, Default)]
pub struct FuncInfo {
    pub entry: Option<u32>,
    pub pending_calls: Vec<u32>,
    pub param_count: usize,
}

/// A declared 4D array's storage record: the stack offset of its first
/// (index 0,0,0,0) element and its four dimension sizes, resolved once at
/// `Array4dDef` codegen time. open-question carve-out for dynamic
/// dimension expressions is handled by requiring each dimension to be a
/// compile-time integer literal (see DESIGN.md).
#[derive(Debug, Clone, Copy)]
pub struct ArrayInfo {
    pub base_offset: i32,
    pub dims: [i64; 4],
}

/// The three `kernel32.dll` entries this backend ever calls. Order
/// matters: the PE emitter lays out IAT slots in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IatImport {
    GetStdHandle,
    WriteConsoleA,
    ExitProcess,
}

impl IatImport {
    pub const ALL: [IatImport; 3] = [
        IatImport::GetStdHandle,
        IatImport::WriteConsoleA,
        IatImport::ExitProcess,
    ];

    pub fn name(self) -> &'static str {
        match self {
            IatImport::GetStdHandle => "GetStdHandle",
            IatImport::WriteConsoleA => "WriteConsoleA",
            IatImport::ExitProcess => "ExitProcess",
        }
    }
}

pub struct CodeGen<'a> {
    pub nodes: &'a NodePool<Node>,
    pub strings: &'a StringPool,
    pub config: &'a CompilerConfig,

    pub buf: CodeBuffer,
    pub vars: VarEnv,
    pub arrays: HashMap<String, ArrayInfo>,
    pub functions: HashMap<String, FuncInfo>,

    /// True while emitting the body of a user `FuncDef`; false at top
    /// level. `Return` codegen consults this to decide between a function
    /// epilogue (`leave; ret`) and a program-exit sequence — see
    /// DESIGN.md's note on top-level `return`.
    pub in_function: bool,

    /// `mov reg, [rip+disp32]` patch sites awaiting a real displacement
    /// once the binary emitter knows each IAT slot's final RVA (Windows
    /// target only; see [`IatImport`]).
    pub iat_patches: Vec<(u32, IatImport)>,

    pub errors: Vec<CompileError>,
}

impl<'a> CodeGen<'a> {
    pub fn new(
        nodes: &'a NodePool<Node>,
        strings: &'a StringPool,
        config: &'a CompilerConfig,
    ) -> Self {
        CodeGen {
            nodes,
            strings,
            config,
            buf: CodeBuffer::new(),
            vars: VarEnv::new(),
            arrays: HashMap::new(),
            functions: HashMap::new(),
            in_function: false,
            iat_patches: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Record a Windows IAT call-through site for later patching by the PE
    /// emitter. Emits `mov rax, [rip+disp32]; call rax`.
    pub fn emit_iat_call(&mut self, import: IatImport) {
        let site = super::encoder::mov_load_rip(&mut self.buf, super::encoder::Reg::Rax);
        self.iat_patches.push((site, import));
        super::encoder::call_indirect(&mut self.buf, super::encoder::Reg::Rax);
    }

    pub fn text(&self, span: crate::pool::StrSpan) -> &str {
        self.strings.get(span)
    }

    /// Record a `call rel32` site for `name`, patching immediately if the
    /// function's entry offset is already known, otherwise queuing it.
    pub fn record_call(&mut self, name: &str, site: u32) {
        let info = self.functions.entry(name.to_string()).or_default();
        match info.entry {
            Some(entry) => self.buf.patch_rel32_to(site, entry),
            None => info.pending_calls.push(site),
        }
    }

    /// Record that `name`'s body now starts at `entry`, patching every call
    /// site that referenced it before its definition was reached.
    pub fn define_function_entry(&mut self, name: &str, entry: u32) {
        let info = self.functions.entry(name.to_string()).or_default();
        info.entry = Some(entry);
        let pending = std::mem::take(&mut info.pending_calls);
        for site in pending {
            self.buf.patch_rel32_to(site, entry);
        }
    }
}
