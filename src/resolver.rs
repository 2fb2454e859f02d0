//! Symbol resolver.
//!
//! A two-pass walk over the AST. Pass one hoists every function declared
//! inside a `declare/` block into global scope so later statements can call
//! functions that are declared after them in the source ("temporal
//! scope" — visibility that does not follow textual order). Pass two is a
//! single recursive traversal: it pushes/pops a lexical scope per block,
//! declares variables and non-hoisted functions as it reaches them, and
//! checks that every identifier/call use resolves against the scope chain
//! visible at that point.
//!
//! An unresolved identifier or call is not a hard error here — it's pushed
//! onto `ResolveOutput::warnings` and left for codegen (which has its own
//! flat, unscoped variable environment and forward-call patching) or the
//! emitted program at run time to deal with. The language admits
//! forward/temporal references this lexical pass can't always see through.

use std::collections::HashMap;

use crate::ast::{BinOp, Node};
use crate::error::CompileError;
use crate::pool::{NodeIndex, NodePool, StringPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Var,
    Func,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// The node that introduced this symbol (`VarDef`, `FuncDef`, or
    /// `Array4dDef`).
    pub def_site: NodeIndex,
}

/// The resolver's output: every symbol declared anywhere in the program.
/// Codegen doesn't consult this — it allocates and looks up storage through
/// its own flat `VarEnv`/`functions` map as it walks the tree — so this is
/// purely a record of what the resolver found, useful to a caller that
/// wants to inspect declarations without re-walking the AST.
pub struct SymbolTable {
    pub symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }
}

pub struct ResolveOutput {
    pub table: SymbolTable,
    /// Non-fatal diagnostics. An unresolved identifier or call is recorded
    /// here, not as a hard error: the language admits forward/temporal
    /// references that only become resolvable once the full AST is seen,
    /// so codegen (or the emitted program, at run time) is left to decide
    /// whether that's actually a problem.
    pub warnings: Vec<CompileError>,
}

type Scope = HashMap<String, SymbolId>;

pub struct Resolver<'a> {
    nodes: &'a NodePool<Node>,
    strings: &'a StringPool,
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
    warnings: Vec<CompileError>,
    loop_depth: u32,
}

impl<'a> Resolver<'a> {
    pub fn new(nodes: &'a NodePool<Node>, strings: &'a StringPool) -> Self {
        Resolver {
            nodes,
            strings,
            scopes: vec![Scope::new()],
            symbols: Vec::new(),
            warnings: Vec::new(),
            loop_depth: 0,
        }
    }

    pub fn resolve(mut self, root: NodeIndex) -> ResolveOutput {
        self.hoist_declared_functions(root);
        self.resolve_chain(self.program_first(root));
        ResolveOutput {
            table: SymbolTable {
                symbols: self.symbols,
            },
            warnings: self.warnings,
        }
    }

    fn program_first(&self, root: NodeIndex) -> NodeIndex {
        match self.nodes.get(root) {
            Node::Program { first } => *first,
            _ => NodeIndex::NONE,
        }
    }

    fn text(&self, span: crate::pool::StrSpan) -> &str {
        self.strings.get(span)
    }

    // ---- pass 1: hoist declare/ function names ---------------------------

    fn hoist_declared_functions(&mut self, root: NodeIndex) {
        self.hoist_chain(self.program_first(root));
    }

    fn hoist_chain(&mut self, mut idx: NodeIndex) {
        while idx.is_some() {
            let node = *self.nodes.get(idx);
            match node {
                Node::DeclareBlock { first, .. } => {
                    let mut child = first;
                    while child.is_some() {
                        if let Node::FuncDef { name, .. } = *self.nodes.get(child) {
                            self.declare(name, SymbolKind::Func, child, 0);
                        }
                        child = self.nodes.get(child).next_sibling();
                    }
                }
                Node::ActionBlock { first, .. } => self.hoist_chain(first),
                Node::Conditional { body, else_body, .. } => {
                    self.hoist_chain(body);
                    self.hoist_chain(else_body);
                }
                Node::WhileLoop { body, .. } | Node::ForLoop { body, .. } => {
                    self.hoist_chain(body);
                }
                Node::Switch {
                    first_case, default, ..
                } => {
                    let mut case = first_case;
                    while case.is_some() {
                        match *self.nodes.get(case) {
                            Node::Case { body, .. } | Node::InCase { body, .. } => {
                                self.hoist_chain(body)
                            }
                            _ => {}
                        }
                        case = self.nodes.get(case).next_sibling();
                    }
                    if default.is_some() {
                        if let Node::Default { body, .. } = *self.nodes.get(default) {
                            self.hoist_chain(body);
                        }
                    }
                }
                _ => {}
            }
            idx = self.nodes.get(idx).next_sibling();
        }
    }

    /// Insert a symbol directly into global (outermost) scope, used for
    /// hoisted `declare/` functions regardless of current scope depth.
    fn declare(
        &mut self,
        name: crate::pool::StrSpan,
        kind: SymbolKind,
        def_site: NodeIndex,
        scope_index: usize,
    ) {
        let name = self.text(name).to_string();
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            name: name.clone(),
            kind,
            def_site,
        });
        self.scopes[scope_index].insert(name, id);
    }

    /// Insert a symbol into the current (innermost) scope.
    fn declare_local(&mut self, name: crate::pool::StrSpan, kind: SymbolKind, def_site: NodeIndex) {
        let depth = self.scopes.len() - 1;
        self.declare(name, kind, def_site, depth);
    }

    fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn lookup(&self, name: &str) -> Option<SymbolId> {
        for scope in self.scopes.iter().rev() {
            if let Some(id) = scope.get(name) {
                return Some(*id);
            }
        }
        None
    }

    /// Look `name` up in the current scope chain. An unresolved identifier
    /// is recorded as a warning, not a hard error: it may still be a valid
    /// reference codegen can satisfy from its own flat variable
    /// environment (see the module doc), or a forward reference codegen
    /// resolves once it reaches the definition.
    fn resolve_use(&mut self, name: crate::pool::StrSpan) {
        let text = self.text(name).to_string();
        if self.lookup(&text).is_none() {
            self.warnings
                .push(CompileError::resolve(format!("undefined symbol '{}'", text)));
        }
    }

    // ---- pass 2: scoped traversal -----------------------------------------

    fn resolve_chain(&mut self, mut idx: NodeIndex) {
        while idx.is_some() {
            self.resolve_stmt(idx);
            idx = self.nodes.get(idx).next_sibling();
        }
    }

    fn resolve_block(&mut self, idx: NodeIndex) {
        if idx.is_none() {
            return;
        }
        self.push_scope();
        match *self.nodes.get(idx) {
            Node::ActionBlock { first, .. } => self.resolve_chain(first),
            _ => self.resolve_stmt(idx),
        }
        self.pop_scope();
    }

    fn resolve_stmt(&mut self, idx: NodeIndex) {
        let node = *self.nodes.get(idx);
        match node {
            Node::Program { .. }
            | Node::Number { .. }
            | Node::Float { .. }
            | Node::Bool { .. }
            | Node::String { .. }
            | Node::Solid { .. }
            | Node::InlineAsm { .. } => {}

            Node::Identifier { name, .. } => self.resolve_use(name),

            Node::ActionBlock { first, .. } => {
                self.push_scope();
                self.resolve_chain(first);
                self.pop_scope();
            }
            Node::DeclareBlock { first, .. } => {
                // Function symbols were hoisted in pass 1; still walk the
                // block so parameter/body references resolve.
                self.resolve_chain(first);
            }

            Node::BinaryOp { op, left, right, .. } => {
                if is_assign_op(op) {
                    self.resolve_expr(right);
                    // The left side of an assignment is a use (the variable
                    // must already be declared), not a declaration.
                    self.resolve_expr(left);
                } else {
                    self.resolve_expr(left);
                    self.resolve_expr(right);
                }
            }
            Node::UnaryOp { operand, .. } => self.resolve_expr(operand),

            Node::VarDef { name, init, .. } => {
                if init.is_some() {
                    self.resolve_expr(init);
                }
                self.declare_local(name, SymbolKind::Var, idx);
            }

            Node::FuncDef {
                name,
                body,
                params,
                declared,
                ..
            } => {
                if !declared {
                    self.declare_local(name, SymbolKind::Func, idx);
                }
                self.push_scope();
                let mut param = params;
                while param.is_some() {
                    if let Node::Identifier { name, .. } = *self.nodes.get(param) {
                        self.declare_local(name, SymbolKind::Var, param);
                    }
                    param = self.nodes.get(param).next_sibling();
                }
                if let Node::ActionBlock { first, .. } = *self.nodes.get(body) {
                    self.resolve_chain(first);
                }
                self.pop_scope();
            }

            Node::FuncCall { callee, args, .. } => {
                let text = self.text(callee).to_string();
                if self.lookup(&text).is_none() {
                    // Not fatal: the callee may be defined later in the
                    // source (a plain, non-`declare/`-hoisted forward
                    // reference) and codegen's call-patching already
                    // handles a definition seen after its call sites.
                    self.warnings.push(CompileError::resolve(format!(
                        "call to undefined function '{}'",
                        text
                    )));
                }
                let mut arg = args;
                while arg.is_some() {
                    self.resolve_expr(arg);
                    arg = self.nodes.get(arg).next_sibling();
                }
            }

            Node::Conditional {
                cond,
                body,
                else_body,
                ..
            } => {
                self.resolve_expr(cond);
                self.resolve_block(body);
                if else_body.is_some() {
                    self.resolve_block(else_body);
                }
            }

            Node::WhileLoop { cond, body, .. } => {
                self.resolve_expr(cond);
                self.loop_depth += 1;
                self.resolve_block(body);
                self.loop_depth -= 1;
            }

            Node::ForLoop {
                init,
                cond,
                incr,
                body,
                ..
            } => {
                self.push_scope();
                if init.is_some() {
                    self.resolve_stmt(init);
                }
                if cond.is_some() {
                    self.resolve_expr(cond);
                }
                self.loop_depth += 1;
                self.resolve_block(body);
                self.loop_depth -= 1;
                if incr.is_some() {
                    self.resolve_stmt(incr);
                }
                self.pop_scope();
            }

            Node::Return { value, .. } => {
                if value.is_some() {
                    self.resolve_expr(value);
                }
            }

            Node::Break { .. } | Node::Continue { .. } => {
                if self.loop_depth == 0 {
                    // Codegen's own loop-context stack (`CodeBuffer::record_break`/
                    // `record_continue`) independently rejects this at emission
                    // time, so this is a warning rather than a second,
                    // redundant hard-failure path.
                    self.warnings.push(CompileError::resolve(
                        "'break'/'continue' used outside of a loop",
                    ));
                }
            }

            Node::Output { content, .. } => self.resolve_expr(content),

            Node::TimingOp { expr, .. } => self.resolve_expr(expr),

            Node::Array4dDef { name, dims, .. } => {
                for d in dims {
                    self.resolve_expr(d);
                }
                self.declare_local(name, SymbolKind::Var, idx);
            }
            Node::Array4dAccess { name, indices, .. } => {
                for i in indices {
                    self.resolve_expr(i);
                }
                self.resolve_use(name);
            }

            Node::Switch {
                value,
                first_case,
                default,
                ..
            } => {
                self.resolve_expr(value);
                self.push_scope();
                let mut case = first_case;
                while case.is_some() {
                    match *self.nodes.get(case) {
                        Node::Case { value, body, .. } => {
                            self.resolve_expr(value);
                            self.resolve_chain(body);
                        }
                        Node::InCase { body, .. } => self.resolve_chain(body),
                        _ => {}
                    }
                    case = self.nodes.get(case).next_sibling();
                }
                if default.is_some() {
                    if let Node::Default { body, .. } = *self.nodes.get(default) {
                        self.resolve_chain(body);
                    }
                }
                self.pop_scope();
            }

            Node::Case { .. } | Node::Default { .. } | Node::InCase { .. } => {
                // Only ever reached via the Switch arm above.
            }
        }
    }

    /// Expressions reuse the statement dispatcher: every expression-shaped
    /// node (`Identifier`, `BinaryOp`, `FuncCall`, ternary-as-`Conditional`,
    /// ...) is also a valid `resolve_stmt` target.
    fn resolve_expr(&mut self, idx: NodeIndex) {
        self.resolve_stmt(idx);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn resolve_src(src: &str) -> (crate::parser::ParseOutput, ResolveOutput) {
        let parsed = Parser::new(src).parse().expect("fatal parse error");
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let resolved = Resolver::new(&parsed.nodes, &parsed.strings).resolve(parsed.root);
        (parsed, resolved)
    }

    #[test]
    fn resolves_simple_var_use() {
        let (_parsed, resolved) = resolve_src("var x = 1\nprint x");
        assert!(resolved.warnings.is_empty(), "{:?}", resolved.warnings);
    }

    #[test]
    fn reports_undefined_variable() {
        let (_parsed, resolved) = resolve_src("print y");
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn declare_block_function_is_visible_before_its_definition() {
        let (_parsed, resolved) =
            resolve_src("print helper()\ndeclare/ |helper| < do/ return 1 \\ :> \\");
        assert!(resolved.warnings.is_empty(), "{:?}", resolved.warnings);
    }

    #[test]
    fn plain_function_is_not_visible_before_its_definition() {
        let (_parsed, resolved) = resolve_src("print helper()\n|helper| < do/ return 1 \\ :>");
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn break_outside_loop_is_flagged_as_a_warning() {
        let (_parsed, resolved) = resolve_src("break");
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn break_inside_while_is_fine() {
        let (_parsed, resolved) = resolve_src("while (1 < 2) do/ break \\");
        assert!(resolved.warnings.is_empty(), "{:?}", resolved.warnings);
    }

    /// The lexical scope pass flags `x` as unresolved past the end of its
    /// `if` block, but that's a warning, not a rejection: codegen's flat
    /// `VarEnv` still has `x`'s slot (see `driver::tests::
    /// block_scoped_variable_used_after_its_block_still_compiles`).
    #[test]
    fn variable_scoped_to_block_is_flagged_as_a_warning() {
        let (_parsed, resolved) =
            resolve_src("if (1 < 2) do/ var x = 1 \\\nprint x");
        assert_eq!(resolved.warnings.len(), 1);
    }
}
