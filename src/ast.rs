//! The AST: a true sum type over a flat node pool.
//!
//! A naive encoding of this AST might reuse one union payload across
//! unrelated node kinds (a sibling pointer doubling as a binary operator's
//! left operand, say). That kind of reuse is exactly what this design
//! avoids: every variant below owns its own fields, and sibling chaining
//! is the separate [`Chain`] wrapper rather than a borrowed slot in some
//! other variant's payload.

use crate::pool::{NodeIndex, StrSpan};

/// Sibling-chain link shared by list-like constructs (statement lists,
/// parameter lists, argument lists, case lists). `NodeIndex::NONE` ends the
/// chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chain {
    pub next: NodeIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Gt,
    Le,
    Ge,
    Shl,
    Shr,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    RemAssign,
    PowAssign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    PostIncr,
    PostDecr,
}

/// Declared storage type for a `VarDef` (the type tag packed into the
/// variant's field encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Int,
    Float,
    String,
    Bool,
    Solid,
    Char,
    Inferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalKind {
    If,
    While,
    Ensure,  // f.ens
    Check,   // f.chk
    Try,     // f.try
    Guard,   // f.grd
    Until,   // f.unt / f.unl
    Verify,  // f.ver
    Measure, // f.msr
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Print,
    Txt,
    Out,
    Fmt,
    Dyn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingKind {
    Onto,
    Into,
    Both,
    Before,
    After,
}

/// Barrier classification for a [`Node::Solid`] literal. Parsed-and-kept,
/// never lowered — see open question on solid-number
/// semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierKind {
    None,
    Infinite,
    Indeterminate,
    Bounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    None,
    Repeating,
    Truncated,
}

/// One AST node. Payload fields hold only what that variant's semantics
/// actually uses; there is no shared-union reuse across variants.
#[derive(Debug, Clone, Copy)]
pub enum Node {
    /// Top of the tree. `first` is the head of the top-level statement
    /// chain.
    Program { first: NodeIndex },

    /// `do/ ... \` block. `first` is the head of its statement chain.
    ActionBlock { first: NodeIndex, chain: Chain },

    /// `declare/ ... \` block: functions declared here are visible to the
    /// whole translation unit.
    DeclareBlock { first: NodeIndex, chain: Chain },

    Number { value: i64, chain: Chain },
    Float { value: f64, chain: Chain },
    Bool { value: bool, chain: Chain },
    String { text: StrSpan, chain: Chain },

    /// Extended-precision literal. Fields mirror the source record exactly;
    /// none of them are interpreted by codegen (see [`BarrierKind`] doc).
    Solid {
        known_digits: StrSpan,
        barrier: BarrierKind,
        barrier_magnitude: i64,
        confidence_permille: u32,
        terminal_digits: StrSpan,
        terminal: TerminalKind,
        chain: Chain,
    },

    Identifier { name: StrSpan, chain: Chain },

    BinaryOp {
        op: BinOp,
        left: NodeIndex,
        right: NodeIndex,
        chain: Chain,
    },
    UnaryOp {
        op: UnOp,
        operand: NodeIndex,
        chain: Chain,
    },

    VarDef {
        name: StrSpan,
        var_type: VarType,
        init: NodeIndex, // NONE if uninitialized
        chain: Chain,
    },

    FuncDef {
        name: StrSpan,
        body: NodeIndex,
        params: NodeIndex, // head of parameter chain (Identifier nodes)
        declared: bool,    // true if defined inside a declare/ block
        chain: Chain,
    },

    FuncCall {
        callee: StrSpan,
        args: NodeIndex, // head of argument chain
        chain: Chain,
    },

    Conditional {
        kind: ConditionalKind,
        cond: NodeIndex,
        body: NodeIndex,
        else_body: NodeIndex, // NONE if no else
        chain: Chain,
    },

    WhileLoop {
        cond: NodeIndex,
        body: NodeIndex,
        chain: Chain,
    },
    ForLoop {
        init: NodeIndex,
        cond: NodeIndex,
        incr: NodeIndex,
        body: NodeIndex,
        chain: Chain,
    },

    Return { value: NodeIndex, chain: Chain },
    Break { chain: Chain },
    Continue { chain: Chain },

    Output {
        kind: OutputKind,
        content: NodeIndex,
        chain: Chain,
    },

    /// Parsed and resolved but not lowered; temporal scope resolution
    /// rules beyond basic visibility are unresolved.
    TimingOp {
        kind: TimingKind,
        expr: NodeIndex,
        offset: i64,
        chain: Chain,
    },

    Array4dDef {
        name: StrSpan,
        dims: [NodeIndex; 4],
        chain: Chain,
    },
    Array4dAccess {
        name: StrSpan,
        indices: [NodeIndex; 4],
        chain: Chain,
    },

    Switch {
        value: NodeIndex,
        first_case: NodeIndex,
        default: NodeIndex, // NONE if no default
        chain: Chain,
    },
    Case {
        value: NodeIndex,
        body: NodeIndex,
        chain: Chain, // next case in the switch's case list
    },
    Default {
        body: NodeIndex,
        chain: Chain,
    },
    InCase {
        body: NodeIndex,
        chain: Chain,
    },

    InlineAsm { text: StrSpan, chain: Chain },
}

impl Node {
    /// The sibling-chain slot every list-bearing variant carries, or
    /// `NodeIndex::NONE` for variants that are never chained (the program
    /// root).
    pub fn next_sibling(&self) -> NodeIndex {
        match *self {
            Node::Program { .. } => NodeIndex::NONE,
            Node::ActionBlock { chain, .. }
            | Node::DeclareBlock { chain, .. }
            | Node::Number { chain, .. }
            | Node::Float { chain, .. }
            | Node::Bool { chain, .. }
            | Node::String { chain, .. }
            | Node::Solid { chain, .. }
            | Node::Identifier { chain, .. }
            | Node::BinaryOp { chain, .. }
            | Node::UnaryOp { chain, .. }
            | Node::VarDef { chain, .. }
            | Node::FuncDef { chain, .. }
            | Node::FuncCall { chain, .. }
            | Node::Conditional { chain, .. }
            | Node::WhileLoop { chain, .. }
            | Node::ForLoop { chain, .. }
            | Node::Return { chain, .. }
            | Node::Break { chain }
            | Node::Continue { chain }
            | Node::Output { chain, .. }
            | Node::TimingOp { chain, .. }
            | Node::Array4dDef { chain, .. }
            | Node::Array4dAccess { chain, .. }
            | Node::Switch { chain, .. }
            | Node::Case { chain, .. }
            | Node::Default { chain, .. }
            | Node::InCase { chain, .. }
            | Node::InlineAsm { chain, .. } => chain.next,
        }
    }

    pub fn set_next_sibling(&mut self, next: NodeIndex) {
        let slot = match self {
            Node::Program { .. } => return,
            Node::ActionBlock { chain, .. }
            | Node::DeclareBlock { chain, .. }
            | Node::Number { chain, .. }
            | Node::Float { chain, .. }
            | Node::Bool { chain, .. }
            | Node::String { chain, .. }
            | Node::Solid { chain, .. }
            | Node::Identifier { chain, .. }
            | Node::BinaryOp { chain, .. }
            | Node::UnaryOp { chain, .. }
            | Node::VarDef { chain, .. }
            | Node::FuncDef { chain, .. }
            | Node::FuncCall { chain, .. }
            | Node::Conditional { chain, .. }
            | Node::WhileLoop { chain, .. }
            | Node::ForLoop { chain, .. }
            | Node::Return { chain, .. }
            | Node::Break { chain }
            | Node::Continue { chain }
            | Node::Output { chain, .. }
            | Node::TimingOp { chain, .. }
            | Node::Array4dDef { chain, .. }
            | Node::Array4dAccess { chain, .. }
            | Node::Switch { chain, .. }
            | Node::Case { chain, .. }
            | Node::Default { chain, .. }
            | Node::InCase { chain, .. }
            | Node::InlineAsm { chain, .. } => chain,
        };
        slot.next = next;
    }
}

/// `NodePool<Node>` requires `Default` for its reserved slot 0; a Program
/// node with no children is as good a sentinel as any since it is never
/// read.
impl Default for Node {
    fn default() -> Self {
        Node::Program {
            first: NodeIndex::NONE,
        }
    }
}
