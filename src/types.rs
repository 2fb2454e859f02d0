//! Variable environment: the flat name → stack-slot mapping codegen
//! consults for every identifier reference.
//!
//! Locals have no lexical nesting at the storage layer — the resolver
//! already enforces scoping rules when it builds the symbol table;
//! by the time codegen walks a function body it only needs "where on the
//! stack does this name live, and as what type."  Offsets are assigned in
//! declaration order as 8-byte slots below the frame base, matching the
//! teacher's flat-frame local allocation rather than a per-scope display.

use std::collections::HashMap;

/// Declared/inferred storage type for a local. Distinct from
/// [`crate::ast::VarType`]: the AST's `Inferred`/`Char` variants are
/// resolved down to one of these five concrete tags before a slot is
/// recorded, so codegen never has to re-derive a type tag from source
/// syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int,
    Float,
    String,
    Bool,
    Solid,
}

impl TypeTag {
    /// Whether values of this type live in XMM0 (float) or RAX (everything
    /// else) at the canonical result location.
    pub fn is_float(self) -> bool {
        matches!(self, TypeTag::Float)
    }
}

impl From<crate::ast::VarType> for TypeTag {
    fn from(vt: crate::ast::VarType) -> Self {
        match vt {
            crate::ast::VarType::Int => TypeTag::Int,
            crate::ast::VarType::Float => TypeTag::Float,
            crate::ast::VarType::String => TypeTag::String,
            crate::ast::VarType::Bool => TypeTag::Bool,
            crate::ast::VarType::Solid => TypeTag::Solid,
            // A bare `var.char` is stored as a one-byte-valued integer slot;
            // `Inferred` is resolved by the caller from the initializer
            // before a `VarSlot` is ever recorded (default Int when there is
            // no initializer to inspect).
            crate::ast::VarType::Char | crate::ast::VarType::Inferred => TypeTag::Int,
        }
    }
}

/// One local variable's storage record.
#[derive(Debug, Clone, Copy)]
pub struct VarSlot {
    /// Offset from RBP; always negative (locals live below the frame base).
    pub stack_offset: i32,
    pub initialized: bool,
    pub type_tag: TypeTag,
}

/// Flat mapping from variable name to its stack slot, plus the bump
/// allocator that hands out 8-byte-aligned offsets in declaration order.
/// One `VarEnv` is built per function body (and one for the top-level
/// implicit `main`); nested blocks share their enclosing function's
/// environment — there is no lexical scoping at codegen time.
#[derive(Debug, Default)]
pub struct VarEnv {
    slots: HashMap<String, VarSlot>,
    next_offset: i32,
}

impl VarEnv {
    pub fn new() -> Self {
        VarEnv {
            slots: HashMap::new(),
            next_offset: 0,
        }
    }

    /// Allocate the next 8-byte slot for `name` and record it uninitialized.
    /// Re-declaring a name in the same environment (shouldn't happen past a
    /// correctly-resolved program, but codegen doesn't re-verify the
    /// resolver's uniqueness invariant) simply reuses a fresh slot.
    pub fn declare(&mut self, name: &str, type_tag: TypeTag) -> i32 {
        self.next_offset -= 8;
        let offset = self.next_offset;
        self.slots.insert(
            name.to_string(),
            VarSlot {
                stack_offset: offset,
                initialized: false,
                type_tag,
            },
        );
        offset
    }

    /// Reserve a contiguous block of `cells` 8-byte slots (used for 4D array
    /// storage, `Array4dDef`) and return the offset of its first cell.
    /// Unlike [`VarEnv::declare`], the block isn't tied to a single name —
    /// callers track the base offset themselves (see
    /// `codegen::state::ArrayInfo`).
    pub fn alloc_block(&mut self, cells: i64) -> i32 {
        let bytes = cells.max(1) * 8;
        self.next_offset -= bytes as i32;
        self.next_offset
    }

    pub fn mark_initialized(&mut self, name: &str) {
        if let Some(slot) = self.slots.get_mut(name) {
            slot.initialized = true;
        }
    }

    pub fn get(&self, name: &str) -> Option<&VarSlot> {
        self.slots.get(name)
    }

    /// Total bytes of local storage reserved so far, rounded up to keep the
    /// stack 16-byte aligned at a `call` (System V and Microsoft x64 both
    /// require this).
    pub fn frame_size(&self) -> i32 {
        let raw = -self.next_offset;
        (raw + 15) & !15
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_assigned_in_declaration_order() {
        let mut env = VarEnv::new();
        let a = env.declare("a", TypeTag::Int);
        let b = env.declare("b", TypeTag::Float);
        assert_eq!(a, -8);
        assert_eq!(b, -16);
    }

    #[test]
    fn frame_size_rounds_up_to_16() {
        let mut env = VarEnv::new();
        env.declare("a", TypeTag::Int);
        assert_eq!(env.frame_size(), 16);
        env.declare("b", TypeTag::Int);
        assert_eq!(env.frame_size(), 16);
        env.declare("c", TypeTag::Int);
        assert_eq!(env.frame_size(), 32);
    }

    #[test]
    fn initialized_flag_tracks_first_store() {
        let mut env = VarEnv::new();
        env.declare("x", TypeTag::Int);
        assert!(!env.get("x").unwrap().initialized);
        env.mark_initialized("x");
        assert!(env.get("x").unwrap().initialized);
    }
}
