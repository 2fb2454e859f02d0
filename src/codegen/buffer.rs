//! Growable machine-code buffer with offset-based jump patching and a
//! fixed-depth loop-context stack.
//!
//! Patches are always resolved against a stable byte offset rather than a
//! pointer, since the buffer itself is the only thing that moves (it
//! reallocates as it grows); the final write-out (`emit::elf`/`emit::pe`)
//! copies these bytes verbatim into the output section.

use crate::error::CompileError;

///: loop nesting deeper than this is rejected rather than growing the
/// context stack without bound.
pub const MAX_LOOP_DEPTH: usize = 16;

/// Per-loop bookkeeping needed to patch `break`/`continue` once the loop's
/// exit and continue targets are known. Both lists collect byte offsets of
/// `reserve_i32` placeholders still waiting for a target.
#[derive(Debug, Default)]
pub struct LoopContext {
    break_patches: Vec<u32>,
    continue_patches: Vec<u32>,
}

pub struct CodeBuffer {
    bytes: Vec<u8>,
    loop_stack: Vec<LoopContext>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        CodeBuffer {
            bytes: Vec::new(),
            loop_stack: Vec::new(),
        }
    }

    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn emit_u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    pub fn emit_bytes(&mut self, bs: &[u8]) {
        self.bytes.extend_from_slice(bs);
    }

    pub fn emit_i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_i64(&mut self, v: i64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Reserve 4 bytes for a value patched in later (a rel32 displacement),
    /// returning the offset of the reserved slot.
    pub fn reserve_i32(&mut self) -> u32 {
        let at = self.offset();
        self.emit_i32(0);
        at
    }

    pub fn patch_i32(&mut self, at: u32, value: i32) {
        let at = at as usize;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Patch a previously reserved rel32 site so it jumps to `target`,
    /// measuring the displacement from the end of the 4-byte field (the
    /// x86-64 convention: rel32 is relative to the next instruction).
    pub fn patch_rel32_to(&mut self, site: u32, target: u32) {
        let next_instr = site + 4;
        let rel = target as i64 - next_instr as i64;
        self.patch_i32(site, rel as i32);
    }

    pub fn push_loop(&mut self) -> Result<(), CompileError> {
        if self.loop_stack.len() >= MAX_LOOP_DEPTH {
            return Err(CompileError::codegen(format!(
                "loop nesting exceeds the fixed depth of {}",
                MAX_LOOP_DEPTH
            )));
        }
        self.loop_stack.push(LoopContext::default());
        Ok(())
    }

    /// Pop the innermost loop context, patching every pending `break` to
    /// `exit_target` and every pending `continue` to `continue_target`.
    pub fn pop_loop(&mut self, continue_target: u32, exit_target: u32) {
        let ctx = self
            .loop_stack
            .pop()
            .expect("pop_loop called with no active loop context");
        for site in ctx.break_patches {
            self.patch_rel32_to(site, exit_target);
        }
        for site in ctx.continue_patches {
            self.patch_rel32_to(site, continue_target);
        }
    }

    pub fn record_break(&mut self, site: u32) -> Result<(), CompileError> {
        self.loop_stack
            .last_mut()
            .ok_or_else(|| CompileError::codegen("'break' used outside of a loop"))?
            .break_patches
            .push(site);
        Ok(())
    }

    pub fn record_continue(&mut self, site: u32) -> Result<(), CompileError> {
        self.loop_stack
            .last_mut()
            .ok_or_else(|| CompileError::codegen("'continue' used outside of a loop"))?
            .continue_patches
            .push(site);
        Ok(())
    }

    pub fn loop_depth(&self) -> usize {
        self.loop_stack.len()
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_rel32_computes_displacement_from_next_instruction() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0xE9); // jmp rel32
        let site = buf.reserve_i32();
        let target = buf.offset();
        buf.patch_rel32_to(site, target);
        assert_eq!(&buf.as_bytes()[1..5], &0i32.to_le_bytes());
    }

    #[test]
    fn loop_depth_enforced() {
        let mut buf = CodeBuffer::new();
        for _ in 0..MAX_LOOP_DEPTH {
            buf.push_loop().unwrap();
        }
        assert!(buf.push_loop().is_err());
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let mut buf = CodeBuffer::new();
        assert!(buf.record_break(0).is_err());
    }
}
