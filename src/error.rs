//! Compiler error type and source-position rendering.
//!
//! Every fallible entry point returns a plain error value rather than a
//! `thiserror` hierarchy — there's no call for an error-derive crate when
//! every error is a one-shot user-facing diagnostic — but wraps the
//! message in a small struct so the CLI can render `file:line:col`
//! consistently.

use std::fmt;

/// Which pipeline phase raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lex,
    Parse,
    Resolve,
    Codegen,
    Emit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Lex => "lex",
            Phase::Parse => "parse",
            Phase::Resolve => "resolve",
            Phase::Codegen => "codegen",
            Phase::Emit => "emit",
        };
        write!(f, "{}", s)
    }
}

/// A byte offset into the source buffer. `None` when the error has no
/// single meaningful source position (e.g. an emitter I/O failure).
pub type SourceOffset = Option<u32>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub phase: Phase,
    pub offset: SourceOffset,
    pub message: String,
}

impl CompileError {
    pub fn new(phase: Phase, offset: SourceOffset, message: impl Into<String>) -> Self {
        CompileError {
            phase,
            offset,
            message: message.into(),
        }
    }

    pub fn parse(offset: u32, message: impl Into<String>) -> Self {
        Self::new(Phase::Parse, Some(offset), message)
    }

    pub fn resolve(message: impl Into<String>) -> Self {
        Self::new(Phase::Resolve, None, message)
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        Self::new(Phase::Codegen, None, message)
    }

    pub fn emit(message: impl Into<String>) -> Self {
        Self::new(Phase::Emit, None, message)
    }

    /// Render a one-line diagnostic, resolving `offset` into a 1-indexed
    /// line/column against `source` when present: kind, source byte
    /// offset (line/column derived from the source buffer), short phrase.
    pub fn render(&self, file: &str, source: &str) -> String {
        match self.offset {
            Some(offset) => {
                let (line, col) = line_col(source, offset as usize);
                format!(
                    "{} error at {}:{}:{}: {}",
                    self.phase, file, line, col, self.message
                )
            }
            None => format!("{} error in {}: {}", self.phase, file, self.message),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.phase, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Linear scan from the start of the buffer to `offset`, counting newlines.
/// The source texts this compiler handles are small (single translation
/// unit, no includes), so a precomputed line-start table would be
/// complexity this scale doesn't earn.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let mut line = 1usize;
    let mut col = 1usize;
    for ch in source[..offset].chars() {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_tracks_newlines() {
        let src = "a\nbcd\nef";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 2), (2, 1));
        assert_eq!(line_col(src, 7), (3, 2));
    }

    #[test]
    fn render_includes_phase_and_position() {
        let err = CompileError::parse(2, "unexpected token");
        let rendered = err.render("main.bz", "a\nb");
        assert!(rendered.contains("parse error at main.bz:2:1"));
    }
}
