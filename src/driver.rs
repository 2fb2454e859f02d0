//! Driver: sequences lex → parse → resolve → codegen → emit for one
//! compilation and owns every pool/table the pipeline needs along the way.
//! Parse, codegen, and emit errors short-circuit the rest: the first phase
//! to fail is reported and the pipeline stops, producing no output file on
//! any non-success path. Resolve is the exception — its unresolved-name
//! and break/continue-outside-loop findings are warnings, not errors, since
//! the language admits forward references that only resolve once the full
//! program is seen. They're logged and compilation continues; codegen is
//! the phase that actually fails on a reference with no storage behind it.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::codegen;
use crate::config::CompilerConfig;
use crate::emit;
use crate::error::CompileError;
use crate::parser::Parser;
use crate::resolver::Resolver;

/// Run lex → parse → resolve → codegen, short-circuiting on the first
/// stage to report an error. Shared by `compile_source` (which packages
/// the result into a binary) and `compile_to_bytes` (which doesn't).
fn run_pipeline(source: &str, config: &CompilerConfig) -> Result<codegen::GenerateOutput, CompileError> {
    let parser = Parser::with_capacity(source, config.node_pool_capacity);
    let parsed = parser.parse()?;
    debug!(nodes = parsed.nodes.len(), "parsed");
    if let Some(first) = parsed.errors.first() {
        return Err(first.clone());
    }

    let resolved = Resolver::new(&parsed.nodes, &parsed.strings).resolve(parsed.root);
    debug!(symbols = resolved.table.symbols.len(), "resolved");
    for warning in &resolved.warnings {
        debug!(message = %warning.message, "resolve warning");
    }

    let generated = codegen::generate(&parsed.nodes, &parsed.strings, parsed.root, config);
    debug!(bytes = generated.code.len(), "generated");
    if let Some(first) = generated.errors.first() {
        return Err(first.clone());
    }

    Ok(generated)
}

/// Run the pipeline up to (not including) binary emission and return the
/// raw machine code. Used by the CLI's `--keep-asm` listing, which has no
/// use for the ELF/PE wrapper.
pub fn compile_to_bytes(source: &str, config: &CompilerConfig) -> Result<Vec<u8>, CompileError> {
    Ok(run_pipeline(source, config)?.code)
}

/// Compile `source` under `config`, returning the finished executable
/// image bytes. Does not touch the filesystem beyond reading nothing else
/// — callers decide where (and whether) to write the result.
pub fn compile_source(source: &str, config: &CompilerConfig) -> Result<Vec<u8>, CompileError> {
    let generated = run_pipeline(source, config)?;
    let image = emit::build(&generated, config.target);
    debug!(image_bytes = image.len(), target = %config.target, "emitted");
    Ok(image)
}

/// Compile the file at `input` and write the resulting executable to
/// `output`. On any failure, no file is written (and any partial file left
/// by a previous run at `output` is left untouched, never truncated
/// first).
pub fn compile_file(input: &Path, output: &Path, config: &CompilerConfig) -> Result<(), CompileError> {
    let source = fs::read_to_string(input)
        .map_err(|e| CompileError::emit(format!("cannot read {}: {e}", input.display())))?;

    let image = compile_source(&source, config)?;

    fs::write(output, &image)
        .map_err(|e| CompileError::emit(format!("cannot write {}: {e}", output.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if config.target == crate::config::Target::Linux {
            let mut perms = fs::metadata(output)
                .map_err(|e| CompileError::emit(format!("cannot stat {}: {e}", output.display())))?
                .permissions();
            perms.set_mode(0o755);
            fs::set_permissions(output, perms)
                .map_err(|e| CompileError::emit(format!("cannot chmod {}: {e}", output.display())))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompilerConfig, Target};

    #[test]
    fn compiles_empty_program_to_nonempty_image() {
        let config = CompilerConfig::new(Target::Linux);
        let image = compile_source("", &config).unwrap();
        assert!(!image.is_empty());
        assert_eq!(&image[0..4], &[0x7f, b'E', b'L', b'F']);
    }

    #[test]
    fn compiles_simple_program() {
        let config = CompilerConfig::new(Target::Linux);
        let src = "var x = 1\nx = x + 2\nprint x";
        let image = compile_source(src, &config).unwrap();
        assert!(!image.is_empty());
    }

    #[test]
    fn undefined_identifier_is_a_resolve_warning_but_a_codegen_error() {
        let config = CompilerConfig::new(Target::Linux);
        let err = compile_source("print undefined_name", &config).unwrap_err();
        assert_eq!(err.phase, crate::error::Phase::Codegen);
    }

    #[test]
    fn block_scoped_variable_used_after_its_block_still_compiles() {
        let config = CompilerConfig::new(Target::Linux);
        let src = "if (1 < 2) do/ var x = 1 \\\nprint x";
        let image = compile_source(src, &config).unwrap();
        assert!(!image.is_empty());
    }

    #[test]
    fn writes_windows_image_with_pe_signature() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("prog.blz");
        let output = dir.path().join("prog.exe");
        fs::write(&input, "print \"hi\"").unwrap();

        let config = CompilerConfig::new(Target::Windows);
        compile_file(&input, &output, &config).unwrap();

        let bytes = fs::read(&output).unwrap();
        assert_eq!(&bytes[0..2], b"MZ");
    }

    #[test]
    fn no_output_file_left_behind_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.blz");
        let output = dir.path().join("bad_out");
        fs::write(&input, "print \"unterminated").unwrap();

        let config = CompilerConfig::new(Target::Linux);
        assert!(compile_file(&input, &output, &config).is_err());
        assert!(!output.exists());
    }
}
