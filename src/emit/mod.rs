//! Binary emitter: packages the machine code codegen produced into
//! a freestanding executable container. No external assembler or linker is
//! invoked — headers are hand-laid byte arrays built entirely in this
//! module.

pub mod elf;
pub mod pe;

use crate::codegen::GenerateOutput;
use crate::config::Target;

/// Build the final executable image for `target` from a finished codegen
/// pass. Linux ignores `iat_patches` (nothing to patch — syscalls are
/// direct); Windows uses them to fix up every `[rip+disp32]` IAT
/// call-through once `.idata`'s layout is known.
pub fn build(generated: &GenerateOutput, target: Target) -> Vec<u8> {
    match target {
        Target::Linux => elf::build(&generated.code),
        Target::Windows => pe::build(&generated.code, &generated.iat_patches),
    }
}
