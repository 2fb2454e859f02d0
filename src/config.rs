//! Compiler configuration.
//!
//! A small builder-style config struct, stripped of the
//! FFI/external-builtin extensibility that has no counterpart in a
//! freestanding-binary compiler: there is no runtime to extend, so the only
//! knobs left are the ones the pipeline itself needs — which binary format
//! to emit, how big the node pool is, and whether peephole rewriting runs.

use crate::pool::NODE_POOL_CAPACITY;

/// Output binary format / target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Linux,
    Windows,
}

impl Target {
    /// The target implied by the host this compiler itself was built for,
    /// used as a sensible default over a required flag.
    pub fn host_default() -> Self {
        if cfg!(target_os = "windows") {
            Target::Windows
        } else {
            Target::Linux
        }
    }
}

impl std::str::FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(Target::Linux),
            "windows" => Ok(Target::Windows),
            other => Err(format!("unknown target '{}' (expected 'linux' or 'windows')", other)),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Target::Linux => "linux",
            Target::Windows => "windows",
        };
        write!(f, "{}", s)
    }
}

/// Compilation-wide configuration, owned by the driver for one
/// invocation, never shared or locked.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub target: Target,
    /// Node-pool capacity override. Defaults to
    /// [`NODE_POOL_CAPACITY`]; tests lower this to exercise pool
    /// exhaustion without constructing a 65536-node program.
    pub node_pool_capacity: usize,
    /// Disable the peephole rewrites (`+1`→`inc`, power-of-two
    /// multiply→`shl`, ...) for differential testing against the naive
    /// encoding.
    pub peephole: bool,
}

impl CompilerConfig {
    pub fn new(target: Target) -> Self {
        CompilerConfig {
            target,
            node_pool_capacity: NODE_POOL_CAPACITY,
            peephole: true,
        }
    }

    pub fn with_node_pool_capacity(mut self, capacity: usize) -> Self {
        self.node_pool_capacity = capacity;
        self
    }

    pub fn with_peephole(mut self, enabled: bool) -> Self {
        self.peephole = enabled;
        self
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig::new(Target::host_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_round_trips_through_str() {
        assert_eq!("linux".parse::<Target>().unwrap(), Target::Linux);
        assert_eq!("windows".parse::<Target>().unwrap(), Target::Windows);
        assert!("plan9".parse::<Target>().is_err());
    }

    #[test]
    fn default_config_uses_full_node_pool() {
        let cfg = CompilerConfig::new(Target::Linux);
        assert_eq!(cfg.node_pool_capacity, NODE_POOL_CAPACITY);
        assert!(cfg.peephole);
    }
}
