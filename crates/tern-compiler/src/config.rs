//! Compiler options
//!
//! Options can be built in code or read from the `[compiler]` table of a
//! TOML file:
//!
//! ```toml
//! [compiler]
//! opt-level = "full"
//! disabled-passes = ["inline"]
//! register-count = 16
//! ```

use crate::error::CompileResult;
use serde::{Deserialize, Serialize};

/// Optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptLevel {
    /// No optimizations; the IR goes straight to register allocation
    None,
    /// Scalar promotion, redundancy and dead code elimination, folding
    Basic,
    /// Everything in `Basic` plus inlining
    #[default]
    Full,
}

/// Options controlling one module compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CompilerOptions {
    pub opt_level: OptLevel,
    /// Pass names to skip (see `optimize::PASS_NAMES`)
    pub disabled_passes: Vec<String>,
    /// Upper bound on pipeline rounds before the fixed point is forced
    pub max_iterations: usize,
    /// Largest callee, in instructions, the inliner will copy
    pub inline_size_budget: usize,
    /// Longest chain of nested inlinings at one call site
    pub max_inline_depth: usize,
    /// Registers in the register file, including the scratch registers
    pub register_count: u16,
    /// Low registers clobbered by every call
    pub caller_saved_registers: u16,
    /// Emit line/column records per instruction
    pub debug_info: bool,
    /// Run the IR verifier after every stage and changing pass
    pub verify: bool,
    /// Run per-function phases on the rayon pool
    pub parallel: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            opt_level: OptLevel::Full,
            disabled_passes: Vec::new(),
            max_iterations: 8,
            inline_size_budget: 40,
            max_inline_depth: 4,
            register_count: 32,
            caller_saved_registers: 4,
            debug_info: false,
            verify: cfg!(debug_assertions),
            parallel: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    compiler: CompilerOptions,
}

impl CompilerOptions {
    /// Options with every optimization disabled
    pub fn unoptimized() -> Self {
        CompilerOptions {
            opt_level: OptLevel::None,
            ..Default::default()
        }
    }

    /// Parse the `[compiler]` table of a TOML document
    pub fn from_toml_str(source: &str) -> CompileResult<Self> {
        let file: ConfigFile = toml::from_str(source)?;
        file.compiler.validated()
    }

    /// Disable a pass by name
    pub fn disable_pass(mut self, name: &str) -> Self {
        if !self.disabled_passes.iter().any(|p| p == name) {
            self.disabled_passes.push(name.to_string());
        }
        self
    }

    pub fn is_pass_enabled(&self, name: &str) -> bool {
        !self.disabled_passes.iter().any(|p| p == name)
    }

    /// Registers the allocator may hand out; the top three are scratch
    pub fn allocatable_registers(&self) -> u16 {
        self.register_count.saturating_sub(crate::regalloc::SCRATCH_REGISTERS)
    }

    fn validated(self) -> CompileResult<Self> {
        use crate::error::CompileError;
        if self.register_count < crate::regalloc::SCRATCH_REGISTERS + 1 {
            return Err(CompileError::Config(format!(
                "register-count must be at least {}",
                crate::regalloc::SCRATCH_REGISTERS + 1
            )));
        }
        if self.caller_saved_registers >= self.allocatable_registers() {
            return Err(CompileError::Config(
                "caller-saved-registers must leave at least one callee-saved register".to_string(),
            ));
        }
        for name in &self.disabled_passes {
            if !crate::optimize::PASS_NAMES.contains(&name.as_str()) {
                return Err(CompileError::Config(format!("unknown pass '{}'", name)));
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = CompilerOptions::default();
        assert_eq!(opts.opt_level, OptLevel::Full);
        assert_eq!(opts.allocatable_registers(), 29);
        assert!(opts.is_pass_enabled("inline"));
    }

    #[test]
    fn test_from_toml() {
        let opts = CompilerOptions::from_toml_str(
            r#"
            [compiler]
            opt-level = "basic"
            disabled-passes = ["cse"]
            register-count = 12
            "#,
        )
        .unwrap();
        assert_eq!(opts.opt_level, OptLevel::Basic);
        assert_eq!(opts.register_count, 12);
        assert!(!opts.is_pass_enabled("cse"));
        assert_eq!(opts.max_inline_depth, 4);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let opts = CompilerOptions::from_toml_str("").unwrap();
        assert_eq!(opts, CompilerOptions::default());
    }

    #[test]
    fn test_rejects_unknown_pass() {
        let err = CompilerOptions::from_toml_str("[compiler]\ndisabled-passes = [\"nope\"]\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_tiny_register_file() {
        let err = CompilerOptions::from_toml_str("[compiler]\nregister-count = 3\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_disable_pass_is_idempotent() {
        let opts = CompilerOptions::default().disable_pass("dce").disable_pass("dce");
        assert_eq!(opts.disabled_passes, vec!["dce".to_string()]);
    }
}
