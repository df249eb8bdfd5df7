//! Per-session emission options.

/// Configuration handed to an assembler at construction.
///
/// Options are fixed for the lifetime of one assembler; nothing here is
/// process-global, so two compilations with different settings can run side
/// by side.
///
/// # Examples
///
/// ```rust
/// use jit_asm::EmitOptions;
///
/// let opts = EmitOptions::default()
///     .with_far_branches(true)
///     .with_initial_capacity(64 * 1024);
/// assert!(opts.use_far_branches);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmitOptions {
    /// Emit conditional AArch64 branches to unbound labels as a two-word
    /// guard + `b` sequence so they can reach beyond the imm19/imm14 range.
    /// Ignored by the x86-64 encoder. Default: `false`.
    pub use_far_branches: bool,
    /// Starting buffer capacity in bytes. Default: 4 KiB.
    pub initial_capacity: usize,
    /// Pre-fill unused buffer memory with the architecture's breakpoint
    /// instruction. Default: on in debug builds.
    pub trap_fill: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            use_far_branches: false,
            initial_capacity: crate::buffer::INITIAL_CAPACITY,
            trap_fill: cfg!(debug_assertions),
        }
    }
}

impl EmitOptions {
    /// Enable or disable far-branch promotion.
    pub fn with_far_branches(mut self, enabled: bool) -> Self {
        self.use_far_branches = enabled;
        self
    }

    /// Set the starting buffer capacity.
    pub fn with_initial_capacity(mut self, bytes: usize) -> Self {
        self.initial_capacity = bytes;
        self
    }

    /// Enable or disable trap fill of unused memory.
    pub fn with_trap_fill(mut self, enabled: bool) -> Self {
        self.trap_fill = enabled;
        self
    }
}
