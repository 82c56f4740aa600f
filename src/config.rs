//! Tunable constants for the VM and compiler, gathered in one place instead
//! of scattered magic numbers (the teacher crate has the start of this in
//! `call_frame.rs`'s `MAX_STACK_SIZE`; this module generalizes it).

/// Maximum number of call frames live at once.
pub const FRAMES_MAX: usize = 64;

/// Value stack slots. `FRAMES_MAX * 256` mirrors the reference VM's per-frame
/// slot budget of 256 locals/temporaries.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// A function may not declare more than this many locals in scope at once.
pub const LOCALS_MAX: usize = 256;

/// A function may not close over more than this many distinct upvalues.
pub const UPVALUES_MAX: usize = 256;

/// A chunk's constant pool is addressed by a single byte operand.
pub const CONSTANTS_MAX: usize = 256;

/// Parameter and argument count is encoded in a single byte operand, minus
/// one reserved value so arity mismatches never wrap.
pub const PARAMS_MAX: usize = 255;

/// Forward/backward jump offsets are encoded as 16-bit operands.
pub const JUMP_MAX: usize = u16::MAX as usize;

/// Initial GC trigger threshold, in bytes tracked by `ObjectManager`.
pub const INITIAL_GC_THRESHOLD: usize = 1024 * 1024;

/// Heap growth factor applied to `next_gc` after each collection cycle.
pub const GC_HEAP_GROW_FACTOR: usize = 2;

/// Process exit codes, per the host CLI interface.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const COMPILE_ERROR: i32 = 65;
    pub const RUNTIME_ERROR: i32 = 70;
    pub const FILE_ERROR: i32 = 74;
}
