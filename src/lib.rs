//! Ahead-of-execution JIT compiler for the eight-instruction tape language.
//!
//! The pipeline is strictly staged: [`parse::parse`] builds the IR,
//! [`opt::optimize`] rewrites it, [`compiler::compile`] emits native code
//! for the host (x86-64 or AArch64) into an executable mapping, and the
//! result runs against a guard-paged [`tape::Tape`]. The optional
//! [`profiler::Profiler`] samples the running code and folds the samples
//! back onto IR source locations.

pub mod arch;
pub mod ast;
pub mod compiler;
pub mod debug_map;
pub mod opt;
pub mod parse;
pub mod profiler;
pub mod runtime;
pub mod tape;


use thiserror::Error as ThisError;

/// Everything that can go wrong before the compiled program runs. Runtime
/// tape faults are delivered as signals by design and never reach this type.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] parse::ParseError),

    #[error("assembler error: {0}")]
    Assemble(String),

    #[error("memory mapping failed: {0}")]
    Map(#[source] std::io::Error),

    #[error("memory offset {offset} must be smaller than the memory size {size}")]
    MemoryLayout { size: usize, offset: usize },

    #[error("profiler setup failed: {0}")]
    Profiler(#[source] std::io::Error),
}
