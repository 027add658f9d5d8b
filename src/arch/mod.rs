//! Architecture back ends. Each exposes the same `EmitCtx` surface; the host
//! one is selected here so the rest of the crate is target-agnostic.

#[cfg(target_arch = "x86_64")]
mod x64;

#[cfg(target_arch = "x86_64")]
pub use x64::*;

#[cfg(target_arch = "aarch64")]
mod aarch64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::*;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("unsupported target architecture: only x86_64 and aarch64 back ends exist");
