//! Architecture-specific context switching
//!
//! Each backend exposes the same three items:
//!
//! - `Context`: opaque block of callee-saved registers
//! - `init_context`: prepare a fresh stack so the first switch enters
//!   `entry(arg)` through a trampoline
//! - `switch_context`: save the current registers into `old`, load `new`

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{init_context, switch_context, Context};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{init_context, switch_context, Context};
    } else {
        compile_error!("fibrio supports x86_64 and aarch64 only");
    }
}

/// Signature of a fiber entry as seen by the trampoline
pub type EntryFn = extern "C" fn(usize) -> !;
