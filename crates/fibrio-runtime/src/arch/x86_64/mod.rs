//! x86_64 context switching implementation
//!
//! Uses naked functions for the switch, stable since Rust 1.88.

use std::arch::naked_asm;

use super::EntryFn;

/// Callee-saved registers of a suspended context (System V AMD64)
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
}

/// Initialize a fresh context
///
/// The first switch into `ctx` lands in the trampoline, which calls
/// `entry(arg)` with a correctly aligned stack.
///
/// # Safety
///
/// `ctx` must be valid for writes. `stack_top` must be the high end of a
/// mapped, writable stack that outlives every switch into this context.
#[inline]
pub unsafe fn init_context(ctx: *mut Context, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    // The trampoline is entered by jmp, so rsp must be 16-byte aligned there;
    // its `call` then leaves rsp+8 aligned at entry as the ABI requires.
    let sp = (stack_top as usize) & !0xF;

    let ctx = &mut *ctx;
    *ctx = Context::default();
    ctx.rsp = sp as u64;
    ctx.rip = fiber_entry_trampoline as usize as u64;
    ctx.r12 = entry as usize as u64;
    ctx.r13 = arg as u64;
}

/// First code run on a new fiber stack
#[unsafe(naked)]
unsafe extern "C" fn fiber_entry_trampoline() {
    naked_asm!(
        "xor ebp, ebp", // terminate frame-pointer walks here
        "mov rdi, r13",
        "call r12",
        "ud2", // entry never returns
    );
}

/// Save callee-saved registers into `old`, restore from `new`
///
/// Returns when some other context switches back into `old`.
///
/// # Safety
///
/// Both pointers must be valid; `new` must hold a context produced by
/// `init_context` or by a previous `switch_context`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // Save into old (RDI)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load from new (RSI)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // Resume point for a saved context
        "2:",
        "ret",
    );
}
