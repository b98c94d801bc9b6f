//! Architecture abstraction for local interrupt control.
//!
//! Spinlocks need exactly three things from the CPU: mask local interrupts,
//! unmask them, and report whether they are currently unmasked. Everything
//! else (context switching, interrupt controllers) belongs to the scheduler
//! and the platform, not to this crate.

/// Architecture abstraction trait.
///
/// Implementations act on the *calling* CPU only.
pub trait Arch {
    /// Enable interrupts on the current CPU.
    fn enable_interrupts();

    /// Disable interrupts on the current CPU.
    ///
    /// After this returns no maskable interrupt handler runs on this CPU, so
    /// neither an interrupt nor a scheduler tick can preempt the caller.
    fn disable_interrupts();

    /// Check if interrupts are currently enabled.
    fn interrupts_enabled() -> bool;

    /// Hint issued on every iteration of a spin loop.
    #[inline(always)]
    fn cpu_relax() {
        core::hint::spin_loop();
    }
}

/// A no-op architecture implementation for host builds.
///
/// Simulated CPUs have no interrupt mask; interrupt state is tracked by
/// [`Cpu`](crate::sched::Cpu) instead.
pub struct NoOpArch;

impl Arch for NoOpArch {
    fn enable_interrupts() {}

    fn disable_interrupts() {}

    fn interrupts_enabled() -> bool {
        true
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub mod aarch64;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub use aarch64::Aarch64Arch as DefaultArch;

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub use NoOpArch as DefaultArch;
