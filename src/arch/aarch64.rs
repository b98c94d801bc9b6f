//! AArch64 interrupt masking through the DAIF register.

use super::Arch;
use core::arch::asm;

/// DAIF.I, set while IRQs are masked.
const DAIF_IRQ_MASK: u64 = 1 << 7;

/// AArch64 architecture implementation.
pub struct Aarch64Arch;

impl Arch for Aarch64Arch {
    fn enable_interrupts() {
        unsafe {
            asm!("msr daifclr, #2", options(nomem, nostack));
        }
    }

    fn disable_interrupts() {
        unsafe {
            asm!("msr daifset, #2", options(nomem, nostack));
        }
    }

    fn interrupts_enabled() -> bool {
        let daif: u64;
        unsafe {
            asm!(
                "mrs {daif}, daif",
                daif = out(reg) daif,
                options(nostack, readonly)
            );
        }
        (daif & DAIF_IRQ_MASK) == 0
    }

    #[inline(always)]
    fn cpu_relax() {
        unsafe {
            asm!("yield", options(nomem, nostack));
        }
    }
}
