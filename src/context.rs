// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Interrupt groups, security banks and the boundary with the CPU core model.

use std::rc::Rc;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

/// Interrupt group. The discriminant doubles as the index of the per-group CPU interface
/// registers (binary point, active priorities, group enables).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum IrqGroup {
    Group0 = 0,
    Group1Secure = 1,
    Group1NonSecure = 2,
}

impl IrqGroup {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Bank of a banked CPU interface register (ICC_CTLR_EL1, and the Group 1 view of the
/// BPR, AP1R and IGRPEN1 registers).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityBank {
    Secure = 0,
    NonSecure = 1,
}

impl SecurityBank {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Selects the register bank an access from `ctx` resolves to. GICv3 CPU interface
/// registers stay banked in AArch64, so everything that is not Secure below EL3 uses the
/// Non-secure copy.
pub fn bank_for(ctx: &ExecContext) -> SecurityBank {
    if ctx.is_secure_below_el3() {
        SecurityBank::Secure
    } else {
        SecurityBank::NonSecure
    }
}

/// Execution state of the CPU that owns a CPU interface, sampled on every access and every
/// output line decision.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExecContext {
    /// Current exception level (0-3).
    pub el: u8,
    /// SCR_EL3.NS is clear. Ignored when EL3 is not implemented.
    pub secure: bool,
    /// The CPU implements EL3.
    pub el3_present: bool,
    /// EL3 is AArch64.
    pub el3_aarch64: bool,
    /// The current exception level is AArch64.
    pub aarch64: bool,
    /// HCR_EL2.IMO (or TGE) routes physical IRQs to EL2.
    pub hcr_imo: bool,
    /// HCR_EL2.FMO (or TGE) routes physical FIQs to EL2.
    pub hcr_fmo: bool,
    /// SCR_EL3.IRQ routes IRQs to EL3.
    pub scr_irq: bool,
    /// SCR_EL3.FIQ routes FIQs to EL3.
    pub scr_fiq: bool,
}

impl Default for ExecContext {
    fn default() -> Self {
        ExecContext::non_secure(1)
    }
}

impl ExecContext {
    /// AArch64 Non-secure execution at `el` on a CPU without EL3.
    pub fn non_secure(el: u8) -> Self {
        ExecContext {
            el,
            secure: false,
            el3_present: false,
            el3_aarch64: true,
            aarch64: true,
            hcr_imo: false,
            hcr_fmo: false,
            scr_irq: false,
            scr_fiq: false,
        }
    }

    /// AArch64 execution at `el` on a CPU with EL3, in the given security state.
    pub fn with_el3(el: u8, secure: bool) -> Self {
        ExecContext {
            el3_present: true,
            secure,
            ..ExecContext::non_secure(el)
        }
    }

    /// Sets the HCR_EL2 IMO/FMO routing bits.
    pub fn with_hcr(self, imo: bool, fmo: bool) -> Self {
        ExecContext {
            hcr_imo: imo,
            hcr_fmo: fmo,
            ..self
        }
    }

    /// Sets the SCR_EL3 IRQ/FIQ routing bits.
    pub fn with_scr(self, irq: bool, fiq: bool) -> Self {
        ExecContext {
            scr_irq: irq,
            scr_fiq: fiq,
            ..self
        }
    }

    /// The CPU is in Secure state. EL3 is always Secure.
    pub fn is_secure(&self) -> bool {
        self.el3_present && (self.el == 3 || self.secure)
    }

    pub fn is_secure_below_el3(&self) -> bool {
        self.el3_present && self.secure && self.el < 3
    }

    /// Running in EL3 (or AArch32 Monitor mode, which this model folds into EL3).
    pub fn is_el3_or_mon(&self) -> bool {
        self.el3_present && self.el == 3
    }

    /// HCR_EL2.IMO as seen by the GIC: never effective in Secure state.
    pub fn routes_irq_to_el2(&self) -> bool {
        self.hcr_imo && !self.is_secure_below_el3() && self.el < 3
    }

    /// HCR_EL2.FMO as seen by the GIC: never effective in Secure state.
    pub fn routes_fiq_to_el2(&self) -> bool {
        self.hcr_fmo && !self.is_secure_below_el3() && self.el < 3
    }

    pub fn routes_irq_to_el3(&self) -> bool {
        self.el3_present && self.scr_irq
    }

    pub fn routes_fiq_to_el3(&self) -> bool {
        self.el3_present && self.scr_fiq
    }
}

/// Output lines from a CPU interface to its CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CpuLine {
    Irq,
    Fiq,
    VirtualIrq,
    VirtualFiq,
    Maintenance,
}

/// Connection between a CPU interface and the CPU core it belongs to.
///
/// `set_line` may synchronously re-enter the interrupt controller (for example to read
/// ICC_IAR1_EL1 from an interrupt handler). The controller only calls it once all state of
/// the current operation has been updated.
pub trait CpuPort {
    /// Current execution state of the CPU. Called without the controller lock held.
    fn exec_context(&self) -> ExecContext;
    /// Drives one of the CPU's interrupt inputs.
    fn set_line(&self, line: CpuLine, level: bool);
}

impl<T: CpuPort + ?Sized> CpuPort for Rc<T> {
    fn exec_context(&self) -> ExecContext {
        (**self).exec_context()
    }

    fn set_line(&self, line: CpuLine, level: bool) {
        (**self).set_line(line, level)
    }
}

impl<T: CpuPort + ?Sized> CpuPort for Arc<T> {
    fn exec_context(&self) -> ExecContext {
        (**self).exec_context()
    }

    fn set_line(&self, line: CpuLine, level: bool) {
        (**self).set_line(line, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_el3_is_never_secure() {
        let ctx = ExecContext {
            secure: true,
            ..ExecContext::non_secure(1)
        };
        assert!(!ctx.is_secure());
        assert_eq!(bank_for(&ctx), SecurityBank::NonSecure);
    }

    #[test]
    fn el3_uses_non_secure_bank() {
        let ctx = ExecContext::with_el3(3, false);
        assert!(ctx.is_secure());
        assert!(ctx.is_el3_or_mon());
        assert_eq!(bank_for(&ctx), SecurityBank::NonSecure);
    }

    #[test]
    fn secure_el1_uses_secure_bank() {
        let ctx = ExecContext::with_el3(1, true).with_hcr(true, true);
        assert_eq!(bank_for(&ctx), SecurityBank::Secure);
        assert!(!ctx.routes_irq_to_el2());
    }
}
