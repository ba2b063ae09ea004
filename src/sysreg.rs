// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! GICv3 system register decoding and access checks.

use crate::context::ExecContext;
use crate::vcpuif::VirtualCpuInterface;
use crate::vcpuif::ICH_HCR_EL2_TALL0;
use crate::vcpuif::ICH_HCR_EL2_TALL1;
use crate::vcpuif::ICH_HCR_EL2_TC;
use crate::vcpuif::ICH_HCR_EL2_TDIR;

/// A GICv3 CPU interface system register.
///
/// The ICC_* registers accessed from Non-secure EL1 with HCR_EL2.IMO/FMO set are
/// redirected to their ICV_* counterparts; see [`GicSysReg::is_virtual`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GicSysReg {
    IccPmr,
    IccIar0,
    IccEoir0,
    IccHppir0,
    IccBpr0,
    IccAp0r(u8),
    IccAp1r(u8),
    IccDir,
    IccRpr,
    IccSgi1r,
    IccAsgi1r,
    IccSgi0r,
    IccIar1,
    IccEoir1,
    IccHppir1,
    IccBpr1,
    IccCtlr,
    IccSre,
    IccIgrpen0,
    IccIgrpen1,
    IccSreEl2,
    IccCtlrEl3,
    IccSreEl3,
    IccIgrpen1El3,
    IchAp0r(u8),
    IchAp1r(u8),
    IchHcr,
    IchVtr,
    IchMisr,
    IchEisr,
    IchElrsr,
    IchVmcr,
    IchLr(u8),
}

/// Outcome of the access check of a system register access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessResult {
    Ok,
    /// Trap to EL2.
    TrapEl2,
    /// Trap to EL3.
    TrapEl3,
    /// Trap to the default exception level (EL3 is AArch32).
    Trap,
    /// The access is UNDEFINED.
    Undefined,
}

/// Physical and virtual interrupt classes used for trapping and ICV redirection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Class {
    /// CTLR, PMR and RPR.
    IrqFiq,
    /// DIR.
    Dir,
    /// SGI0R, SGI1R and ASGI1R.
    Sgi,
    /// Group 0 registers.
    Fiq,
    /// Group 1 registers.
    Irq,
    /// Registers that are always accessible from EL1 (ICC_SRE_EL1).
    Plain,
    /// ICC_SRE_EL2 and the ICH_* registers.
    El2,
    /// ICC_*_EL3.
    El3,
}

impl GicSysReg {
    /// Decodes an MRS/MSR encoding.
    ///
    /// | Register          | op0 | op1 | CRn | CRm     | op2   |
    /// |-------------------|-----|-----|-----|---------|-------|
    /// | ICC_PMR_EL1       | 3   | 0   | 4   | 6       | 0     |
    /// | ICC_IAR0_EL1      | 3   | 0   | 12  | 8       | 0     |
    /// | ICC_EOIR0_EL1     | 3   | 0   | 12  | 8       | 1     |
    /// | ICC_HPPIR0_EL1    | 3   | 0   | 12  | 8       | 2     |
    /// | ICC_BPR0_EL1      | 3   | 0   | 12  | 8       | 3     |
    /// | ICC_AP0R<n>_EL1   | 3   | 0   | 12  | 8       | 4+n   |
    /// | ICC_AP1R<n>_EL1   | 3   | 0   | 12  | 9       | n     |
    /// | ICC_DIR_EL1       | 3   | 0   | 12  | 11      | 1     |
    /// | ICC_RPR_EL1       | 3   | 0   | 12  | 11      | 3     |
    /// | ICC_SGI1R_EL1     | 3   | 0   | 12  | 11      | 5     |
    /// | ICC_ASGI1R_EL1    | 3   | 0   | 12  | 11      | 6     |
    /// | ICC_SGI0R_EL1     | 3   | 0   | 12  | 11      | 7     |
    /// | ICC_IAR1_EL1      | 3   | 0   | 12  | 12      | 0     |
    /// | ICC_EOIR1_EL1     | 3   | 0   | 12  | 12      | 1     |
    /// | ICC_HPPIR1_EL1    | 3   | 0   | 12  | 12      | 2     |
    /// | ICC_BPR1_EL1      | 3   | 0   | 12  | 12      | 3     |
    /// | ICC_CTLR_EL1      | 3   | 0   | 12  | 12      | 4     |
    /// | ICC_SRE_EL1       | 3   | 0   | 12  | 12      | 5     |
    /// | ICC_IGRPEN0_EL1   | 3   | 0   | 12  | 12      | 6     |
    /// | ICC_IGRPEN1_EL1   | 3   | 0   | 12  | 12      | 7     |
    /// | ICH_AP0R<n>_EL2   | 3   | 4   | 12  | 8       | n     |
    /// | ICH_AP1R<n>_EL2   | 3   | 4   | 12  | 9       | n     |
    /// | ICC_SRE_EL2       | 3   | 4   | 12  | 9       | 5     |
    /// | ICH_HCR_EL2       | 3   | 4   | 12  | 11      | 0     |
    /// | ICH_VTR_EL2       | 3   | 4   | 12  | 11      | 1     |
    /// | ICH_MISR_EL2      | 3   | 4   | 12  | 11      | 2     |
    /// | ICH_EISR_EL2      | 3   | 4   | 12  | 11      | 3     |
    /// | ICH_ELRSR_EL2     | 3   | 4   | 12  | 11      | 5     |
    /// | ICH_VMCR_EL2      | 3   | 4   | 12  | 11      | 7     |
    /// | ICH_LR<n>_EL2     | 3   | 4   | 12  | 12+n/8  | n%8   |
    /// | ICC_CTLR_EL3      | 3   | 6   | 12  | 12      | 4     |
    /// | ICC_SRE_EL3       | 3   | 6   | 12  | 12      | 5     |
    /// | ICC_IGRPEN1_EL3   | 3   | 6   | 12  | 12      | 7     |
    pub fn from_encoding(op0: u8, op1: u8, crn: u8, crm: u8, op2: u8) -> Option<GicSysReg> {
        use GicSysReg::*;
        if op0 != 3 {
            return None;
        }
        let reg = match (op1, crn, crm, op2) {
            (0, 4, 6, 0) => IccPmr,
            (0, 12, 8, 0) => IccIar0,
            (0, 12, 8, 1) => IccEoir0,
            (0, 12, 8, 2) => IccHppir0,
            (0, 12, 8, 3) => IccBpr0,
            (0, 12, 8, n @ 4..=7) => IccAp0r(n - 4),
            (0, 12, 9, n @ 0..=3) => IccAp1r(n),
            (0, 12, 11, 1) => IccDir,
            (0, 12, 11, 3) => IccRpr,
            (0, 12, 11, 5) => IccSgi1r,
            (0, 12, 11, 6) => IccAsgi1r,
            (0, 12, 11, 7) => IccSgi0r,
            (0, 12, 12, 0) => IccIar1,
            (0, 12, 12, 1) => IccEoir1,
            (0, 12, 12, 2) => IccHppir1,
            (0, 12, 12, 3) => IccBpr1,
            (0, 12, 12, 4) => IccCtlr,
            (0, 12, 12, 5) => IccSre,
            (0, 12, 12, 6) => IccIgrpen0,
            (0, 12, 12, 7) => IccIgrpen1,
            // Shares CRm 9 with ICH_AP1R<n>_EL2.
            (4, 12, 9, 5) => IccSreEl2,
            (4, 12, 8, n @ 0..=3) => IchAp0r(n),
            (4, 12, 9, n @ 0..=3) => IchAp1r(n),
            (4, 12, 11, 0) => IchHcr,
            (4, 12, 11, 1) => IchVtr,
            (4, 12, 11, 2) => IchMisr,
            (4, 12, 11, 3) => IchEisr,
            (4, 12, 11, 5) => IchElrsr,
            (4, 12, 11, 7) => IchVmcr,
            (4, 12, 12..=13, n @ 0..=7) => IchLr(((crm - 12) << 3) | n),
            (6, 12, 12, 4) => IccCtlrEl3,
            (6, 12, 12, 5) => IccSreEl3,
            (6, 12, 12, 7) => IccIgrpen1El3,
            _ => return None,
        };
        Some(reg)
    }

    fn class(self) -> Class {
        use GicSysReg::*;
        match self {
            IccPmr | IccCtlr | IccRpr => Class::IrqFiq,
            IccDir => Class::Dir,
            IccSgi0r | IccSgi1r | IccAsgi1r => Class::Sgi,
            IccIar0 | IccEoir0 | IccHppir0 | IccBpr0 | IccAp0r(_) | IccIgrpen0 => Class::Fiq,
            IccIar1 | IccEoir1 | IccHppir1 | IccBpr1 | IccAp1r(_) | IccIgrpen1 => Class::Irq,
            IccSre => Class::Plain,
            IccSreEl2 | IchAp0r(_) | IchAp1r(_) | IchHcr | IchVtr | IchMisr | IchEisr
            | IchElrsr | IchVmcr | IchLr(_) => Class::El2,
            IccCtlrEl3 | IccSreEl3 | IccIgrpen1El3 => Class::El3,
        }
    }

    fn is_read_only(self) -> bool {
        use GicSysReg::*;
        matches!(
            self,
            IccIar0 | IccIar1 | IccHppir0 | IccHppir1 | IccRpr | IchVtr | IchMisr | IchEisr
                | IchElrsr
        )
    }

    fn is_write_only(self) -> bool {
        use GicSysReg::*;
        matches!(
            self,
            IccEoir0 | IccEoir1 | IccDir | IccSgi0r | IccSgi1r | IccAsgi1r
        )
    }

    /// Whether an access from `ctx` goes to the ICV_* register instead of the ICC_* one:
    /// Non-secure EL1 with HCR_EL2.FMO set for the Group 0 registers, IMO for the Group 1
    /// registers and either for CTLR, DIR, PMR and RPR.
    pub fn is_virtual(self, ctx: &ExecContext, has_virtualization: bool) -> bool {
        if !has_virtualization || ctx.el != 1 || ctx.is_secure_below_el3() {
            return false;
        }
        let imo = ctx.routes_irq_to_el2();
        let fmo = ctx.routes_fiq_to_el2();
        match self.class() {
            Class::Fiq => fmo,
            Class::Irq => imo,
            Class::IrqFiq | Class::Dir => imo || fmo,
            _ => false,
        }
    }

    /// Checks an access to this register from `ctx`. `vcpuif` is the virtual CPU interface
    /// of the accessing CPU, if the GIC implements virtualization; its ICH_HCR_EL2 trap
    /// bits apply to Non-secure EL1.
    pub fn check_access(
        self,
        ctx: &ExecContext,
        vcpuif: Option<&VirtualCpuInterface>,
        is_read: bool,
    ) -> AccessResult {
        if (is_read && self.is_write_only()) || (!is_read && self.is_read_only()) {
            return AccessResult::Undefined;
        }
        if ctx.el == 0 {
            return AccessResult::Undefined;
        }
        let hcr = vcpuif.map(|v| v.read_hcr()).unwrap_or(0);
        let ns_el1 = ctx.el == 1 && !ctx.is_secure_below_el3();
        match self.class() {
            Class::Plain => AccessResult::Ok,
            Class::El2 => self.check_el2(ctx, vcpuif),
            Class::El3 => {
                if ctx.el < 3 || !ctx.el3_present {
                    AccessResult::Undefined
                } else {
                    AccessResult::Ok
                }
            }
            Class::IrqFiq => {
                if hcr & ICH_HCR_EL2_TC != 0 && ns_el1 {
                    return AccessResult::TrapEl2;
                }
                irqfiq_access(ctx)
            }
            Class::Dir => {
                if hcr & ICH_HCR_EL2_TDIR != 0 && ns_el1 {
                    return AccessResult::TrapEl2;
                }
                if hcr & ICH_HCR_EL2_TC != 0 && ns_el1 {
                    return AccessResult::TrapEl2;
                }
                irqfiq_access(ctx)
            }
            Class::Sgi => {
                if (ctx.routes_irq_to_el2() || ctx.routes_fiq_to_el2()) && ns_el1 {
                    return AccessResult::TrapEl2;
                }
                if hcr & ICH_HCR_EL2_TC != 0 && ns_el1 {
                    return AccessResult::TrapEl2;
                }
                irqfiq_access(ctx)
            }
            Class::Fiq => {
                if hcr & ICH_HCR_EL2_TALL0 != 0 && ns_el1 {
                    return AccessResult::TrapEl2;
                }
                group_access(ctx, ctx.scr_fiq, ctx.routes_fiq_to_el2())
            }
            Class::Irq => {
                if hcr & ICH_HCR_EL2_TALL1 != 0 && ns_el1 {
                    return AccessResult::TrapEl2;
                }
                group_access(ctx, ctx.scr_irq, ctx.routes_irq_to_el2())
            }
        }
    }

    fn check_el2(self, ctx: &ExecContext, vcpuif: Option<&VirtualCpuInterface>) -> AccessResult {
        if ctx.el < 2 {
            return AccessResult::Undefined;
        }
        if self == GicSysReg::IccSreEl2 {
            return AccessResult::Ok;
        }
        let vcpuif = match vcpuif {
            Some(v) => v,
            None => return AccessResult::Undefined,
        };
        let exists = match self {
            GicSysReg::IchAp0r(n) | GicSysReg::IchAp1r(n) => vcpuif.has_ich_ap(n.into()),
            GicSysReg::IchLr(n) => usize::from(n) < vcpuif.num_list_regs(),
            _ => true,
        };
        if exists {
            AccessResult::Ok
        } else {
            AccessResult::Undefined
        }
    }
}

/// EL3 routing is taken when EL3 is AArch32 as a trap to the default exception level.
fn el3_trap(ctx: &ExecContext) -> AccessResult {
    if ctx.el3_aarch64 {
        AccessResult::TrapEl3
    } else {
        AccessResult::Trap
    }
}

/// Trap of registers shared by both groups: taken to EL3 only when EL3 owns both IRQs and
/// FIQs.
fn irqfiq_access(ctx: &ExecContext) -> AccessResult {
    if !(ctx.routes_irq_to_el3() && ctx.routes_fiq_to_el3()) {
        return AccessResult::Ok;
    }
    let trap = match ctx.el {
        1 => {
            ctx.is_secure_below_el3() || (!ctx.routes_irq_to_el2() && !ctx.routes_fiq_to_el2())
        }
        2 => true,
        _ => !ctx.aarch64 && !ctx.is_el3_or_mon(),
    };
    if trap {
        el3_trap(ctx)
    } else {
        AccessResult::Ok
    }
}

/// Trap of the registers of one group when SCR_EL3 routes that group's exception to EL3.
fn group_access(ctx: &ExecContext, scr_routes: bool, hcr_routes: bool) -> AccessResult {
    if !(ctx.el3_present && scr_routes) {
        return AccessResult::Ok;
    }
    let trap = match ctx.el {
        1 => ctx.is_secure_below_el3() || !hcr_routes,
        2 => true,
        _ => !ctx.aarch64 && !ctx.is_el3_or_mon(),
    };
    if trap {
        el3_trap(ctx)
    } else {
        AccessResult::Ok
    }
}
