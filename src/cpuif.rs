// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Physical GICv3 CPU interface (ICC_* system registers).
//!
//! The CPU interface only holds its own registers. The interrupt it works on (the hppi of
//! its redistributor), the distributor's security configuration and the execution context
//! of its CPU are passed in by the caller, which also applies the returned
//! activate/deactivate decisions to the distributor or redistributor.

use log::trace;
use serde::Deserialize;
use serde::Serialize;

use crate::context::bank_for;
use crate::context::ExecContext;
use crate::context::IrqGroup;
use crate::context::SecurityBank;
use crate::redistributor::Hppi;
use crate::GIC_IDLE_PRIORITY;
use crate::INTID_NONSECURE;
use crate::INTID_SECURE;
use crate::INTID_SPURIOUS;

// ICC_CTLR_EL1 bits
pub const ICC_CTLR_EL1_CBPR: u64 = 1 << 0;
pub const ICC_CTLR_EL1_EOIMODE: u64 = 1 << 1;
const ICC_CTLR_EL1_PRIBITS_SHIFT: u32 = 8;
const ICC_CTLR_EL1_IDBITS_SHIFT: u32 = 11;
const ICC_CTLR_EL1_A3V: u64 = 1 << 15;

// ICC_CTLR_EL3 bits
pub const ICC_CTLR_EL3_CBPR_EL1S: u64 = 1 << 0;
pub const ICC_CTLR_EL3_CBPR_EL1NS: u64 = 1 << 1;
pub const ICC_CTLR_EL3_EOIMODE_EL3: u64 = 1 << 2;
pub const ICC_CTLR_EL3_EOIMODE_EL1S: u64 = 1 << 3;
pub const ICC_CTLR_EL3_EOIMODE_EL1NS: u64 = 1 << 4;
const ICC_CTLR_EL3_PRIBITS_SHIFT: u32 = 8;
const ICC_CTLR_EL3_IDBITS_SHIFT: u32 = 11;
const ICC_CTLR_EL3_A3V: u64 = 1 << 15;
const ICC_CTLR_EL3_NDS: u64 = 1 << 17;

const ICC_IGRPEN_ENABLE: u64 = 1;

/// ICC_SRE_ELx: SRE, DFB and DIB are RAO/WI, and Enable as well at EL2 and EL3.
const ICC_SRE_EL1_VALUE: u64 = 0x7;
const ICC_SRE_EL2_VALUE: u64 = 0xf;

/// Minimum binary point for Group 0 and Secure Group 1.
const GIC_MIN_BPR: u8 = 0;
/// Minimum binary point for Non-secure Group 1.
const GIC_MIN_BPR_NS: u8 = GIC_MIN_BPR + 1;

/// Number of 32-bit active priority words per group: 128 preemption levels.
const NUM_APR_WORDS: usize = 4;

fn ctlr_el1_reset() -> u64 {
    ICC_CTLR_EL1_A3V | (1 << ICC_CTLR_EL1_IDBITS_SHIFT) | (7 << ICC_CTLR_EL1_PRIBITS_SHIFT)
}

/// Value of the NS view of a PMR/RPR priority: Secure priorities are hidden and the
/// Non-secure half is shown shifted.
fn ns_priority_view(prio: u8) -> u8 {
    if prio & 0x80 == 0 {
        0
    } else if prio != GIC_IDLE_PRIORITY {
        prio << 1
    } else {
        prio
    }
}

/// An SGI requested through ICC_SGI0R_EL1, ICC_SGI1R_EL1 or ICC_ASGI1R_EL1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SgiRequest {
    pub irq: u32,
    pub group: IrqGroup,
    /// The requesting CPU is Non-secure.
    pub ns: bool,
    /// Interrupt Routing Mode: every CPU but the requester.
    pub irm: bool,
    /// Aff3.Aff2.Aff1 of the targets.
    pub aff: u32,
    pub target_list: u16,
}

impl SgiRequest {
    /// Decodes an SGI register write for `group`. With GICD_CTLR.DS set, Secure Group 1
    /// requests are delivered as Group 0.
    pub fn decode(value: u64, group: IrqGroup, ns: bool, ds: bool) -> Self {
        let group = if group == IrqGroup::Group1Secure && ds {
            IrqGroup::Group0
        } else {
            group
        };
        SgiRequest {
            irq: ((value >> 24) & 0xf) as u32,
            group,
            ns,
            irm: value & (1 << 40) != 0,
            aff: ((((value >> 48) & 0xff) << 16) | (((value >> 32) & 0xff) << 8)
                | ((value >> 16) & 0xff)) as u32,
            target_list: value as u16,
        }
    }

    /// Whether the CPU with `affinity` (Aff3:Aff2:Aff1:Aff0) receives this SGI.
    pub fn targets(&self, affinity: u32, is_requester: bool) -> bool {
        if self.irm {
            return !is_requester;
        }
        if affinity >> 8 != self.aff {
            return false;
        }
        let aff0 = affinity & 0xff;
        aff0 <= 15 && self.target_list & (1 << aff0) != 0
    }
}

/// GIC CPU Interface (ICC registers) - one per CPU.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CpuInterface {
    /// ICC_CTLR_EL1, banked by security state.
    ctlr_el1: [u64; 2],
    ctlr_el3: u64,
    /// Priority mask register (ICC_PMR_EL1).
    pmr: u8,
    /// Binary point per group. Group 0 and Secure Group 1 share ICC_BPR0/1 through the
    /// Secure bank; Non-secure Group 1 has its own copy.
    bpr: [u8; 3],
    /// Active priority registers (ICC_AP0R/AP1R_EL1) per group.
    apr: [[u32; NUM_APR_WORDS]; 3],
    /// Group enables (ICC_IGRPEN0/1_EL1), the Group 1 one banked.
    igrpen: [bool; 3],
}

impl Default for CpuInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuInterface {
    /// Create a new CPU interface in reset state
    pub fn new() -> Self {
        CpuInterface {
            ctlr_el1: [ctlr_el1_reset(); 2],
            ctlr_el3: ICC_CTLR_EL3_NDS
                | ICC_CTLR_EL3_A3V
                | (1 << ICC_CTLR_EL3_IDBITS_SHIFT)
                | (7 << ICC_CTLR_EL3_PRIBITS_SHIFT),
            pmr: 0,
            bpr: [GIC_MIN_BPR, GIC_MIN_BPR, GIC_MIN_BPR_NS],
            apr: [[0; NUM_APR_WORDS]; 3],
            igrpen: [false; 3],
        }
    }

    /// Whether every register holds a value the interface itself could have produced.
    pub fn is_consistent(&self) -> bool {
        self.bpr.iter().all(|&bpr| bpr <= 7)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Current running priority: the lowest set bit across all active priority registers.
    pub fn running_priority(&self) -> u8 {
        for i in 0..NUM_APR_WORDS {
            let apr = self.apr[0][i] | self.apr[1][i] | self.apr[2][i];
            if apr == 0 {
                continue;
            }
            return (((i as u32 * 32 + apr.trailing_zeros()) << (GIC_MIN_BPR + 1)) & 0xff) as u8;
        }
        GIC_IDLE_PRIORITY
    }

    /// Mask that clears the subpriority bits of a priority of `group` (GroupBits()).
    pub fn gprio_mask(&self, group: IrqGroup) -> u8 {
        let group = match group {
            IrqGroup::Group1Secure
                if self.ctlr_el1[SecurityBank::Secure.index()] & ICC_CTLR_EL1_CBPR != 0 =>
            {
                IrqGroup::Group0
            }
            IrqGroup::Group1NonSecure
                if self.ctlr_el1[SecurityBank::NonSecure.index()] & ICC_CTLR_EL1_CBPR != 0 =>
            {
                IrqGroup::Group0
            }
            g => g,
        };
        let mut bpr = self.bpr[group.index()] & 7;
        if group == IrqGroup::Group1NonSecure {
            // Writes never let the Non-secure binary point drop below 1.
            bpr = bpr.saturating_sub(1);
        }
        (!0u32 << (bpr + 1)) as u8
    }

    /// The hppi as seen by this CPU. A Security-enabled GIC may hand a Secure Group 1
    /// interrupt to a CPU without EL3, which then treats it as Group 0.
    pub fn effective_hppi(hppi: Hppi, ctx: &ExecContext) -> Hppi {
        if hppi.group == IrqGroup::Group1Secure && !ctx.el3_present {
            Hppi {
                group: IrqGroup::Group0,
                ..hppi
            }
        } else {
            hppi
        }
    }

    /// Whether `hppi` (already folded by `effective_hppi`) is enabled, unmasked and of
    /// sufficient group priority to preempt the running priority.
    pub fn can_preempt(&self, hppi: &Hppi) -> bool {
        if hppi.prio == GIC_IDLE_PRIORITY || !self.igrpen[hppi.group.index()] {
            return false;
        }
        if hppi.prio >= self.pmr {
            return false;
        }
        let rprio = self.running_priority();
        if rprio == GIC_IDLE_PRIORITY {
            return true;
        }
        let mask = self.gprio_mask(hppi.group);
        (hppi.prio & mask) < (rprio & mask)
    }

    /// Levels of the physical (IRQ, FIQ) lines for `hppi`.
    pub fn output_lines(&self, hppi: Hppi, ctx: &ExecContext) -> (bool, bool) {
        let hppi = Self::effective_hppi(hppi, ctx);
        if !self.can_preempt(&hppi) {
            return (false, false);
        }
        let is_fiq = match hppi.group {
            IrqGroup::Group0 => true,
            IrqGroup::Group1Secure => !ctx.is_secure() || (ctx.el == 3 && ctx.el3_aarch64),
            IrqGroup::Group1NonSecure => ctx.is_secure(),
        };
        (!is_fiq, is_fiq)
    }

    /// The context uses the Non-secure view of PMR and RPR.
    fn ns_priority_view_active(ctx: &ExecContext) -> bool {
        ctx.el3_present && !ctx.is_secure() && ctx.scr_fiq
    }

    /// Read ICC_PMR_EL1 - priority mask
    pub fn read_pmr(&self, ctx: &ExecContext) -> u64 {
        let value = if Self::ns_priority_view_active(ctx) {
            ns_priority_view(self.pmr)
        } else {
            self.pmr
        };
        trace!("ICC_PMR_EL1 read: {:#x}", value);
        u64::from(value)
    }

    /// Write ICC_PMR_EL1 - priority mask
    pub fn write_pmr(&mut self, ctx: &ExecContext, value: u64) {
        trace!("ICC_PMR_EL1 write: {:#x}", value);
        let mut value = value as u8;
        if Self::ns_priority_view_active(ctx) {
            if self.pmr & 0x80 == 0 {
                // Current mask is in the Secure range.
                return;
            }
            value = (value >> 1) | 0x80;
        }
        self.pmr = value;
    }

    /// Read ICC_RPR_EL1 - running priority register
    pub fn read_rpr(&self, ctx: &ExecContext) -> u64 {
        let mut prio = self.running_priority();
        if Self::ns_priority_view_active(ctx) {
            prio = ns_priority_view(prio);
        }
        trace!("ICC_RPR_EL1 read: {:#x}", prio);
        u64::from(prio)
    }

    /// ICC_HPPIR0_EL1 value, following CheckGroup0ForSpecialIdentifiers().
    pub fn hppir0_value(&self, hppi: Hppi, ctx: &ExecContext, ds: bool) -> u32 {
        let hppi = Self::effective_hppi(hppi, ctx);
        if hppi.is_idle() {
            return INTID_SPURIOUS;
        }
        let irq_is_secure = !ds && hppi.group != IrqGroup::Group1NonSecure;
        if hppi.group != IrqGroup::Group0 && !ctx.is_el3_or_mon() {
            return INTID_SPURIOUS;
        }
        if irq_is_secure && !ctx.is_secure() {
            return INTID_SPURIOUS;
        }
        if hppi.group != IrqGroup::Group0 {
            // Tell EL3 a Group 1 interrupt for the other state is pending.
            return if irq_is_secure {
                INTID_SECURE
            } else {
                INTID_NONSECURE
            };
        }
        hppi.irq
    }

    /// ICC_HPPIR1_EL1 value, following CheckGroup1ForSpecialIdentifiers().
    pub fn hppir1_value(&self, hppi: Hppi, ctx: &ExecContext, ds: bool) -> u32 {
        let hppi = Self::effective_hppi(hppi, ctx);
        if hppi.is_idle() || hppi.group == IrqGroup::Group0 {
            return INTID_SPURIOUS;
        }
        let irq_is_secure = !ds && hppi.group != IrqGroup::Group1NonSecure;
        if irq_is_secure {
            if !ctx.is_secure() {
                return INTID_SPURIOUS;
            }
        } else if !ctx.is_el3_or_mon() && ctx.is_secure() {
            return INTID_SPURIOUS;
        }
        hppi.irq
    }

    /// Acknowledge an interrupt (ICC_IAR0_EL1 or ICC_IAR1_EL1 read).
    ///
    /// Sets the active priority bit of the acknowledged interrupt. Returns the INTID; the
    /// caller moves it from pending to active unless it is a special ID.
    pub fn acknowledge(&mut self, group1: bool, hppi: Hppi, ctx: &ExecContext, ds: bool) -> u32 {
        let folded = Self::effective_hppi(hppi, ctx);
        let intid = if !self.can_preempt(&folded) {
            INTID_SPURIOUS
        } else if group1 {
            self.hppir1_value(hppi, ctx, ds)
        } else {
            self.hppir0_value(hppi, ctx, ds)
        };
        if !(INTID_SECURE..=INTID_SPURIOUS).contains(&intid) {
            self.activate(&folded);
        }
        trace!("ICC_IAR{}_EL1 read: {}", u8::from(group1), intid);
        intid
    }

    fn activate(&mut self, hppi: &Hppi) {
        let prio = hppi.prio & self.gprio_mask(hppi.group);
        let aprbit = usize::from(prio >> 1);
        self.apr[hppi.group.index()][aprbit / 32] |= 1 << (aprbit % 32);
    }

    /// Clears the lowest set active priority bit of `group`. With properly nested
    /// acknowledge/EOI sequences this is the bit of the interrupt being completed.
    fn drop_prio(&mut self, group: IrqGroup) {
        if let Some(word) = self.apr[group.index()].iter_mut().find(|w| **w != 0) {
            *word &= *word - 1;
        }
    }

    /// Group with the highest priority active interrupt, if any.
    pub fn highest_active_group(&self) -> Option<IrqGroup> {
        for i in 0..NUM_APR_WORDS {
            let g0 = self.apr[IrqGroup::Group0.index()][i].trailing_zeros();
            let g1 = self.apr[IrqGroup::Group1Secure.index()][i].trailing_zeros();
            let g1ns = self.apr[IrqGroup::Group1NonSecure.index()][i].trailing_zeros();
            if g1ns < g0 && g1ns < g1 {
                return Some(IrqGroup::Group1NonSecure);
            }
            if g1 < g0 {
                return Some(IrqGroup::Group1Secure);
            }
            if g0 < 32 {
                return Some(IrqGroup::Group0);
            }
        }
        None
    }

    /// Whether EOI only drops priority and deactivation needs a separate DIR write.
    pub fn eoi_split(&self, ctx: &ExecContext) -> bool {
        if ctx.is_el3_or_mon() {
            return self.ctlr_el3 & ICC_CTLR_EL3_EOIMODE_EL3 != 0;
        }
        self.ctlr_el1[bank_for(ctx).index()] & ICC_CTLR_EL1_EOIMODE != 0
    }

    /// End of interrupt (ICC_EOIR0_EL1 or ICC_EOIR1_EL1 write).
    ///
    /// Returns the interrupt the caller must deactivate, if priority drop and
    /// deactivation are not split.
    pub fn end_of_interrupt(
        &mut self,
        group1: bool,
        value: u64,
        ctx: &ExecContext,
        num_irqs: u32,
    ) -> Option<u32> {
        let irq = (value & 0xff_ffff) as u32;
        trace!("ICC_EOIR{}_EL1 write: {}", u8::from(group1), irq);
        let group = match (group1, ctx.is_secure()) {
            (false, _) => IrqGroup::Group0,
            (true, true) => IrqGroup::Group1Secure,
            (true, false) => IrqGroup::Group1NonSecure,
        };
        // Special and nonexistent IDs are ignored.
        if irq >= num_irqs {
            return None;
        }
        if self.highest_active_group() != Some(group) {
            trace!("ICC_EOIR write ignored: {:?} is not the highest active group", group);
            return None;
        }
        self.drop_prio(group);
        if self.eoi_split(ctx) {
            None
        } else {
            Some(irq)
        }
    }

    /// Whether a DIR write of `irq` from `ctx` may deactivate it (ICC_DIR_EL1).
    pub fn may_deactivate(&self, ctx: &ExecContext, irq: u32, group: IrqGroup, ds: bool) -> bool {
        if !self.eoi_split(ctx) {
            return false;
        }
        let irq_is_secure = !ds && group != IrqGroup::Group1NonSecure;
        let irq_is_grp0 = group == IrqGroup::Group0;
        let route_fiq_to_el3 = ctx.routes_fiq_to_el3();
        let route_irq_to_el3 = ctx.routes_irq_to_el3();
        let route_fiq_to_el2 = ctx.routes_fiq_to_el2();
        let route_irq_to_el2 = ctx.routes_irq_to_el2();

        let allowed = match ctx.el {
            3 => true,
            2 => {
                (ds && irq_is_grp0 && !route_fiq_to_el3)
                    || (!irq_is_secure && !irq_is_grp0 && !route_irq_to_el3)
            }
            _ if !ctx.is_secure_below_el3() => {
                (ds && irq_is_grp0 && !route_fiq_to_el3 && !route_fiq_to_el2)
                    || (!irq_is_secure && !irq_is_grp0 && !route_irq_to_el3 && !route_irq_to_el2)
            }
            _ => {
                (irq_is_grp0 && !route_fiq_to_el3)
                    || (!irq_is_grp0 && (!irq_is_secure || !ds) && !route_irq_to_el3)
            }
        };
        trace!("ICC_DIR_EL1 write: {} allowed {}", irq, allowed);
        allowed
    }

    /// Group of the ICC_BPR1/AP1R/IGRPEN1 register an access from `ctx` resolves to.
    fn group1_for(ctx: &ExecContext) -> IrqGroup {
        match bank_for(ctx) {
            SecurityBank::Secure => IrqGroup::Group1Secure,
            SecurityBank::NonSecure => IrqGroup::Group1NonSecure,
        }
    }

    fn group_for(group1: bool, ctx: &ExecContext) -> IrqGroup {
        if group1 {
            Self::group1_for(ctx)
        } else {
            IrqGroup::Group0
        }
    }

    /// Read ICC_BPR0_EL1 or ICC_BPR1_EL1
    pub fn read_bpr(&self, group1: bool, ctx: &ExecContext) -> u64 {
        let mut group = Self::group_for(group1, ctx);
        let secure_cbpr = self.ctlr_el1[SecurityBank::Secure.index()] & ICC_CTLR_EL1_CBPR != 0;
        let ns_cbpr = self.ctlr_el1[SecurityBank::NonSecure.index()] & ICC_CTLR_EL1_CBPR != 0;
        if group == IrqGroup::Group1Secure && !ctx.is_el3_or_mon() && secure_cbpr {
            group = IrqGroup::Group0;
        }
        let value = if group == IrqGroup::Group1NonSecure && ctx.el < 3 && ns_cbpr {
            // Reads return BPR0 + 1 saturated to 7.
            (self.bpr[IrqGroup::Group0.index()] + 1).min(7)
        } else {
            self.bpr[group.index()]
        };
        trace!("ICC_BPR{}_EL1 read: {}", u8::from(group1), value);
        u64::from(value)
    }

    /// Write ICC_BPR0_EL1 or ICC_BPR1_EL1
    pub fn write_bpr(&mut self, group1: bool, ctx: &ExecContext, value: u64) {
        trace!("ICC_BPR{}_EL1 write: {}", u8::from(group1), value);
        let mut group = Self::group_for(group1, ctx);
        let secure_cbpr = self.ctlr_el1[SecurityBank::Secure.index()] & ICC_CTLR_EL1_CBPR != 0;
        let ns_cbpr = self.ctlr_el1[SecurityBank::NonSecure.index()] & ICC_CTLR_EL1_CBPR != 0;
        if group == IrqGroup::Group1Secure && !ctx.is_el3_or_mon() && secure_cbpr {
            group = IrqGroup::Group0;
        }
        if group == IrqGroup::Group1NonSecure && ctx.el < 3 && ns_cbpr {
            return;
        }
        let minval = if group == IrqGroup::Group1NonSecure {
            GIC_MIN_BPR_NS
        } else {
            GIC_MIN_BPR
        };
        let value = value.max(u64::from(minval));
        self.bpr[group.index()] = (value & 7) as u8;
    }

    /// Read ICC_AP0R<n>_EL1 or ICC_AP1R<n>_EL1
    pub fn read_ap(&self, group1: bool, regno: usize, ctx: &ExecContext) -> u64 {
        let group = Self::group_for(group1, ctx);
        let value = self.apr[group.index()][regno & 3];
        trace!("ICC_AP{}R{}_EL1 read: {:#x}", u8::from(group1), regno, value);
        u64::from(value)
    }

    /// Write ICC_AP0R<n>_EL1 or ICC_AP1R<n>_EL1
    pub fn write_ap(&mut self, group1: bool, regno: usize, ctx: &ExecContext, value: u64) {
        trace!("ICC_AP{}R{}_EL1 write: {:#x}", u8::from(group1), regno, value);
        let group = Self::group_for(group1, ctx);
        let regno = regno & 3;
        // Non-secure code may not claim active priorities in the Secure half.
        if group == IrqGroup::Group1NonSecure && regno < 2 && ctx.el3_present {
            return;
        }
        self.apr[group.index()][regno] = value as u32;
    }

    /// Read ICC_IGRPEN0_EL1 or ICC_IGRPEN1_EL1
    pub fn read_igrpen(&self, group1: bool, ctx: &ExecContext) -> u64 {
        let group = Self::group_for(group1, ctx);
        u64::from(self.igrpen[group.index()])
    }

    /// Write ICC_IGRPEN0_EL1 or ICC_IGRPEN1_EL1
    pub fn write_igrpen(&mut self, group1: bool, ctx: &ExecContext, value: u64) {
        trace!("ICC_IGRPEN{}_EL1 write: {:#x}", u8::from(group1), value);
        let group = Self::group_for(group1, ctx);
        self.igrpen[group.index()] = value & ICC_IGRPEN_ENABLE != 0;
    }

    /// Read ICC_IGRPEN1_EL3: bit 0 aliases the Non-secure enable, bit 1 the Secure one.
    pub fn read_igrpen1_el3(&self) -> u64 {
        u64::from(self.igrpen[IrqGroup::Group1NonSecure.index()])
            | (u64::from(self.igrpen[IrqGroup::Group1Secure.index()]) << 1)
    }

    pub fn write_igrpen1_el3(&mut self, value: u64) {
        trace!("ICC_IGRPEN1_EL3 write: {:#x}", value);
        self.igrpen[IrqGroup::Group1NonSecure.index()] = value & 1 != 0;
        self.igrpen[IrqGroup::Group1Secure.index()] = value & 2 != 0;
    }

    /// Read ICC_CTLR_EL1
    pub fn read_ctlr(&self, ctx: &ExecContext) -> u64 {
        self.ctlr_el1[bank_for(ctx).index()]
    }

    /// Write ICC_CTLR_EL1. Only CBPR and EOImode are writable, and CBPR is read-only when
    /// EL3 owns it.
    pub fn write_ctlr(&mut self, ctx: &ExecContext, value: u64, ds: bool) {
        trace!("ICC_CTLR_EL1 write: {:#x}", value);
        let mask = if ctx.el3_present && !ds {
            ICC_CTLR_EL1_EOIMODE
        } else {
            ICC_CTLR_EL1_CBPR | ICC_CTLR_EL1_EOIMODE
        };
        let ctlr = &mut self.ctlr_el1[bank_for(ctx).index()];
        *ctlr = (*ctlr & !mask) | (value & mask);
    }

    /// Read ICC_CTLR_EL3, whose *_EL1S and *_EL1NS bits alias the banked ICC_CTLR_EL1.
    pub fn read_ctlr_el3(&self) -> u64 {
        let secure = self.ctlr_el1[SecurityBank::Secure.index()];
        let non_secure = self.ctlr_el1[SecurityBank::NonSecure.index()];
        let mut value = self.ctlr_el3;
        if non_secure & ICC_CTLR_EL1_EOIMODE != 0 {
            value |= ICC_CTLR_EL3_EOIMODE_EL1NS;
        }
        if non_secure & ICC_CTLR_EL1_CBPR != 0 {
            value |= ICC_CTLR_EL3_CBPR_EL1NS;
        }
        if secure & ICC_CTLR_EL1_EOIMODE != 0 {
            value |= ICC_CTLR_EL3_EOIMODE_EL1S;
        }
        if secure & ICC_CTLR_EL1_CBPR != 0 {
            value |= ICC_CTLR_EL3_CBPR_EL1S;
        }
        value
    }

    pub fn write_ctlr_el3(&mut self, value: u64) {
        trace!("ICC_CTLR_EL3 write: {:#x}", value);
        let aliases = [
            (
                SecurityBank::NonSecure,
                ICC_CTLR_EL3_EOIMODE_EL1NS,
                ICC_CTLR_EL3_CBPR_EL1NS,
            ),
            (
                SecurityBank::Secure,
                ICC_CTLR_EL3_EOIMODE_EL1S,
                ICC_CTLR_EL3_CBPR_EL1S,
            ),
        ];
        for (bank, eoimode, cbpr) in aliases {
            let ctlr = &mut self.ctlr_el1[bank.index()];
            *ctlr &= !(ICC_CTLR_EL1_CBPR | ICC_CTLR_EL1_EOIMODE);
            if value & eoimode != 0 {
                *ctlr |= ICC_CTLR_EL1_EOIMODE;
            }
            if value & cbpr != 0 {
                *ctlr |= ICC_CTLR_EL1_CBPR;
            }
        }
        // EOImode_EL3 is the only bit held in ICC_CTLR_EL3 itself that is writable.
        self.ctlr_el3 =
            (self.ctlr_el3 & !ICC_CTLR_EL3_EOIMODE_EL3) | (value & ICC_CTLR_EL3_EOIMODE_EL3);
    }

    /// Read ICC_SRE_ELx. System register access is always enabled.
    pub fn read_sre(el: u8) -> u64 {
        if el >= 2 {
            ICC_SRE_EL2_VALUE
        } else {
            ICC_SRE_EL1_VALUE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns_el1() -> ExecContext {
        ExecContext::non_secure(1)
    }

    fn hppi(irq: u32, prio: u8, group: IrqGroup) -> Hppi {
        Hppi { irq, prio, group }
    }

    fn enabled_cpuif() -> CpuInterface {
        let ctx = ns_el1();
        let mut cpuif = CpuInterface::new();
        cpuif.write_pmr(&ctx, 0xff);
        cpuif.write_igrpen(false, &ctx, 1);
        cpuif.write_igrpen(true, &ctx, 1);
        cpuif
    }

    #[test]
    fn reset_values() {
        let cpuif = CpuInterface::new();
        let ctx = ns_el1();
        assert_eq!(cpuif.read_pmr(&ctx), 0);
        assert_eq!(cpuif.read_bpr(false, &ctx), 0);
        assert_eq!(cpuif.read_bpr(true, &ctx), 1);
        assert_eq!(cpuif.running_priority(), GIC_IDLE_PRIORITY);
        assert_eq!(cpuif.read_ctlr(&ctx), 0x8f00);
        assert_eq!(cpuif.read_ctlr_el3() & ICC_CTLR_EL3_NDS, ICC_CTLR_EL3_NDS);
    }

    #[test]
    fn binary_point_writes_stay_consistent() {
        let ctx = ns_el1();
        let mut cpuif = CpuInterface::new();
        assert!(cpuif.is_consistent());
        cpuif.write_bpr(true, &ctx, 0xff);
        assert!(cpuif.is_consistent());
        cpuif.bpr[0] = 8;
        assert!(!cpuif.is_consistent());
    }

    #[test]
    fn acknowledge_and_eoi_track_running_priority() {
        let ctx = ns_el1();
        let mut cpuif = enabled_cpuif();
        let pending = hppi(40, 0x40, IrqGroup::Group1NonSecure);
        assert_eq!(cpuif.output_lines(pending, &ctx), (true, false));
        assert_eq!(cpuif.acknowledge(true, pending, &ctx, true), 40);
        assert_eq!(cpuif.running_priority(), 0x40);
        // The same priority cannot preempt itself.
        assert!(!cpuif.can_preempt(&hppi(41, 0x40, IrqGroup::Group1NonSecure)));
        assert!(cpuif.can_preempt(&hppi(41, 0x20, IrqGroup::Group1NonSecure)));
        assert_eq!(cpuif.end_of_interrupt(true, 40, &ctx, 288), Some(40));
        assert_eq!(cpuif.running_priority(), GIC_IDLE_PRIORITY);
    }

    #[test]
    fn binary_point_hides_subpriority() {
        let ctx = ns_el1();
        let mut cpuif = enabled_cpuif();
        cpuif.write_bpr(true, &ctx, 4);
        // Group priority bits [7:4] for BPR1 = 4.
        assert_eq!(cpuif.gprio_mask(IrqGroup::Group1NonSecure), 0xf0);
        cpuif.acknowledge(true, hppi(40, 0x48, IrqGroup::Group1NonSecure), &ctx, true);
        assert!(!cpuif.can_preempt(&hppi(41, 0x42, IrqGroup::Group1NonSecure)));
        assert!(cpuif.can_preempt(&hppi(41, 0x30, IrqGroup::Group1NonSecure)));
    }

    #[test]
    fn pmr_masks() {
        let ctx = ns_el1();
        let mut cpuif = enabled_cpuif();
        cpuif.write_pmr(&ctx, 0x40);
        assert!(!cpuif.can_preempt(&hppi(40, 0x40, IrqGroup::Group1NonSecure)));
        assert!(cpuif.can_preempt(&hppi(40, 0x38, IrqGroup::Group1NonSecure)));
    }

    #[test]
    fn disabled_group_is_not_signalled() {
        let ctx = ns_el1();
        let mut cpuif = enabled_cpuif();
        cpuif.write_igrpen(true, &ctx, 0);
        let pending = hppi(40, 0x10, IrqGroup::Group1NonSecure);
        assert_eq!(cpuif.output_lines(pending, &ctx), (false, false));
        assert_eq!(cpuif.acknowledge(true, pending, &ctx, true), INTID_SPURIOUS);
    }

    #[test]
    fn group0_is_fiq() {
        let ctx = ns_el1();
        let cpuif = enabled_cpuif();
        assert_eq!(
            cpuif.output_lines(hppi(33, 0x10, IrqGroup::Group0), &ctx),
            (false, true)
        );
        assert_eq!(
            cpuif.hppir1_value(hppi(33, 0x10, IrqGroup::Group0), &ctx, true),
            INTID_SPURIOUS
        );
        assert_eq!(cpuif.hppir0_value(hppi(33, 0x10, IrqGroup::Group0), &ctx, true), 33);
    }

    #[test]
    fn eoi_of_wrong_group_is_ignored() {
        let ctx = ns_el1();
        let mut cpuif = enabled_cpuif();
        cpuif.acknowledge(true, hppi(40, 0x40, IrqGroup::Group1NonSecure), &ctx, true);
        assert_eq!(cpuif.end_of_interrupt(false, 40, &ctx, 288), None);
        assert_eq!(cpuif.running_priority(), 0x40);
        assert_eq!(cpuif.end_of_interrupt(true, 1023, &ctx, 288), None);
        assert_eq!(cpuif.running_priority(), 0x40);
    }

    #[test]
    fn split_eoi_requires_dir() {
        let ctx = ns_el1();
        let mut cpuif = enabled_cpuif();
        cpuif.write_ctlr(&ctx, ICC_CTLR_EL1_EOIMODE, true);
        assert!(cpuif.eoi_split(&ctx));
        cpuif.acknowledge(true, hppi(40, 0x40, IrqGroup::Group1NonSecure), &ctx, true);
        assert_eq!(cpuif.end_of_interrupt(true, 40, &ctx, 288), None);
        assert_eq!(cpuif.running_priority(), GIC_IDLE_PRIORITY);
        assert!(cpuif.may_deactivate(&ctx, 40, IrqGroup::Group1NonSecure, true));
    }

    #[test]
    fn cbpr_shares_group0_binary_point() {
        let ctx = ns_el1();
        let mut cpuif = enabled_cpuif();
        cpuif.write_bpr(false, &ctx, 3);
        cpuif.write_ctlr(&ctx, ICC_CTLR_EL1_CBPR, true);
        assert_eq!(cpuif.read_bpr(true, &ctx), 4);
        cpuif.write_bpr(true, &ctx, 6);
        assert_eq!(cpuif.read_bpr(true, &ctx), 4);
        assert_eq!(cpuif.gprio_mask(IrqGroup::Group1NonSecure), 0xf0);
    }

    #[test]
    fn pmr_non_secure_view() {
        let secure = ExecContext::with_el3(3, true);
        let ns = ExecContext::with_el3(1, false).with_scr(false, true);
        let mut cpuif = CpuInterface::new();
        // Mask in the Secure half: NS sees 0 and cannot change it.
        cpuif.write_pmr(&secure, 0x40);
        assert_eq!(cpuif.read_pmr(&ns), 0);
        cpuif.write_pmr(&ns, 0xf0);
        assert_eq!(cpuif.read_pmr(&secure), 0x40);
        cpuif.write_pmr(&secure, 0xa0);
        assert_eq!(cpuif.read_pmr(&ns), 0x40);
        cpuif.write_pmr(&ns, 0x80);
        assert_eq!(cpuif.read_pmr(&secure), 0xc0);
    }

    #[test]
    fn ctlr_el3_aliases_banks() {
        let mut cpuif = CpuInterface::new();
        cpuif.write_ctlr_el3(ICC_CTLR_EL3_EOIMODE_EL1S | ICC_CTLR_EL3_CBPR_EL1NS);
        let secure = ExecContext::with_el3(1, true);
        let ns = ExecContext::with_el3(1, false);
        assert_eq!(cpuif.read_ctlr(&secure) & 3, ICC_CTLR_EL1_EOIMODE);
        assert_eq!(cpuif.read_ctlr(&ns) & 3, ICC_CTLR_EL1_CBPR);
        let value = cpuif.read_ctlr_el3();
        assert_ne!(value & ICC_CTLR_EL3_EOIMODE_EL1S, 0);
        assert_ne!(value & ICC_CTLR_EL3_CBPR_EL1NS, 0);
        assert_eq!(value & (ICC_CTLR_EL3_CBPR_EL1S | ICC_CTLR_EL3_EOIMODE_EL1NS), 0);
        // PRIbits and IDbits survive the write.
        assert_eq!(cpuif.read_ctlr(&ns) & 0x8f00, 0x8f00);
    }

    #[test]
    fn igrpen1_el3_aliases() {
        let mut cpuif = CpuInterface::new();
        cpuif.write_igrpen1_el3(0b10);
        assert_eq!(cpuif.read_igrpen(true, &ExecContext::with_el3(1, true)), 1);
        assert_eq!(cpuif.read_igrpen(true, &ExecContext::with_el3(1, false)), 0);
        assert_eq!(cpuif.read_igrpen1_el3(), 0b10);
    }

    #[test]
    fn sgi_decode_and_targets() {
        let value = (1u64 << 48) | (2 << 32) | (3 << 16) | (5 << 24) | 0b101;
        let req = SgiRequest::decode(value, IrqGroup::Group1Secure, false, true);
        assert_eq!(req.irq, 5);
        assert_eq!(req.group, IrqGroup::Group0);
        assert_eq!(req.aff, 0x01_02_03);
        assert!(req.targets(0x0102_0300, false));
        assert!(!req.targets(0x0102_0301, false));
        assert!(req.targets(0x0102_0302, false));
        assert!(!req.targets(0x0002_0300, false));
        let irm = SgiRequest::decode(1 << 40, IrqGroup::Group0, false, false);
        assert!(irm.targets(0x1234, false));
        assert!(!irm.targets(0, true));
    }

    #[test]
    fn secure_group1_folds_without_el3() {
        let ctx = ns_el1();
        let cpuif = enabled_cpuif();
        assert_eq!(
            cpuif.output_lines(hppi(40, 0x10, IrqGroup::Group1Secure), &ctx),
            (false, true)
        );
    }
}
