// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Virtual GICv3 CPU interface: the ICH_*_EL2 hypervisor registers, the list registers
//! and the ICV_* registers a guest reaches in place of ICC_* when HCR_EL2.IMO/FMO are set.

use enumn::N;
use log::trace;
use serde::Deserialize;
use serde::Serialize;

use crate::cpuif::ICC_CTLR_EL1_CBPR;
use crate::cpuif::ICC_CTLR_EL1_EOIMODE;
use crate::GIC_IDLE_PRIORITY;
use crate::INTID_SECURE;
use crate::INTID_SPURIOUS;

// ICH_LR<n>_EL2 fields
const ICH_LR_EL2_PINTID_SHIFT: u32 = 32;
const ICH_LR_EL2_PINTID_MASK: u64 = 0x3ff;
const ICH_LR_EL2_EOI: u64 = 1 << 41;
const ICH_LR_EL2_PRIORITY_SHIFT: u32 = 48;
const ICH_LR_EL2_GROUP: u64 = 1 << 60;
const ICH_LR_EL2_HW: u64 = 1 << 61;
const ICH_LR_EL2_STATE_SHIFT: u32 = 62;
const ICH_LR_EL2_STATE_PENDING_BIT: u64 = 1 << 62;
const ICH_LR_EL2_STATE_ACTIVE_BIT: u64 = 1 << 63;
const ICH_LR_EL2_STATE_MASK: u64 = 3 << 62;

// ICH_HCR_EL2 bits
pub const ICH_HCR_EL2_EN: u64 = 1 << 0;
pub const ICH_HCR_EL2_UIE: u64 = 1 << 1;
pub const ICH_HCR_EL2_LRENPIE: u64 = 1 << 2;
pub const ICH_HCR_EL2_NPIE: u64 = 1 << 3;
pub const ICH_HCR_EL2_VGRP0EIE: u64 = 1 << 4;
pub const ICH_HCR_EL2_VGRP0DIE: u64 = 1 << 5;
pub const ICH_HCR_EL2_VGRP1EIE: u64 = 1 << 6;
pub const ICH_HCR_EL2_VGRP1DIE: u64 = 1 << 7;
pub const ICH_HCR_EL2_TC: u64 = 1 << 10;
pub const ICH_HCR_EL2_TALL0: u64 = 1 << 11;
pub const ICH_HCR_EL2_TALL1: u64 = 1 << 12;
pub const ICH_HCR_EL2_TSEI: u64 = 1 << 13;
pub const ICH_HCR_EL2_TDIR: u64 = 1 << 14;
const ICH_HCR_EL2_EOICOUNT_SHIFT: u32 = 27;
pub const ICH_HCR_EL2_EOICOUNT_MASK: u64 = 0x1f << ICH_HCR_EL2_EOICOUNT_SHIFT;

// ICH_VMCR_EL2 fields
pub const ICH_VMCR_EL2_VENG0: u64 = 1 << 0;
pub const ICH_VMCR_EL2_VENG1: u64 = 1 << 1;
pub const ICH_VMCR_EL2_VFIQEN: u64 = 1 << 3;
pub const ICH_VMCR_EL2_VCBPR: u64 = 1 << 4;
pub const ICH_VMCR_EL2_VEOIM: u64 = 1 << 9;
const ICH_VMCR_EL2_VBPR1_SHIFT: u32 = 18;
const ICH_VMCR_EL2_VBPR0_SHIFT: u32 = 21;
const ICH_VMCR_EL2_VBPR_MASK: u64 = 0x7;
pub const ICH_VMCR_EL2_VPMR_SHIFT: u32 = 24;
const ICH_VMCR_EL2_VPMR_MASK: u64 = 0xff;

// ICH_MISR_EL2 bits
pub const ICH_MISR_EL2_EOI: u64 = 1 << 0;
pub const ICH_MISR_EL2_U: u64 = 1 << 1;
pub const ICH_MISR_EL2_LRENP: u64 = 1 << 2;
pub const ICH_MISR_EL2_NP: u64 = 1 << 3;
pub const ICH_MISR_EL2_VGRP0E: u64 = 1 << 4;
pub const ICH_MISR_EL2_VGRP0D: u64 = 1 << 5;
pub const ICH_MISR_EL2_VGRP1E: u64 = 1 << 6;
pub const ICH_MISR_EL2_VGRP1D: u64 = 1 << 7;

// ICH_VTR_EL2 fields
const ICH_VTR_EL2_TDS: u64 = 1 << 19;
const ICH_VTR_EL2_NV4: u64 = 1 << 20;
const ICH_VTR_EL2_A3V: u64 = 1 << 21;
const ICH_VTR_EL2_IDBITS_SHIFT: u32 = 23;
const ICH_VTR_EL2_PREBITS_SHIFT: u32 = 26;
const ICH_VTR_EL2_PRIBITS_SHIFT: u32 = 29;

/// Fixed ICV_CTLR_EL1 fields; they match what ICH_VTR_EL2 reports.
const ICV_CTLR_EL1_FIXED: u64 = (1 << 15) | (1 << 11) | (7 << 8);

const NUM_APR_WORDS: usize = 4;

/// State of a list register entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, N)]
#[repr(u8)]
pub enum LrState {
    Invalid = 0,
    Pending = 1,
    Active = 2,
    ActivePending = 3,
}

/// An ICH_LR<n>_EL2 value.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ListRegister(pub u64);

impl ListRegister {
    /// A pending entry for virtual interrupt `vintid`.
    pub fn pending(vintid: u32, priority: u8, group1: bool) -> Self {
        let mut lr = u64::from(vintid)
            | (u64::from(priority) << ICH_LR_EL2_PRIORITY_SHIFT)
            | ICH_LR_EL2_STATE_PENDING_BIT;
        if group1 {
            lr |= ICH_LR_EL2_GROUP;
        }
        ListRegister(lr)
    }

    /// Links the entry to physical interrupt `pintid`, which is deactivated together
    /// with the virtual one.
    pub fn with_hw(self, pintid: u32) -> Self {
        let lr = self.0 & !(ICH_LR_EL2_PINTID_MASK << ICH_LR_EL2_PINTID_SHIFT);
        ListRegister(
            lr | ICH_LR_EL2_HW
                | ((u64::from(pintid) & ICH_LR_EL2_PINTID_MASK) << ICH_LR_EL2_PINTID_SHIFT),
        )
    }

    /// Requests a maintenance interrupt when the entry is deactivated.
    pub fn with_eoi(self) -> Self {
        ListRegister(self.0 | ICH_LR_EL2_EOI)
    }

    pub fn vintid(self) -> u32 {
        self.0 as u32
    }

    pub fn pintid(self) -> u32 {
        ((self.0 >> ICH_LR_EL2_PINTID_SHIFT) & ICH_LR_EL2_PINTID_MASK) as u32
    }

    pub fn priority(self) -> u8 {
        (self.0 >> ICH_LR_EL2_PRIORITY_SHIFT) as u8
    }

    pub fn is_group1(self) -> bool {
        self.0 & ICH_LR_EL2_GROUP != 0
    }

    pub fn is_hw(self) -> bool {
        self.0 & ICH_LR_EL2_HW != 0
    }

    pub fn state(self) -> LrState {
        LrState::n((self.0 >> ICH_LR_EL2_STATE_SHIFT) as u8).unwrap_or(LrState::Invalid)
    }

    fn is_active(self) -> bool {
        self.0 & ICH_LR_EL2_STATE_ACTIVE_BIT != 0
    }

    fn is_valid(self) -> bool {
        self.0 & ICH_LR_EL2_STATE_MASK != 0
    }

    /// The entry wants a maintenance interrupt for its completed deactivation.
    fn eoi_maintenance(self) -> bool {
        self.0 & (ICH_LR_EL2_STATE_MASK | ICH_LR_EL2_HW | ICH_LR_EL2_EOI) == ICH_LR_EL2_EOI
    }
}

fn apr_index(group1: bool) -> usize {
    usize::from(group1)
}

/// Virtual CPU interface of one CPU.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct VirtualCpuInterface {
    vpribits: u8,
    vprebits: u8,
    hcr: u64,
    vmcr: u64,
    /// ICH_AP0R<n>_EL2 and ICH_AP1R<n>_EL2.
    apr: [[u32; NUM_APR_WORDS]; 2],
    lrs: Vec<ListRegister>,
}

impl VirtualCpuInterface {
    /// Creates a virtual interface with `num_list_regs` list registers (at least one).
    pub fn new(num_list_regs: usize, vpribits: u8, vprebits: u8) -> Self {
        assert!(num_list_regs >= 1);
        assert!(vprebits <= vpribits && (5..=7).contains(&vprebits) && vpribits <= 8);
        let mut vcpuif = VirtualCpuInterface {
            vpribits,
            vprebits,
            hcr: 0,
            vmcr: 0,
            apr: [[0; NUM_APR_WORDS]; 2],
            lrs: vec![ListRegister::default(); num_list_regs],
        };
        vcpuif.reset();
        vcpuif
    }

    pub fn reset(&mut self) {
        let min = u64::from(self.min_vbpr());
        self.hcr = 0;
        self.apr = [[0; NUM_APR_WORDS]; 2];
        self.lrs.iter_mut().for_each(|lr| *lr = ListRegister::default());
        self.vmcr = ICH_VMCR_EL2_VFIQEN
            | ((min + 1) << ICH_VMCR_EL2_VBPR1_SHIFT)
            | (min << ICH_VMCR_EL2_VBPR0_SHIFT);
    }

    pub fn num_list_regs(&self) -> usize {
        self.lrs.len()
    }

    /// Whether this interface was built with the same list register count and priority widths
    /// as `other`.
    pub fn same_shape(&self, other: &VirtualCpuInterface) -> bool {
        self.vpribits == other.vpribits
            && self.vprebits == other.vprebits
            && self.lrs.len() == other.lrs.len()
    }

    pub fn list_register(&self, idx: usize) -> ListRegister {
        self.lrs[idx]
    }

    fn min_vbpr(&self) -> u8 {
        7 - self.vprebits
    }

    /// Number of active priority words in use: 32 preemption levels per word.
    fn aprmax(&self) -> usize {
        1 << (self.vprebits - 5)
    }

    fn eoicount(&self) -> u64 {
        (self.hcr & ICH_HCR_EL2_EOICOUNT_MASK) >> ICH_HCR_EL2_EOICOUNT_SHIFT
    }

    fn increment_eoicount(&mut self) {
        let count = (self.eoicount() + 1) & 0x1f;
        self.hcr = (self.hcr & !ICH_HCR_EL2_EOICOUNT_MASK) | (count << ICH_HCR_EL2_EOICOUNT_SHIFT);
        trace!("ICH_HCR_EL2 EOIcount now {}", count);
    }

    fn vbpr(&self, group1: bool) -> u8 {
        let shift = if group1 {
            ICH_VMCR_EL2_VBPR1_SHIFT
        } else {
            ICH_VMCR_EL2_VBPR0_SHIFT
        };
        ((self.vmcr >> shift) & ICH_VMCR_EL2_VBPR_MASK) as u8
    }

    /// Stores a binary point, raising values below the minimum to the minimum.
    fn set_vbpr(&mut self, group1: bool, value: u8) {
        let mut min = self.min_vbpr();
        if group1 {
            min += 1;
        }
        let value = u64::from(value.max(min)) & ICH_VMCR_EL2_VBPR_MASK;
        let shift = if group1 {
            ICH_VMCR_EL2_VBPR1_SHIFT
        } else {
            ICH_VMCR_EL2_VBPR0_SHIFT
        };
        self.vmcr = (self.vmcr & !(ICH_VMCR_EL2_VBPR_MASK << shift)) | (value << shift);
    }

    fn vpmr(&self) -> u8 {
        (self.vmcr >> ICH_VMCR_EL2_VPMR_SHIFT) as u8
    }

    /// Clears the unimplemented low priority bits.
    fn fullprio_mask(&self) -> u8 {
        (!0u32 << (8 - self.vpribits)) as u8
    }

    /// Mask that clears the subpriority bits of a virtual priority (VGroupBits()).
    pub fn gprio_mask(&self, group1: bool) -> u8 {
        let group1 = group1 && self.vmcr & ICH_VMCR_EL2_VCBPR == 0;
        let mut bpr = self.vbpr(group1);
        if group1 {
            bpr = bpr.saturating_sub(1);
        }
        (!0u32 << (bpr + 1)) as u8
    }

    /// Virtual running priority.
    pub fn running_priority(&self) -> u8 {
        for i in 0..self.aprmax() {
            let apr = self.apr[0][i] | self.apr[1][i];
            if apr == 0 {
                continue;
            }
            let prio = (i as u32 * 32 + apr.trailing_zeros()) << (self.min_vbpr() + 1);
            return (prio & 0xff) as u8;
        }
        GIC_IDLE_PRIORITY
    }

    /// Index of the highest priority pending virtual interrupt whose group is enabled.
    /// The lowest index wins a tie and priority 0xff is never reported.
    pub fn hppvi_index(&self) -> Option<usize> {
        if self.vmcr & (ICH_VMCR_EL2_VENG0 | ICH_VMCR_EL2_VENG1) == 0 {
            return None;
        }
        let mut best = None;
        let mut prio = GIC_IDLE_PRIORITY;
        for (i, lr) in self.lrs.iter().enumerate() {
            if !matches!(lr.state(), LrState::Pending | LrState::ActivePending) {
                continue;
            }
            let enable = if lr.is_group1() {
                ICH_VMCR_EL2_VENG1
            } else {
                ICH_VMCR_EL2_VENG0
            };
            if self.vmcr & enable == 0 {
                continue;
            }
            if lr.priority() < prio {
                prio = lr.priority();
                best = Some(i);
            }
        }
        best
    }

    fn can_preempt(&self, lr: ListRegister) -> bool {
        if self.hcr & ICH_HCR_EL2_EN == 0 {
            return false;
        }
        let prio = lr.priority();
        if prio >= self.vpmr() {
            return false;
        }
        let rprio = self.running_priority();
        if rprio == GIC_IDLE_PRIORITY {
            return true;
        }
        let mask = self.gprio_mask(lr.is_group1());
        (prio & mask) < (rprio & mask)
    }

    /// ICH_EISR_EL2 plus the list register derived MISR bits (EOI, U, NP).
    fn eoi_maintenance_state(&self) -> (u64, u64) {
        let mut eisr = 0;
        let mut valid = 0;
        let mut seen_pending = false;
        for (i, lr) in self.lrs.iter().enumerate() {
            if lr.eoi_maintenance() {
                eisr |= 1 << i;
            }
            if lr.is_valid() {
                valid += 1;
            }
            if lr.state() == LrState::Pending {
                seen_pending = true;
            }
        }
        let mut misr = 0;
        if valid < 2 && self.hcr & ICH_HCR_EL2_UIE != 0 {
            misr |= ICH_MISR_EL2_U;
        }
        if !seen_pending && self.hcr & ICH_HCR_EL2_NPIE != 0 {
            misr |= ICH_MISR_EL2_NP;
        }
        if eisr != 0 {
            misr |= ICH_MISR_EL2_EOI;
        }
        (eisr, misr)
    }

    /// Maintenance interrupt status (ICH_MISR_EL2), recomputed from the current state.
    pub fn misr(&self) -> u64 {
        let (_, mut value) = self.eoi_maintenance_state();
        let hcr = self.hcr;
        let veng0 = self.vmcr & ICH_VMCR_EL2_VENG0 != 0;
        let veng1 = self.vmcr & ICH_VMCR_EL2_VENG1 != 0;
        if hcr & ICH_HCR_EL2_LRENPIE != 0 && self.eoicount() != 0 {
            value |= ICH_MISR_EL2_LRENP;
        }
        if hcr & ICH_HCR_EL2_VGRP0EIE != 0 && veng0 {
            value |= ICH_MISR_EL2_VGRP0E;
        }
        if hcr & ICH_HCR_EL2_VGRP0DIE != 0 && !veng0 {
            value |= ICH_MISR_EL2_VGRP0D;
        }
        if hcr & ICH_HCR_EL2_VGRP1EIE != 0 && veng1 {
            value |= ICH_MISR_EL2_VGRP1E;
        }
        if hcr & ICH_HCR_EL2_VGRP1DIE != 0 && !veng1 {
            value |= ICH_MISR_EL2_VGRP1D;
        }
        value
    }

    /// Levels of the (virtual IRQ, virtual FIQ, maintenance) outputs.
    pub fn output_lines(&self) -> (bool, bool, bool) {
        let (mut virq, mut vfiq) = (false, false);
        if let Some(idx) = self.hppvi_index() {
            let lr = self.lrs[idx];
            if self.can_preempt(lr) {
                // Virtual Group 0 is always FIQ and Group 1 always IRQ.
                if lr.is_group1() {
                    virq = true;
                } else {
                    vfiq = true;
                }
            }
        }
        let maint = self.hcr & ICH_HCR_EL2_EN != 0 && self.misr() != 0;
        trace!(
            "virtual lines: virq {} vfiq {} maintenance {} (hppvi {:?})",
            virq,
            vfiq,
            maint,
            self.hppvi_index()
        );
        (virq, vfiq, maint)
    }

    pub fn read_ap(&self, group1: bool, regno: usize) -> u64 {
        u64::from(self.apr[apr_index(group1)][regno & 3])
    }

    pub fn write_ap(&mut self, group1: bool, regno: usize, value: u64) {
        trace!("ICV_AP{}R{}_EL1 write: {:#x}", u8::from(group1), regno, value);
        self.apr[apr_index(group1)][regno & 3] = value as u32;
    }

    /// Read ICV_BPR0_EL1 or ICV_BPR1_EL1
    pub fn read_bpr(&self, group1: bool) -> u64 {
        if group1 && self.vmcr & ICH_VMCR_EL2_VCBPR != 0 {
            return u64::from((self.vbpr(false) + 1).min(7));
        }
        u64::from(self.vbpr(group1))
    }

    /// Write ICV_BPR0_EL1 or ICV_BPR1_EL1
    pub fn write_bpr(&mut self, group1: bool, value: u64) {
        trace!("ICV_BPR{}_EL1 write: {}", u8::from(group1), value);
        if group1 && self.vmcr & ICH_VMCR_EL2_VCBPR != 0 {
            return;
        }
        self.set_vbpr(group1, (value & 0xff) as u8);
    }

    pub fn read_pmr(&self) -> u64 {
        u64::from(self.vpmr())
    }

    pub fn write_pmr(&mut self, value: u64) {
        trace!("ICV_PMR_EL1 write: {:#x}", value);
        let value = u64::from(value as u8 & self.fullprio_mask());
        self.vmcr = (self.vmcr & !(ICH_VMCR_EL2_VPMR_MASK << ICH_VMCR_EL2_VPMR_SHIFT))
            | (value << ICH_VMCR_EL2_VPMR_SHIFT);
    }

    pub fn read_igrpen(&self, group1: bool) -> u64 {
        let enable = if group1 {
            ICH_VMCR_EL2_VENG1
        } else {
            ICH_VMCR_EL2_VENG0
        };
        u64::from(self.vmcr & enable != 0)
    }

    pub fn write_igrpen(&mut self, group1: bool, value: u64) {
        trace!("ICV_IGRPEN{}_EL1 write: {:#x}", u8::from(group1), value);
        let enable = if group1 {
            ICH_VMCR_EL2_VENG1
        } else {
            ICH_VMCR_EL2_VENG0
        };
        if value & 1 != 0 {
            self.vmcr |= enable;
        } else {
            self.vmcr &= !enable;
        }
    }

    pub fn read_ctlr(&self) -> u64 {
        let mut value = ICV_CTLR_EL1_FIXED;
        if self.vmcr & ICH_VMCR_EL2_VEOIM != 0 {
            value |= ICC_CTLR_EL1_EOIMODE;
        }
        if self.vmcr & ICH_VMCR_EL2_VCBPR != 0 {
            value |= ICC_CTLR_EL1_CBPR;
        }
        value
    }

    pub fn write_ctlr(&mut self, value: u64) {
        trace!("ICV_CTLR_EL1 write: {:#x}", value);
        self.vmcr &= !(ICH_VMCR_EL2_VCBPR | ICH_VMCR_EL2_VEOIM);
        if value & ICC_CTLR_EL1_CBPR != 0 {
            self.vmcr |= ICH_VMCR_EL2_VCBPR;
        }
        if value & ICC_CTLR_EL1_EOIMODE != 0 {
            self.vmcr |= ICH_VMCR_EL2_VEOIM;
        }
    }

    pub fn read_rpr(&self) -> u64 {
        u64::from(self.running_priority())
    }

    /// Read ICV_HPPIR0_EL1 or ICV_HPPIR1_EL1
    pub fn read_hppir(&self, group1: bool) -> u64 {
        let value = match self.hppvi_index() {
            Some(idx) if self.lrs[idx].is_group1() == group1 => self.lrs[idx].vintid(),
            _ => INTID_SPURIOUS,
        };
        u64::from(value)
    }

    fn activate(&mut self, idx: usize, group1: bool) {
        let mask = self.gprio_mask(group1);
        let prio = self.lrs[idx].priority() & mask;
        let aprbit = usize::from(prio >> (8 - self.vprebits));
        let lr = &mut self.lrs[idx];
        lr.0 = (lr.0 & !ICH_LR_EL2_STATE_PENDING_BIT) | ICH_LR_EL2_STATE_ACTIVE_BIT;
        self.apr[apr_index(group1)][aprbit / 32] |= 1 << (aprbit % 32);
    }

    /// Acknowledge a virtual interrupt (ICV_IAR0_EL1 or ICV_IAR1_EL1 read).
    pub fn acknowledge(&mut self, group1: bool) -> u32 {
        let mut intid = INTID_SPURIOUS;
        if let Some(idx) = self.hppvi_index() {
            let lr = self.lrs[idx];
            if lr.is_group1() == group1 && self.can_preempt(lr) {
                intid = lr.vintid();
                if intid < INTID_SECURE {
                    self.activate(idx, group1);
                } else {
                    // Special IDs go straight from Pending to Invalid.
                    self.lrs[idx].0 &= !ICH_LR_EL2_STATE_PENDING_BIT;
                }
            }
        }
        trace!("ICV_IAR{}_EL1 read: {}", u8::from(group1), intid);
        intid
    }

    fn eoi_split(&self) -> bool {
        self.vmcr & ICH_VMCR_EL2_VEOIM != 0
    }

    fn find_active(&self, irq: u32) -> Option<usize> {
        self.lrs
            .iter()
            .position(|lr| lr.is_active() && lr.vintid() == irq)
    }

    /// Clears the active state of list register `idx` (ActivePending -> Pending, Active
    /// -> Invalid). Returns the physical interrupt to deactivate for HW entries.
    fn deactivate(&mut self, idx: usize) -> Option<u32> {
        let lr = self.lrs[idx];
        self.lrs[idx].0 &= !ICH_LR_EL2_STATE_ACTIVE_BIT;
        if lr.is_hw() && lr.pintid() < INTID_SECURE {
            Some(lr.pintid())
        } else {
            None
        }
    }

    /// Drops the running priority, Group 0 first on a tie. Returns the dropped priority,
    /// or 0xff if nothing was active.
    fn drop_prio(&mut self) -> u8 {
        let shift = self.min_vbpr() + 1;
        for i in 0..self.aprmax() {
            let (apr0, apr1) = (self.apr[0][i], self.apr[1][i]);
            if apr0 == 0 && apr1 == 0 {
                continue;
            }
            let count0 = apr0.trailing_zeros();
            let count1 = apr1.trailing_zeros();
            let (group, count) = if count0 <= count1 { (0, count0) } else { (1, count1) };
            self.apr[group][i] &= self.apr[group][i] - 1;
            return (((count + i as u32 * 32) << shift) & 0xff) as u8;
        }
        GIC_IDLE_PRIORITY
    }

    /// End of interrupt (ICV_EOIR0_EL1 or ICV_EOIR1_EL1 write). Returns the physical
    /// interrupt to deactivate, if the completed entry was HW-linked.
    pub fn end_of_interrupt(&mut self, group1: bool, value: u64, num_irqs: u32) -> Option<u32> {
        let irq = (value & 0xff_ffff) as u32;
        trace!("ICV_EOIR{}_EL1 write: {}", u8::from(group1), irq);
        if irq >= num_irqs {
            return None;
        }
        // Priority is dropped before the list registers are checked.
        let dropprio = self.drop_prio();
        if dropprio == GIC_IDLE_PRIORITY {
            return None;
        }
        match self.find_active(irq) {
            None => {
                self.increment_eoicount();
                None
            }
            Some(idx) => {
                let lr = self.lrs[idx];
                let lr_gprio = lr.priority() & self.gprio_mask(group1);
                if lr.is_group1() == group1 && lr_gprio == dropprio && !self.eoi_split() {
                    self.deactivate(idx)
                } else {
                    None
                }
            }
        }
    }

    /// Deactivate (ICV_DIR_EL1 write). Returns the physical interrupt to deactivate, if the
    /// entry was HW-linked.
    pub fn deactivate_interrupt(&mut self, value: u64, num_irqs: u32) -> Option<u32> {
        let irq = (value & 0xff_ffff) as u32;
        trace!("ICV_DIR_EL1 write: {}", irq);
        if irq >= num_irqs || !self.eoi_split() {
            return None;
        }
        match self.find_active(irq) {
            None => {
                self.increment_eoicount();
                None
            }
            Some(idx) => self.deactivate(idx),
        }
    }

    fn ich_apr_exists(&self, regno: usize) -> bool {
        regno < self.aprmax()
    }

    /// Read ICH_AP0R<n>_EL2 or ICH_AP1R<n>_EL2
    pub fn read_ich_ap(&self, group1: bool, regno: usize) -> u64 {
        if !self.ich_apr_exists(regno) {
            return 0;
        }
        u64::from(self.apr[apr_index(group1)][regno])
    }

    /// Write ICH_AP0R<n>_EL2 or ICH_AP1R<n>_EL2
    pub fn write_ich_ap(&mut self, group1: bool, regno: usize, value: u64) {
        trace!("ICH_AP{}R{}_EL2 write: {:#x}", u8::from(group1), regno, value);
        if self.ich_apr_exists(regno) {
            self.apr[apr_index(group1)][regno] = value as u32;
        }
    }

    pub fn has_ich_ap(&self, regno: usize) -> bool {
        self.ich_apr_exists(regno)
    }

    pub fn read_hcr(&self) -> u64 {
        self.hcr
    }

    pub fn write_hcr(&mut self, value: u64) {
        trace!("ICH_HCR_EL2 write: {:#x}", value);
        self.hcr = value
            & (ICH_HCR_EL2_EN
                | ICH_HCR_EL2_UIE
                | ICH_HCR_EL2_LRENPIE
                | ICH_HCR_EL2_NPIE
                | ICH_HCR_EL2_VGRP0EIE
                | ICH_HCR_EL2_VGRP0DIE
                | ICH_HCR_EL2_VGRP1EIE
                | ICH_HCR_EL2_VGRP1DIE
                | ICH_HCR_EL2_TC
                | ICH_HCR_EL2_TALL0
                | ICH_HCR_EL2_TALL1
                | ICH_HCR_EL2_TSEI
                | ICH_HCR_EL2_TDIR
                | ICH_HCR_EL2_EOICOUNT_MASK);
    }

    pub fn read_vmcr(&self) -> u64 {
        self.vmcr
    }

    pub fn write_vmcr(&mut self, value: u64) {
        trace!("ICH_VMCR_EL2 write: {:#x}", value);
        let mut value = value
            & (ICH_VMCR_EL2_VENG0
                | ICH_VMCR_EL2_VENG1
                | ICH_VMCR_EL2_VCBPR
                | ICH_VMCR_EL2_VEOIM
                | (ICH_VMCR_EL2_VBPR_MASK << ICH_VMCR_EL2_VBPR1_SHIFT)
                | (ICH_VMCR_EL2_VBPR_MASK << ICH_VMCR_EL2_VBPR0_SHIFT)
                | (ICH_VMCR_EL2_VPMR_MASK << ICH_VMCR_EL2_VPMR_SHIFT));
        value |= ICH_VMCR_EL2_VFIQEN;
        self.vmcr = value;
        // Binary points written below their minimum read back as the minimum.
        self.set_vbpr(false, self.vbpr(false));
        self.set_vbpr(true, self.vbpr(true));
    }

    pub fn read_lr(&self, idx: usize) -> u64 {
        self.lrs[idx].0
    }

    pub fn write_lr(&mut self, idx: usize, value: u64) {
        trace!("ICH_LR{}_EL2 write: {:#x}", idx, value);
        let mut value = value;
        if self.vpribits < 8 {
            // Unimplemented priority bits are RES0.
            let res0 = ((1u64 << (8 - self.vpribits)) - 1) << ICH_LR_EL2_PRIORITY_SHIFT;
            value &= !res0;
        }
        self.lrs[idx] = ListRegister(value);
    }

    pub fn read_vtr(&self) -> u64 {
        (self.lrs.len() as u64 - 1)
            | ICH_VTR_EL2_TDS
            | ICH_VTR_EL2_NV4
            | ICH_VTR_EL2_A3V
            | (1 << ICH_VTR_EL2_IDBITS_SHIFT)
            | (u64::from(self.vprebits - 1) << ICH_VTR_EL2_PREBITS_SHIFT)
            | (u64::from(self.vpribits - 1) << ICH_VTR_EL2_PRIBITS_SHIFT)
    }

    pub fn read_eisr(&self) -> u64 {
        self.eoi_maintenance_state().0
    }

    /// ICH_ELRSR_EL2: list registers that are free for reuse.
    pub fn read_elrsr(&self) -> u64 {
        self.lrs
            .iter()
            .enumerate()
            .filter(|(_, lr)| !lr.is_valid() && (lr.is_hw() || lr.0 & ICH_LR_EL2_EOI == 0))
            .fold(0, |acc, (i, _)| acc | (1 << i))
    }

    /// Enables the virtual interface with both groups on and the priority mask open.
    #[cfg(test)]
    fn enable_all(&mut self) {
        self.write_hcr(ICH_HCR_EL2_EN);
        self.write_vmcr(ICH_VMCR_EL2_VENG0 | ICH_VMCR_EL2_VENG1 | (0xff << ICH_VMCR_EL2_VPMR_SHIFT));
    }
}
