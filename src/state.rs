// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-interrupt state shared by the distributor (SPIs) and the redistributors (SGIs and
//! PPIs).

use std::ops::Range;

use serde::Deserialize;
use serde::Serialize;

use crate::context::IrqGroup;
use crate::GIC_IDLE_PRIORITY;

// GICD_CTLR bits. The Non-secure view of the register has EnableGrp1A at bit 1 and
// ARE_NS at bit 4, which coincide with EN_GRP1NS and ARE_S below.
pub const GICD_CTLR_EN_GRP0: u32 = 1 << 0;
pub const GICD_CTLR_EN_GRP1NS: u32 = 1 << 1;
pub const GICD_CTLR_EN_GRP1S: u32 = 1 << 2;
pub const GICD_CTLR_ARE_S: u32 = 1 << 4;
pub const GICD_CTLR_ARE_NS: u32 = 1 << 5;
pub const GICD_CTLR_DS: u32 = 1 << 6;
pub const GICD_CTLR_RWP: u32 = 1 << 31;

/// Minimum GICD_NSACR/GICR_NSACR value that opens a Secure interrupt to a given class of
/// Non-secure access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NsAccess {
    /// ISPENDR writes and ISPENDR/ICPENDR reads.
    SetPending,
    /// ICPENDR writes and ISACTIVER/ICACTIVER reads.
    ClearPending,
    /// IROUTER reads and writes.
    Routing,
}

impl NsAccess {
    fn threshold(self) -> u8 {
        match self {
            NsAccess::SetPending => 1,
            NsAccess::ClearPending => 2,
            NsAccess::Routing => 3,
        }
    }
}

/// One bit per interrupt, packed in 32-bit words like the GIC register layout.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct IrqBitmap(Vec<u32>);

impl IrqBitmap {
    pub fn new(num_irqs: usize) -> Self {
        IrqBitmap(vec![0; (num_irqs + 31) / 32])
    }

    pub fn get(&self, irq: u32) -> bool {
        self.0[(irq / 32) as usize] & (1 << (irq % 32)) != 0
    }

    pub fn set(&mut self, irq: u32, value: bool) {
        let word = &mut self.0[(irq / 32) as usize];
        if value {
            *word |= 1 << (irq % 32);
        } else {
            *word &= !(1 << (irq % 32));
        }
    }

    pub fn word(&self, index: usize) -> u32 {
        self.0[index]
    }

    pub fn set_word(&mut self, index: usize, value: u32) {
        self.0[index] = value;
    }

    pub fn fill(&mut self, value: u32) {
        self.0.iter_mut().for_each(|w| *w = value);
    }

    pub fn len_words(&self) -> usize {
        self.0.len()
    }
}

/// The bitmap-backed per-interrupt fields that have set/clear or plain register views.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqField {
    Group,
    GroupMod,
    Enabled,
    Pending,
    Active,
}

/// Interrupt state store. Interrupts are indexed by INTID, so the distributor's copy simply
/// leaves the 32 private entries unused.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct IrqState {
    pub group: IrqBitmap,
    pub grpmod: IrqBitmap,
    pub enabled: IrqBitmap,
    /// Pending latch; level-triggered interrupts are additionally pending while their
    /// input is high.
    pub pending: IrqBitmap,
    pub active: IrqBitmap,
    pub level: IrqBitmap,
    pub edge_trigger: IrqBitmap,
    pub priority: Vec<u8>,
    /// Two-bit GICD_NSACR/GICR_NSACR field per interrupt.
    pub nsacr: Vec<u8>,
}

impl IrqState {
    pub fn new(num_irqs: usize) -> Self {
        IrqState {
            group: IrqBitmap::new(num_irqs),
            grpmod: IrqBitmap::new(num_irqs),
            enabled: IrqBitmap::new(num_irqs),
            pending: IrqBitmap::new(num_irqs),
            active: IrqBitmap::new(num_irqs),
            level: IrqBitmap::new(num_irqs),
            edge_trigger: IrqBitmap::new(num_irqs),
            // Priority reset value is IMPLEMENTATION DEFINED; zero matches the other state.
            priority: vec![0; num_irqs],
            nsacr: vec![0; num_irqs],
        }
    }

    pub fn num_irqs(&self) -> usize {
        self.priority.len()
    }

    /// Whether every bitmap and per-interrupt array has the size `IrqState::new(num_irqs)`
    /// gives it.
    pub fn is_shaped_for(&self, num_irqs: usize) -> bool {
        let words = IrqBitmap::new(num_irqs).len_words();
        [
            &self.group,
            &self.grpmod,
            &self.enabled,
            &self.pending,
            &self.active,
            &self.level,
            &self.edge_trigger,
        ]
        .iter()
        .all(|bitmap| bitmap.len_words() == words)
            && self.priority.len() == num_irqs
            && self.nsacr.len() == num_irqs
    }

    pub fn field(&self, field: IrqField) -> &IrqBitmap {
        match field {
            IrqField::Group => &self.group,
            IrqField::GroupMod => &self.grpmod,
            IrqField::Enabled => &self.enabled,
            IrqField::Pending => &self.pending,
            IrqField::Active => &self.active,
        }
    }

    pub fn field_mut(&mut self, field: IrqField) -> &mut IrqBitmap {
        match field {
            IrqField::Group => &mut self.group,
            IrqField::GroupMod => &mut self.grpmod,
            IrqField::Enabled => &mut self.enabled,
            IrqField::Pending => &mut self.pending,
            IrqField::Active => &mut self.active,
        }
    }

    /// Group of `irq` given the current GICD_CTLR.DS. With security disabled the group
    /// modifier is ignored and Group 0 is the only "secure" group.
    pub fn group_of(&self, irq: u32, ds: bool) -> IrqGroup {
        if self.group.get(irq) {
            IrqGroup::Group1NonSecure
        } else if ds {
            IrqGroup::Group0
        } else if self.grpmod.get(irq) {
            IrqGroup::Group1Secure
        } else {
            IrqGroup::Group0
        }
    }

    /// Pending state as architecturally visible: the latch, or the input level for
    /// level-triggered interrupts.
    pub fn pending_word(&self, index: usize) -> u32 {
        self.pending.word(index) | (self.level.word(index) & !self.edge_trigger.word(index))
    }

    pub fn is_pending(&self, irq: u32) -> bool {
        self.pending_word((irq / 32) as usize) & (1 << (irq % 32)) != 0
    }

    /// Interrupts of word `index` that can be forwarded to a CPU interface: pending,
    /// enabled, not active and in a group enabled by `gicd_ctlr`.
    pub fn eligible_word(&self, index: usize, gicd_ctlr: u32) -> u32 {
        let mut pend = self.pending_word(index);
        pend &= self.enabled.word(index);
        pend &= !self.active.word(index);
        if pend == 0 {
            return 0;
        }

        let group = self.group.word(index);
        let grpmod = if gicd_ctlr & GICD_CTLR_DS != 0 {
            0
        } else {
            self.grpmod.word(index)
        };
        let mut grpmask = 0;
        if gicd_ctlr & GICD_CTLR_EN_GRP1NS != 0 {
            grpmask |= group;
        }
        if gicd_ctlr & GICD_CTLR_EN_GRP1S != 0 {
            grpmask |= !group & grpmod;
        }
        if gicd_ctlr & GICD_CTLR_EN_GRP0 != 0 {
            grpmask |= !group & !grpmod;
        }
        pend & grpmask
    }

    /// Highest priority eligible interrupt among `irqs` accepted by `accept`. Scans in
    /// ascending INTID order so the lowest INTID wins a priority tie.
    pub fn highest_pending(
        &self,
        irqs: Range<u32>,
        gicd_ctlr: u32,
        mut accept: impl FnMut(u32) -> bool,
    ) -> Option<(u32, u8)> {
        let mut best: Option<(u32, u8)> = None;
        let first_word = (irqs.start / 32) as usize;
        let end_word = ((irqs.end + 31) / 32) as usize;
        for index in first_word..end_word {
            let mut eligible = self.eligible_word(index, gicd_ctlr);
            while eligible != 0 {
                let bit = eligible.trailing_zeros();
                eligible &= eligible - 1;
                let irq = index as u32 * 32 + bit;
                if !irqs.contains(&irq) || !accept(irq) {
                    continue;
                }
                let prio = self.priority[irq as usize];
                if prio == GIC_IDLE_PRIORITY {
                    // The idle priority can never be signalled.
                    continue;
                }
                match best {
                    Some((_, best_prio)) if prio >= best_prio => {}
                    _ => best = Some((irq, prio)),
                }
            }
        }
        best
    }

    /// Bits of word `index` that an access may touch. Secure accesses (and all accesses
    /// when security is disabled) see everything; Non-secure ones see Group 1 Non-secure
    /// interrupts plus Secure ones whose NSACR grants `grant`.
    pub fn access_mask(
        &self,
        index: usize,
        secure: bool,
        ds: bool,
        grant: Option<NsAccess>,
    ) -> u32 {
        if secure || ds {
            return !0;
        }
        let mut mask = self.group.word(index);
        if let Some(grant) = grant {
            let threshold = grant.threshold();
            for bit in 0..32 {
                let irq = index * 32 + bit;
                if irq < self.nsacr.len() && mask & (1 << bit) == 0 && self.nsacr[irq] >= threshold
                {
                    mask |= 1 << bit;
                }
            }
        }
        mask
    }

    /// Register view of `field` for word `index`.
    pub fn read_field(&self, field: IrqField, index: usize, mask: u32) -> u32 {
        let value = match field {
            IrqField::Pending => self.pending_word(index),
            _ => self.field(field).word(index),
        };
        value & mask
    }

    /// Plain write of `field` (IGROUPR, IGRPMODR). Returns true if anything changed.
    pub fn write_field(&mut self, field: IrqField, index: usize, value: u32, mask: u32) -> bool {
        let bitmap = self.field_mut(field);
        let old = bitmap.word(index);
        let new = (old & !mask) | (value & mask);
        bitmap.set_word(index, new);
        old != new
    }

    /// Write-1-to-set view of `field` (IS*R registers).
    pub fn set_field(&mut self, field: IrqField, index: usize, value: u32, mask: u32) -> bool {
        let bitmap = self.field_mut(field);
        let old = bitmap.word(index);
        bitmap.set_word(index, old | (value & mask));
        bitmap.word(index) != old
    }

    /// Write-1-to-clear view of `field` (IC*R registers).
    pub fn clear_field(&mut self, field: IrqField, index: usize, value: u32, mask: u32) -> bool {
        let bitmap = self.field_mut(field);
        let old = bitmap.word(index);
        bitmap.set_word(index, old & !(value & mask));
        bitmap.word(index) != old
    }

    /// Two-bit-per-interrupt ICFGR view of register `reg` (16 interrupts per register).
    pub fn icfgr(&self, reg: usize) -> u32 {
        let mut value = 0;
        for i in 0..16 {
            let irq = (reg * 16 + i) as u32;
            if (irq as usize) < self.num_irqs() && self.edge_trigger.get(irq) {
                value |= 2 << (i * 2);
            }
        }
        value
    }

    /// Updates the edge/level configuration of the interrupts of ICFGR `reg` whose bit is
    /// set in `irq_mask` (one bit per interrupt of the register).
    pub fn write_icfgr(&mut self, reg: usize, value: u32, irq_mask: u32) -> bool {
        let mut changed = false;
        for i in 0..16 {
            let irq = (reg * 16 + i) as u32;
            if (irq as usize) >= self.num_irqs() || irq_mask & (1 << i) == 0 {
                continue;
            }
            let edge = value & (2 << (i * 2)) != 0;
            if self.edge_trigger.get(irq) != edge {
                self.edge_trigger.set(irq, edge);
                changed = true;
            }
        }
        changed
    }

    /// Two-bit-per-interrupt NSACR view of register `reg`.
    pub fn nsacr_reg(&self, reg: usize) -> u32 {
        let mut value = 0;
        for i in 0..16 {
            let irq = reg * 16 + i;
            if irq < self.num_irqs() {
                value |= u32::from(self.nsacr[irq] & 3) << (i * 2);
            }
        }
        value
    }

    pub fn write_nsacr_reg(&mut self, reg: usize, value: u32) {
        for i in 0..16 {
            let irq = reg * 16 + i;
            if irq < self.num_irqs() {
                self.nsacr[irq] = ((value >> (i * 2)) & 3) as u8;
            }
        }
    }
}

/// Non-secure view of a priority byte of a Group 1 Non-secure interrupt.
pub fn ns_priority_view(prio: u8) -> u8 {
    prio << 1
}

/// Priority stored for a Non-secure write of `value`: always in the Non-secure half.
pub fn ns_priority_write(value: u8) -> u8 {
    0x80 | (value >> 1)
}

/// Extracts the 16-interrupt slice of a 32-bit access mask covering ICFGR/NSACR register
/// `reg`.
pub fn half_mask(word_mask: u32, reg: usize) -> u32 {
    if reg % 2 == 0 {
        word_mask & 0xffff
    } else {
        word_mask >> 16
    }
}
