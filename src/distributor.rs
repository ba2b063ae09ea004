// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! GICv3 Distributor (GICD): global control and SPI state.

use log::trace;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::context::IrqGroup;
use crate::state::half_mask;
use crate::state::ns_priority_view;
use crate::state::ns_priority_write;
use crate::state::IrqField;
use crate::state::IrqState;
use crate::state::NsAccess;
use crate::state::GICD_CTLR_ARE_NS;
use crate::state::GICD_CTLR_ARE_S;
use crate::state::GICD_CTLR_DS;
use crate::state::GICD_CTLR_EN_GRP0;
use crate::state::GICD_CTLR_EN_GRP1NS;
use crate::state::GICD_CTLR_EN_GRP1S;
use crate::state::GICD_CTLR_RWP;
use crate::GIC_INTERNAL;

// GICD register offsets
const GICD_CTLR: u64 = 0x0000;
const GICD_TYPER: u64 = 0x0004;
const GICD_IIDR: u64 = 0x0008;
const GICD_TYPER2: u64 = 0x000C;
const GICD_STATUSR: u64 = 0x0010;
const GICD_SETSPI_NSR: u64 = 0x0040;
const GICD_CLRSPI_SR: u64 = 0x0058;
const GICD_IGROUPR: u64 = 0x0080;
const GICD_ISENABLER: u64 = 0x0100;
const GICD_ICENABLER: u64 = 0x0180;
const GICD_ISPENDR: u64 = 0x0200;
const GICD_ICPENDR: u64 = 0x0280;
const GICD_ISACTIVER: u64 = 0x0300;
const GICD_ICACTIVER: u64 = 0x0380;
const GICD_IPRIORITYR: u64 = 0x0400;
const GICD_ITARGETSR: u64 = 0x0800;
const GICD_ICFGR: u64 = 0x0C00;
const GICD_IGRPMODR: u64 = 0x0D00;
const GICD_NSACR: u64 = 0x0E00;
const GICD_SGIR: u64 = 0x0F00;
const GICD_SPENDSGIR_END: u64 = 0x0F30;
const GICD_IROUTER: u64 = 0x6000;
const GICD_IROUTER_END: u64 = 0x7FE0;
const GICD_IDREGS: u64 = 0xFFD0;
const GICD_IDREGS_END: u64 = 0x10000;

/// GICD_IIDR: implementer ARM, product GICv3 model.
const GICD_IIDR_VALUE: u32 = 0x43b;

// GICD_TYPER fields
const GICD_TYPER_SECURITY_EXTN: u32 = 1 << 10;
const GICD_TYPER_IDBITS_SHIFT: u32 = 19;
const GICD_TYPER_A3V: u32 = 1 << 24;
const GICD_TYPER_NO1N: u32 = 1 << 25;

/// Affinity fields of GICD_IROUTER<n>. IRM is RAZ/WI since 1-of-N routing is not
/// implemented.
const GICD_IROUTER_AFF_MASK: u64 = 0xff_00ff_ffff;

/// CoreSight ID registers (PIDR4..PIDR7, PIDR0..PIDR3, CIDR0..CIDR3) for an ARM GICv3.
const GIC_ID_REGS: [u8; 12] = [
    0x44, 0x00, 0x00, 0x00, 0x92, 0xB4, 0x3B, 0x00, 0x0D, 0xF0, 0x05, 0xB1,
];

/// Value of the ID register at `offset` from the start of the ID register block.
pub fn gic_idreg(offset: u64) -> u32 {
    GIC_ID_REGS
        .get((offset / 4) as usize)
        .copied()
        .map(u32::from)
        .unwrap_or(0)
}

/// Register state of the distributor that is saved in a snapshot.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DistributorSnapshot {
    ctlr: u32,
    irqs: IrqState,
    irouter: Vec<u64>,
}

pub struct Distributor {
    ctlr: u32,
    num_irqs: u32,
    security_extensions: bool,
    irqs: IrqState,
    irouter: Vec<u64>,
    /// Redistributor each SPI is routed to, recomputed whenever GICD_IROUTER<n> changes.
    irouter_target: Vec<Option<usize>>,
    /// Affinity of each redistributor, indexed like the redistributor arena.
    affinities: Vec<u32>,
}

impl Distributor {
    pub fn new(num_irqs: u32, security_extensions: bool, affinities: Vec<u32>) -> Self {
        let mut dist = Distributor {
            ctlr: 0,
            num_irqs,
            security_extensions,
            irqs: IrqState::new(num_irqs as usize),
            irouter: vec![0; num_irqs as usize],
            irouter_target: vec![None; num_irqs as usize],
            affinities,
        };
        dist.reset(false);
        dist
    }

    pub fn reset(&mut self, irq_reset_nonsecure: bool) {
        // Affinity routing is always enabled.
        self.ctlr = if self.security_extensions {
            GICD_CTLR_ARE_S | GICD_CTLR_ARE_NS
        } else {
            GICD_CTLR_DS | GICD_CTLR_ARE_S
        };
        self.irqs = IrqState::new(self.num_irqs as usize);
        if irq_reset_nonsecure {
            self.irqs.group.fill(!0);
            self.irqs.group.set_word(0, 0);
        }
        self.irouter.iter_mut().for_each(|r| *r = 0);
        self.recompute_targets();
    }

    pub fn ctlr(&self) -> u32 {
        self.ctlr
    }

    /// GICD_CTLR.DS: the GIC only supports a single security state.
    pub fn security_disabled(&self) -> bool {
        self.ctlr & GICD_CTLR_DS != 0
    }

    pub fn num_irqs(&self) -> u32 {
        self.num_irqs
    }

    pub fn irq_group(&self, irq: u32) -> IrqGroup {
        self.irqs.group_of(irq, self.security_disabled())
    }

    /// Redistributor `irq` is routed to, if any.
    pub fn target(&self, irq: u32) -> Option<usize> {
        self.irouter_target.get(irq as usize).copied().flatten()
    }

    pub fn is_active(&self, irq: u32) -> bool {
        self.irqs.active.get(irq)
    }

    pub fn is_pending(&self, irq: u32) -> bool {
        self.irqs.is_pending(irq)
    }

    /// Highest priority eligible SPI routed to `cpu`.
    pub fn highest_pending_for(&self, cpu: usize) -> Option<(u32, u8)> {
        self.irqs
            .highest_pending(GIC_INTERNAL..self.num_irqs, self.ctlr, |irq| {
                self.irouter_target[irq as usize] == Some(cpu)
            })
    }

    /// Updates the input level of SPI `irq`. Returns false if nothing changed.
    pub fn set_irq(&mut self, irq: u32, level: bool) -> bool {
        if self.irqs.level.get(irq) == level {
            return false;
        }
        self.irqs.level.set(irq, level);
        if level && self.irqs.edge_trigger.get(irq) {
            self.irqs.pending.set(irq, true);
        }
        true
    }

    /// Pending -> Active on acknowledge.
    pub fn activate(&mut self, irq: u32) {
        self.irqs.active.set(irq, true);
        self.irqs.pending.set(irq, false);
    }

    pub fn deactivate(&mut self, irq: u32) {
        self.irqs.active.set(irq, false);
    }

    fn recompute_target(&mut self, irq: u32) {
        let router = self.irouter[irq as usize];
        let tgtaff = (((router >> 32) & 0xff) << 24) as u32 | (router & 0xff_ffff) as u32;
        self.irouter_target[irq as usize] = self.affinities.iter().position(|&a| a == tgtaff);
    }

    /// Rebuilds the routing cache of every SPI.
    pub fn recompute_targets(&mut self) {
        for irq in GIC_INTERNAL..self.num_irqs {
            self.recompute_target(irq);
        }
    }

    fn is_spi(&self, irq: u32) -> bool {
        irq >= GIC_INTERNAL && irq < self.num_irqs
    }

    /// Interrupt word covered by the bitmap register at `offset` from `base`, if it holds
    /// SPIs. The private words are RAZ/WI while affinity routing is enabled.
    fn spi_word(&self, offset: u64, base: u64) -> Option<usize> {
        let index = ((offset - base) / 4) as usize;
        if index == 0 || index >= self.irqs.group.len_words() {
            None
        } else {
            Some(index)
        }
    }

    fn ns_group_locked(&self, secure: bool) -> bool {
        !secure && !self.security_disabled()
    }

    fn read_priority(&self, irq: u32, secure: bool) -> u8 {
        if !self.is_spi(irq) {
            return 0;
        }
        let prio = self.irqs.priority[irq as usize];
        if self.ns_group_locked(secure) {
            if !self.irqs.group.get(irq) {
                return 0;
            }
            return ns_priority_view(prio);
        }
        prio
    }

    fn write_priority(&mut self, irq: u32, value: u8, secure: bool) -> bool {
        if !self.is_spi(irq) {
            return false;
        }
        let value = if self.ns_group_locked(secure) {
            if !self.irqs.group.get(irq) {
                return false;
            }
            ns_priority_write(value)
        } else {
            value
        };
        let old = std::mem::replace(&mut self.irqs.priority[irq as usize], value);
        old != value
    }

    fn router_accessible(&self, irq: u32, secure: bool) -> bool {
        if !self.is_spi(irq) {
            return false;
        }
        let mask = self.irqs.access_mask(
            (irq / 32) as usize,
            secure,
            self.security_disabled(),
            Some(NsAccess::Routing),
        );
        mask & (1 << (irq % 32)) != 0
    }

    /// Mask of one 16-interrupt ICFGR/NSACR register, spread to two bits per interrupt.
    fn two_bit_mask(&self, reg: usize, secure: bool) -> u32 {
        let word_mask = self.irqs.access_mask(reg / 2, secure, self.security_disabled(), None);
        let mask = half_mask(word_mask, reg);
        (0..16)
            .filter(|i| mask & (1 << i) != 0)
            .fold(0, |acc, i| acc | (3 << (i * 2)))
    }

    fn readl(&self, offset: u64, secure: bool) -> Option<u32> {
        let ds = self.security_disabled();
        let value = match offset {
            GICD_CTLR => {
                if secure || ds {
                    self.ctlr
                } else {
                    self.ctlr & (GICD_CTLR_ARE_S | GICD_CTLR_EN_GRP1NS | GICD_CTLR_RWP)
                }
            }
            GICD_TYPER => {
                let itlinesnumber = self.num_irqs / 32 - 1;
                let sec_extn = if ds { 0 } else { GICD_TYPER_SECURITY_EXTN };
                GICD_TYPER_NO1N
                    | GICD_TYPER_A3V
                    | sec_extn
                    | (0xf << GICD_TYPER_IDBITS_SHIFT)
                    | itlinesnumber
            }
            GICD_IIDR => GICD_IIDR_VALUE,
            GICD_TYPER2 | GICD_STATUSR => 0,
            o if (GICD_SETSPI_NSR..=GICD_CLRSPI_SR).contains(&o) => 0,
            o if (GICD_IGROUPR..GICD_ISENABLER).contains(&o) => {
                if self.ns_group_locked(secure) {
                    0
                } else {
                    self.spi_word(o, GICD_IGROUPR)
                        .map_or(0, |w| self.irqs.read_field(IrqField::Group, w, !0))
                }
            }
            o if (GICD_ISENABLER..GICD_ISPENDR).contains(&o) => {
                let base = if o < GICD_ICENABLER { GICD_ISENABLER } else { GICD_ICENABLER };
                self.read_bitmap(o, base, IrqField::Enabled, secure, None)
            }
            o if (GICD_ISPENDR..GICD_ISACTIVER).contains(&o) => {
                let base = if o < GICD_ICPENDR { GICD_ISPENDR } else { GICD_ICPENDR };
                self.read_bitmap(o, base, IrqField::Pending, secure, Some(NsAccess::SetPending))
            }
            o if (GICD_ISACTIVER..GICD_IPRIORITYR).contains(&o) => {
                let base = if o < GICD_ICACTIVER { GICD_ISACTIVER } else { GICD_ICACTIVER };
                self.read_bitmap(o, base, IrqField::Active, secure, Some(NsAccess::ClearPending))
            }
            o if (GICD_IPRIORITYR..GICD_ITARGETSR).contains(&o) => {
                let first = (o - GICD_IPRIORITYR) as u32;
                (0..4).fold(0, |acc, i| {
                    acc | u32::from(self.read_priority(first + i, secure)) << (i * 8)
                })
            }
            // Affinity routing is always on, so GICD_ITARGETSR<n> is RES0.
            o if (GICD_ITARGETSR..GICD_ICFGR).contains(&o) => 0,
            o if (GICD_ICFGR..GICD_IGRPMODR).contains(&o) => {
                let reg = ((o - GICD_ICFGR) / 4) as usize;
                if reg < 2 || reg * 16 >= self.num_irqs as usize {
                    0
                } else {
                    self.irqs.icfgr(reg) & self.two_bit_mask(reg, secure)
                }
            }
            o if (GICD_IGRPMODR..GICD_NSACR).contains(&o) => {
                if ds || !secure {
                    0
                } else {
                    self.spi_word(o, GICD_IGRPMODR)
                        .map_or(0, |w| self.irqs.read_field(IrqField::GroupMod, w, !0))
                }
            }
            o if (GICD_NSACR..GICD_SGIR).contains(&o) => {
                let reg = ((o - GICD_NSACR) / 4) as usize;
                if ds || !secure || reg < 2 || reg * 16 >= self.num_irqs as usize {
                    0
                } else {
                    self.irqs.nsacr_reg(reg)
                }
            }
            // The legacy SGI registers are RAZ/WI with affinity routing enabled.
            o if (GICD_SGIR..GICD_SPENDSGIR_END).contains(&o) => 0,
            o if (GICD_IROUTER..GICD_IROUTER_END).contains(&o) => {
                let irq = ((o - GICD_IROUTER) / 8) as u32;
                let router = if self.router_accessible(irq, secure) {
                    self.irouter[irq as usize]
                } else {
                    0
                };
                if o % 8 >= 4 {
                    (router >> 32) as u32
                } else {
                    router as u32
                }
            }
            o if (GICD_IDREGS..GICD_IDREGS_END).contains(&o) => gic_idreg(o - GICD_IDREGS),
            _ => return None,
        };
        Some(value)
    }

    fn read_bitmap(
        &self,
        offset: u64,
        base: u64,
        field: IrqField,
        secure: bool,
        grant: Option<NsAccess>,
    ) -> u32 {
        match self.spi_word(offset, base) {
            Some(w) => {
                let mask = self.irqs.access_mask(w, secure, self.security_disabled(), grant);
                self.irqs.read_field(field, w, mask)
            }
            None => 0,
        }
    }

    fn write_ctlr(&mut self, value: u32, secure: bool) -> bool {
        let mask = if self.security_disabled() {
            // DS is RAO/WI and only the two group enables are writable.
            GICD_CTLR_EN_GRP0 | GICD_CTLR_EN_GRP1NS
        } else if secure {
            GICD_CTLR_DS | GICD_CTLR_EN_GRP0 | GICD_CTLR_EN_GRP1NS | GICD_CTLR_EN_GRP1S
        } else {
            GICD_CTLR_EN_GRP1NS
        };
        let old = self.ctlr;
        self.ctlr = (self.ctlr & !mask) | (value & mask);
        if value & mask & GICD_CTLR_DS != 0 {
            // EnableGrp1S and ARE_NS are RES0 once DS is set. DS itself is then read-only,
            // so this can only be undone by a reset.
            self.ctlr &= !(GICD_CTLR_EN_GRP1S | GICD_CTLR_ARE_NS);
        }
        trace!("GICD_CTLR write {:#x}: {:#x} -> {:#x}", value, old, self.ctlr);
        old != self.ctlr
    }

    fn writel(&mut self, offset: u64, value: u32, secure: bool) -> Option<bool> {
        let ds = self.security_disabled();
        let changed = match offset {
            GICD_CTLR => self.write_ctlr(value, secure),
            GICD_TYPER | GICD_IIDR | GICD_TYPER2 => {
                warn!("GICD write to read-only register {:#x}", offset);
                false
            }
            GICD_STATUSR => false,
            o if (GICD_SETSPI_NSR..=GICD_CLRSPI_SR).contains(&o) => false,
            o if (GICD_IGROUPR..GICD_ISENABLER).contains(&o) => {
                match self.spi_word(o, GICD_IGROUPR) {
                    Some(w) if !self.ns_group_locked(secure) => {
                        self.irqs.write_field(IrqField::Group, w, value, !0)
                    }
                    _ => false,
                }
            }
            o if (GICD_ISENABLER..GICD_ICENABLER).contains(&o) => {
                self.write_bitmap(o, GICD_ISENABLER, IrqField::Enabled, value, secure, None, true)
            }
            o if (GICD_ICENABLER..GICD_ISPENDR).contains(&o) => {
                self.write_bitmap(o, GICD_ICENABLER, IrqField::Enabled, value, secure, None, false)
            }
            o if (GICD_ISPENDR..GICD_ICPENDR).contains(&o) => self.write_bitmap(
                o,
                GICD_ISPENDR,
                IrqField::Pending,
                value,
                secure,
                Some(NsAccess::SetPending),
                true,
            ),
            o if (GICD_ICPENDR..GICD_ISACTIVER).contains(&o) => self.write_bitmap(
                o,
                GICD_ICPENDR,
                IrqField::Pending,
                value,
                secure,
                Some(NsAccess::ClearPending),
                false,
            ),
            o if (GICD_ISACTIVER..GICD_ICACTIVER).contains(&o) => {
                self.write_bitmap(o, GICD_ISACTIVER, IrqField::Active, value, secure, None, true)
            }
            o if (GICD_ICACTIVER..GICD_IPRIORITYR).contains(&o) => {
                self.write_bitmap(o, GICD_ICACTIVER, IrqField::Active, value, secure, None, false)
            }
            o if (GICD_IPRIORITYR..GICD_ITARGETSR).contains(&o) => {
                let first = (o - GICD_IPRIORITYR) as u32;
                (0..4).fold(false, |changed, i| {
                    self.write_priority(first + i, (value >> (i * 8)) as u8, secure) | changed
                })
            }
            o if (GICD_ITARGETSR..GICD_ICFGR).contains(&o) => false,
            o if (GICD_ICFGR..GICD_IGRPMODR).contains(&o) => {
                let reg = ((o - GICD_ICFGR) / 4) as usize;
                if reg < 2 || reg * 16 >= self.num_irqs as usize {
                    false
                } else {
                    let mask = self.two_bit_mask(reg, secure);
                    let irq_mask = (0..16)
                        .filter(|i| mask & (3 << (i * 2)) != 0)
                        .fold(0, |acc, i| acc | (1 << i));
                    self.irqs.write_icfgr(reg, value, irq_mask)
                }
            }
            o if (GICD_IGRPMODR..GICD_NSACR).contains(&o) => match self.spi_word(o, GICD_IGRPMODR) {
                Some(w) if secure && !ds => self.irqs.write_field(IrqField::GroupMod, w, value, !0),
                _ => false,
            },
            o if (GICD_NSACR..GICD_SGIR).contains(&o) => {
                let reg = ((o - GICD_NSACR) / 4) as usize;
                if secure && !ds && reg >= 2 && reg * 16 < self.num_irqs as usize {
                    self.irqs.write_nsacr_reg(reg, value);
                }
                // NSACR only affects register access, never interrupt delivery.
                false
            }
            o if (GICD_SGIR..GICD_SPENDSGIR_END).contains(&o) => false,
            o if (GICD_IROUTER..GICD_IROUTER_END).contains(&o) => {
                let irq = ((o - GICD_IROUTER) / 8) as u32;
                let old = self.irouter.get(irq as usize).copied().unwrap_or(0);
                let new = if o % 8 >= 4 {
                    (old & 0xffff_ffff) | (u64::from(value) << 32)
                } else {
                    (old & !0xffff_ffff) | u64::from(value)
                };
                self.write_irouter(irq, new, secure)
            }
            o if (GICD_IDREGS..GICD_IDREGS_END).contains(&o) => {
                warn!("GICD write to read-only ID register {:#x}", o);
                false
            }
            _ => return None,
        };
        Some(changed)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_bitmap(
        &mut self,
        offset: u64,
        base: u64,
        field: IrqField,
        value: u32,
        secure: bool,
        grant: Option<NsAccess>,
        set: bool,
    ) -> bool {
        let w = match self.spi_word(offset, base) {
            Some(w) => w,
            None => return false,
        };
        let mask = self.irqs.access_mask(w, secure, self.security_disabled(), grant);
        if set {
            self.irqs.set_field(field, w, value, mask)
        } else {
            self.irqs.clear_field(field, w, value, mask)
        }
    }

    fn write_irouter(&mut self, irq: u32, value: u64, secure: bool) -> bool {
        if !self.router_accessible(irq, secure) {
            return false;
        }
        let value = value & GICD_IROUTER_AFF_MASK;
        let old = std::mem::replace(&mut self.irouter[irq as usize], value);
        // The target cache must be valid before anything recomputes.
        self.recompute_target(irq);
        trace!(
            "GICD_IROUTER{} = {:#x} -> cpu {:?}",
            irq,
            value,
            self.irouter_target[irq as usize]
        );
        old != value
    }

    /// MMIO read of `size` bytes at `offset`. Invalid accesses read as zero.
    pub fn read(&self, offset: u64, size: usize, secure: bool) -> u64 {
        let value = match size {
            1 | 2 if (GICD_IPRIORITYR..GICD_ITARGETSR).contains(&offset) => {
                let first = (offset - GICD_IPRIORITYR) as u32;
                Some((0..size as u32).fold(0u64, |acc, i| {
                    acc | u64::from(self.read_priority(first + i, secure)) << (i * 8)
                }))
            }
            1 | 2 if (GICD_ITARGETSR..GICD_ICFGR).contains(&offset) => Some(0),
            4 => self.readl(offset, secure).map(u64::from),
            8 if (GICD_IROUTER..GICD_IROUTER_END).contains(&offset) && offset % 8 == 0 => {
                let irq = ((offset - GICD_IROUTER) / 8) as u32;
                Some(if self.router_accessible(irq, secure) {
                    self.irouter[irq as usize]
                } else {
                    0
                })
            }
            8 => self
                .readl(offset, secure)
                .zip(self.readl(offset + 4, secure))
                .map(|(lo, hi)| u64::from(lo) | u64::from(hi) << 32),
            _ => None,
        };
        match value {
            Some(v) => {
                trace!("GICD read {:#x} size {} = {:#x}", offset, size, v);
                v
            }
            None => {
                warn!("GICD read from invalid offset {:#x} size {}", offset, size);
                0
            }
        }
    }

    /// MMIO write of `size` bytes at `offset`. Returns true if any interrupt state changed,
    /// in which case every redistributor must recompute its highest priority pending
    /// interrupt.
    pub fn write(&mut self, offset: u64, size: usize, value: u64, secure: bool) -> bool {
        trace!("GICD write {:#x} size {} = {:#x}", offset, size, value);
        let changed = match size {
            1 | 2 if (GICD_IPRIORITYR..GICD_ITARGETSR).contains(&offset) => {
                let first = (offset - GICD_IPRIORITYR) as u32;
                Some((0..size as u32).fold(false, |changed, i| {
                    self.write_priority(first + i, (value >> (i * 8)) as u8, secure) | changed
                }))
            }
            1 | 2 if (GICD_ITARGETSR..GICD_ICFGR).contains(&offset) => Some(false),
            4 => self.writel(offset, value as u32, secure),
            8 if (GICD_IROUTER..GICD_IROUTER_END).contains(&offset) && offset % 8 == 0 => {
                let irq = ((offset - GICD_IROUTER) / 8) as u32;
                Some(self.write_irouter(irq, value, secure))
            }
            8 => {
                let lo = self.writel(offset, value as u32, secure);
                let hi = self.writel(offset + 4, (value >> 32) as u32, secure);
                lo.zip(hi).map(|(lo, hi)| lo | hi)
            }
            _ => None,
        };
        changed.unwrap_or_else(|| {
            warn!("GICD write to invalid offset {:#x} size {}", offset, size);
            false
        })
    }

    pub fn snapshot(&self) -> DistributorSnapshot {
        DistributorSnapshot {
            ctlr: self.ctlr,
            irqs: self.irqs.clone(),
            irouter: self.irouter.clone(),
        }
    }

    /// Whether `snapshot` was taken from a distributor with the same number of interrupts.
    pub fn accepts(&self, snapshot: &DistributorSnapshot) -> bool {
        snapshot.irqs.is_shaped_for(self.num_irqs as usize)
            && snapshot.irouter.len() == self.num_irqs as usize
    }

    /// Restores register state and rebuilds the routing cache. The snapshot must pass
    /// `accepts`.
    pub fn restore(&mut self, snapshot: DistributorSnapshot) {
        self.ctlr = snapshot.ctlr;
        self.irqs = snapshot.irqs;
        self.irouter = snapshot.irouter;
        self.recompute_targets();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secure_dist() -> Distributor {
        Distributor::new(64, true, vec![0, 1])
    }

    #[test]
    fn ds_is_one_way() {
        let mut dist = secure_dist();
        let all = GICD_CTLR_EN_GRP0 | GICD_CTLR_EN_GRP1NS | GICD_CTLR_EN_GRP1S;
        dist.write(GICD_CTLR, 4, u64::from(all), true);
        assert_eq!(dist.ctlr() & all, all);
        assert_ne!(dist.ctlr() & GICD_CTLR_ARE_NS, 0);

        dist.write(GICD_CTLR, 4, u64::from(all | GICD_CTLR_DS), true);
        assert!(dist.security_disabled());
        assert_eq!(dist.ctlr() & (GICD_CTLR_EN_GRP1S | GICD_CTLR_ARE_NS), 0);

        dist.write(GICD_CTLR, 4, u64::from(all | GICD_CTLR_ARE_NS), true);
        assert!(dist.security_disabled());
        assert_eq!(dist.ctlr() & (GICD_CTLR_EN_GRP1S | GICD_CTLR_ARE_NS), 0);
    }

    #[test]
    fn non_secure_ctlr_view() {
        let mut dist = secure_dist();
        dist.write(GICD_CTLR, 4, u64::from(GICD_CTLR_EN_GRP0), false);
        assert_eq!(dist.ctlr() & GICD_CTLR_EN_GRP0, 0);
        dist.write(GICD_CTLR, 4, u64::from(GICD_CTLR_EN_GRP1NS), false);
        assert_eq!(dist.read(GICD_CTLR, 4, false), u64::from(GICD_CTLR_ARE_S | GICD_CTLR_EN_GRP1NS));
    }

    #[test]
    fn typer_reports_lines_and_security() {
        let dist = secure_dist();
        let typer = dist.read(GICD_TYPER, 4, true) as u32;
        assert_eq!(typer & 0x1f, 1);
        assert_ne!(typer & GICD_TYPER_SECURITY_EXTN, 0);
        let dist = Distributor::new(96, false, vec![0]);
        let typer = dist.read(GICD_TYPER, 4, true) as u32;
        assert_eq!(typer & 0x1f, 2);
        assert_eq!(typer & GICD_TYPER_SECURITY_EXTN, 0);
    }

    #[test]
    fn secure_interrupts_hidden_from_non_secure() {
        let mut dist = secure_dist();
        // IRQ 32 is Group 0 (reset value), IRQ 33 is Group 1 Non-secure.
        dist.write(GICD_IGROUPR + 4, 4, 0b10, true);
        dist.write(GICD_ISENABLER + 4, 4, 0b11, false);
        assert_eq!(dist.read(GICD_ISENABLER + 4, 4, true), 0b10);
        dist.write(GICD_IPRIORITYR + 32, 1, 0x40, false);
        dist.write(GICD_IPRIORITYR + 33, 1, 0x40, false);
        assert_eq!(dist.read(GICD_IPRIORITYR + 32, 1, true), 0);
        assert_eq!(dist.read(GICD_IPRIORITYR + 33, 1, true), 0xa0);
        assert_eq!(dist.read(GICD_IPRIORITYR + 33, 1, false), 0x40);
        // Non-secure code cannot see or change the groups.
        assert_eq!(dist.read(GICD_IGROUPR + 4, 4, false), 0);
        dist.write(GICD_IGROUPR + 4, 4, !0, false);
        assert_eq!(dist.read(GICD_IGROUPR + 4, 4, true), 0b10);
    }

    #[test]
    fn nsacr_grants_pending_access() {
        let mut dist = secure_dist();
        dist.write(GICD_NSACR + 8, 4, 0b01, true);
        dist.write(GICD_ISPENDR + 4, 4, 0b11, false);
        assert_eq!(dist.read(GICD_ISPENDR + 4, 4, true), 0b01);
        // Clearing needs NSACR >= 2.
        dist.write(GICD_ICPENDR + 4, 4, 0b01, false);
        assert_eq!(dist.read(GICD_ISPENDR + 4, 4, true), 0b01);
        dist.write(GICD_NSACR + 8, 4, 0b10, true);
        dist.write(GICD_ICPENDR + 4, 4, 0b01, false);
        assert_eq!(dist.read(GICD_ISPENDR + 4, 4, true), 0);
        // NSACR itself is Secure only.
        assert_eq!(dist.read(GICD_NSACR + 8, 4, false), 0);
    }

    #[test]
    fn irouter_updates_target_cache() {
        let mut dist = Distributor::new(64, false, vec![0x0, 0x1, 0x0100_0002]);
        assert_eq!(dist.target(40), Some(0));
        dist.write(GICD_IROUTER + 40 * 8, 8, 1, true);
        assert_eq!(dist.target(40), Some(1));
        // Aff3 lives in bits [39:32].
        dist.write(GICD_IROUTER + 40 * 8 + 4, 4, 1, true);
        assert_eq!(dist.target(40), None);
        dist.write(GICD_IROUTER + 40 * 8, 4, 2, true);
        assert_eq!(dist.target(40), Some(2));
        // IRM is RAZ/WI.
        dist.write(GICD_IROUTER + 41 * 8, 8, 1 << 31, true);
        assert_eq!(dist.read(GICD_IROUTER + 41 * 8, 8, true), 0);
    }

    #[test]
    fn set_irq_latches_edges_only() {
        let mut dist = Distributor::new(64, false, vec![0]);
        dist.write(GICD_ICFGR + 8, 4, 0b10, true);
        assert!(dist.set_irq(32, true));
        assert!(!dist.set_irq(32, true));
        assert!(dist.set_irq(32, false));
        assert!(dist.is_pending(32));
        assert!(dist.set_irq(33, true));
        assert!(dist.set_irq(33, false));
        assert!(!dist.is_pending(33));
    }

    #[test]
    fn private_words_are_raz_wi() {
        let mut dist = Distributor::new(64, false, vec![0]);
        assert!(!dist.write(GICD_ISENABLER, 4, !0, true));
        assert_eq!(dist.read(GICD_ISENABLER, 4, true), 0);
        assert_eq!(dist.read(GICD_IPRIORITYR, 1, true), 0);
    }

    #[test]
    fn invalid_accesses_are_ignored() {
        let mut dist = Distributor::new(64, false, vec![0]);
        assert_eq!(dist.read(0x5000, 4, true), 0);
        assert!(!dist.write(0x5000, 4, 1, true));
        assert_eq!(dist.read(GICD_CTLR, 1, true), 0);
        assert_eq!(dist.read(GICD_IDREGS + 0x18, 4, true), 0x3b);
    }
}
