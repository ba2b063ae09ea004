// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! GICv3 Redistributor (GICR): per-CPU SGI/PPI state and the highest priority pending
//! interrupt cache that feeds the CPU interface.

use log::trace;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::context::IrqGroup;
use crate::distributor::gic_idreg;
use crate::distributor::Distributor;
use crate::state::half_mask;
use crate::state::ns_priority_view;
use crate::state::ns_priority_write;
use crate::state::IrqField;
use crate::state::IrqState;
use crate::state::NsAccess;
use crate::GIC_IDLE_PRIORITY;
use crate::GIC_INTERNAL;
use crate::INTID_SPURIOUS;

// GICR register offsets - RD base (first 64KB)
const GICR_CTLR: u64 = 0x0000;
const GICR_IIDR: u64 = 0x0004;
const GICR_TYPER: u64 = 0x0008;
const GICR_TYPER_HI: u64 = 0x000C;
const GICR_STATUSR: u64 = 0x0010;
const GICR_WAKER: u64 = 0x0014;
const GICR_SETLPIR: u64 = 0x0040;
const GICR_PENDBASER_END: u64 = 0x0080;
const GICR_IDREGS: u64 = 0xFFD0;
const GICR_IDREGS_END: u64 = 0x10000;

// GICR SGI base (second 64KB, offset 0x10000)
const GICR_SGI_BASE: u64 = 0x10000;
const GICR_IGROUPR0: u64 = GICR_SGI_BASE + 0x0080;
const GICR_ISENABLER0: u64 = GICR_SGI_BASE + 0x0100;
const GICR_ICENABLER0: u64 = GICR_SGI_BASE + 0x0180;
const GICR_ISPENDR0: u64 = GICR_SGI_BASE + 0x0200;
const GICR_ICPENDR0: u64 = GICR_SGI_BASE + 0x0280;
const GICR_ISACTIVER0: u64 = GICR_SGI_BASE + 0x0300;
const GICR_ICACTIVER0: u64 = GICR_SGI_BASE + 0x0380;
const GICR_IPRIORITYR: u64 = GICR_SGI_BASE + 0x0400;
const GICR_IPRIORITYR_END: u64 = GICR_IPRIORITYR + 0x20;
const GICR_ICFGR0: u64 = GICR_SGI_BASE + 0x0C00;
const GICR_ICFGR1: u64 = GICR_SGI_BASE + 0x0C04;
const GICR_IGRPMODR0: u64 = GICR_SGI_BASE + 0x0D00;
const GICR_NSACR: u64 = GICR_SGI_BASE + 0x0E00;

/// GICR_IIDR: implementer ARM.
const GICR_IIDR_VALUE: u32 = 0x43b;

const GICR_TYPER_LAST: u64 = 1 << 4;

// GICR_WAKER bits
const GICR_WAKER_PROCESSOR_SLEEP: u32 = 1 << 1;
const GICR_WAKER_CHILDREN_ASLEEP: u32 = 1 << 2;

/// SGIs are always edge-triggered.
const GICR_ICFGR0_VALUE: u32 = 0xaaaa_aaaa;

/// Highest priority pending interrupt of one CPU, as forwarded to its CPU interface.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Hppi {
    pub irq: u32,
    pub prio: u8,
    pub group: IrqGroup,
}

impl Hppi {
    /// Nothing pending.
    pub const IDLE: Hppi = Hppi {
        irq: INTID_SPURIOUS,
        prio: GIC_IDLE_PRIORITY,
        group: IrqGroup::Group0,
    };

    pub fn is_idle(&self) -> bool {
        self.prio == GIC_IDLE_PRIORITY
    }
}

impl Default for Hppi {
    fn default() -> Self {
        Hppi::IDLE
    }
}

/// Register state of a redistributor that is saved in a snapshot.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RedistributorSnapshot {
    waker: u32,
    irqs: IrqState,
}

/// Per-CPU redistributor state.
#[derive(Debug)]
pub struct Redistributor {
    /// Index of this redistributor (and its CPU) in the arena.
    cpu: usize,
    affinity: u32,
    /// Whether this is the last redistributor in the contiguous GICR region.
    is_last: bool,
    waker: u32,
    irqs: IrqState,
    hppi: Hppi,
}

impl Redistributor {
    pub fn new(cpu: usize, affinity: u32, is_last: bool) -> Self {
        let mut redist = Redistributor {
            cpu,
            affinity,
            is_last,
            waker: 0,
            irqs: IrqState::new(GIC_INTERNAL as usize),
            hppi: Hppi::IDLE,
        };
        redist.reset(false);
        redist
    }

    pub fn reset(&mut self, irq_reset_nonsecure: bool) {
        // Redistributors come out of reset asleep.
        self.waker = GICR_WAKER_PROCESSOR_SLEEP | GICR_WAKER_CHILDREN_ASLEEP;
        self.irqs = IrqState::new(GIC_INTERNAL as usize);
        self.irqs.edge_trigger.set_word(0, 0xffff);
        if irq_reset_nonsecure {
            self.irqs.group.set_word(0, !0);
        }
        self.hppi = Hppi::IDLE;
    }

    pub fn affinity(&self) -> u32 {
        self.affinity
    }

    pub fn hppi(&self) -> Hppi {
        self.hppi
    }

    pub fn irq_group(&self, irq: u32, ds: bool) -> IrqGroup {
        self.irqs.group_of(irq, ds)
    }

    pub fn is_active(&self, irq: u32) -> bool {
        self.irqs.active.get(irq)
    }

    pub fn is_pending(&self, irq: u32) -> bool {
        self.irqs.is_pending(irq)
    }

    /// Recomputes the highest priority pending interrupt among the local interrupts and the
    /// SPIs routed here. Returns true if it changed.
    pub fn recompute_hppi(&mut self, dist: &Distributor) -> bool {
        let ds = dist.security_disabled();
        let local = self
            .irqs
            .highest_pending(0..GIC_INTERNAL, dist.ctlr(), |_| true)
            .map(|(irq, prio)| Hppi {
                irq,
                prio,
                group: self.irqs.group_of(irq, ds),
            });
        let spi = dist.highest_pending_for(self.cpu).map(|(irq, prio)| Hppi {
            irq,
            prio,
            group: dist.irq_group(irq),
        });
        // Local interrupts have lower INTIDs, so they win a tie.
        let best = match (local, spi) {
            (Some(l), Some(s)) if s.prio < l.prio => s,
            (Some(l), _) => l,
            (None, Some(s)) => s,
            (None, None) => Hppi::IDLE,
        };
        if best == self.hppi {
            return false;
        }
        trace!(
            "GICR{} hppi {} prio {:#x} {:?}",
            self.cpu,
            best.irq,
            best.prio,
            best.group
        );
        self.hppi = best;
        true
    }

    /// Updates the input level of PPI (or SGI) `irq`. Returns false if nothing changed.
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

    pub fn activate(&mut self, irq: u32) {
        self.irqs.active.set(irq, true);
        self.irqs.pending.set(irq, false);
    }

    pub fn deactivate(&mut self, irq: u32) {
        self.irqs.active.set(irq, false);
    }

    /// Accepts an SGI generated by a CPU interface for `group`, if that matches the SGI's
    /// configured group and, for Non-secure senders, GICR_NSACR allows it.
    pub fn send_sgi(&mut self, group: IrqGroup, irq: u32, ns: bool, ds: bool) -> bool {
        let irqgrp = self.irqs.group_of(irq, ds);
        // A Secure Group 1 request may be satisfied by a Group 0 SGI.
        let group = if group == IrqGroup::Group1Secure && irqgrp == IrqGroup::Group0 {
            IrqGroup::Group0
        } else {
            group
        };
        if group != irqgrp {
            trace!("GICR{} SGI {} rejected: group mismatch", self.cpu, irq);
            return false;
        }
        if ns && !ds {
            let nsaccess = self.irqs.nsacr[irq as usize];
            if (irqgrp == IrqGroup::Group0 && nsaccess < 1)
                || (irqgrp == IrqGroup::Group1Secure && nsaccess < 2)
            {
                trace!("GICR{} SGI {} rejected by NSACR", self.cpu, irq);
                return false;
            }
        }
        trace!("GICR{} SGI {} pending", self.cpu, irq);
        self.irqs.pending.set(irq, true);
        true
    }

    fn typer(&self) -> u64 {
        let mut typer = (u64::from(self.affinity) << 32) | ((self.cpu as u64 & 0xffff) << 8);
        if self.is_last {
            typer |= GICR_TYPER_LAST;
        }
        typer
    }

    fn read_priority(&self, irq: u32, secure: bool, ds: bool) -> u8 {
        let prio = self.irqs.priority[irq as usize];
        if !secure && !ds {
            if !self.irqs.group.get(irq) {
                return 0;
            }
            return ns_priority_view(prio);
        }
        prio
    }

    fn write_priority(&mut self, irq: u32, value: u8, secure: bool, ds: bool) -> bool {
        let value = if !secure && !ds {
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

    fn readl(&self, offset: u64, secure: bool, ds: bool) -> Option<u32> {
        let ns_locked = !secure && !ds;
        let value = match offset {
            // LPIs are not implemented, so EnableLPIs is RAZ/WI.
            GICR_CTLR | GICR_STATUSR => 0,
            GICR_IIDR => GICR_IIDR_VALUE,
            GICR_TYPER => self.typer() as u32,
            GICR_TYPER_HI => (self.typer() >> 32) as u32,
            GICR_WAKER => {
                if ns_locked {
                    0
                } else {
                    self.waker
                }
            }
            o if (GICR_SETLPIR..GICR_PENDBASER_END).contains(&o) => 0,
            o if (GICR_IDREGS..GICR_IDREGS_END).contains(&o) => gic_idreg(o - GICR_IDREGS),
            GICR_IGROUPR0 => {
                if ns_locked {
                    0
                } else {
                    self.irqs.group.word(0)
                }
            }
            GICR_ISENABLER0 | GICR_ICENABLER0 => {
                let mask = self.irqs.access_mask(0, secure, ds, None);
                self.irqs.read_field(IrqField::Enabled, 0, mask)
            }
            GICR_ISPENDR0 | GICR_ICPENDR0 => {
                let mask = self.irqs.access_mask(0, secure, ds, Some(NsAccess::SetPending));
                self.irqs.read_field(IrqField::Pending, 0, mask)
            }
            GICR_ISACTIVER0 | GICR_ICACTIVER0 => {
                let mask = self.irqs.access_mask(0, secure, ds, Some(NsAccess::ClearPending));
                self.irqs.read_field(IrqField::Active, 0, mask)
            }
            o if (GICR_IPRIORITYR..GICR_IPRIORITYR_END).contains(&o) => {
                let first = (o - GICR_IPRIORITYR) as u32;
                (0..4).fold(0, |acc, i| {
                    acc | u32::from(self.read_priority(first + i, secure, ds)) << (i * 8)
                })
            }
            GICR_ICFGR0 => GICR_ICFGR0_VALUE,
            GICR_ICFGR1 => {
                let mask = half_mask(self.irqs.access_mask(0, secure, ds, None), 1);
                let spread = (0..16)
                    .filter(|i| mask & (1 << i) != 0)
                    .fold(0u32, |acc, i| acc | (3 << (i * 2)));
                self.irqs.icfgr(1) & spread
            }
            GICR_IGRPMODR0 => {
                if ds || !secure {
                    0
                } else {
                    self.irqs.grpmod.word(0)
                }
            }
            GICR_NSACR => {
                if ds || !secure {
                    0
                } else {
                    self.irqs.nsacr_reg(0)
                }
            }
            _ => return None,
        };
        Some(value)
    }

    fn writel(&mut self, offset: u64, value: u32, secure: bool, ds: bool) -> Option<bool> {
        let ns_locked = !secure && !ds;
        let changed = match offset {
            GICR_CTLR | GICR_STATUSR => false,
            GICR_IIDR | GICR_TYPER | GICR_TYPER_HI => {
                warn!("GICR{} write to read-only register {:#x}", self.cpu, offset);
                false
            }
            GICR_WAKER => {
                if !ns_locked {
                    // The quiescing handshake completes instantly, so ChildrenAsleep just
                    // mirrors ProcessorSleep.
                    let mut waker = value & GICR_WAKER_PROCESSOR_SLEEP;
                    if waker != 0 {
                        waker |= GICR_WAKER_CHILDREN_ASLEEP;
                    }
                    self.waker = waker;
                }
                false
            }
            o if (GICR_SETLPIR..GICR_PENDBASER_END).contains(&o) => false,
            o if (GICR_IDREGS..GICR_IDREGS_END).contains(&o) => {
                warn!("GICR{} write to read-only ID register {:#x}", self.cpu, o);
                false
            }
            GICR_IGROUPR0 => {
                !ns_locked && self.irqs.write_field(IrqField::Group, 0, value, !0)
            }
            GICR_ISENABLER0 => {
                let mask = self.irqs.access_mask(0, secure, ds, None);
                self.irqs.set_field(IrqField::Enabled, 0, value, mask)
            }
            GICR_ICENABLER0 => {
                let mask = self.irqs.access_mask(0, secure, ds, None);
                self.irqs.clear_field(IrqField::Enabled, 0, value, mask)
            }
            GICR_ISPENDR0 => {
                let mask = self.irqs.access_mask(0, secure, ds, Some(NsAccess::SetPending));
                self.irqs.set_field(IrqField::Pending, 0, value, mask)
            }
            GICR_ICPENDR0 => {
                let mask = self.irqs.access_mask(0, secure, ds, Some(NsAccess::ClearPending));
                self.irqs.clear_field(IrqField::Pending, 0, value, mask)
            }
            GICR_ISACTIVER0 => {
                let mask = self.irqs.access_mask(0, secure, ds, None);
                self.irqs.set_field(IrqField::Active, 0, value, mask)
            }
            GICR_ICACTIVER0 => {
                let mask = self.irqs.access_mask(0, secure, ds, None);
                self.irqs.clear_field(IrqField::Active, 0, value, mask)
            }
            o if (GICR_IPRIORITYR..GICR_IPRIORITYR_END).contains(&o) => {
                let first = (o - GICR_IPRIORITYR) as u32;
                (0..4).fold(false, |changed, i| {
                    self.write_priority(first + i, (value >> (i * 8)) as u8, secure, ds) | changed
                })
            }
            GICR_ICFGR0 => false,
            GICR_ICFGR1 => {
                let mask = half_mask(self.irqs.access_mask(0, secure, ds, None), 1);
                self.irqs.write_icfgr(1, value, mask)
            }
            GICR_IGRPMODR0 => {
                secure && !ds && self.irqs.write_field(IrqField::GroupMod, 0, value, !0)
            }
            GICR_NSACR => {
                if secure && !ds {
                    self.irqs.write_nsacr_reg(0, value);
                }
                false
            }
            _ => return None,
        };
        Some(changed)
    }

    /// MMIO read of `size` bytes at `offset` within this redistributor's two frames.
    pub fn read(&self, offset: u64, size: usize, secure: bool, ds: bool) -> u64 {
        let value = match size {
            1 | 2 if (GICR_IPRIORITYR..GICR_IPRIORITYR_END).contains(&offset) => {
                let first = (offset - GICR_IPRIORITYR) as u32;
                Some((0..size as u32).fold(0u64, |acc, i| {
                    acc | u64::from(self.read_priority(first + i, secure, ds)) << (i * 8)
                }))
            }
            4 => self.readl(offset, secure, ds).map(u64::from),
            8 if offset == GICR_TYPER => Some(self.typer()),
            8 if (GICR_SETLPIR..GICR_PENDBASER_END).contains(&offset) => Some(0),
            _ => None,
        };
        match value {
            Some(v) => {
                trace!("GICR{} read {:#x} size {} = {:#x}", self.cpu, offset, size, v);
                v
            }
            None => {
                warn!(
                    "GICR{} read from invalid offset {:#x} size {}",
                    self.cpu, offset, size
                );
                0
            }
        }
    }

    /// MMIO write of `size` bytes at `offset`. Returns true if local interrupt state
    /// changed and the hppi must be recomputed.
    pub fn write(&mut self, offset: u64, size: usize, value: u64, secure: bool, ds: bool) -> bool {
        trace!(
            "GICR{} write {:#x} size {} = {:#x}",
            self.cpu,
            offset,
            size,
            value
        );
        let changed = match size {
            1 | 2 if (GICR_IPRIORITYR..GICR_IPRIORITYR_END).contains(&offset) => {
                let first = (offset - GICR_IPRIORITYR) as u32;
                Some((0..size as u32).fold(false, |changed, i| {
                    self.write_priority(first + i, (value >> (i * 8)) as u8, secure, ds) | changed
                }))
            }
            4 => self.writel(offset, value as u32, secure, ds),
            8 if offset == GICR_TYPER => {
                warn!("GICR{} write to read-only GICR_TYPER", self.cpu);
                Some(false)
            }
            8 if (GICR_SETLPIR..GICR_PENDBASER_END).contains(&offset) => Some(false),
            _ => None,
        };
        changed.unwrap_or_else(|| {
            warn!(
                "GICR{} write to invalid offset {:#x} size {}",
                self.cpu, offset, size
            );
            false
        })
    }

    pub fn snapshot(&self) -> RedistributorSnapshot {
        RedistributorSnapshot {
            waker: self.waker,
            irqs: self.irqs.clone(),
        }
    }

    pub fn accepts(&self, snapshot: &RedistributorSnapshot) -> bool {
        snapshot.irqs.is_shaped_for(GIC_INTERNAL as usize)
    }

    /// Restores register state. The hppi cache is left idle until the caller recomputes it.
    pub fn restore(&mut self, snapshot: RedistributorSnapshot) {
        self.waker = snapshot.waker;
        self.irqs = snapshot.irqs;
        self.hppi = Hppi::IDLE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ds_dist() -> Distributor {
        Distributor::new(64, false, vec![0])
    }

    #[test]
    fn waker_handshake() {
        let mut redist = Redistributor::new(0, 0, true);
        assert_eq!(redist.read(GICR_WAKER, 4, true, true), 0b110);
        redist.write(GICR_WAKER, 4, 0, true, true);
        assert_eq!(redist.read(GICR_WAKER, 4, true, true), 0);
        redist.write(GICR_WAKER, 4, u64::from(GICR_WAKER_PROCESSOR_SLEEP), true, true);
        assert_eq!(redist.read(GICR_WAKER, 4, true, true), 0b110);
    }

    #[test]
    fn waker_is_secure_only() {
        let mut redist = Redistributor::new(0, 0, true);
        redist.write(GICR_WAKER, 4, 0, false, false);
        assert_eq!(redist.read(GICR_WAKER, 4, false, false), 0);
        assert_eq!(redist.read(GICR_WAKER, 4, true, false), 0b110);
    }

    #[test]
    fn typer_fields() {
        let redist = Redistributor::new(3, 0x0102_0304, true);
        let typer = redist.read(GICR_TYPER, 8, true, true);
        assert_eq!(typer >> 32, 0x0102_0304);
        assert_eq!((typer >> 8) & 0xffff, 3);
        assert_ne!(typer & GICR_TYPER_LAST, 0);
        assert_eq!(redist.read(GICR_TYPER_HI, 4, true, true), 0x0102_0304);
    }

    #[test]
    fn icfgr0_is_fixed_edge() {
        let mut redist = Redistributor::new(0, 0, true);
        redist.write(GICR_ICFGR0, 4, 0, true, true);
        assert_eq!(redist.read(GICR_ICFGR0, 4, true, true), 0xaaaa_aaaa);
        redist.write(GICR_ICFGR1, 4, 0x8000_0000, true, true);
        assert_eq!(redist.read(GICR_ICFGR1, 4, true, true), 0x8000_0000);
    }

    #[test]
    fn hppi_prefers_local_on_tie() {
        let mut dist = ds_dist();
        let mut redist = Redistributor::new(0, 0, true);
        // Group 1 for everything, both groups enabled.
        dist.write(0x0, 4, 0b11, true);
        dist.write(0x84, 4, !0, true);
        dist.write(0x104, 4, 1 << 8, true);
        dist.write(0x400 + 40, 1, 0x40, true);
        dist.write(0x204, 4, 1 << 8, true);
        redist.write(GICR_IGROUPR0, 4, !0, true, true);
        redist.write(GICR_ISENABLER0, 4, 1 << 27, true, true);
        redist.write(GICR_IPRIORITYR + 27, 1, 0x40, true, true);

        assert!(redist.recompute_hppi(&dist));
        assert_eq!(redist.hppi().irq, 40);
        assert!(redist.set_irq(27, true));
        assert!(redist.recompute_hppi(&dist));
        assert_eq!(
            redist.hppi(),
            Hppi {
                irq: 27,
                prio: 0x40,
                group: IrqGroup::Group1NonSecure
            }
        );
        assert!(!redist.recompute_hppi(&dist));
    }

    #[test]
    fn sgi_group_and_nsacr_checks() {
        let mut redist = Redistributor::new(0, 0, true);
        // SGI 1 is Group 0 after reset.
        assert!(!redist.send_sgi(IrqGroup::Group1NonSecure, 1, true, false));
        assert!(!redist.send_sgi(IrqGroup::Group0, 1, true, false));
        redist.write(GICR_NSACR, 4, 0b0100, true, false);
        assert!(redist.send_sgi(IrqGroup::Group0, 1, true, false));
        assert!(redist.is_pending(1));
        // Secure Group 1 requests are satisfied by Group 0 SGIs.
        assert!(redist.send_sgi(IrqGroup::Group1Secure, 2, false, false));
    }
}
