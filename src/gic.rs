// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The GICv3 controller: distributor, redistributors and CPU interfaces of every CPU.
//!
//! All state lives behind one lock. Every operation updates the state, recomputes the
//! output lines of the CPUs it affected and only then, with the lock released, drives
//! the lines that changed through each CPU's [`CpuPort`]. A port may therefore call back
//! into the controller from `set_line` and will observe fully updated state. The execution
//! contexts of the CPUs are read from their ports before the lock is taken, so
//! `exec_context` may call back into the controller as well.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use log::debug;
use log::info;
use log::trace;
use log::warn;
use serde::Deserialize;
use serde::Serialize;
use smallvec::SmallVec;

use crate::config::GicConfig;
use crate::context::CpuLine;
use crate::context::CpuPort;
use crate::context::ExecContext;
use crate::context::IrqGroup;
use crate::cpuif::CpuInterface;
use crate::cpuif::SgiRequest;
use crate::distributor::Distributor;
use crate::distributor::DistributorSnapshot;
use crate::redistributor::Hppi;
use crate::redistributor::Redistributor;
use crate::redistributor::RedistributorSnapshot;
use crate::sysreg::AccessResult;
use crate::sysreg::GicSysReg;
use crate::vcpuif::ListRegister;
use crate::vcpuif::VirtualCpuInterface;
use crate::Error;
use crate::Result;
use crate::GIC_INTERNAL;

const NUM_CPU_LINES: usize = 5;

/// Attributes of an MMIO access to the distributor or a redistributor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusAccessInfo {
    /// Offset from the start of the register frame.
    pub offset: u64,
    /// The transaction is Secure.
    pub secure: bool,
}

type CpuSet = SmallVec<[usize; 4]>;
type LineChanges = SmallVec<[(usize, CpuLine, bool); 8]>;
type Contexts = SmallVec<[ExecContext; 4]>;

fn line_index(line: CpuLine) -> usize {
    match line {
        CpuLine::Irq => 0,
        CpuLine::Fiq => 1,
        CpuLine::VirtualIrq => 2,
        CpuLine::VirtualFiq => 3,
        CpuLine::Maintenance => 4,
    }
}

fn add_cpu(cpus: &mut CpuSet, cpu: usize) {
    if !cpus.contains(&cpu) {
        cpus.push(cpu);
    }
}

fn read_le(data: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let len = std::cmp::min(data.len(), 8);
    bytes[..len].copy_from_slice(&data[..len]);
    u64::from_le_bytes(bytes)
}

fn write_le(data: &mut [u8], value: u64) {
    let bytes = value.to_le_bytes();
    let len = std::cmp::min(data.len(), 8);
    data[..len].copy_from_slice(&bytes[..len]);
}

/// Register state of the whole controller, as saved in a snapshot.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct GicSnapshot {
    dist: DistributorSnapshot,
    redists: Vec<RedistributorSnapshot>,
    cpuifs: Vec<CpuInterface>,
    vcpuifs: Vec<VirtualCpuInterface>,
}

struct GicState {
    dist: Distributor,
    redists: Vec<Redistributor>,
    cpuifs: Vec<CpuInterface>,
    /// Empty when the controller has no virtualization support.
    vcpuifs: Vec<VirtualCpuInterface>,
    /// Last level driven on each output line of each CPU.
    lines: Vec<[bool; NUM_CPU_LINES]>,
}

/// A GICv3 interrupt controller with its CPU interfaces.
pub struct Gicv3 {
    config: GicConfig,
    state: Mutex<GicState>,
    ports: Vec<Box<dyn CpuPort>>,
}

impl Gicv3 {
    /// Creates a controller from `config`, with one port per CPU.
    pub fn new(config: GicConfig, ports: Vec<Box<dyn CpuPort>>) -> Result<Gicv3> {
        config.validate()?;
        if ports.len() != config.num_cpus {
            return Err(Error::InvalidNumCpus(ports.len()));
        }
        let num_cpus = config.num_cpus;
        let affinities: Vec<u32> = (0..num_cpus).map(|cpu| config.affinity(cpu)).collect();
        let dist = Distributor::new(
            config.num_irqs,
            config.security_extensions,
            affinities.clone(),
        );
        let redists = affinities
            .iter()
            .enumerate()
            .map(|(cpu, &aff)| Redistributor::new(cpu, aff, cpu == num_cpus - 1))
            .collect();
        let vcpuifs = if config.has_virtualization() {
            (0..num_cpus)
                .map(|_| {
                    VirtualCpuInterface::new(config.num_list_regs, config.vpribits, config.vprebits)
                })
                .collect()
        } else {
            Vec::new()
        };
        let gic = Gicv3 {
            state: Mutex::new(GicState {
                dist,
                redists,
                cpuifs: vec![CpuInterface::new(); num_cpus],
                vcpuifs,
                lines: vec![[false; NUM_CPU_LINES]; num_cpus],
            }),
            config,
            ports,
        };
        gic.lock().reset(&gic.config);
        info!(
            "GICv3 created: {} cpus, {} irqs, security extensions {}, {} list registers",
            gic.config.num_cpus,
            gic.config.num_irqs,
            gic.config.security_extensions,
            gic.config.num_list_regs
        );
        Ok(gic)
    }

    fn lock(&self) -> MutexGuard<'_, GicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current execution context of every CPU. Must be called without the lock held.
    fn exec_contexts(&self) -> Contexts {
        self.ports.iter().map(|port| port.exec_context()).collect()
    }

    pub fn config(&self) -> &GicConfig {
        &self.config
    }

    pub fn num_cpus(&self) -> usize {
        self.config.num_cpus
    }

    /// Resets every component and drives all output lines to their reset level.
    pub fn reset(&self) {
        info!("GICv3 reset");
        let ctxs = self.exec_contexts();
        let changes = {
            let mut s = self.lock();
            s.reset(&self.config);
            let all: CpuSet = (0..self.config.num_cpus).collect();
            self.update(&mut s, &ctxs, &all)
        };
        self.notify(changes);
    }

    /// Sets the input level of shared interrupt `irq`. PPIs and SGIs belong to one CPU
    /// and are set through [`Gicv3::set_private_irq`].
    pub fn set_irq(&self, irq: u32, level: bool) {
        if irq < GIC_INTERNAL || irq >= self.config.num_irqs {
            warn!("GICv3 set_irq: invalid SPI {}", irq);
            return;
        }
        trace!("GICv3 set_irq {} level {}", irq, level);
        let ctxs = self.exec_contexts();
        let changes = {
            let mut s = self.lock();
            if !s.dist.set_irq(irq, level) {
                return;
            }
            let mut cpus = CpuSet::new();
            if let Some(cpu) = s.dist.target(irq) {
                cpus.push(cpu);
            }
            self.recompute_and_update(&mut s, &ctxs, &cpus)
        };
        self.notify(changes);
    }

    /// Sets the input level of PPI or SGI `irq` of `cpu`.
    pub fn set_private_irq(&self, cpu: usize, irq: u32, level: bool) {
        if irq >= GIC_INTERNAL {
            warn!("GICv3 set_private_irq: invalid PPI {}", irq);
            return;
        }
        trace!("GICv3 cpu {} set_private_irq {} level {}", cpu, irq, level);
        let ctxs = self.exec_contexts();
        let changes = {
            let mut s = self.lock();
            if !s.redists[cpu].set_irq(irq, level) {
                return;
            }
            self.recompute_and_update(&mut s, &ctxs, &[cpu])
        };
        self.notify(changes);
    }

    /// MMIO read from the distributor frame. The access size is `data.len()`.
    pub fn distributor_read(&self, info: BusAccessInfo, data: &mut [u8]) {
        let value = self.lock().dist.read(info.offset, data.len(), info.secure);
        write_le(data, value);
    }

    /// MMIO write to the distributor frame. The access size is `data.len()`.
    pub fn distributor_write(&self, info: BusAccessInfo, data: &[u8]) {
        let value = read_le(data);
        let ctxs = self.exec_contexts();
        let changes = {
            let mut s = self.lock();
            if !s.dist.write(info.offset, data.len(), value, info.secure) {
                return;
            }
            // Group enables and routing affect every CPU.
            let all: CpuSet = (0..self.config.num_cpus).collect();
            self.recompute_and_update(&mut s, &ctxs, &all)
        };
        self.notify(changes);
    }

    /// MMIO read from the redistributor frames (RD_base followed by SGI_base) of `cpu`.
    pub fn redistributor_read(&self, cpu: usize, info: BusAccessInfo, data: &mut [u8]) {
        let value = {
            let s = self.lock();
            let ds = s.dist.security_disabled();
            s.redists[cpu].read(info.offset, data.len(), info.secure, ds)
        };
        write_le(data, value);
    }

    /// MMIO write to the redistributor frames of `cpu`.
    pub fn redistributor_write(&self, cpu: usize, info: BusAccessInfo, data: &[u8]) {
        let value = read_le(data);
        let ctxs = self.exec_contexts();
        let changes = {
            let mut s = self.lock();
            let ds = s.dist.security_disabled();
            if !s.redists[cpu].write(info.offset, data.len(), value, info.secure, ds) {
                return;
            }
            self.recompute_and_update(&mut s, &ctxs, &[cpu])
        };
        self.notify(changes);
    }

    /// Checks an access by `cpu` to system register `reg` in its current context. Only
    /// accesses that return [`AccessResult::Ok`] may be passed to
    /// [`Gicv3::sysreg_read`] or [`Gicv3::sysreg_write`].
    pub fn check_sysreg_access(&self, cpu: usize, reg: GicSysReg, is_read: bool) -> AccessResult {
        let ctx = self.ports[cpu].exec_context();
        let s = self.lock();
        reg.check_access(&ctx, s.vcpuifs.get(cpu), is_read)
    }

    /// System register read by `cpu`. ICC_* registers are redirected to the virtual
    /// interface when the CPU's context asks for it.
    pub fn sysreg_read(&self, cpu: usize, reg: GicSysReg) -> u64 {
        let ctxs = self.exec_contexts();
        let ctx = &ctxs[cpu];
        let (value, changes) = {
            let mut s = self.lock();
            let (value, dirty) = if reg.is_virtual(ctx, self.config.has_virtualization()) {
                s.virtual_read(cpu, reg)
            } else {
                s.physical_read(cpu, reg, ctx)
            };
            let changes = if dirty {
                self.recompute_and_update(&mut s, &ctxs, &[cpu])
            } else {
                LineChanges::new()
            };
            (value, changes)
        };
        self.notify(changes);
        value
    }

    /// System register write by `cpu`.
    pub fn sysreg_write(&self, cpu: usize, reg: GicSysReg, value: u64) {
        let ctxs = self.exec_contexts();
        let ctx = &ctxs[cpu];
        let changes = {
            let mut s = self.lock();
            let mut cpus = CpuSet::new();
            add_cpu(&mut cpus, cpu);
            if reg.is_virtual(ctx, self.config.has_virtualization()) {
                s.virtual_write(cpu, reg, value, self.config.num_irqs, &mut cpus);
            } else {
                s.physical_write(cpu, reg, value, ctx, self.config.num_irqs, &mut cpus);
            }
            self.recompute_and_update(&mut s, &ctxs, &cpus)
        };
        self.notify(changes);
    }

    /// Re-evaluates the output lines of `cpu` after its exception level or security state
    /// changed, since IRQ/FIQ selection depends on them.
    pub fn el_change(&self, cpu: usize) {
        let ctxs = self.exec_contexts();
        let changes = {
            let mut s = self.lock();
            self.update(&mut s, &ctxs, &[cpu])
        };
        self.notify(changes);
    }

    /// Highest priority pending interrupt of `cpu`.
    pub fn hppi(&self, cpu: usize) -> Hppi {
        self.lock().redists[cpu].hppi()
    }

    /// Physical running priority of `cpu`.
    pub fn running_priority(&self, cpu: usize) -> u8 {
        self.lock().cpuifs[cpu].running_priority()
    }

    /// List register `idx` of the virtual interface of `cpu`.
    pub fn list_register(&self, cpu: usize, idx: usize) -> ListRegister {
        self.lock().vcpuifs[cpu].list_register(idx)
    }

    /// Whether `irq` is active. SGIs and PPIs are looked up in the redistributor of `cpu`.
    pub fn is_active(&self, cpu: usize, irq: u32) -> bool {
        let s = self.lock();
        if irq < GIC_INTERNAL {
            s.redists[cpu].is_active(irq)
        } else {
            s.dist.is_active(irq)
        }
    }

    /// Whether `irq` is pending, latched or by level.
    pub fn is_pending(&self, cpu: usize, irq: u32) -> bool {
        let s = self.lock();
        if irq < GIC_INTERNAL {
            s.redists[cpu].is_pending(irq)
        } else {
            s.dist.is_pending(irq)
        }
    }

    pub(crate) fn snapshot_state(&self) -> GicSnapshot {
        let s = self.lock();
        GicSnapshot {
            dist: s.dist.snapshot(),
            redists: s.redists.iter().map(|r| r.snapshot()).collect(),
            cpuifs: s.cpuifs.clone(),
            vcpuifs: s.vcpuifs.clone(),
        }
    }

    /// Restores register state and rebuilds every cache and line level without driving
    /// any line: the CPUs restore their own view of the lines. A snapshot that does not
    /// fit this controller is rejected before any state is touched.
    pub(crate) fn restore_state(&self, snapshot: GicSnapshot) -> Result<()> {
        let ctxs = self.exec_contexts();
        let mut s = self.lock();
        self.validate_snapshot(&s, &snapshot)?;
        s.dist.restore(snapshot.dist);
        for (redist, snap) in s.redists.iter_mut().zip(snapshot.redists) {
            redist.restore(snap);
        }
        s.cpuifs = snapshot.cpuifs;
        s.vcpuifs = snapshot.vcpuifs;
        let all: CpuSet = (0..self.config.num_cpus).collect();
        // The returned changes are dropped: restore never signals.
        let _ = self.recompute_and_update(&mut s, &ctxs, &all);
        debug!("GICv3 state restored");
        Ok(())
    }

    fn validate_snapshot(&self, s: &GicState, snapshot: &GicSnapshot) -> Result<()> {
        let num_cpus = self.config.num_cpus;
        if snapshot.redists.len() != num_cpus || snapshot.cpuifs.len() != num_cpus {
            return Err(Error::SnapshotMismatch {
                what: "cpus",
                found: snapshot.redists.len(),
                expected: num_cpus,
            });
        }
        if snapshot.vcpuifs.len() != s.vcpuifs.len() {
            return Err(Error::SnapshotMismatch {
                what: "virtual cpu interfaces",
                found: snapshot.vcpuifs.len(),
                expected: s.vcpuifs.len(),
            });
        }
        if let Some(v) = snapshot
            .vcpuifs
            .iter()
            .find(|v| v.num_list_regs() != self.config.num_list_regs)
        {
            return Err(Error::SnapshotMismatch {
                what: "list registers",
                found: v.num_list_regs(),
                expected: self.config.num_list_regs,
            });
        }
        if !s
            .vcpuifs
            .iter()
            .zip(&snapshot.vcpuifs)
            .all(|(current, snap)| current.same_shape(snap))
        {
            return Err(Error::InvalidSnapshot("virtual priority bits differ"));
        }
        if !snapshot.cpuifs.iter().all(CpuInterface::is_consistent) {
            return Err(Error::InvalidSnapshot("cpu interface register out of range"));
        }
        if !s.dist.accepts(&snapshot.dist) {
            return Err(Error::InvalidSnapshot("distributor interrupt state"));
        }
        if !s
            .redists
            .iter()
            .zip(&snapshot.redists)
            .all(|(redist, snap)| redist.accepts(snap))
        {
            return Err(Error::InvalidSnapshot("redistributor interrupt state"));
        }
        Ok(())
    }

    /// Recomputes the hppi of `cpus` and then their output lines.
    fn recompute_and_update(
        &self,
        s: &mut GicState,
        ctxs: &[ExecContext],
        cpus: &[usize],
    ) -> LineChanges {
        let GicState { dist, redists, .. } = &mut *s;
        for &cpu in cpus {
            redists[cpu].recompute_hppi(dist);
        }
        self.update(s, ctxs, cpus)
    }

    /// Computes the output lines of `cpus`: the virtual interface first, then its
    /// maintenance interrupt is fed back into the redistributor, then the physical
    /// interface in the context `ctxs` gives for the CPU. Returns the lines whose level
    /// changed.
    fn update(&self, s: &mut GicState, ctxs: &[ExecContext], cpus: &[usize]) -> LineChanges {
        let mut changes = LineChanges::new();
        for &cpu in cpus {
            if let Some(vcpuif) = s.vcpuifs.get(cpu) {
                let (virq, vfiq, maint) = vcpuif.output_lines();
                s.set_line(cpu, CpuLine::VirtualIrq, virq, &mut changes);
                s.set_line(cpu, CpuLine::VirtualFiq, vfiq, &mut changes);
                s.set_line(cpu, CpuLine::Maintenance, maint, &mut changes);
                if let Some(intid) = self.config.maintenance_intid {
                    if s.redists[cpu].set_irq(intid, maint) {
                        let GicState { dist, redists, .. } = &mut *s;
                        redists[cpu].recompute_hppi(dist);
                    }
                }
            }
            let hppi = s.redists[cpu].hppi();
            let (irq, fiq) = s.cpuifs[cpu].output_lines(hppi, &ctxs[cpu]);
            s.set_line(cpu, CpuLine::Irq, irq, &mut changes);
            s.set_line(cpu, CpuLine::Fiq, fiq, &mut changes);
        }
        changes
    }

    fn notify(&self, changes: LineChanges) {
        for (cpu, line, level) in changes {
            trace!("GICv3 cpu {} {:?} -> {}", cpu, line, level);
            self.ports[cpu].set_line(line, level);
        }
    }
}

impl GicState {
    fn reset(&mut self, config: &GicConfig) {
        self.dist.reset(config.irq_reset_nonsecure);
        for redist in self.redists.iter_mut() {
            redist.reset(config.irq_reset_nonsecure);
        }
        self.cpuifs.iter_mut().for_each(CpuInterface::reset);
        self.vcpuifs.iter_mut().for_each(VirtualCpuInterface::reset);
    }

    fn set_line(&mut self, cpu: usize, line: CpuLine, level: bool, changes: &mut LineChanges) {
        let current = &mut self.lines[cpu][line_index(line)];
        if *current != level {
            *current = level;
            changes.push((cpu, line, level));
        }
    }

    fn irq_group(&self, cpu: usize, irq: u32) -> IrqGroup {
        if irq < GIC_INTERNAL {
            self.redists[cpu].irq_group(irq, self.dist.security_disabled())
        } else {
            self.dist.irq_group(irq)
        }
    }

    /// Active -> inactive for `irq` of `cpu`, adding the CPU whose hppi may change.
    fn deactivate_irq(&mut self, cpu: usize, irq: u32, cpus: &mut CpuSet) {
        trace!("GICv3 cpu {} deactivate {}", cpu, irq);
        if irq < GIC_INTERNAL {
            self.redists[cpu].deactivate(irq);
        } else if irq < self.dist.num_irqs() {
            self.dist.deactivate(irq);
            if let Some(target) = self.dist.target(irq) {
                add_cpu(cpus, target);
            }
        }
    }

    /// Returns the register value and whether interrupt state changed.
    fn physical_read(&mut self, cpu: usize, reg: GicSysReg, ctx: &ExecContext) -> (u64, bool) {
        use GicSysReg::*;
        let ds = self.dist.security_disabled();
        let hppi = self.redists[cpu].hppi();
        let cpuif = &mut self.cpuifs[cpu];
        let value = match reg {
            IccPmr => cpuif.read_pmr(ctx),
            IccIar0 | IccIar1 => {
                let intid = cpuif.acknowledge(reg == IccIar1, hppi, ctx, ds);
                if intid < crate::INTID_SECURE {
                    if intid < GIC_INTERNAL {
                        self.redists[cpu].activate(intid);
                    } else {
                        self.dist.activate(intid);
                    }
                    return (u64::from(intid), true);
                }
                u64::from(intid)
            }
            IccHppir0 => u64::from(cpuif.hppir0_value(hppi, ctx, ds)),
            IccHppir1 => u64::from(cpuif.hppir1_value(hppi, ctx, ds)),
            IccBpr0 => cpuif.read_bpr(false, ctx),
            IccBpr1 => cpuif.read_bpr(true, ctx),
            IccAp0r(n) => cpuif.read_ap(false, n.into(), ctx),
            IccAp1r(n) => cpuif.read_ap(true, n.into(), ctx),
            IccRpr => cpuif.read_rpr(ctx),
            IccCtlr => cpuif.read_ctlr(ctx),
            IccSre => CpuInterface::read_sre(1),
            IccSreEl2 => CpuInterface::read_sre(2),
            IccSreEl3 => CpuInterface::read_sre(3),
            IccIgrpen0 => cpuif.read_igrpen(false, ctx),
            IccIgrpen1 => cpuif.read_igrpen(true, ctx),
            IccCtlrEl3 => cpuif.read_ctlr_el3(),
            IccIgrpen1El3 => cpuif.read_igrpen1_el3(),
            IccEoir0 | IccEoir1 | IccDir | IccSgi0r | IccSgi1r | IccAsgi1r => {
                warn!("GICv3 cpu {}: read of write-only {:?}", cpu, reg);
                0
            }
            IchAp0r(_) | IchAp1r(_) | IchHcr | IchVtr | IchMisr | IchEisr | IchElrsr
            | IchVmcr | IchLr(_) => self.hyp_read(cpu, reg),
        };
        (value, false)
    }

    fn physical_write(
        &mut self,
        cpu: usize,
        reg: GicSysReg,
        value: u64,
        ctx: &ExecContext,
        num_irqs: u32,
        cpus: &mut CpuSet,
    ) {
        use GicSysReg::*;
        let ds = self.dist.security_disabled();
        let cpuif = &mut self.cpuifs[cpu];
        match reg {
            IccPmr => cpuif.write_pmr(ctx, value),
            IccEoir0 | IccEoir1 => {
                if let Some(irq) = cpuif.end_of_interrupt(reg == IccEoir1, value, ctx, num_irqs) {
                    self.deactivate_irq(cpu, irq, cpus);
                }
            }
            IccDir => {
                let irq = (value & 0xff_ffff) as u32;
                if irq >= num_irqs {
                    return;
                }
                let group = self.irq_group(cpu, irq);
                if self.cpuifs[cpu].may_deactivate(ctx, irq, group, ds) {
                    self.deactivate_irq(cpu, irq, cpus);
                }
            }
            IccBpr0 => cpuif.write_bpr(false, ctx, value),
            IccBpr1 => cpuif.write_bpr(true, ctx, value),
            IccAp0r(n) => cpuif.write_ap(false, n.into(), ctx, value),
            IccAp1r(n) => cpuif.write_ap(true, n.into(), ctx, value),
            IccCtlr => cpuif.write_ctlr(ctx, value, ds),
            IccIgrpen0 => cpuif.write_igrpen(false, ctx, value),
            IccIgrpen1 => cpuif.write_igrpen(true, ctx, value),
            IccCtlrEl3 => cpuif.write_ctlr_el3(value),
            IccIgrpen1El3 => cpuif.write_igrpen1_el3(value),
            IccSre | IccSreEl2 | IccSreEl3 => {}
            IccSgi0r => self.generate_sgi(cpu, value, IrqGroup::Group0, ctx, cpus),
            IccSgi1r | IccAsgi1r => {
                // ASGI1R targets the Group 1 of the other security state.
                let secure_group = ctx.is_secure() == (reg == IccSgi1r);
                let group = if secure_group {
                    IrqGroup::Group1Secure
                } else {
                    IrqGroup::Group1NonSecure
                };
                self.generate_sgi(cpu, value, group, ctx, cpus);
            }
            IccIar0 | IccIar1 | IccHppir0 | IccHppir1 | IccRpr => {
                warn!("GICv3 cpu {}: write to read-only {:?}", cpu, reg);
            }
            IchAp0r(_) | IchAp1r(_) | IchHcr | IchVtr | IchMisr | IchEisr | IchElrsr
            | IchVmcr | IchLr(_) => self.hyp_write(cpu, reg, value),
        }
    }

    fn generate_sgi(
        &mut self,
        cpu: usize,
        value: u64,
        group: IrqGroup,
        ctx: &ExecContext,
        cpus: &mut CpuSet,
    ) {
        let ds = self.dist.security_disabled();
        let req = SgiRequest::decode(value, group, !ctx.is_secure(), ds);
        trace!("GICv3 cpu {} generates {:?}", cpu, req);
        for (target, redist) in self.redists.iter_mut().enumerate() {
            if !req.targets(redist.affinity(), target == cpu) {
                continue;
            }
            if redist.send_sgi(req.group, req.irq, req.ns, ds) {
                add_cpu(cpus, target);
            }
        }
    }

    fn hyp_read(&self, cpu: usize, reg: GicSysReg) -> u64 {
        use GicSysReg::*;
        let vcpuif = match self.vcpuifs.get(cpu) {
            Some(v) => v,
            None => {
                warn!("GICv3 cpu {}: {:?} without virtualization support", cpu, reg);
                return 0;
            }
        };
        let value = match reg {
            IchAp0r(n) => vcpuif.read_ich_ap(false, n.into()),
            IchAp1r(n) => vcpuif.read_ich_ap(true, n.into()),
            IchHcr => vcpuif.read_hcr(),
            IchVtr => vcpuif.read_vtr(),
            IchMisr => vcpuif.misr(),
            IchEisr => vcpuif.read_eisr(),
            IchElrsr => vcpuif.read_elrsr(),
            IchVmcr => vcpuif.read_vmcr(),
            IchLr(n) => vcpuif.read_lr(n.into()),
            _ => 0,
        };
        trace!("GICv3 cpu {} {:?} read: {:#x}", cpu, reg, value);
        value
    }

    fn hyp_write(&mut self, cpu: usize, reg: GicSysReg, value: u64) {
        use GicSysReg::*;
        let vcpuif = match self.vcpuifs.get_mut(cpu) {
            Some(v) => v,
            None => {
                warn!("GICv3 cpu {}: {:?} without virtualization support", cpu, reg);
                return;
            }
        };
        match reg {
            IchAp0r(n) => vcpuif.write_ich_ap(false, n.into(), value),
            IchAp1r(n) => vcpuif.write_ich_ap(true, n.into(), value),
            IchHcr => vcpuif.write_hcr(value),
            IchVmcr => vcpuif.write_vmcr(value),
            IchLr(n) => vcpuif.write_lr(n.into(), value),
            _ => warn!("GICv3 cpu {}: write to read-only {:?}", cpu, reg),
        }
    }

    /// ICV_* read. Only reached for registers that have a virtual counterpart.
    fn virtual_read(&mut self, cpu: usize, reg: GicSysReg) -> (u64, bool) {
        use GicSysReg::*;
        let vcpuif = &mut self.vcpuifs[cpu];
        let value = match reg {
            IccPmr => vcpuif.read_pmr(),
            IccIar0 | IccIar1 => return (u64::from(vcpuif.acknowledge(reg == IccIar1)), true),
            IccHppir0 => vcpuif.read_hppir(false),
            IccHppir1 => vcpuif.read_hppir(true),
            IccBpr0 => vcpuif.read_bpr(false),
            IccBpr1 => vcpuif.read_bpr(true),
            IccAp0r(n) => vcpuif.read_ap(false, n.into()),
            IccAp1r(n) => vcpuif.read_ap(true, n.into()),
            IccRpr => vcpuif.read_rpr(),
            IccCtlr => vcpuif.read_ctlr(),
            IccIgrpen0 => vcpuif.read_igrpen(false),
            IccIgrpen1 => vcpuif.read_igrpen(true),
            _ => {
                warn!("GICv3 cpu {}: invalid virtual read of {:?}", cpu, reg);
                0
            }
        };
        trace!("GICv3 cpu {} ICV {:?} read: {:#x}", cpu, reg, value);
        (value, false)
    }

    fn virtual_write(
        &mut self,
        cpu: usize,
        reg: GicSysReg,
        value: u64,
        num_irqs: u32,
        cpus: &mut CpuSet,
    ) {
        use GicSysReg::*;
        let vcpuif = &mut self.vcpuifs[cpu];
        let pintid = match reg {
            IccPmr => {
                vcpuif.write_pmr(value);
                None
            }
            IccEoir0 | IccEoir1 => vcpuif.end_of_interrupt(reg == IccEoir1, value, num_irqs),
            IccDir => vcpuif.deactivate_interrupt(value, num_irqs),
            IccBpr0 | IccBpr1 => {
                vcpuif.write_bpr(reg == IccBpr1, value);
                None
            }
            IccAp0r(n) | IccAp1r(n) => {
                vcpuif.write_ap(matches!(reg, IccAp1r(_)), n.into(), value);
                None
            }
            IccCtlr => {
                vcpuif.write_ctlr(value);
                None
            }
            IccIgrpen0 | IccIgrpen1 => {
                vcpuif.write_igrpen(reg == IccIgrpen1, value);
                None
            }
            _ => {
                warn!("GICv3 cpu {}: invalid virtual write of {:?}", cpu, reg);
                None
            }
        };
        // A HW-linked list register also deactivates its physical interrupt.
        if let Some(pintid) = pintid {
            if pintid < num_irqs {
                self.deactivate_irq(cpu, pintid, cpus);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Default)]
    struct TestPort {
        ctx: RefCell<ExecContext>,
        lines: RefCell<Vec<(CpuLine, bool)>>,
    }

    impl CpuPort for TestPort {
        fn exec_context(&self) -> ExecContext {
            *self.ctx.borrow()
        }

        fn set_line(&self, line: CpuLine, level: bool) {
            self.lines.borrow_mut().push((line, level));
        }
    }

    fn gic(config: GicConfig) -> (Gicv3, Vec<Rc<TestPort>>) {
        let ports: Vec<Rc<TestPort>> = (0..config.num_cpus)
            .map(|_| Rc::new(TestPort::default()))
            .collect();
        let boxed = ports
            .iter()
            .map(|p| Box::new(p.clone()) as Box<dyn CpuPort>)
            .collect();
        (Gicv3::new(config, boxed).unwrap(), ports)
    }

    #[test]
    fn port_count_must_match() {
        let config = GicConfig {
            num_cpus: 2,
            ..Default::default()
        };
        let ports: Vec<Box<dyn CpuPort>> = vec![Box::new(Rc::new(TestPort::default()))];
        assert_eq!(
            Gicv3::new(config, ports).err(),
            Some(Error::InvalidNumCpus(1))
        );
    }

    #[test]
    fn le_helpers() {
        let mut data = [0u8; 2];
        write_le(&mut data, 0x1234_5678);
        assert_eq!(data, [0x78, 0x56]);
        assert_eq!(read_le(&[0x01, 0x02, 0x03]), 0x030201);
    }

    #[test]
    fn disabled_spi_is_not_signalled() {
        let (gic, ports) = gic(GicConfig::default());
        gic.set_irq(40, true);
        assert!(ports[0].lines.borrow().is_empty());
        assert!(gic.is_pending(0, 40));
        assert_eq!(gic.hppi(0), Hppi::IDLE);
    }

    #[test]
    fn no_virtualization_has_no_ich_registers() {
        let (gic, _ports) = gic(GicConfig {
            num_list_regs: 0,
            ..Default::default()
        });
        assert_eq!(
            gic.check_sysreg_access(0, GicSysReg::IchHcr, true),
            AccessResult::Undefined
        );
        assert_eq!(gic.sysreg_read(0, GicSysReg::IchHcr), 0);
    }
}
