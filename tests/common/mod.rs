// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#![allow(dead_code)]

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use gicv3::BusAccessInfo;
use gicv3::CpuLine;
use gicv3::CpuPort;
use gicv3::ExecContext;
use gicv3::GicConfig;
use gicv3::GicSysReg;
use gicv3::Gicv3;

pub const GICD_CTLR: u64 = 0x0000;
pub const GICD_TYPER: u64 = 0x0004;
pub const GICD_IGROUPR: u64 = 0x0080;
pub const GICD_ISENABLER: u64 = 0x0100;
pub const GICD_ISPENDR: u64 = 0x0200;
pub const GICD_IPRIORITYR: u64 = 0x0400;
pub const GICD_IROUTER: u64 = 0x6000;

pub const GICR_WAKER: u64 = 0x0014;
pub const GICR_IGROUPR0: u64 = 0x10080;
pub const GICR_ISENABLER0: u64 = 0x10100;
pub const GICR_IPRIORITYR: u64 = 0x10400;

pub const GICD_CTLR_EN_GRP0: u32 = 1 << 0;
pub const GICD_CTLR_EN_GRP1NS: u32 = 1 << 1;
pub const GICD_CTLR_EN_GRP1S: u32 = 1 << 2;
pub const GICD_CTLR_ARE_NS: u32 = 1 << 5;
pub const GICD_CTLR_DS: u32 = 1 << 6;

/// CPU stub that records every line change and holds a settable execution context.
pub struct RecordingPort {
    pub ctx: Cell<ExecContext>,
    pub events: RefCell<Vec<(CpuLine, bool)>>,
}

impl RecordingPort {
    pub fn new(ctx: ExecContext) -> Self {
        RecordingPort {
            ctx: Cell::new(ctx),
            events: RefCell::new(Vec::new()),
        }
    }

    /// Current level of `line`, as last driven.
    pub fn level(&self, line: CpuLine) -> bool {
        self.events
            .borrow()
            .iter()
            .rev()
            .find(|(l, _)| *l == line)
            .map(|(_, level)| *level)
            .unwrap_or(false)
    }

    pub fn take_events(&self) -> Vec<(CpuLine, bool)> {
        self.events.borrow_mut().drain(..).collect()
    }
}

impl CpuPort for RecordingPort {
    fn exec_context(&self) -> ExecContext {
        self.ctx.get()
    }

    fn set_line(&self, line: CpuLine, level: bool) {
        self.events.borrow_mut().push((line, level));
    }
}

pub fn new_gic(config: GicConfig, ctx: ExecContext) -> (Gicv3, Vec<Rc<RecordingPort>>) {
    let ports: Vec<Rc<RecordingPort>> = (0..config.num_cpus)
        .map(|_| Rc::new(RecordingPort::new(ctx)))
        .collect();
    let boxed = ports
        .iter()
        .map(|p| Box::new(p.clone()) as Box<dyn CpuPort>)
        .collect();
    let gic = Gicv3::new(config, boxed).expect("failed to create GIC");
    (gic, ports)
}

pub fn gicd_write32(gic: &Gicv3, offset: u64, value: u32, secure: bool) {
    gic.distributor_write(BusAccessInfo { offset, secure }, &value.to_le_bytes());
}

pub fn gicd_read32(gic: &Gicv3, offset: u64, secure: bool) -> u32 {
    let mut data = [0u8; 4];
    gic.distributor_read(BusAccessInfo { offset, secure }, &mut data);
    u32::from_le_bytes(data)
}

pub fn gicd_write8(gic: &Gicv3, offset: u64, value: u8, secure: bool) {
    gic.distributor_write(BusAccessInfo { offset, secure }, &[value]);
}

pub fn gicd_read8(gic: &Gicv3, offset: u64, secure: bool) -> u8 {
    let mut data = [0u8; 1];
    gic.distributor_read(BusAccessInfo { offset, secure }, &mut data);
    data[0]
}

pub fn gicr_write32(gic: &Gicv3, cpu: usize, offset: u64, value: u32, secure: bool) {
    gic.redistributor_write(cpu, BusAccessInfo { offset, secure }, &value.to_le_bytes());
}

pub fn gicr_read32(gic: &Gicv3, cpu: usize, offset: u64, secure: bool) -> u32 {
    let mut data = [0u8; 4];
    gic.redistributor_read(cpu, BusAccessInfo { offset, secure }, &mut data);
    u32::from_le_bytes(data)
}

pub fn gicr_write8(gic: &Gicv3, cpu: usize, offset: u64, value: u8, secure: bool) {
    gic.redistributor_write(cpu, BusAccessInfo { offset, secure }, &[value]);
}

/// Configures SPI `irq` as an enabled Non-secure Group 1 interrupt routed to `cpu` with
/// priority `prio`, through a GIC without security extensions.
pub fn setup_spi(gic: &Gicv3, irq: u32, prio: u8, cpu_affinity: u64) {
    let word = u64::from(irq / 32) * 4;
    let bit = 1u32 << (irq % 32);
    let group = gicd_read32(gic, GICD_IGROUPR + word, true);
    gicd_write32(gic, GICD_IGROUPR + word, group | bit, true);
    gicd_write8(gic, GICD_IPRIORITYR + u64::from(irq), prio, true);
    gic.distributor_write(
        BusAccessInfo {
            offset: GICD_IROUTER + u64::from(irq) * 8,
            secure: true,
        },
        &cpu_affinity.to_le_bytes(),
    );
    gicd_write32(gic, GICD_ISENABLER + word, bit, true);
}

/// Opens the priority mask and enables both groups on `cpu` at its current context.
pub fn enable_cpu_interface(gic: &Gicv3, cpu: usize) {
    gic.sysreg_write(cpu, GicSysReg::IccPmr, 0xff);
    gic.sysreg_write(cpu, GicSysReg::IccIgrpen0, 1);
    gic.sysreg_write(cpu, GicSysReg::IccIgrpen1, 1);
}
