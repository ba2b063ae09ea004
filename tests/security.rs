// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod common;

use common::*;
use gicv3::AccessResult;
use gicv3::CpuLine;
use gicv3::ExecContext;
use gicv3::GicConfig;
use gicv3::GicSysReg;
use gicv3::IrqGroup;
use gicv3::INTID_SECURE;
use gicv3::INTID_SPURIOUS;

const GICD_IGRPMODR: u64 = 0x0D00;
const GICR_NSACR: u64 = 0x10E00;

fn secure_config() -> GicConfig {
    GicConfig {
        security_extensions: true,
        ..Default::default()
    }
}

#[test]
fn ds_is_one_way() {
    let (gic, _ports) = new_gic(secure_config(), ExecContext::with_el3(1, true));
    let ctlr = gicd_read32(&gic, GICD_CTLR, true);
    assert_eq!(ctlr & GICD_CTLR_DS, 0);
    assert_ne!(ctlr & GICD_CTLR_ARE_NS, 0);

    gicd_write32(&gic, GICD_CTLR, GICD_CTLR_EN_GRP1S | GICD_CTLR_EN_GRP1NS, true);
    assert_ne!(gicd_read32(&gic, GICD_CTLR, true) & GICD_CTLR_EN_GRP1S, 0);

    gicd_write32(
        &gic,
        GICD_CTLR,
        GICD_CTLR_DS | GICD_CTLR_EN_GRP1S | GICD_CTLR_EN_GRP1NS,
        true,
    );
    let ctlr = gicd_read32(&gic, GICD_CTLR, true);
    assert_ne!(ctlr & GICD_CTLR_DS, 0);
    assert_eq!(ctlr & (GICD_CTLR_EN_GRP1S | GICD_CTLR_ARE_NS), 0);

    gicd_write32(&gic, GICD_CTLR, GICD_CTLR_EN_GRP1S, true);
    gicd_write32(&gic, GICD_CTLR, 0, true);
    let ctlr = gicd_read32(&gic, GICD_CTLR, true);
    assert_ne!(ctlr & GICD_CTLR_DS, 0);
    assert_eq!(ctlr & GICD_CTLR_EN_GRP1S, 0);

    gic.reset();
    assert_eq!(gicd_read32(&gic, GICD_CTLR, true) & GICD_CTLR_DS, 0);
}

#[test]
fn typer_reports_security_and_lines() {
    let (gic, _ports) = new_gic(secure_config(), ExecContext::with_el3(1, true));
    let typer = gicd_read32(&gic, GICD_TYPER, true);
    assert_eq!(typer & 0x1f, 288 / 32 - 1);
    assert_ne!(typer & (1 << 10), 0);
}

#[test]
fn group0_priority_is_hidden_from_non_secure() {
    let (gic, _ports) = new_gic(secure_config(), ExecContext::with_el3(1, true));
    gicd_write8(&gic, GICD_IPRIORITYR + 40, 0x30, true);
    assert_eq!(gicd_read8(&gic, GICD_IPRIORITYR + 40, false), 0);
    gicd_write8(&gic, GICD_IPRIORITYR + 40, 0x90, false);
    assert_eq!(gicd_read8(&gic, GICD_IPRIORITYR + 40, true), 0x30);
}

#[test]
fn non_secure_priority_view_is_shifted() {
    let (gic, _ports) = new_gic(secure_config(), ExecContext::with_el3(1, true));
    gicd_write32(&gic, GICD_IGROUPR + 4, 1 << 9, true);
    gicd_write8(&gic, GICD_IPRIORITYR + 41, 0xa0, true);
    assert_eq!(gicd_read8(&gic, GICD_IPRIORITYR + 41, false), 0x40);
    gicd_write8(&gic, GICD_IPRIORITYR + 41, 0x40, false);
    assert_eq!(gicd_read8(&gic, GICD_IPRIORITYR + 41, true), 0xa0);
}

#[test]
fn group0_is_fiq_for_secure_el1() {
    let (gic, ports) = new_gic(secure_config(), ExecContext::with_el3(1, true));
    gicd_write32(&gic, GICD_CTLR, GICD_CTLR_EN_GRP0, true);
    gicd_write8(&gic, GICD_IPRIORITYR + 40, 0x20, true);
    gicd_write32(&gic, GICD_ISENABLER + 4, 1 << 8, true);
    enable_cpu_interface(&gic, 0);

    gic.set_irq(40, true);
    assert!(ports[0].level(CpuLine::Fiq));
    assert!(!ports[0].level(CpuLine::Irq));
    assert_eq!(gic.hppi(0).group, IrqGroup::Group0);
    assert_eq!(gic.sysreg_read(0, GicSysReg::IccIar0), 40);
    assert!(!ports[0].level(CpuLine::Fiq));
}

#[test]
fn secure_group1_is_hidden_from_non_secure_el1() {
    let (gic, ports) = new_gic(secure_config(), ExecContext::with_el3(3, false));
    gicd_write32(&gic, GICD_CTLR, GICD_CTLR_EN_GRP1S, true);
    gicd_write32(&gic, GICD_IGRPMODR + 4, 1 << 8, true);
    gicd_write8(&gic, GICD_IPRIORITYR + 40, 0x20, true);
    gicd_write32(&gic, GICD_ISENABLER + 4, 1 << 8, true);
    gic.sysreg_write(0, GicSysReg::IccPmr, 0xff);
    gic.sysreg_write(0, GicSysReg::IccIgrpen1El3, 0b11);

    gic.set_irq(40, true);
    assert_eq!(gic.hppi(0).group, IrqGroup::Group1Secure);
    // EL3 is told a Secure Group 1 interrupt is pending.
    assert_eq!(gic.sysreg_read(0, GicSysReg::IccHppir0), u64::from(INTID_SECURE));

    ports[0].ctx.set(ExecContext::with_el3(1, false));
    gic.el_change(0);
    // Secure Group 1 is signalled as FIQ to Non-secure state.
    assert!(ports[0].level(CpuLine::Fiq));
    assert_eq!(
        gic.sysreg_read(0, GicSysReg::IccHppir1),
        u64::from(INTID_SPURIOUS)
    );
    assert_eq!(
        gic.sysreg_read(0, GicSysReg::IccIar1),
        u64::from(INTID_SPURIOUS)
    );
    assert!(!gic.is_active(0, 40));
}

#[test]
fn non_secure_sgi0_needs_nsacr() {
    let mut config = secure_config();
    config.num_cpus = 2;
    let (gic, _ports) = new_gic(config, ExecContext::with_el3(1, false));
    gicr_write32(&gic, 1, GICR_ISENABLER0, 1 << 5, true);

    gic.sysreg_write(0, GicSysReg::IccSgi0r, (5 << 24) | (1 << 1));
    assert!(!gic.is_pending(1, 5));

    gicr_write32(&gic, 1, GICR_NSACR, 1 << 10, true);
    assert_eq!(gicr_read32(&gic, 1, GICR_NSACR, true), 1 << 10);
    assert_eq!(gicr_read32(&gic, 1, GICR_NSACR, false), 0);
    gic.sysreg_write(0, GicSysReg::IccSgi0r, (5 << 24) | (1 << 1));
    assert!(gic.is_pending(1, 5));
}

#[test]
fn waker_is_secure_only() {
    let (gic, _ports) = new_gic(secure_config(), ExecContext::with_el3(1, true));
    assert_eq!(gicr_read32(&gic, 0, GICR_WAKER, true), 0b110);
    gicr_write32(&gic, 0, GICR_WAKER, 0, false);
    assert_eq!(gicr_read32(&gic, 0, GICR_WAKER, true), 0b110);
    gicr_write32(&gic, 0, GICR_WAKER, 0, true);
    assert_eq!(gicr_read32(&gic, 0, GICR_WAKER, true), 0);
}

#[test]
fn scr_routing_traps_icc_accesses() {
    let (gic, ports) = new_gic(
        secure_config(),
        ExecContext::with_el3(1, false).with_scr(true, false),
    );
    assert_eq!(
        gic.check_sysreg_access(0, GicSysReg::IccIar1, true),
        AccessResult::TrapEl3
    );
    assert_eq!(
        gic.check_sysreg_access(0, GicSysReg::IccIar0, true),
        AccessResult::Ok
    );
    ports[0].ctx.set(ExecContext::with_el3(3, false).with_scr(true, true));
    assert_eq!(
        gic.check_sysreg_access(0, GicSysReg::IccCtlrEl3, true),
        AccessResult::Ok
    );
}

#[test]
fn ctlr_el3_aliases_both_banks() {
    let (gic, ports) = new_gic(secure_config(), ExecContext::with_el3(3, false));
    // EOImode_EL1NS | CBPR_EL1S
    gic.sysreg_write(0, GicSysReg::IccCtlrEl3, (1 << 4) | (1 << 0));
    ports[0].ctx.set(ExecContext::with_el3(1, false));
    assert_eq!(gic.sysreg_read(0, GicSysReg::IccCtlr) & 0b11, 0b10);
    ports[0].ctx.set(ExecContext::with_el3(1, true));
    assert_eq!(gic.sysreg_read(0, GicSysReg::IccCtlr) & 0b11, 0b01);
}
