// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod common;

use std::io::Seek;
use std::io::SeekFrom;

use serde_json::json;
use serde_json::Value;

use common::*;
use gicv3::CpuLine;
use gicv3::ExecContext;
use gicv3::GicConfig;
use gicv3::GicSysReg;
use gicv3::Gicv3;
use gicv3::ListRegister;
use gicv3::Suspendable;

fn busy_gic(config: GicConfig) -> (Gicv3, Vec<std::rc::Rc<RecordingPort>>) {
    let (gic, ports) = new_gic(config, ExecContext::non_secure(1));
    gicd_write32(&gic, GICD_CTLR, GICD_CTLR_EN_GRP0 | GICD_CTLR_EN_GRP1NS, true);
    enable_cpu_interface(&gic, 0);
    setup_spi(&gic, 40, 0x80, 0);
    setup_spi(&gic, 41, 0x40, 0);
    gic.set_irq(40, true);
    assert_eq!(gic.sysreg_read(0, GicSysReg::IccIar1), 40);
    gic.set_irq(41, true);
    gic.sysreg_write(
        0,
        GicSysReg::IchLr(1),
        ListRegister::pending(27, 0x10, true).0,
    );
    assert!(ports[0].level(CpuLine::Irq));
    (gic, ports)
}

#[test]
fn restore_through_file_preserves_state_silently() {
    let (mut gic, _ports) = busy_gic(GicConfig::default());
    let snapshot = gic.snapshot().expect("failed to snapshot");

    let mut file = tempfile::tempfile().expect("failed to create tempfile");
    serde_json::to_writer(&mut file, &snapshot).expect("failed to write snapshot");
    file.seek(SeekFrom::Start(0)).expect("failed to rewind");
    let data: serde_json::Value = serde_json::from_reader(&mut file).expect("failed to read");

    let (mut restored, ports) = new_gic(GicConfig::default(), ExecContext::non_secure(1));
    ports[0].take_events();
    restored.restore(data).expect("failed to restore");
    assert!(ports[0].take_events().is_empty());

    assert_eq!(restored.hppi(0), gic.hppi(0));
    assert_eq!(restored.hppi(0).irq, 41);
    assert_eq!(restored.running_priority(0), 0x80);
    assert!(restored.is_active(0, 40));
    assert!(restored.is_pending(0, 41));
    assert_eq!(
        restored.list_register(0, 1),
        ListRegister::pending(27, 0x10, true)
    );
    assert_eq!(
        gicd_read32(&restored, GICD_CTLR, true),
        gicd_read32(&gic, GICD_CTLR, true)
    );

    // The Irq line was restored as asserted, so acknowledging 41 lowers it.
    assert_eq!(restored.sysreg_read(0, GicSysReg::IccIar1), 41);
    assert_eq!(ports[0].take_events(), vec![(CpuLine::Irq, false)]);
    assert_eq!(restored.running_priority(0), 0x40);
}

#[test]
fn snapshot_round_trip_is_stable() {
    let (mut gic, _ports) = busy_gic(GicConfig::default());
    let first = gic.snapshot().expect("failed to snapshot");
    let (mut restored, _restored_ports) =
        new_gic(GicConfig::default(), ExecContext::non_secure(1));
    restored.restore(first.clone()).expect("failed to restore");
    assert_eq!(restored.snapshot().expect("failed to snapshot"), first);
}

#[test]
fn restore_rejects_other_shapes() {
    let (mut gic, _ports) = busy_gic(GicConfig::default());
    let snapshot = gic.snapshot().expect("failed to snapshot");

    let (mut two_cpus, _p) = new_gic(
        GicConfig {
            num_cpus: 2,
            ..Default::default()
        },
        ExecContext::non_secure(1),
    );
    assert!(two_cpus.restore(snapshot.clone()).is_err());

    let (mut fewer_irqs, _p) = new_gic(
        GicConfig {
            num_irqs: 64,
            ..Default::default()
        },
        ExecContext::non_secure(1),
    );
    assert!(fewer_irqs.restore(snapshot.clone()).is_err());

    let (mut no_virt, _p) = new_gic(
        GicConfig {
            num_list_regs: 0,
            ..Default::default()
        },
        ExecContext::non_secure(1),
    );
    assert!(no_virt.restore(snapshot).is_err());

    assert!(gic.restore(serde_json::json!({"dist": 1})).is_err());
}

/// A GIC with its own pending SPI, used as the target of restores that must fail.
fn target_gic() -> (Gicv3, Vec<std::rc::Rc<RecordingPort>>) {
    let (gic, ports) = new_gic(GicConfig::default(), ExecContext::non_secure(1));
    gicd_write32(&gic, GICD_CTLR, GICD_CTLR_EN_GRP0 | GICD_CTLR_EN_GRP1NS, true);
    enable_cpu_interface(&gic, 0);
    setup_spi(&gic, 50, 0x20, 0);
    gic.set_irq(50, true);
    assert!(ports[0].level(CpuLine::Irq));
    ports[0].take_events();
    (gic, ports)
}

fn assert_rejected(data: Value) {
    let (mut target, ports) = target_gic();
    let before = target.snapshot().expect("failed to snapshot");
    assert!(target.restore(data).is_err());
    assert_eq!(target.snapshot().expect("failed to snapshot"), before);
    assert!(ports[0].take_events().is_empty());
    assert_eq!(target.hppi(0).irq, 50);
    assert!(!target.is_pending(0, 40));
    assert!(!target.is_active(0, 40));
}

#[test]
fn failed_restore_leaves_state_untouched() {
    let (mut gic, _ports) = busy_gic(GicConfig::default());
    let mut snapshot = gic.snapshot().expect("failed to snapshot");
    // The distributor part is valid; only the redistributor of cpu 0 is short.
    snapshot["redists"][0]["irqs"]["priority"] = json!([0, 0, 0]);
    assert_rejected(snapshot);
}

#[test]
fn restore_rejects_malformed_interrupt_arrays() {
    let (mut gic, _ports) = busy_gic(GicConfig::default());
    let snapshot = gic.snapshot().expect("failed to snapshot");
    let edits: [fn(&mut Value); 5] = [
        |s| s["dist"]["irqs"]["enabled"] = json!([0]),
        |s| s["dist"]["irqs"]["nsacr"] = json!([]),
        |s| s["dist"]["irouter"] = json!([0]),
        |s| s["redists"][0]["irqs"]["pending"] = json!([]),
        |s| s["redists"][0]["irqs"]["edge_trigger"] = json!([0, 0]),
    ];
    for edit in edits {
        let mut data = snapshot.clone();
        edit(&mut data);
        assert_rejected(data);
    }
}

#[test]
fn restore_rejects_other_priority_widths() {
    let (mut gic, _ports) = busy_gic(GicConfig::default());
    let snapshot = gic.snapshot().expect("failed to snapshot");
    let edits: [fn(&mut Value); 4] = [
        |s| s["vcpuifs"][0]["vprebits"] = json!(4),
        |s| s["vcpuifs"][0]["vprebits"] = json!(6),
        |s| s["vcpuifs"][0]["vpribits"] = json!(8),
        |s| s["cpuifs"][0]["bpr"] = json!([255, 0, 1]),
    ];
    for edit in edits {
        let mut data = snapshot.clone();
        edit(&mut data);
        assert_rejected(data);
    }

    // A snapshot from a GIC built with wider virtual priorities fits only that shape.
    let wide = GicConfig {
        vpribits: 8,
        vprebits: 7,
        ..Default::default()
    };
    let (mut wide_gic, _p) = busy_gic(wide.clone());
    let wide_snapshot = wide_gic.snapshot().expect("failed to snapshot");
    assert_rejected(wide_snapshot.clone());
    let (mut restored, _p) = new_gic(wide, ExecContext::non_secure(1));
    restored.restore(wide_snapshot).expect("failed to restore");
}
