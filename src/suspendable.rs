// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Trait to suspend devices and save/restore their state.

use anyhow::Context;
use log::debug;

use crate::gic::GicSnapshot;
use crate::gic::Gicv3;

/// Trait for devices whose state can be saved and restored across a VM suspend.
pub trait Suspendable {
    /// Save the device state as JSON.
    fn snapshot(&mut self) -> anyhow::Result<serde_json::Value>;

    /// Load device state from a snapshot taken by `snapshot`.
    fn restore(&mut self, data: serde_json::Value) -> anyhow::Result<()>;

    /// Stop all device activity.
    fn sleep(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Resume device activity after `sleep`.
    fn wake(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Suspendable for Gicv3 {
    fn snapshot(&mut self) -> anyhow::Result<serde_json::Value> {
        let snapshot = self.snapshot_state();
        debug!("GICv3 snapshot taken");
        serde_json::to_value(snapshot).context("failed to serialize GICv3 state")
    }

    fn restore(&mut self, data: serde_json::Value) -> anyhow::Result<()> {
        let snapshot: GicSnapshot =
            serde_json::from_value(data).context("failed to deserialize GICv3 state")?;
        self.restore_state(snapshot)
            .context("failed to restore GICv3 state")
    }
}
