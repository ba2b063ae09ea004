// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Userspace model of an ARM GICv3 interrupt controller.
//!
//! The model covers the Distributor (GICD), one Redistributor (GICR) per CPU, the
//! physical CPU interface (ICC_* system registers) and the virtual CPU interface
//! (ICH_*/ICV_* system registers with list registers). All of it is owned by a
//! [`Gicv3`], which is the only thing that drives the CPU output lines through the
//! [`CpuPort`] trait.

mod config;
mod context;
mod cpuif;
mod distributor;
mod gic;
mod redistributor;
mod state;
mod suspendable;
mod sysreg;
mod vcpuif;

use remain::sorted;
use thiserror::Error as ThisError;

pub use crate::config::GicConfig;
pub use crate::context::CpuLine;
pub use crate::context::CpuPort;
pub use crate::context::ExecContext;
pub use crate::context::IrqGroup;
pub use crate::context::SecurityBank;
pub use crate::gic::BusAccessInfo;
pub use crate::gic::Gicv3;
pub use crate::redistributor::Hppi;
pub use crate::suspendable::Suspendable;
pub use crate::sysreg::AccessResult;
pub use crate::sysreg::GicSysReg;
pub use crate::vcpuif::ListRegister;
pub use crate::vcpuif::LrState;

/// Number of SGIs (Software Generated Interrupts).
pub const GIC_NR_SGIS: u32 = 16;

/// Number of SGIs and PPIs held by each redistributor.
pub const GIC_INTERNAL: u32 = 32;

/// Largest number of interrupt IDs the distributor can be built with.
pub const GIC_MAXIRQ: u32 = 1020;

/// Returned to EL3 when the pending interrupt belongs to Secure Group 1.
pub const INTID_SECURE: u32 = 1020;

/// Returned to EL3 when the pending interrupt belongs to Non-secure Group 1.
pub const INTID_NONSECURE: u32 = 1021;

/// Spurious interrupt ID (returned when no interrupt can be acknowledged).
pub const INTID_SPURIOUS: u32 = 1023;

/// Priority representing the idle state (lowest priority).
pub const GIC_IDLE_PRIORITY: u8 = 0xff;

/// GIC Distributor MMIO size.
pub const GICD_SIZE: u64 = 0x10000;

/// GIC Redistributor MMIO size per CPU (RD_base frame followed by SGI_base frame).
pub const GICR_SIZE: u64 = 0x20000;

#[sorted]
#[derive(ThisError, Debug, PartialEq, Eq)]
pub enum Error {
    /// Two CPUs were given the same affinity value.
    #[error("affinity {0:#x} is assigned to more than one cpu")]
    DuplicateAffinity(u32),
    /// The affinity list does not describe every CPU.
    #[error("{affinities} affinities given for {num_cpus} cpus")]
    InvalidAffinityCount { affinities: usize, num_cpus: usize },
    /// More list registers than the architecture allows.
    #[error("invalid number of list registers {0} (max 16)")]
    InvalidListRegisterCount(usize),
    /// The maintenance interrupt must be a PPI.
    #[error("maintenance interrupt {0} is not a PPI")]
    InvalidMaintenanceIntid(u32),
    /// Zero CPUs, or more than the redistributor processor number can encode.
    #[error("invalid number of cpus {0}")]
    InvalidNumCpus(usize),
    /// Interrupt count out of range or not a multiple of 32.
    #[error("invalid number of irqs {0}: must be a multiple of 32 between 32 and 992")]
    InvalidNumIrqs(u32),
    /// Virtual priority/preemption bits outside the architectural range.
    #[error("invalid virtual priority bits: vpribits {vpribits}, vprebits {vprebits}")]
    InvalidPriorityBits { vpribits: u8, vprebits: u8 },
    /// A snapshot holds state the controller could never have produced.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(&'static str),
    /// A snapshot was taken from a differently shaped controller.
    #[error("snapshot has {found} {what}, controller has {expected}")]
    SnapshotMismatch {
        what: &'static str,
        found: usize,
        expected: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
