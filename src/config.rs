// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;
use crate::GIC_INTERNAL;
use crate::GIC_MAXIRQ;
use crate::GIC_NR_SGIS;

/// CPUs per affinity-1 cluster when no explicit affinities are given. Matches the width of
/// the SGI target list so every CPU in a cluster can be addressed by one SGI write.
const CPUS_PER_CLUSTER: usize = 16;

/// Largest list register count the ICH_LR<n>_EL2 encoding space can hold.
pub const MAX_LIST_REGS: usize = 16;

/// Static shape of the interrupt controller.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default, rename_all = "kebab-case")]
pub struct GicConfig {
    /// Number of redistributor / CPU interface pairs.
    pub num_cpus: usize,
    /// Total number of interrupt IDs, including the 32 private SGIs and PPIs.
    pub num_irqs: u32,
    /// Implement the two security states. When false GICD_CTLR.DS is fixed at 1.
    pub security_extensions: bool,
    /// Reset every interrupt into Non-secure Group 1, as secure firmware would before
    /// handing over to a Non-secure kernel.
    pub irq_reset_nonsecure: bool,
    /// List registers per virtual CPU interface. Zero means no virtualization support.
    pub num_list_regs: usize,
    /// Implemented virtual priority bits.
    pub vpribits: u8,
    /// Implemented virtual preemption bits.
    pub vprebits: u8,
    /// PPI that the maintenance interrupt is wired back to.
    pub maintenance_intid: Option<u32>,
    /// MPIDR-style affinity (Aff3:Aff2:Aff1:Aff0) of each CPU.
    pub affinities: Vec<u32>,
}

impl Default for GicConfig {
    fn default() -> Self {
        GicConfig {
            num_cpus: 1,
            num_irqs: 288,
            security_extensions: false,
            irq_reset_nonsecure: false,
            num_list_regs: 4,
            vpribits: 5,
            vprebits: 5,
            maintenance_intid: Some(25),
            affinities: Vec::new(),
        }
    }
}

impl GicConfig {
    /// Checks every field against the architectural limits of the model.
    pub fn validate(&self) -> Result<()> {
        // The processor number field of GICR_TYPER is 16 bits wide.
        if self.num_cpus == 0 || self.num_cpus > 0x10000 {
            return Err(Error::InvalidNumCpus(self.num_cpus));
        }
        if self.num_irqs < GIC_INTERNAL || self.num_irqs > GIC_MAXIRQ || self.num_irqs % 32 != 0 {
            return Err(Error::InvalidNumIrqs(self.num_irqs));
        }
        if self.num_list_regs > MAX_LIST_REGS {
            return Err(Error::InvalidListRegisterCount(self.num_list_regs));
        }
        if !(5..=8).contains(&self.vpribits)
            || !(5..=7).contains(&self.vprebits)
            || self.vprebits > self.vpribits
        {
            return Err(Error::InvalidPriorityBits {
                vpribits: self.vpribits,
                vprebits: self.vprebits,
            });
        }
        if let Some(intid) = self.maintenance_intid {
            if !(GIC_NR_SGIS..GIC_INTERNAL).contains(&intid) {
                return Err(Error::InvalidMaintenanceIntid(intid));
            }
        }
        if !self.affinities.is_empty() {
            if self.affinities.len() != self.num_cpus {
                return Err(Error::InvalidAffinityCount {
                    affinities: self.affinities.len(),
                    num_cpus: self.num_cpus,
                });
            }
            let mut seen = BTreeSet::new();
            for &aff in &self.affinities {
                if !seen.insert(aff) {
                    return Err(Error::DuplicateAffinity(aff));
                }
            }
        }
        Ok(())
    }

    /// Affinity of `cpu`, either as configured or laid out in clusters of 16.
    pub fn affinity(&self, cpu: usize) -> u32 {
        match self.affinities.get(cpu) {
            Some(&aff) => aff,
            None => (((cpu / CPUS_PER_CLUSTER) as u32) << 8) | (cpu % CPUS_PER_CLUSTER) as u32,
        }
    }

    /// Whether the CPU interfaces implement ICH_*/ICV_* registers.
    pub fn has_virtualization(&self) -> bool {
        self.num_list_regs > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(GicConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_irq_counts() {
        for num_irqs in [0, 16, 48, 1024] {
            let config = GicConfig {
                num_irqs,
                ..Default::default()
            };
            assert_eq!(config.validate(), Err(Error::InvalidNumIrqs(num_irqs)));
        }
    }

    #[test]
    fn rejects_bad_priority_bits() {
        let config = GicConfig {
            vpribits: 5,
            vprebits: 6,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidPriorityBits { .. })
        ));
    }

    #[test]
    fn rejects_spi_maintenance_interrupt() {
        let config = GicConfig {
            maintenance_intid: Some(40),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidMaintenanceIntid(40)));
    }

    #[test]
    fn rejects_duplicate_affinity() {
        let config = GicConfig {
            num_cpus: 2,
            affinities: vec![0x100, 0x100],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::DuplicateAffinity(0x100)));
    }

    #[test]
    fn default_affinity_clusters() {
        let config = GicConfig {
            num_cpus: 20,
            ..Default::default()
        };
        assert_eq!(config.affinity(3), 3);
        assert_eq!(config.affinity(17), 0x101);
    }

    #[test]
    fn deserialize_kebab_case() {
        let config: GicConfig = serde_json::from_str(
            r#"{"num-cpus": 2, "security-extensions": true, "maintenance-intid": null}"#,
        )
        .unwrap();
        assert_eq!(config.num_cpus, 2);
        assert!(config.security_extensions);
        assert_eq!(config.maintenance_intid, None);
        assert_eq!(config.num_irqs, 288);
    }

    #[test]
    fn deserialize_rejects_unknown_fields() {
        assert!(serde_json::from_str::<GicConfig>(r#"{"num-lrs": 4}"#).is_err());
    }
}
