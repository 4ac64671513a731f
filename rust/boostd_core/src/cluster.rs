// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost coordinator
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

/// CPU cluster identity on a big.LITTLE SoC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cluster {
    /// Low-performance (efficiency) cluster.
    Little,
    /// High-performance cluster.
    Big,
}

/// Maps CPU ids to clusters and picks the lead CPU per cluster.
///
/// Only one CPU from each cluster needs a policy update or a max-boost pin;
/// the lead is the lowest-numbered CPU of the cluster.
#[derive(Debug, Clone)]
pub struct ClusterMap {
    lp_mask: u64,
    lp_lead: u32,
    hp_lead: u32,
}

impl ClusterMap {
    /// Build from the set of little-cluster CPU ids and the total CPU count.
    pub fn new(lp_cpus: &[u32], nr_cpus: u32) -> Self {
        let mut lp_mask = 0u64;
        for &cpu in lp_cpus {
            if cpu < 64 {
                lp_mask |= 1 << cpu;
            }
        }
        let lp_lead = lp_cpus.iter().copied().min().unwrap_or(0);
        let hp_lead = (0..nr_cpus.min(64))
            .find(|cpu| lp_mask & (1 << cpu) == 0)
            .unwrap_or(lp_lead);
        Self {
            lp_mask,
            lp_lead,
            hp_lead,
        }
    }

    pub fn cluster_of(&self, cpu: u32) -> Cluster {
        if cpu < 64 && self.lp_mask & (1 << cpu) != 0 {
            Cluster::Little
        } else {
            Cluster::Big
        }
    }

    pub fn lead_cpu(&self, cluster: Cluster) -> u32 {
        match cluster {
            Cluster::Little => self.lp_lead,
            Cluster::Big => self.hp_lead,
        }
    }

    /// The lead CPU of the cluster containing `cpu`; used to pin the
    /// max-boost meta transition from a caller's cluster hint.
    pub fn lead_of(&self, cpu: u32) -> u32 {
        self.lead_cpu(self.cluster_of(cpu))
    }
}

impl Default for ClusterMap {
    /// Typical 4+4 layout: CPUs 0-3 little, 4-7 big.
    fn default() -> Self {
        Self::new(&[0, 1, 2, 3], 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let map = ClusterMap::default();
        assert_eq!(map.cluster_of(0), Cluster::Little);
        assert_eq!(map.cluster_of(3), Cluster::Little);
        assert_eq!(map.cluster_of(4), Cluster::Big);
        assert_eq!(map.lead_cpu(Cluster::Little), 0);
        assert_eq!(map.lead_cpu(Cluster::Big), 4);
        assert_eq!(map.lead_of(6), 4);
        assert_eq!(map.lead_of(2), 0);
    }

    #[test]
    fn uniform_cluster_falls_back_to_lp_lead() {
        let map = ClusterMap::new(&[0, 1, 2, 3], 4);
        assert_eq!(map.lead_cpu(Cluster::Big), 0);
    }
}
