// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost daemon
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Sysfs-backed implementations of the engine's side-effect sinks.
//!
//! Every write here is best-effort: a node that vanished (device unbound,
//! cgroup torn down) must never take the daemon down with it.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use boostd_core::sink::{CgroupBoost, Clamp, DevfreqDevice, GpuPower, PolicyLimits, PolicyRefresh, SlotHandle};
use log::{debug, warn};

fn read_value<T: FromStr>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    // Nodes like cpu.uclamp.min may carry a fractional part or "max".
    let token = raw.trim().split(&['.', ' '][..]).next().unwrap_or("");
    match token.parse() {
        Ok(v) => Ok(v),
        Err(_) => bail!("unparsable value {raw:?} in {}", path.display()),
    }
}

fn write_value(path: &Path, value: impl std::fmt::Display) {
    if let Err(err) = fs::write(path, value.to_string()) {
        debug!("write to {} failed: {err}", path.display());
    }
}

struct PolicyNode {
    cpu: u32,
    dir: PathBuf,
}

impl PolicyNode {
    fn limits(&self) -> Result<PolicyLimits> {
        Ok(PolicyLimits {
            cpuinfo_min: read_value(&self.dir.join("cpuinfo_min_freq"))?,
            max: read_value(&self.dir.join("cpuinfo_max_freq"))?,
        })
    }
}

/// Pushes resolved clamps into the cpufreq policy nodes.
///
/// One policy per cluster on the target SoCs; the clamp is resolved against
/// the hardware limits (`cpuinfo_*`) so our own previous writes never feed
/// back into the next resolution.
pub struct SysfsCpufreq {
    policies: Vec<PolicyNode>,
}

impl SysfsCpufreq {
    pub fn discover() -> Result<Self> {
        Self::with_root(Path::new("/sys/devices/system/cpu/cpufreq"))
    }

    pub fn with_root(root: &Path) -> Result<Self> {
        let mut policies = Vec::new();
        for entry in fs::read_dir(root)
            .with_context(|| format!("failed to scan {}", root.display()))?
            .flatten()
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(cpu) = name.strip_prefix("policy").and_then(|n| n.parse().ok()) else {
                continue;
            };
            policies.push(PolicyNode { cpu, dir: path });
        }
        if policies.is_empty() {
            bail!("no cpufreq policies under {}", root.display());
        }
        policies.sort_by_key(|p| p.cpu);
        Ok(Self { policies })
    }
}

impl PolicyRefresh for SysfsCpufreq {
    fn refresh(&self, resolve: &dyn Fn(u32, PolicyLimits) -> Clamp) {
        for node in &self.policies {
            let limits = match node.limits() {
                Ok(limits) => limits,
                Err(err) => {
                    debug!("skipping policy{}: {err}", node.cpu);
                    continue;
                }
            };
            let clamp = resolve(node.cpu, limits);
            write_value(&node.dir.join("scaling_min_freq"), clamp.min);
            write_value(&node.dir.join("scaling_max_freq"), clamp.max);
        }
    }
}

/// Stand-in used when cpufreq discovery fails: clamp resolution never runs
/// and the other sinks keep working.
pub struct InertPolicy;

impl PolicyRefresh for InertPolicy {
    fn refresh(&self, _resolve: &dyn Fn(u32, PolicyLimits) -> Clamp) {}
}

/// Scheduler boost via cgroup v2 `cpu.uclamp.min` on the foreground group.
///
/// A grant records the displaced value in its handle so release restores
/// exactly what was there, even if something else wrote the node meanwhile
/// at apply time.
pub struct UclampGroup {
    foreground: PathBuf,
    root: PathBuf,
}

impl UclampGroup {
    pub fn new(root: impl Into<PathBuf>, foreground: impl Into<PathBuf>) -> Self {
        Self {
            foreground: foreground.into(),
            root: root.into(),
        }
    }

    fn fg_node(&self) -> PathBuf {
        self.foreground.join("cpu.uclamp.min")
    }

    fn root_node(&self) -> PathBuf {
        self.root.join("cpu.uclamp.min")
    }
}

impl CgroupBoost for UclampGroup {
    fn apply(&self, level: i32) -> Option<SlotHandle> {
        let node = self.fg_node();
        let prev: i32 = match read_value(&node) {
            Ok(v) => v,
            Err(err) => {
                debug!("uclamp apply refused: {err}");
                return None;
            }
        };
        write_value(&node, level.clamp(0, 100));
        Some(SlotHandle::new(prev))
    }

    fn release(&self, slot: SlotHandle) {
        write_value(&self.fg_node(), slot.raw().clamp(0, 100));
    }

    fn set_root_level(&self, level: i32) -> i32 {
        let node = self.root_node();
        let prev = read_value(&node).unwrap_or(0);
        write_value(&node, level.clamp(0, 100));
        prev
    }
}

/// GPU power-level floor via the kgsl sysfs node.
pub struct KgslPower {
    node: PathBuf,
}

impl KgslPower {
    pub fn probe(dir: &Path) -> Option<Self> {
        let node = dir.join("min_pwrlevel");
        if !node.exists() {
            warn!("no GPU power node at {}, GPU boost disabled", node.display());
            return None;
        }
        Some(Self { node })
    }
}

impl GpuPower for KgslPower {
    fn set_min_level(&self, level: u32) {
        write_value(&self.node, level);
    }
}

/// One devfreq device directory (`min_freq`, `max_freq` and the frequency
/// table). The table bounds are read once at open; the kernel rejects floors
/// outside them anyway.
pub struct SysfsDevfreq {
    dir: PathBuf,
    min: u64,
    max: u64,
}

impl SysfsDevfreq {
    pub fn open(dir: &Path) -> Result<Self> {
        let table = fs::read_to_string(dir.join("available_frequencies"))
            .with_context(|| format!("no frequency table in {}", dir.display()))?;
        let freqs: Vec<u64> = table
            .split_whitespace()
            .filter_map(|f| f.parse().ok())
            .collect();
        let (Some(&min), Some(&max)) = (freqs.iter().min(), freqs.iter().max()) else {
            bail!("empty frequency table in {}", dir.display());
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            min,
            max,
        })
    }
}

impl DevfreqDevice for SysfsDevfreq {
    fn min_freq(&self) -> u64 {
        self.min
    }

    fn max_freq(&self) -> u64 {
        self.max
    }

    fn set_floor(&self, min_freq: u64, max_boost: bool) {
        let target = if max_boost { self.max } else { min_freq };
        write_value(&self.dir.join("min_freq"), target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fake_policy(root: &Path, cpu: u32, cpuinfo_min: u32, cpuinfo_max: u32) {
        let dir = root.join(format!("policy{cpu}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("cpuinfo_min_freq"), cpuinfo_min.to_string()).unwrap();
        fs::write(dir.join("cpuinfo_max_freq"), cpuinfo_max.to_string()).unwrap();
        fs::write(dir.join("scaling_min_freq"), cpuinfo_min.to_string()).unwrap();
        fs::write(dir.join("scaling_max_freq"), cpuinfo_max.to_string()).unwrap();
    }

    #[test]
    fn cpufreq_refresh_writes_resolved_clamps() {
        let tmp = TempDir::new().unwrap();
        fake_policy(tmp.path(), 0, 300_000, 1_766_400);
        fake_policy(tmp.path(), 4, 300_000, 2_803_200);

        let sink = SysfsCpufreq::with_root(tmp.path()).unwrap();
        sink.refresh(&|cpu, limits| Clamp {
            min: if cpu == 0 { 1_324_800 } else { limits.max },
            max: limits.max,
        });

        let min0 = fs::read_to_string(tmp.path().join("policy0/scaling_min_freq")).unwrap();
        assert_eq!(min0, "1324800");
        let min4 = fs::read_to_string(tmp.path().join("policy4/scaling_min_freq")).unwrap();
        assert_eq!(min4, "2803200");
    }

    #[test]
    fn cpufreq_discovery_requires_policies() {
        let tmp = TempDir::new().unwrap();
        assert!(SysfsCpufreq::with_root(tmp.path()).is_err());
    }

    #[test]
    fn inert_policy_never_runs_the_resolver() {
        InertPolicy.refresh(&|_, _| panic!("resolver must not run"));
    }

    #[test]
    fn uclamp_release_restores_displaced_value() {
        let tmp = TempDir::new().unwrap();
        let fg = tmp.path().join("foreground");
        fs::create_dir_all(&fg).unwrap();
        fs::write(fg.join("cpu.uclamp.min"), "10.00\n").unwrap();
        fs::write(tmp.path().join("cpu.uclamp.min"), "0.00\n").unwrap();

        let sink = UclampGroup::new(tmp.path(), &fg);
        let slot = sink.apply(25).unwrap();
        assert_eq!(
            fs::read_to_string(fg.join("cpu.uclamp.min")).unwrap(),
            "25"
        );

        sink.release(slot);
        assert_eq!(
            fs::read_to_string(fg.join("cpu.uclamp.min")).unwrap(),
            "10"
        );
    }

    #[test]
    fn uclamp_root_level_swaps_and_clamps() {
        let tmp = TempDir::new().unwrap();
        let fg = tmp.path().join("foreground");
        fs::create_dir_all(&fg).unwrap();
        fs::write(tmp.path().join("cpu.uclamp.min"), "5\n").unwrap();

        let sink = UclampGroup::new(tmp.path(), &fg);
        // Negative suspend levels floor at zero on the node.
        assert_eq!(sink.set_root_level(-10), 5);
        assert_eq!(
            fs::read_to_string(tmp.path().join("cpu.uclamp.min")).unwrap(),
            "0"
        );
        assert_eq!(sink.set_root_level(5), 0);
    }

    #[test]
    fn devfreq_floor_and_max_boost() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("available_frequencies"),
            "200000000 300000000 1017600000 1804800000\n",
        )
        .unwrap();
        fs::write(tmp.path().join("min_freq"), "200000000\n").unwrap();

        let dev = SysfsDevfreq::open(tmp.path()).unwrap();
        assert_eq!(dev.min_freq(), 200_000_000);
        assert_eq!(dev.max_freq(), 1_804_800_000);

        dev.set_floor(1_017_600_000, false);
        assert_eq!(
            fs::read_to_string(tmp.path().join("min_freq")).unwrap(),
            "1017600000"
        );

        dev.set_floor(200_000_000, true);
        assert_eq!(
            fs::read_to_string(tmp.path().join("min_freq")).unwrap(),
            "1804800000"
        );
    }
}
