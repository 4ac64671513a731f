// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost daemon
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

mod display;
mod input;
mod sysfs;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use boostd_core::{ClusterMap, CpuBoostDomain, CpuSinks, DevfreqBoostDomain, TunableStore, Tunables};
use clap::Parser;
use log::{info, warn};

use crate::display::DisplayWatcher;
use crate::input::InputWatcher;
use crate::sysfs::{InertPolicy, KgslPower, SysfsCpufreq, SysfsDevfreq, UclampGroup};

/// Flex kicks arrive as SIGUSR1 from cooperating daemons (compositor,
/// frame pacer); the handler only flips this flag.
static FLEX_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn flex_signal_handler(_: libc::c_int) {
    FLEX_REQUESTED.store(true, Ordering::Relaxed);
}

#[derive(Debug, Parser)]
#[command(
    version,
    about = "Event-driven CPU/GPU/bus performance boost daemon for big.LITTLE SoCs."
)]
struct Opts {
    /// Path to a JSON tunables file; missing keys keep their defaults.
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// CPUs of the little (efficiency) cluster.
    ///
    /// Accepts a comma-separated list of CPUs or ranges (i.e., 0-3,6).
    #[clap(long, default_value = "0-3")]
    little_cpus: String,

    /// Backlight brightness node used for display state tracking.
    /// Autodetected from /sys/class/backlight when omitted.
    #[clap(long)]
    backlight: Option<PathBuf>,

    /// Devfreq device directory to boost (e.g. /sys/class/devfreq/soc:qcom,cpubw).
    #[clap(long)]
    devfreq: Option<PathBuf>,

    /// GPU device directory carrying min_pwrlevel.
    #[clap(long, default_value = "/sys/class/kgsl/kgsl-3d0")]
    gpu: PathBuf,

    /// cgroup v2 hierarchy root.
    #[clap(long, default_value = "/sys/fs/cgroup")]
    cgroup_root: PathBuf,

    /// Foreground task group, relative to the cgroup root.
    #[clap(long, default_value = "foreground")]
    foreground_group: String,

    /// Enable verbose output, including debug-level write failures.
    #[clap(short = 'v', long)]
    verbose: bool,
}

/// Parse "0-3,6" style CPU lists.
fn parse_cpu_list(list: &str) -> Result<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo.trim().parse().context("bad CPU range start")?;
            let hi: u32 = hi.trim().parse().context("bad CPU range end")?;
            if lo > hi {
                bail!("inverted CPU range {part}");
            }
            cpus.extend(lo..=hi);
        } else {
            cpus.push(part.parse().context("bad CPU id")?);
        }
    }
    if cpus.is_empty() {
        bail!("empty CPU list");
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

fn load_tunables(path: Option<&PathBuf>) -> Result<Tunables> {
    let Some(path) = path else {
        return Ok(Tunables::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("bad tunables in {}", path.display()))
}

fn init_logging(verbose: bool) -> Result<()> {
    let loglevel = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        loglevel,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logging(opts.verbose)?;

    let tunables = TunableStore::new(load_tunables(opts.config.as_ref())?);
    let little = parse_cpu_list(&opts.little_cpus)?;
    let nr_cpus = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(8);
    let clusters = ClusterMap::new(&little, nr_cpus);

    // A machine without cpufreq policies still gets the cgroup, GPU and
    // devfreq boosts; only frequency clamping goes inert.
    let policy: Arc<dyn boostd_core::PolicyRefresh> = match SysfsCpufreq::discover() {
        Ok(policies) => Arc::new(policies),
        Err(err) => {
            warn!("cpufreq clamping disabled: {err}");
            Arc::new(InertPolicy)
        }
    };
    let cgroup = Arc::new(UclampGroup::new(
        &opts.cgroup_root,
        opts.cgroup_root.join(&opts.foreground_group),
    ));
    let gpu = KgslPower::probe(&opts.gpu).map(|g| Arc::new(g) as Arc<dyn boostd_core::GpuPower>);

    let cpu = Arc::new(CpuBoostDomain::new(
        Arc::clone(&tunables),
        clusters,
        CpuSinks {
            cgroup,
            gpu,
            policy,
        },
    ));
    let devfreq = Arc::new(DevfreqBoostDomain::new(Arc::clone(&tunables)));

    if let Some(dir) = &opts.devfreq {
        match SysfsDevfreq::open(dir) {
            Ok(dev) => devfreq.register_device(Arc::new(dev)),
            Err(err) => warn!("devfreq boost disabled: {err}"),
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    // SAFETY: the handler only performs an atomic store.
    unsafe {
        libc::signal(
            libc::SIGUSR1,
            flex_signal_handler as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }

    let display_thread = {
        let watcher = match &opts.backlight {
            Some(node) => Some(DisplayWatcher::new(node.clone())),
            None => DisplayWatcher::autodetect(),
        };
        watcher.map(|watcher| {
            let cpu = Arc::clone(&cpu);
            let devfreq = Arc::clone(&devfreq);
            let shutdown = shutdown.clone();
            std::thread::spawn(move || watcher.run(cpu, devfreq, shutdown))
        })
    };

    let flex_thread = {
        let cpu = Arc::clone(&cpu);
        let devfreq = Arc::clone(&devfreq);
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(std::time::Duration::from_millis(50));
                if FLEX_REQUESTED.swap(false, Ordering::Relaxed) {
                    cpu.kick_flex();
                    devfreq.kick_flex();
                }
            }
        })
    };

    let watcher = InputWatcher::scan()?;
    if watcher.device_count() == 0 {
        warn!("no input devices found, input boosting is inert");
    }
    info!("boostd running ({} input devices)", watcher.device_count());

    let result = watcher.run(Arc::clone(&cpu), Arc::clone(&devfreq), shutdown.clone());

    shutdown.store(true, Ordering::Relaxed);
    if let Some(thread) = display_thread {
        let _ = thread.join();
    }
    let _ = flex_thread.join();
    info!("boostd shutting down");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_list_parsing() {
        assert_eq!(parse_cpu_list("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("0,2, 4-5").unwrap(), vec![0, 2, 4, 5]);
        assert_eq!(parse_cpu_list("3,1,3").unwrap(), vec![1, 3]);
        assert!(parse_cpu_list("").is_err());
        assert!(parse_cpu_list("5-2").is_err());
        assert!(parse_cpu_list("a").is_err());
    }

    #[test]
    fn missing_config_is_defaults() {
        let t = load_tunables(None).unwrap();
        assert_eq!(t.input_boost_ms, Tunables::default().input_boost_ms);
    }
}
