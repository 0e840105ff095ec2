//! Real-time scheduling setup for harness units.
//!
//! The two priority classes only mean something if the OS sees them as
//! different priorities. Each unit thread applies its class policy
//! ([`ClassPolicy`]) as the first thing it does; the orchestrator
//! optionally locks process memory once before any unit exists.
//!
//! Missing privileges (EPERM) are not fatal: the unit keeps the default
//! time-sharing policy, a warning is logged, and the run still produces
//! a report.
//!
//! Whenever no real-time policy is in effect (disabled, denied, or
//! `other`), best-effort units raise their own nice value instead, which
//! needs no privileges, so the classes still differ at OS level.

#![allow(unused_imports)] // Non-Linux builds compile the fallbacks only

use rtdiag_common::config::{CpuAffinity, RealtimeConfig, SchedPolicy};
use rtdiag_common::error::{HarnessError, HarnessResult};
use rtdiag_common::task::PriorityClass;
use tracing::{debug, info, warn};

/// What was actually applied to one unit thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitRealtimeStatus {
    /// Policy in effect, `None` if left at the OS default.
    pub scheduler_policy: Option<SchedPolicy>,
    /// OS priority in effect for RT policies.
    pub scheduler_priority: Option<u8>,
    /// CPUs the unit is pinned to, `None` if unpinned.
    pub cpu_affinity: Option<Vec<usize>>,
    /// Nice value set on the unit thread, `None` if left unchanged.
    pub nice: Option<i32>,
}

/// Scheduler policy and OS priority for one priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassPolicy {
    /// Scheduler policy.
    pub policy: SchedPolicy,
    /// OS priority (1-99).
    pub priority: u8,
}

impl ClassPolicy {
    /// Policy for `class` under `config`.
    ///
    /// Priorities are clamped to 1..=99 and best-effort always lands
    /// strictly below real-time, so the classes never tie.
    #[must_use]
    pub fn for_class(config: &RealtimeConfig, class: PriorityClass) -> Self {
        let rt = config.rt_priority.clamp(2, 99);
        let priority = match class {
            PriorityClass::RealTime => rt,
            PriorityClass::BestEffort => config.be_priority.clamp(1, rt - 1),
        };
        Self {
            policy: config.policy,
            priority,
        }
    }
}

/// OS priority for a class under `config`.
#[must_use]
pub fn class_priority(config: &RealtimeConfig, class: PriorityClass) -> u8 {
    ClassPolicy::for_class(config, class).priority
}

/// Nice value for a class when no real-time policy separates the classes.
///
/// Real-time units stay at 0 (going below needs privileges); best-effort
/// units use `be_nice` clamped to 0..=19.
#[must_use]
pub fn class_nice(config: &RealtimeConfig, class: PriorityClass) -> i32 {
    match class {
        PriorityClass::RealTime => 0,
        PriorityClass::BestEffort => config.be_nice.clamp(0, 19),
    }
}

/// Once-per-process setup, run by the orchestrator before any unit exists.
///
/// Returns true if memory was locked.
///
/// # Errors
///
/// Returns an error if `mlockall` fails for a reason other than
/// missing privileges.
pub fn init_process(config: &RealtimeConfig) -> HarnessResult<bool> {
    if !config.enabled {
        info!(
            be_nice = class_nice(config, PriorityClass::BestEffort),
            "Real-time scheduling off; classes separated by nice value"
        );
        return Ok(false);
    }
    info!(
        policy = ?config.policy,
        rt_priority = class_priority(config, PriorityClass::RealTime),
        be_priority = class_priority(config, PriorityClass::BestEffort),
        cpus = ?config.cpu_affinity.cpus(),
        "Real-time scheduling on"
    );
    if config.lock_memory {
        lock_memory()
    } else {
        Ok(false)
    }
}

/// Apply the class policy and CPU affinity to the calling unit thread.
///
/// # Errors
///
/// Returns an error if the OS rejects a setting for a reason other than
/// missing privileges or a nonexistent CPU.
pub fn apply_unit_policy(
    config: &RealtimeConfig,
    class: PriorityClass,
) -> HarnessResult<UnitRealtimeStatus> {
    if !config.enabled {
        return Ok(UnitRealtimeStatus {
            nice: apply_nice(class_nice(config, class))?,
            ..UnitRealtimeStatus::default()
        });
    }

    let class_policy = ClassPolicy::for_class(config, class);
    let applied = apply_class_policy(class_policy)?;
    let cpu_affinity = pin_current_thread(&config.cpu_affinity)?;

    let scheduler_priority = applied
        .filter(|p| p.policy != SchedPolicy::Other)
        .map(|p| p.priority);
    let nice = match scheduler_priority {
        Some(_) => None,
        None => apply_nice(class_nice(config, class))?,
    };

    let status = UnitRealtimeStatus {
        scheduler_policy: applied.map(|p| p.policy),
        scheduler_priority,
        cpu_affinity,
        nice,
    };
    debug!(%class, ?status, "Unit policy applied");
    Ok(status)
}

#[cfg(target_os = "linux")]
fn lock_memory() -> HarnessResult<bool> {
    use nix::errno::Errno;
    use nix::sys::mman::{mlockall, MlockAllFlags};

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => {
            info!("Process memory locked");
            Ok(true)
        }
        Err(Errno::EPERM) => {
            warn!("mlockall denied (no CAP_IPC_LOCK); page faults may show up as job latency");
            Ok(false)
        }
        Err(e) => Err(HarnessError::Realtime(format!("mlockall: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> HarnessResult<bool> {
    warn!("Memory locking unsupported on this platform");
    Ok(false)
}

/// Set policy and priority of the calling thread. `None` means the
/// request was denied and the thread kept its default policy.
#[cfg(target_os = "linux")]
fn apply_class_policy(class_policy: ClassPolicy) -> HarnessResult<Option<ClassPolicy>> {
    let (native, priority) = match class_policy.policy {
        SchedPolicy::Fifo => (libc::SCHED_FIFO, i32::from(class_policy.priority)),
        SchedPolicy::Rr => (libc::SCHED_RR, i32::from(class_policy.priority)),
        SchedPolicy::Other => (libc::SCHED_OTHER, 0),
    };
    let param = libc::sched_param {
        sched_priority: priority,
    };

    // SAFETY: pthread_self() is always a valid handle for the calling
    // thread and `param` outlives the call.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), native, &param) };
    match rc {
        0 => Ok(Some(class_policy)),
        libc::EPERM => {
            warn!(
                policy = ?class_policy.policy,
                priority = class_policy.priority,
                "Scheduler policy denied (no CAP_SYS_NICE); classes will not preempt each other"
            );
            Ok(None)
        }
        code => Err(HarnessError::Realtime(format!(
            "pthread_setschedparam: {}",
            std::io::Error::from_raw_os_error(code)
        ))),
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_class_policy(class_policy: ClassPolicy) -> HarnessResult<Option<ClassPolicy>> {
    warn!(?class_policy, "Scheduler policy unsupported on this platform");
    Ok(None)
}

/// Set the nice value of the calling thread. `None` if `nice` is 0 or the
/// change was refused.
#[cfg(target_os = "linux")]
fn apply_nice(nice: i32) -> HarnessResult<Option<i32>> {
    if nice == 0 {
        return Ok(None);
    }

    // SAFETY: gettid has no preconditions.
    let tid = unsafe { libc::gettid() };
    // Nice is per thread on Linux; `who` 0 also means the caller
    let who = libc::id_t::try_from(tid).unwrap_or(0);
    // SAFETY: plain syscall on the calling thread.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, who, nice) };
    if rc == 0 {
        return Ok(Some(nice));
    }

    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EPERM | libc::EACCES) => {
            warn!(nice, "Nice value refused; classes share the processor evenly");
            Ok(None)
        }
        _ => Err(HarnessError::Realtime(format!("setpriority: {err}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_nice(nice: i32) -> HarnessResult<Option<i32>> {
    if nice != 0 {
        warn!(nice, "Per-thread nice unsupported on this platform");
    }
    Ok(None)
}

/// Pin the calling thread to the configured CPUs.
#[cfg(target_os = "linux")]
fn pin_current_thread(affinity: &CpuAffinity) -> HarnessResult<Option<Vec<usize>>> {
    use nix::errno::Errno;
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = affinity.cpus();
    if cpus.is_empty() {
        return Ok(None);
    }

    let mut set = CpuSet::new();
    for &cpu in &cpus {
        set.set(cpu)
            .map_err(|e| HarnessError::Realtime(format!("CPU {cpu} out of range: {e}")))?;
    }

    // Pid 0 is the calling thread
    match sched_setaffinity(Pid::from_raw(0), &set) {
        Ok(()) => Ok(Some(cpus)),
        Err(Errno::EINVAL) => {
            warn!(?cpus, "No usable CPU in affinity set; unit left unpinned");
            Ok(None)
        }
        Err(e) => Err(HarnessError::Realtime(format!("sched_setaffinity: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_current_thread(affinity: &CpuAffinity) -> HarnessResult<Option<Vec<usize>>> {
    if !affinity.cpus().is_empty() {
        warn!(?affinity, "CPU pinning unsupported on this platform");
    }
    Ok(None)
}
