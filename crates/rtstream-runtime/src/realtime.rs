//! Platform scheduling adapter.
//!
//! Everything that touches the OS scheduler lives here:
//! - Process setup: capability validation and memory locking (mlockall)
//! - Per-thread setup: stack pre-faulting, SCHED_FIFO/SCHED_RR priority, CPU affinity
//! - [`ThreadPriorityControl`], the priority raise/restore used by the ceiling mutex
//!
//! Missing privileges degrade to warnings unless `fail_fast` is configured.

#![allow(unsafe_code)]

use crate::pause::{NoPriorityControl, PriorityControl};
use rtstream_common::config::{CpuAffinity, RealtimeConfig, SchedPolicy, SchedulingConfig};
use rtstream_common::error::{RtError, RtResult};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of process-wide real-time setup.
#[derive(Debug, Clone, Default)]
pub struct ProcessRtStatus {
    /// Whether memory was locked successfully.
    pub memory_locked: bool,
}

/// Result of real-time setup on one task thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadRtStatus {
    /// Stack bytes pre-faulted.
    pub stack_prefaulted: usize,
    /// Applied scheduler policy.
    pub scheduler_policy: Option<SchedPolicy>,
    /// Applied scheduler priority.
    pub scheduler_priority: Option<u8>,
    /// CPUs the thread is pinned to.
    pub cpu_affinity: Option<Vec<usize>>,
}

/// Prepare the process before any task thread starts.
///
/// `ceiling` is the highest task priority, which must be grantable when
/// `fail_fast` is set.
///
/// # Errors
///
/// Returns an error if `fail_fast` is set and capabilities are missing, or
/// if memory locking fails for a reason other than missing privileges.
pub fn init_process(config: &RealtimeConfig, ceiling: u8) -> RtResult<ProcessRtStatus> {
    if !config.enabled {
        info!("Real-time scheduling disabled in configuration");
        return Ok(ProcessRtStatus::default());
    }

    if config.fail_fast {
        info!("Validating real-time capabilities (fail_fast=true)");
        validate_rt_config(config, ceiling)?;
    }

    let memory_locked = if config.lock_memory {
        lock_memory()?
    } else {
        false
    };

    let status = ProcessRtStatus { memory_locked };
    info!(?status, "Process real-time setup complete");
    Ok(status)
}

/// Apply a task's scheduling record to the calling thread.
///
/// Must run on the task thread itself, before its first cycle.
///
/// # Errors
///
/// Returns an error if the scheduler or affinity call fails for a reason
/// other than missing privileges.
pub fn apply_thread_scheduling(
    sched: &SchedulingConfig,
    config: &RealtimeConfig,
) -> RtResult<ThreadRtStatus> {
    if !config.enabled {
        debug!(task = %sched.kind, "Real-time disabled, keeping default thread scheduling");
        return Ok(ThreadRtStatus::default());
    }

    let stack_prefaulted = prefault_stack(config.prefault_stack_size);
    let (scheduler_policy, scheduler_priority) = set_scheduler(config.policy, sched.priority)?;
    let cpu_affinity = set_cpu_affinity(&config.cpu_affinity)?;

    let status = ThreadRtStatus {
        stack_prefaulted,
        scheduler_policy,
        scheduler_priority,
        cpu_affinity,
    };
    info!(task = %sched.kind, ceiling = sched.ceiling, ?status, "Thread scheduling applied");
    Ok(status)
}

/// The priority control matching the configuration.
#[must_use]
pub fn priority_control(config: &RealtimeConfig) -> Arc<dyn PriorityControl> {
    if config.enabled && config.policy != SchedPolicy::Other {
        Arc::new(ThreadPriorityControl)
    } else {
        Arc::new(NoPriorityControl)
    }
}

/// Raises the calling thread's real-time priority for ceiling-protected
/// critical sections.
///
/// Threads not running under a real-time policy are left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPriorityControl;

impl PriorityControl for ThreadPriorityControl {
    #[cfg(target_os = "linux")]
    fn raise_to(&self, ceiling: u8) -> Option<u8> {
        let (policy, current) = current_thread_scheduling()?;
        if current >= ceiling {
            return None;
        }
        match set_thread_priority(policy, ceiling) {
            Ok(()) => Some(current),
            Err(err) => {
                warn!(ceiling, %err, "Failed to raise thread to priority ceiling");
                None
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn raise_to(&self, _ceiling: u8) -> Option<u8> {
        None
    }

    #[cfg(target_os = "linux")]
    fn restore(&self, previous: u8) {
        let Some((policy, _)) = current_thread_scheduling() else {
            return;
        };
        if let Err(err) = set_thread_priority(policy, previous) {
            error!(previous, %err, "Failed to restore thread priority after critical section");
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn restore(&self, _previous: u8) {}
}

/// Policy and priority of the calling thread, if it runs under an RT policy.
#[cfg(target_os = "linux")]
fn current_thread_scheduling() -> Option<(libc::c_int, u8)> {
    // SAFETY: pid 0 addresses the calling thread; no pointers involved.
    let policy = unsafe { libc::sched_getscheduler(0) };
    if policy != libc::SCHED_FIFO && policy != libc::SCHED_RR {
        return None;
    }

    let mut param = libc::sched_param { sched_priority: 0 };
    // SAFETY: `param` is a valid, writable sched_param.
    if unsafe { libc::sched_getparam(0, &mut param) } != 0 {
        return None;
    }
    u8::try_from(param.sched_priority).ok().map(|p| (policy, p))
}

#[cfg(target_os = "linux")]
fn set_thread_priority(policy: libc::c_int, priority: u8) -> std::io::Result<()> {
    let param = libc::sched_param {
        sched_priority: i32::from(priority),
    };
    // SAFETY: pid 0 addresses the calling thread and `param` is valid.
    if unsafe { libc::sched_setscheduler(0, policy, &param) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Lock all current and future memory pages.
#[cfg(target_os = "linux")]
fn lock_memory() -> RtResult<bool> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    debug!("Locking memory pages with mlockall");

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => {
            info!("Memory locked successfully");
            Ok(true)
        }
        Err(nix::errno::Errno::EPERM) => {
            warn!(
                "mlockall failed with EPERM - running without CAP_IPC_LOCK capability. \
                 Page faults may occur during execution."
            );
            Ok(false)
        }
        Err(e) => Err(RtError::Config(format!("mlockall failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> RtResult<bool> {
    warn!("mlockall not available on this platform");
    Ok(false)
}

/// Touch `size` bytes of the calling thread's stack so its pages are
/// resident before the first cycle.
fn prefault_stack(size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let faulted = prefault_stack_frames(size, 0);
    debug!(requested = size, faulted, "Stack pre-fault complete");
    faulted
}

#[inline(never)]
fn prefault_stack_frames(remaining: usize, depth: usize) -> usize {
    const FRAME_SIZE: usize = 4096;
    const MAX_DEPTH: usize = 1024;

    if remaining < FRAME_SIZE || depth >= MAX_DEPTH {
        return 0;
    }

    let mut frame = [0u8; FRAME_SIZE];
    // SAFETY: both offsets lie inside our own stack buffer.
    unsafe {
        std::ptr::write_volatile(frame.as_mut_ptr(), 0xAA);
        std::ptr::write_volatile(frame.as_mut_ptr().add(FRAME_SIZE - 1), 0x55);
    }
    std::hint::black_box(&frame);

    FRAME_SIZE + prefault_stack_frames(remaining - FRAME_SIZE, depth + 1)
}

/// Set real-time scheduler policy and priority for the calling thread.
#[cfg(target_os = "linux")]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> RtResult<(Option<SchedPolicy>, Option<u8>)> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Other => {
            debug!("Using SCHED_OTHER (non-RT) scheduling");
            return Ok((Some(SchedPolicy::Other), None));
        }
    };

    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(original = priority, clamped, "Scheduler priority clamped to valid range");
    }

    match set_thread_priority(linux_policy, clamped) {
        Ok(()) => {
            debug!(?policy, priority = clamped, "Real-time scheduler configured");
            Ok((Some(policy), Some(clamped)))
        }
        Err(err) if err.raw_os_error() == Some(libc::EPERM) => {
            warn!(
                "sched_setscheduler failed with EPERM - running without RT privileges. \
                 Consider running with CAP_SYS_NICE capability or as root."
            );
            Ok((None, None))
        }
        Err(err) => Err(RtError::Config(format!("sched_setscheduler failed: {err}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> RtResult<(Option<SchedPolicy>, Option<u8>)> {
    warn!(?policy, priority, "Real-time scheduling not available on this platform");
    Ok((None, None))
}

/// Set CPU affinity for the calling thread.
#[cfg(target_os = "linux")]
fn set_cpu_affinity(affinity: &CpuAffinity) -> RtResult<Option<Vec<usize>>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = match affinity {
        CpuAffinity::None => return Ok(None),
        CpuAffinity::Single(cpu) => vec![*cpu],
        CpuAffinity::Set(cpus) if cpus.is_empty() => return Ok(None),
        CpuAffinity::Set(cpus) => cpus.clone(),
    };

    let mut cpu_set = CpuSet::new();
    for &cpu in &cpus {
        cpu_set
            .set(cpu)
            .map_err(|e| RtError::Config(format!("Invalid CPU index {cpu}: {e}")))?;
    }

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => {
            debug!(?cpus, "CPU affinity set");
            Ok(Some(cpus))
        }
        Err(nix::errno::Errno::EINVAL) => {
            warn!(?cpus, "Invalid CPU set - some CPUs may not exist");
            Ok(None)
        }
        Err(e) => Err(RtError::Config(format!("sched_setaffinity failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(affinity: &CpuAffinity) -> RtResult<Option<Vec<usize>>> {
    if !matches!(affinity, CpuAffinity::None) {
        warn!("CPU affinity not available on this platform");
    }
    Ok(None)
}

/// Information about real-time capabilities of the system.
#[derive(Debug, Clone, Default)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// RLIMIT_RTPRIO value (max RT priority allowed).
    pub rtprio_limit: Option<u64>,
    /// RLIMIT_MEMLOCK value (max lockable memory).
    pub memlock_limit: Option<u64>,
    /// Whether running on a PREEMPT_RT kernel.
    pub preempt_rt: bool,
}

impl RtCapabilities {
    /// Whether threads may be given RT priority `priority`.
    #[must_use]
    pub fn can_use_rt_priority(&self, priority: u8) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l >= u64::from(priority))
    }

    /// Whether memory locking is likely to succeed.
    #[must_use]
    pub fn can_lock_memory(&self) -> bool {
        if self.is_root {
            return true;
        }

        #[cfg(target_family = "unix")]
        {
            self.memlock_limit.is_some_and(|l| l == libc::RLIM_INFINITY)
        }

        #[cfg(not(target_family = "unix"))]
        {
            false
        }
    }
}

/// Probe the capabilities of the current process.
#[cfg(target_os = "linux")]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    // SAFETY: geteuid has no preconditions.
    let mut caps = RtCapabilities {
        is_root: unsafe { libc::geteuid() } == 0,
        ..Default::default()
    };

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `rlim` is a valid, writable rlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0 {
        caps.rtprio_limit = Some(rlim.rlim_cur);
    }
    // SAFETY: as above.
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut rlim) } == 0 {
        caps.memlock_limit = Some(rlim.rlim_cur);
    }

    if let Ok(version) = std::fs::read_to_string("/proc/version") {
        caps.preempt_rt = version.contains("PREEMPT_RT") || version.contains("PREEMPT RT");
    }

    caps
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities::default()
}

/// Check that the configured real-time setup can be honored.
///
/// `highest_priority` is the largest task priority (the pause-state ceiling).
///
/// # Errors
///
/// Returns an error listing every unmet requirement.
pub fn validate_rt_config(config: &RealtimeConfig, highest_priority: u8) -> RtResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let caps = check_rt_capabilities();
    let mut issues = Vec::new();

    if !caps.preempt_rt {
        warn!(
            "PREEMPT_RT kernel not detected. Real-time performance may be degraded. \
             For production deployments, use a kernel with PREEMPT_RT patches."
        );
    }

    if config.policy != SchedPolicy::Other && !caps.can_use_rt_priority(highest_priority) {
        issues.push(format!(
            "Cannot use RT priority {highest_priority} (SCHED_{:?}): RLIMIT_RTPRIO={:?}, is_root={}. \
             Grant CAP_SYS_NICE capability or raise RLIMIT_RTPRIO.",
            config.policy, caps.rtprio_limit, caps.is_root
        ));
    }

    if config.lock_memory && !caps.can_lock_memory() {
        issues.push(format!(
            "Cannot lock memory: RLIMIT_MEMLOCK={:?}, is_root={}. \
             Grant CAP_IPC_LOCK capability or set RLIMIT_MEMLOCK to unlimited.",
            caps.memlock_limit, caps.is_root
        ));
    }

    if issues.is_empty() {
        info!("Real-time capabilities validated successfully");
        Ok(())
    } else {
        let message = format!(
            "Real-time requirements not met (fail_fast=true):\n  - {}",
            issues.join("\n  - ")
        );
        error!("{}", message);
        Err(RtError::Config(message))
    }
}
