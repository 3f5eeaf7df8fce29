//! Real-time scheduling for the control loop (Linux: SCHED_FIFO, CPU affinity, mlockall).
//!
//! The stepper drivers time their pulses with sleeps, so a preempted process
//! shows up as uneven auger speed. Every step here is best-effort: failures are
//! logged and the run continues on the normal scheduler.

use crate::cli::{RtArgs, RtLock};

#[cfg(all(feature = "rt", target_os = "linux"))]
mod linux {
    use crate::cli::RtLock;
    use libc::{CPU_ISSET, CPU_SET, CPU_ZERO, SCHED_FIFO};

    /// Capacity of cpu_set_t in CPU indices (bits).
    const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;
    /// CAP_SYS_NICE bit in the /proc capability masks.
    const CAP_SYS_NICE: u64 = 1 << 23;

    fn last_os_error() -> eyre::Report {
        eyre::eyre!(std::io::Error::last_os_error())
    }

    fn is_retryable(err: &std::io::Error) -> bool {
        matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    }

    fn memlock_limit() -> Option<String> {
        let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
        // SAFETY: getrlimit only writes into the provided struct.
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        // SAFETY: rc == 0 means the struct was filled in.
        let cur = unsafe { rlim.assume_init() }.rlim_cur;
        Some(if cur == libc::RLIM_INFINITY {
            "memlock limit: unlimited".to_string()
        } else {
            format!("memlock limit: {} KiB", cur / 1024)
        })
    }

    fn mlockall(flags: libc::c_int) -> std::io::Result<()> {
        // SAFETY: mlockall takes no pointers.
        if unsafe { libc::mlockall(flags) } == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    pub(super) fn lock_memory(lock: RtLock) -> eyre::Result<()> {
        let flags = match lock {
            RtLock::None => return Ok(()),
            RtLock::Current => libc::MCL_CURRENT,
            RtLock::All => libc::MCL_CURRENT | libc::MCL_FUTURE,
        };
        let Err(err) = mlockall(flags) else {
            return Ok(());
        };
        // All failed on limits: settle for what is resident now
        let fallback = if lock == RtLock::All && is_retryable(&err) {
            match mlockall(libc::MCL_CURRENT) {
                Ok(()) => {
                    tracing::warn!(error = %err, "mlockall(current|future) failed; locked current pages only");
                    return Ok(());
                }
                Err(e2) => Some(e2),
            }
        } else {
            None
        };

        let mut msg = format!("mlockall failed: {err}");
        if is_retryable(&err) {
            if let Some(hint) = memlock_limit() {
                msg.push_str("; ");
                msg.push_str(&hint);
            }
            msg.push_str("; needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
            if let Some(e2) = fallback {
                msg.push_str(&format!("; fallback mlockall(current) also failed: {e2}"));
            }
        }
        Err(eyre::eyre!(msg))
    }

    fn may_set_fifo() -> bool {
        // SAFETY: geteuid cannot fail.
        if unsafe { libc::geteuid() } == 0 {
            return true;
        }
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            // unknown; let sched_setscheduler decide
            return true;
        };
        status
            .lines()
            .filter(|l| l.starts_with("CapEff:") || l.starts_with("CapPrm:"))
            .filter_map(|l| l.split_whitespace().nth(1))
            .filter_map(|hex| u64::from_str_radix(hex, 16).ok())
            .any(|caps| caps & CAP_SYS_NICE != 0)
    }

    pub(super) fn fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
        if !may_set_fifo() {
            eyre::bail!(
                "insufficient privileges for SCHED_FIFO: needs CAP_SYS_NICE or root \
                 (e.g. 'sudo setcap cap_sys_nice=ep /path/to/trickler')"
            );
        }
        // SAFETY: plain queries.
        let (min, max) = unsafe {
            (
                libc::sched_get_priority_min(SCHED_FIFO),
                libc::sched_get_priority_max(SCHED_FIFO),
            )
        };
        let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
        let sched_priority = prio.unwrap_or(max).clamp(min, max);
        let param = libc::sched_param { sched_priority };
        // SAFETY: param outlives the call.
        if unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) } != 0 {
            return Err(last_os_error());
        }
        Ok(sched_priority)
    }

    pub(super) fn pin_to_cpu(cpu: usize) -> eyre::Result<()> {
        // SAFETY: sysconf has no preconditions.
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if online < 1 {
            eyre::bail!("_SC_NPROCESSORS_ONLN < 1");
        }
        if cpu as libc::c_long >= online {
            eyre::bail!("requested CPU {cpu} >= online {online}");
        }
        if cpu >= MAX_CPUSET_BITS {
            eyre::bail!("requested CPU {cpu} exceeds cpu_set_t capacity {MAX_CPUSET_BITS}");
        }
        let size = std::mem::size_of::<libc::cpu_set_t>();
        // SAFETY: cpu_set_t is plain data; the CPU_* helpers stay within its bits.
        unsafe {
            let mut allowed: libc::cpu_set_t = std::mem::zeroed();
            CPU_ZERO(&mut allowed);
            if libc::sched_getaffinity(0, size, &mut allowed) == 0 && !CPU_ISSET(cpu, &allowed) {
                eyre::bail!("CPU {cpu} not permitted by current affinity mask");
            }
            let mut desired: libc::cpu_set_t = std::mem::zeroed();
            CPU_ZERO(&mut desired);
            CPU_SET(cpu, &mut desired);
            if libc::sched_setaffinity(0, size, &desired) != 0 {
                return Err(last_os_error());
            }
        }
        Ok(())
    }
}

/// Apply real-time settings once per process. A no-op unless `--rt` was given.
#[cfg(all(feature = "rt", target_os = "linux"))]
pub fn setup_rt_once(args: &RtArgs) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !args.rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        let lock = args.rt_lock.unwrap_or_else(RtLock::os_default);
        match linux::lock_memory(lock) {
            Ok(()) => tracing::info!(?lock, "rt: memory lock"),
            Err(err) => tracing::warn!(error = %err, "rt: memory not locked"),
        }
        match linux::fifo_priority(args.rt_prio) {
            Ok(prio) => tracing::info!(prio, "rt: SCHED_FIFO"),
            Err(err) => tracing::warn!(error = %err, requested = ?args.rt_prio, "rt: SCHED_FIFO not applied"),
        }
        let cpu = args.rt_cpu.unwrap_or(0);
        match linux::pin_to_cpu(cpu) {
            Ok(()) => tracing::info!(cpu, "rt: pinned"),
            Err(err) => tracing::warn!(error = %err, "rt: affinity not applied"),
        }
    });
}

#[cfg(not(all(feature = "rt", target_os = "linux")))]
pub fn setup_rt_once(args: &RtArgs) {
    if args.rt {
        let lock = args.rt_lock.unwrap_or_else(RtLock::os_default);
        tracing::warn!(
            ?lock,
            "real-time mode needs Linux and the `rt` feature; running on the normal scheduler"
        );
    }
}
