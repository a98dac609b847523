//! Realtime-thread plumbing shared by the tonestack engine crates: bounded
//! lock-free queues for control-to-audio handoff, plus the small set of OS
//! calls an audio thread performs once at startup (memory locking, scheduler
//! promotion, denormal control).

pub mod queue;

pub use queue::{EventQueue, QueueError};

/// Enables flush-to-zero and denormals-are-zero on supported CPUs.
///
/// Denormal operands stall the FPU badly enough to blow a period deadline on
/// small buffers, so the audio thread sets these bits before its first cycle.
#[inline]
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn enable_ftz_daz() {
    unsafe {
        #[cfg(target_arch = "x86")]
        use std::arch::x86::{_mm_getcsr, _mm_setcsr};
        #[cfg(target_arch = "x86_64")]
        use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};

        const FTZ: u32 = 1 << 15;
        const DAZ: u32 = 1 << 6;
        let csr = _mm_getcsr();
        _mm_setcsr(csr | FTZ | DAZ);
    }
}

/// No-op implementation for non x86/x86_64 targets.
#[inline]
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub fn enable_ftz_daz() {}

/// Pins the process address space into RAM so the audio thread never takes a
/// major page fault mid-period. Missing `CAP_IPC_LOCK` is tolerated: running
/// without locked memory is still acceptable.
#[cfg(target_os = "linux")]
pub fn lock_memory() -> std::io::Result<()> {
    unsafe {
        let flags = libc::MCL_CURRENT | libc::MCL_FUTURE;
        if libc::mlockall(flags) != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EPERM) {
                return Ok(());
            }
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn lock_memory() -> std::io::Result<()> {
    Ok(())
}

/// Promotes the calling thread to round-robin realtime scheduling at the
/// given priority. Returns an error when the scheduler change is refused
/// (insufficient rtprio limits); callers log and continue at default
/// priority.
#[cfg(target_os = "linux")]
pub fn promote_to_realtime(priority: i32) -> std::io::Result<()> {
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority;
        if libc::sched_setscheduler(0, libc::SCHED_RR, &param) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn promote_to_realtime(_priority: i32) -> std::io::Result<()> {
    Ok(())
}
