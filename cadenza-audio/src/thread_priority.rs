//! Best-effort real-time priority for the render threads.

use tracing::{debug, warn};

/// Outcome of a priority elevation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityResult {
    /// The calling thread now runs with real-time scheduling.
    Elevated,
    /// The OS refused, typically for lack of privilege. The thread keeps
    /// running at normal priority.
    Denied,
    /// No elevation path on this platform.
    Unsupported,
}

/// Tries to move the calling thread to a real-time scheduling class.
///
/// Failure is not fatal; the render loops work at normal priority with a
/// higher underrun risk, and the caller reports a degradation instead.
pub fn set_realtime_priority() -> PriorityResult {
    let result = platform_set_realtime_priority();
    match result {
        PriorityResult::Elevated => debug!("render thread elevated to real-time priority"),
        PriorityResult::Denied => {
            warn!("real-time priority denied, continuing at normal priority")
        }
        PriorityResult::Unsupported => {
            debug!("real-time priority not supported on this platform")
        }
    }
    result
}

#[cfg(unix)]
fn platform_set_realtime_priority() -> PriorityResult {
    // SCHED_FIFO a notch below the maximum, leaving headroom for the
    // kernel's own real-time work.
    unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max < 0 {
            return PriorityResult::Unsupported;
        }
        let param = libc::sched_param {
            sched_priority: (max - 10).max(1),
        };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) == 0 {
            PriorityResult::Elevated
        } else {
            PriorityResult::Denied
        }
    }
}

#[cfg(not(unix))]
fn platform_set_realtime_priority() -> PriorityResult {
    PriorityResult::Unsupported
}
