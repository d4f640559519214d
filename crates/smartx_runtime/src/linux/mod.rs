//! Linux `SchedulerShim` backed by raw `sched_setscheduler`/
//! `sched_setaffinity` calls, since neither has a safe wrapper in `libc`
//! beyond the FFI declaration itself.

use crate::error::{RuntimeError, RuntimeResult};
use crate::sched_shim::SchedulerShim;

pub struct LinuxScheduler;

impl SchedulerShim for LinuxScheduler {
    fn apply_realtime_priority(&self, priority: i32) -> RuntimeResult<()> {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        // Safety: `pthread_self()` always returns a valid handle for the
        // calling thread, and `param` lives for the duration of the call.
        let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if result != 0 {
            let errno = std::io::Error::last_os_error();
            return Err(RuntimeError::SchedulerUnavailable(format!(
                "sched_setscheduler(SCHED_FIFO, {priority}) failed: {errno}"
            )));
        }
        Ok(())
    }

    fn set_cpu_affinity(&self, cores: &[usize]) -> RuntimeResult<()> {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            for &core in cores {
                libc::CPU_SET(core, &mut set);
            }
            // Safety: `set` is a valid, zero-initialized `cpu_set_t` we
            // just populated; pid 0 means "the calling thread".
            let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
            if result != 0 {
                let errno = std::io::Error::last_os_error();
                return Err(RuntimeError::SchedulerUnavailable(format!(
                    "sched_setaffinity({cores:?}) failed: {errno}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires CAP_SYS_NICE or running as root"]
    fn test_apply_realtime_priority_requires_privilege() {
        let scheduler = LinuxScheduler;
        let _ = scheduler.apply_realtime_priority(10);
    }
}
