//! Real-time scheduling shim.
//!
//! Raising a zone worker thread to an RT scheduling class and pinning it
//! to a CPU are both raw, unsafe, platform-specific syscalls that have no
//! place sprinkled through the zone worker's control flow and no way to
//! exercise in a portable test. Both are isolated behind this trait, with
//! a `libc`-backed implementation on Linux and a mock used everywhere
//! else (tests inject the mock explicitly). This follows the same
//! `cfg(target_os)`-dispatched backend-trait shape as
//! `gecko_platform::traits::PlatformBackend` / `gecko_platform::get_backend`.

use crate::error::RuntimeResult;

/// Applies real-time scheduling to the calling thread. Implementations
/// are expected to be called from the thread they affect.
pub trait SchedulerShim: Send + Sync {
    /// Switches the calling thread to a fixed-priority RT scheduling
    /// class at the given priority (implementation-defined range;
    /// Linux's `SCHED_FIFO` takes 1..=99).
    fn apply_realtime_priority(&self, priority: i32) -> RuntimeResult<()>;

    /// Pins the calling thread to the given set of CPU core indices.
    fn set_cpu_affinity(&self, cores: &[usize]) -> RuntimeResult<()>;
}

/// Records calls instead of touching the OS scheduler; used in tests and
/// on platforms without a real implementation.
#[derive(Default)]
pub struct MockScheduler {
    calls: parking_lot::Mutex<Vec<String>>,
}

impl MockScheduler {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl SchedulerShim for MockScheduler {
    fn apply_realtime_priority(&self, priority: i32) -> RuntimeResult<()> {
        self.calls.lock().push(format!("apply_realtime_priority({priority})"));
        Ok(())
    }

    fn set_cpu_affinity(&self, cores: &[usize]) -> RuntimeResult<()> {
        self.calls.lock().push(format!("set_cpu_affinity({cores:?})"));
        Ok(())
    }
}

/// Picks the platform scheduler shim, mirroring
/// `gecko_platform::get_backend`'s `cfg`-dispatched constructor.
pub fn get_scheduler() -> std::sync::Arc<dyn SchedulerShim> {
    #[cfg(target_os = "linux")]
    {
        std::sync::Arc::new(crate::linux::LinuxScheduler)
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::sync::Arc::new(MockScheduler::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_scheduler_records_calls() {
        let scheduler = MockScheduler::default();
        scheduler.apply_realtime_priority(50).unwrap();
        scheduler.set_cpu_affinity(&[0, 1]).unwrap();
        assert_eq!(scheduler.calls().len(), 2);
    }
}
