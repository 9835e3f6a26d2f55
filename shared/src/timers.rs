//! Cooperative timers driven by an explicit `now`.
//!
//! Neither timer owns a thread or a runtime task: the owner polls them from
//! its event loop, and they report whether their callback should run.

/// Fires when `interrupt()` has not been called for `quiet_time` ms.
///
/// After firing it re-arms itself, so it keeps firing once per quiet period
/// until interrupted again or stopped.
#[derive(Debug, Clone)]
pub struct InterruptableWait {
    quiet_time: u64,
    deadline: Option<u64>,
}

impl InterruptableWait {
    /// Starts armed: the first firing is `quiet_time` after `now`
    pub fn new(quiet_time: u64, now: u64) -> Self {
        Self {
            quiet_time,
            deadline: Some(now.saturating_add(quiet_time)),
        }
    }

    pub fn interrupt(&mut self, now: u64) {
        self.deadline = Some(now.saturating_add(self.quiet_time));
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns true when the quiet period has elapsed. Re-arms on firing.
    pub fn poll(&mut self, now: u64) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = Some(now.saturating_add(self.quiet_time));
                true
            }
            _ => false,
        }
    }
}

/// Lets a call through only if `min_wait` ms have passed since the last one
/// that went through. Calls inside the window are dropped, not queued.
#[derive(Debug, Clone)]
pub struct LimitedCaller {
    min_wait: u64,
    last_call: Option<u64>,
}

impl LimitedCaller {
    pub fn new(min_wait: u64) -> Self {
        Self {
            min_wait,
            last_call: None,
        }
    }

    /// Returns true if the caller should run its callback now
    pub fn trigger(&mut self, now: u64) -> bool {
        let allowed = match self.last_call {
            Some(last) => now.saturating_sub(last) >= self.min_wait,
            None => true,
        };

        if allowed {
            self.last_call = Some(now);
        }
        allowed
    }

    pub fn last_call(&self) -> Option<u64> {
        self.last_call
    }
}
