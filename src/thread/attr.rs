use crate::config::{KernelConfig, DEFAULT_PRIORITY};
use crate::errors::{Errno, KResult};
use crate::thread::SchedPolicy;
#[cfg(feature = "realtime")]
use crate::time::{Duration, Timespec};

/// Whether a thread's storage waits for a joiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetachState {
    #[default]
    Joinable,
    Detached,
}

/// Contention scope. Only process scope exists on a single CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Process,
    System,
}

/// Where a new thread's policy and priority come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritSched {
    /// Copy them from the creating thread.
    Inherit,
    /// Use the values in the attribute object.
    #[default]
    Explicit,
}

/// Release-time attributes of a real-time thread, on the monotonic clock.
#[cfg(feature = "realtime")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Realtime {
    /// First release; the thread sleeps until then.
    pub start: Option<Timespec>,
    /// Absolute deadline of a one-shot thread. Excludes `period`.
    pub deadline: Option<Timespec>,
    /// Release interval of a periodic thread; needs `start`. Excludes
    /// `deadline`.
    pub period: Option<Duration>,
}

/// Attributes for [`crate::Kernel::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadAttr {
    stack_size: Option<usize>,
    policy: SchedPolicy,
    priority: u8,
    detach: DetachState,
    scope: Scope,
    inherit: InheritSched,
    name: Option<&'static str>,
    #[cfg(feature = "realtime")]
    realtime: Realtime,
}

impl ThreadAttr {
    pub const fn new() -> Self {
        Self {
            stack_size: None,
            policy: SchedPolicy::Fifo,
            priority: DEFAULT_PRIORITY,
            detach: DetachState::Joinable,
            scope: Scope::Process,
            inherit: InheritSched::Explicit,
            name: None,
            #[cfg(feature = "realtime")]
            realtime: Realtime {
                start: None,
                deadline: None,
                period: None,
            },
        }
    }

    /// Request a stack of `size` bytes, rounded up to a double word.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size.saturating_add(7) & !7);
        self
    }

    pub fn policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn detach_state(mut self, detach: DetachState) -> Self {
        self.detach = detach;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn inherit_sched(mut self, inherit: InheritSched) -> Self {
        self.inherit = inherit;
        self
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    #[cfg(feature = "realtime")]
    pub fn start_time(mut self, at: Timespec) -> Self {
        self.realtime.start = Some(at);
        self
    }

    #[cfg(feature = "realtime")]
    pub fn deadline(mut self, at: Timespec) -> Self {
        self.realtime.deadline = Some(at);
        self
    }

    #[cfg(feature = "realtime")]
    pub fn period(mut self, every: Duration) -> Self {
        self.realtime.period = Some(every);
        self
    }

    pub fn get_stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    pub fn get_policy(&self) -> SchedPolicy {
        self.policy
    }

    pub fn get_priority(&self) -> u8 {
        self.priority
    }

    pub fn get_detach_state(&self) -> DetachState {
        self.detach
    }

    pub fn get_scope(&self) -> Scope {
        self.scope
    }

    pub fn get_inherit_sched(&self) -> InheritSched {
        self.inherit
    }

    pub fn get_name(&self) -> Option<&'static str> {
        self.name
    }

    #[cfg(feature = "realtime")]
    pub fn get_realtime(&self) -> Realtime {
        self.realtime
    }

    /// Check the attributes against the kernel limits. Returns the stack
    /// size to allocate.
    pub(crate) fn validate(&self, config: &KernelConfig) -> KResult<usize> {
        let stack = self.stack_size.unwrap_or(config.default_stack_size);
        if stack < config.min_stack_size || stack > config.max_stack_size {
            return Err(Errno::EINVAL);
        }
        if self.scope != Scope::Process {
            return Err(Errno::EINVAL);
        }
        if self.policy == SchedPolicy::RoundRobin && !cfg!(feature = "round-robin") {
            return Err(Errno::ENOTSUP);
        }
        #[cfg(feature = "realtime")]
        {
            let rt = &self.realtime;
            for ts in [rt.start, rt.deadline].into_iter().flatten() {
                ts.validate()?;
            }
            if rt.deadline.is_some() && rt.period.is_some() {
                return Err(Errno::EINVAL);
            }
            if rt.period.is_some_and(|p| p.is_zero()) || (rt.period.is_some() && rt.start.is_none()) {
                return Err(Errno::EINVAL);
            }
            if self.policy == SchedPolicy::RoundRobin && *rt != Realtime::default() {
                // Both would claim the asynchronous timer entry.
                return Err(Errno::EINVAL);
            }
        }
        Ok(stack)
    }
}

impl Default for ThreadAttr {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_attr_init() {
        let attr = ThreadAttr::new();
        assert_eq!(attr.get_priority(), DEFAULT_PRIORITY);
        assert_eq!(attr.get_inherit_sched(), InheritSched::Explicit);
        assert_eq!(attr.get_detach_state(), DetachState::Joinable);
        assert_eq!(attr.validate(&KernelConfig::new()), Ok(12 * 1024));
    }

    #[test]
    fn stack_size_is_rounded_and_bounded() {
        let cfg = KernelConfig::new();
        let attr = ThreadAttr::new().stack_size(8191);
        assert_eq!(attr.get_stack_size(), Some(8192));
        assert_eq!(ThreadAttr::new().stack_size(16).validate(&cfg), Err(Errno::EINVAL));
        assert_eq!(
            ThreadAttr::new().stack_size(64 << 20).validate(&cfg),
            Err(Errno::EINVAL)
        );
    }

    #[test]
    fn system_scope_is_rejected() {
        let attr = ThreadAttr::new().scope(Scope::System);
        assert_eq!(attr.validate(&KernelConfig::new()), Err(Errno::EINVAL));
    }

    #[cfg(feature = "realtime")]
    #[test]
    fn period_needs_a_start_time_and_excludes_deadline() {
        let cfg = KernelConfig::new();
        let every = Duration::from_millis(5);
        assert_eq!(ThreadAttr::new().period(every).validate(&cfg), Err(Errno::EINVAL));
        let periodic = ThreadAttr::new().start_time(Timespec::new(1, 0)).period(every);
        assert!(periodic.validate(&cfg).is_ok());
        assert_eq!(
            periodic.deadline(Timespec::new(2, 0)).validate(&cfg),
            Err(Errno::EINVAL)
        );
    }
}
