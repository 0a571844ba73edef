/// How pending batches get delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    /// Spawn a delivery task on the current-thread Tokio runtime the
    /// mutation happened on. Without such a runtime delivery waits for
    /// [`pulse`](crate::pulse) to be awaited or [`flush`](crate::flush) to
    /// be called, and a warning is logged once per thread.
    #[default]
    Runtime,

    /// Spawn the delivery task with [`tokio::task::spawn_local`]. Use this
    /// when the engine runs inside a [`LocalSet`](tokio::task::LocalSet) on a
    /// multi-thread runtime.
    ///
    /// Mutating a topic outside a `LocalSet` panics in this mode.
    Local,

    /// Never spawn. The host drives delivery through
    /// [`flush`](crate::flush) or by awaiting [`pulse`](crate::pulse).
    Manual,
}

/// What happens to an observer that panics during delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicPolicy {
    /// Log the panic and keep the observer subscribed.
    #[default]
    Report,

    /// Log the panic and revoke the observer.
    Revoke,
}

/// Engine configuration.
///
/// Each thread runs its own engine, so the configuration is installed per
/// thread with [`configure`](crate::configure).
///
/// # Examples
///
/// ```rust
/// use observa::{Config, PanicPolicy, Schedule};
///
/// observa::configure(
///     Config::default()
///         .with_schedule(Schedule::Manual)
///         .with_panic_policy(PanicPolicy::Revoke),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Delivery mode for batches.
    /// Default: [`Schedule::Runtime`]
    pub schedule: Schedule,

    /// Handling of observers that panic while a batch is delivered.
    /// Trap observers run on the caller's stack and their panics propagate.
    /// Default: [`PanicPolicy::Report`]
    pub panic_policy: PanicPolicy,

    /// Capacity the journal buffer is allocated with after each batch.
    /// Default: 64
    pub journal_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            schedule: Schedule::Runtime,
            panic_policy: PanicPolicy::Report,
            journal_capacity: 64,
        }
    }
}

impl Config {
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    /// Set the initial journal capacity.
    ///
    /// Larger values avoid reallocation for computations that read many
    /// members while recording.
    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }
}
