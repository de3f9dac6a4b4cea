//! Process-wide tunables, resolved once from environment variables.
//!
//! The original carries these as `DEC_uint32`/`DEC_bool` flags parsed by an
//! external command-line flag module. Parsing argv is out of scope for this
//! crate (see the spec's Non-goals), so `Config` is instead built from
//! environment variables with the same names and defaults, and can always be
//! constructed directly for tests or embedders that already have their own
//! flag layer.

use std::env;

/// Minimum stack size enforced for a stack slot: one 4 KiB page.
pub const MIN_STACK_SIZE: usize = 4096;

/// Default per-slot stack size: 1 MiB, matching the original.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Number of shared stack slots per scheduler.
pub const STACK_SLOTS: usize = 8;

#[derive(Debug, Clone)]
pub struct Config {
    /// `co_sched_num`: number of scheduler threads. Default: number of CPU cores.
    pub sched_num: usize,
    /// `co_stack_size`: bytes per shared stack slot. Default: 1 MiB.
    pub stack_size: usize,
    /// `co_sched_log`: trace-log every scheduler loop iteration.
    pub sched_log: bool,
    /// `hook_log`: trace-log every hook-layer decision.
    pub hook_log: bool,
    /// `disable_hook_sleep`: if true, `sleep()` called outside a coroutine
    /// (or globally) falls back to a real thread sleep instead of suspending.
    pub disable_hook_sleep: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config::from_env()
    }
}

impl Config {
    /// Build a `Config` from environment variables, falling back to the
    /// documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Config {
            sched_num: env_usize("CO_SCHED_NUM").unwrap_or_else(num_cpus::get).max(1),
            stack_size: env_usize("CO_STACK_SIZE")
                .unwrap_or(DEFAULT_STACK_SIZE)
                .max(MIN_STACK_SIZE),
            sched_log: env_bool("CO_SCHED_LOG"),
            hook_log: env_bool("HOOK_LOG"),
            disable_hook_sleep: env_bool("DISABLE_HOOK_SLEEP"),
        }
    }

    /// A config suitable for tests: a small, fixed fleet that does not
    /// depend on the host's core count.
    pub fn for_tests(sched_num: usize) -> Self {
        Config {
            sched_num: sched_num.max(1),
            stack_size: DEFAULT_STACK_SIZE,
            sched_log: false,
            hook_log: false,
            disable_hook_sleep: false,
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::for_tests(4);
        assert_eq!(cfg.sched_num, 4);
        assert_eq!(cfg.stack_size, DEFAULT_STACK_SIZE);
        assert!(!cfg.sched_log);
    }

    #[test]
    fn stack_size_floor_is_enforced() {
        std::env::set_var("CO_STACK_SIZE", "16");
        let cfg = Config::from_env();
        assert_eq!(cfg.stack_size, MIN_STACK_SIZE);
        std::env::remove_var("CO_STACK_SIZE");
    }
}
