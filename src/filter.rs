//! View state and the selection predicate applied to every sampled record.

use std::time::Duration;

use crate::record::{ProcState, ProcessRecord};
use crate::sort::SortKey;

/// Process-wide display state. Created once at startup, mutated only by the
/// command interpreter; changes take effect on the next tick.
#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub show_idle: bool,
    pub show_system: bool,
    pub show_threads: bool,
    /// `None` selects all users.
    pub uid_filter: Option<u32>,
    /// Case-sensitive substring match on the command name.
    pub command_filter: Option<String>,
    pub sort_key: SortKey,
    /// `None` shows as many rows as fit on screen.
    pub display_count: Option<usize>,
    pub delay: Duration,
    pub color: bool,
    /// Seconds of sleep before a zero-CPU process counts as idle.
    pub idle_threshold: u64,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            show_idle: false,
            show_system: false,
            show_threads: false,
            uid_filter: None,
            command_filter: None,
            sort_key: SortKey::Cpu,
            display_count: None,
            delay: Duration::from_secs(5),
            color: true,
            idle_threshold: 0,
        }
    }
}

/// Pure predicate: does this record belong in the active (displayed) set?
pub fn selects(record: &ProcessRecord, opts: &ViewOptions) -> bool {
    if record.is_system && !opts.show_system {
        return false;
    }
    if record.is_thread && !opts.show_threads {
        return false;
    }
    // Zombies count toward the totals but can never be selected.
    if record.state == ProcState::Zombie {
        return false;
    }
    if let Some(uid) = opts.uid_filter {
        if record.uid != uid {
            return false;
        }
    }
    if let Some(filter) = &opts.command_filter {
        if !record.command.contains(filter.as_str()) {
            return false;
        }
    }
    // A sleeping process consuming no CPU is hidden by default; one that is
    // running or consuming CPU is always shown.
    if !opts.show_idle
        && !record.state.is_running()
        && record.utilization == 0.0
        && record.sleep_seconds >= opts.idle_threshold
    {
        return false;
    }
    true
}
