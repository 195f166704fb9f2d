//! Privileged actions: the ownership gate, signal/renice dispatch, and the
//! append-only action log shown by the `e` command.

use std::collections::VecDeque;
use std::fmt;
use std::time::SystemTime;

use log::info;

use crate::record::ProcessRecord;

/// Kept bounded so a long session cannot grow without limit.
const LOG_CAP: usize = 256;

/// Signals above this are not meaningful on any supported platform.
const MAX_SIGNAL: i32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Kill,
    Renice,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kill => write!(f, "kill"),
            Self::Renice => write!(f, "renice"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    NoSuchProcess,
    PermissionDenied,
    InvalidArgument(String),
    Failed(String),
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "ok"),
            Self::NoSuchProcess => write!(f, "no such process"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::InvalidArgument(what) => write!(f, "{what}"),
            Self::Failed(what) => write!(f, "{what}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: SystemTime,
    pub pid: i32,
    pub kind: ActionKind,
    pub outcome: ActionOutcome,
}

/// Ordered record of every attempted privileged action. Never auto-cleared;
/// the oldest entry is dropped once [`LOG_CAP`] is reached.
#[derive(Debug, Default)]
pub struct ActionLog {
    entries: VecDeque<LogEntry>,
}

impl ActionLog {
    pub fn push(&mut self, pid: i32, kind: ActionKind, outcome: ActionOutcome) {
        if self.entries.len() == LOG_CAP {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            at: SystemTime::now(),
            pid,
            kind,
            outcome,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The last line of defense before a signal or priority change is dispatched.
///
/// The target must be present in the *current* tick's active set and owned by
/// the actor, unless the actor is one of the administrative uids supplied by
/// the environment. Re-evaluated on every invocation; a pid shown two ticks
/// ago may since have been reused by another user's process.
pub fn authorize(
    actor_uid: u32,
    admin_uids: &[u32],
    target_pid: i32,
    active: &[ProcessRecord],
) -> Result<(), ActionOutcome> {
    let Some(record) = active.iter().find(|r| r.pid == target_pid) else {
        return Err(ActionOutcome::NoSuchProcess);
    };
    if record.uid == actor_uid || admin_uids.contains(&actor_uid) {
        Ok(())
    } else {
        Err(ActionOutcome::PermissionDenied)
    }
}

/// Executes authorized actions. Split out as a trait so the interactive flow
/// can be exercised without signalling real processes.
pub trait ActionDispatcher {
    fn kill(&mut self, pid: i32, signal: i32) -> ActionOutcome;
    fn renice(&mut self, pid: i32, value: i32) -> ActionOutcome;
}

pub struct LibcDispatcher;

fn errno_outcome(err: std::io::Error) -> ActionOutcome {
    match err.raw_os_error() {
        Some(libc::ESRCH) => ActionOutcome::NoSuchProcess,
        Some(libc::EPERM) | Some(libc::EACCES) => ActionOutcome::PermissionDenied,
        Some(libc::EINVAL) => ActionOutcome::InvalidArgument("invalid value".into()),
        _ => ActionOutcome::Failed(err.to_string()),
    }
}

impl ActionDispatcher for LibcDispatcher {
    fn kill(&mut self, pid: i32, signal: i32) -> ActionOutcome {
        // pid 0 and negative pids carry process-group semantics; never pass
        // them through from interactive input.
        if pid <= 0 {
            return ActionOutcome::InvalidArgument("invalid pid".into());
        }
        if !(1..=MAX_SIGNAL).contains(&signal) {
            return ActionOutcome::InvalidArgument("invalid signal number".into());
        }
        info!("sending signal {signal} to pid {pid}");
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal as libc::c_int) };
        if rc == 0 {
            ActionOutcome::Success
        } else {
            errno_outcome(std::io::Error::last_os_error())
        }
    }

    fn renice(&mut self, pid: i32, value: i32) -> ActionOutcome {
        if pid <= 0 {
            return ActionOutcome::InvalidArgument("invalid pid".into());
        }
        if !(-20..=20).contains(&value) {
            return ActionOutcome::InvalidArgument("invalid priority value".into());
        }
        info!("renicing pid {pid} to {value}");
        let rc = unsafe {
            libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, value as libc::c_int)
        };
        if rc == 0 {
            ActionOutcome::Success
        } else {
            errno_outcome(std::io::Error::last_os_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ProcState;

    fn record(pid: i32, uid: u32) -> ProcessRecord {
        ProcessRecord {
            pid,
            uid,
            priority: 0,
            nice: 0,
            vsize_kb: 0,
            rss_kb: 0,
            state: ProcState::Run,
            wait_channel: String::new(),
            cpu_seconds: 0,
            utilization: 0.0,
            command: "postgres".into(),
            cmdline: None,
            query: None,
            sleep_seconds: 0,
            is_system: false,
            is_thread: false,
        }
    }

    #[test]
    fn owner_may_act_on_own_process() {
        let active = vec![record(10, 5)];
        assert_eq!(authorize(5, &[0], 10, &active), Ok(()));
    }

    #[test]
    fn absent_pid_is_no_such_process() {
        let active = vec![record(10, 5)];
        assert_eq!(
            authorize(5, &[0], 999, &active),
            Err(ActionOutcome::NoSuchProcess)
        );
        assert_eq!(authorize(0, &[0], 999, &active), Err(ActionOutcome::NoSuchProcess));
    }

    #[test]
    fn non_owner_denied_unless_administrative() {
        let active = vec![record(10, 5)];
        assert_eq!(
            authorize(7, &[0], 10, &active),
            Err(ActionOutcome::PermissionDenied)
        );
        assert_eq!(authorize(0, &[0], 10, &active), Ok(()));
    }

    #[test]
    fn log_caps_at_limit_dropping_oldest() {
        let mut log = ActionLog::default();
        for pid in 0..(LOG_CAP as i32 + 10) {
            log.push(pid, ActionKind::Kill, ActionOutcome::Success);
        }
        assert_eq!(log.len(), LOG_CAP);
        assert_eq!(log.iter().next().unwrap().pid, 10);
    }

    #[test]
    fn dispatcher_rejects_out_of_range_input() {
        let mut d = LibcDispatcher;
        assert!(matches!(
            d.kill(0, 15),
            ActionOutcome::InvalidArgument(_)
        ));
        assert!(matches!(
            d.kill(std::process::id() as i32, 9999),
            ActionOutcome::InvalidArgument(_)
        ));
        assert!(matches!(
            d.renice(-1, 5),
            ActionOutcome::InvalidArgument(_)
        ));
        assert!(matches!(
            d.renice(std::process::id() as i32, 99),
            ActionOutcome::InvalidArgument(_)
        ));
    }

    #[test]
    fn signal_zero_probe_is_rejected_as_invalid() {
        let mut d = LibcDispatcher;
        assert!(matches!(
            d.kill(std::process::id() as i32, 0),
            ActionOutcome::InvalidArgument(_)
        ));
    }
}
