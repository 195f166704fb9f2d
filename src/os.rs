//! OS process enumerator collaborator.
//!
//! The core pipeline only ever sees the normalized fact types below; anything
//! platform-specific stays behind [`ProcessEnumerator`]. Enumeration is
//! two-phase (pid list, then per-pid detail) because a process can exit
//! between the two steps: the detail lookup reports that distinctly as
//! [`OsError::Vanished`] so the sampler can exclude the pid without treating
//! it as an error.

use procfs::process::Process;
use procfs::{Current, CurrentSI, KernelStats, LoadAverage, Meminfo, ProcError};
use thiserror::Error;

use crate::rate::CPU_CATEGORY_COUNT;
use crate::record::ProcState;

#[derive(Debug, Error)]
pub enum OsError {
    /// The process exited between enumeration and detail lookup. Not an
    /// error condition; the pid is silently dropped from the tick.
    #[error("process vanished")]
    Vanished,
    #[error("process table access failed: {0}")]
    Access(String),
}

/// Raw per-process facts, normalized at this boundary: sizes are KB,
/// priority and nice are human-centered (zero means default), CPU time is a
/// raw monotonic tick counter.
#[derive(Debug, Clone)]
pub struct RawProcess {
    pub pid: i32,
    pub uid: u32,
    pub priority: i64,
    pub nice: i64,
    pub vsize_kb: u64,
    pub rss_kb: u64,
    pub state: ProcState,
    pub wait_channel: String,
    pub cpu_ticks: u64,
    pub command: String,
    pub cmdline: Option<String>,
    pub is_system: bool,
    pub is_thread: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryFacts {
    pub active_kb: u64,
    pub total_kb: u64,
    pub free_kb: u64,
    pub swap_used_kb: u64,
    pub swap_total_kb: u64,
}

pub trait ProcessEnumerator {
    fn pids(&mut self) -> Result<Vec<i32>, OsError>;
    fn facts(&mut self, pid: i32) -> Result<RawProcess, OsError>;
    /// Per-logical-CPU monotonic tick counters, one row per CPU, in
    /// [`crate::rate::CPU_CATEGORIES`] order.
    fn cpu_counters(&mut self) -> Result<Vec<[u64; CPU_CATEGORY_COUNT]>, OsError>;
    fn memory(&mut self) -> Result<MemoryFacts, OsError>;
    fn load_average(&mut self) -> Result<[f64; 3], OsError>;
    fn clock_ticks(&self) -> u64;
}

const PF_KTHREAD: u32 = 0x0020_0000;

pub struct LinuxEnumerator {
    page_kb: u64,
    ticks: u64,
}

impl LinuxEnumerator {
    pub fn new() -> Self {
        Self {
            page_kb: procfs::page_size() / 1024,
            ticks: procfs::ticks_per_second(),
        }
    }
}

impl Default for LinuxEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

fn map_proc_err(e: ProcError) -> OsError {
    match e {
        ProcError::NotFound(_) => OsError::Vanished,
        ProcError::Io(ref io, _) if io.kind() == std::io::ErrorKind::NotFound => OsError::Vanished,
        ProcError::Io(ref io, _) if io.raw_os_error() == Some(libc::ESRCH) => OsError::Vanished,
        other => OsError::Access(other.to_string()),
    }
}

fn map_state(c: char) -> ProcState {
    match c {
        'R' => ProcState::Run,
        'T' | 't' => ProcState::Stop,
        'Z' => ProcState::Zombie,
        'X' | 'x' => ProcState::Dead,
        // 'S', 'D', 'I' and anything newer kernels invent all display as sleep.
        _ => ProcState::Sleep,
    }
}

impl ProcessEnumerator for LinuxEnumerator {
    fn pids(&mut self) -> Result<Vec<i32>, OsError> {
        let procs = procfs::process::all_processes().map_err(map_proc_err)?;
        let mut pids = Vec::new();
        for proc in procs.flatten() {
            let pid = proc.pid();
            pids.push(pid);
            // Non-leader tids surface as thread rows; the whole task group
            // can exit mid-walk, so enumeration stays best-effort.
            if let Ok(tasks) = proc.tasks() {
                for task in tasks.flatten() {
                    if task.tid != pid {
                        pids.push(task.tid);
                    }
                }
            }
        }
        Ok(pids)
    }

    fn facts(&mut self, pid: i32) -> Result<RawProcess, OsError> {
        let proc = Process::new(pid).map_err(map_proc_err)?;
        let stat = proc.stat().map_err(map_proc_err)?;
        let status = proc.status().map_err(map_proc_err)?;
        // cmdline and wchan are best-effort: both can be unreadable for
        // processes we do not own.
        let cmdline = proc
            .cmdline()
            .ok()
            .map(|args| args.join(" "))
            .filter(|s| !s.is_empty());
        let wait_channel = proc
            .wchan()
            .ok()
            .filter(|w| !w.is_empty() && w != "0")
            .unwrap_or_default();

        let is_system = stat.flags & PF_KTHREAD != 0 || cmdline.is_none();
        // /proc/<tid> looks exactly like a process entry; the tgid tells a
        // group leader apart from one of its threads.
        let is_thread = status.tgid != pid;
        Ok(RawProcess {
            pid,
            uid: status.ruid,
            priority: stat.priority,
            nice: stat.nice,
            vsize_kb: stat.vsize / 1024,
            rss_kb: stat.rss * self.page_kb,
            state: map_state(stat.state),
            wait_channel,
            cpu_ticks: stat.utime + stat.stime,
            command: stat.comm,
            cmdline,
            is_system,
            is_thread,
        })
    }

    fn cpu_counters(&mut self) -> Result<Vec<[u64; CPU_CATEGORY_COUNT]>, OsError> {
        let stats = KernelStats::current().map_err(map_proc_err)?;
        Ok(stats
            .cpu_time
            .iter()
            .map(|cpu| {
                [
                    cpu.user,
                    cpu.nice,
                    cpu.system,
                    cpu.irq.unwrap_or(0) + cpu.softirq.unwrap_or(0),
                    cpu.idle + cpu.iowait.unwrap_or(0),
                ]
            })
            .collect())
    }

    fn memory(&mut self) -> Result<MemoryFacts, OsError> {
        let mem = Meminfo::current().map_err(map_proc_err)?;
        Ok(MemoryFacts {
            active_kb: mem.active / 1024,
            total_kb: mem.mem_total / 1024,
            free_kb: mem.mem_free / 1024,
            swap_used_kb: (mem.swap_total - mem.swap_free) / 1024,
            swap_total_kb: mem.swap_total / 1024,
        })
    }

    fn load_average(&mut self) -> Result<[f64; 3], OsError> {
        let load = LoadAverage::current().map_err(map_proc_err)?;
        Ok([load.one as f64, load.five as f64, load.fifteen as f64])
    }

    fn clock_ticks(&self) -> u64 {
        self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn own_process_is_not_a_thread() {
        let mut os = LinuxEnumerator::new();
        let me = std::process::id() as i32;
        let facts = os.facts(me).unwrap();
        assert_eq!(facts.pid, me);
        assert!(!facts.is_thread);
    }

    #[test]
    fn spawned_thread_enumerates_as_thread_row() {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<()>();
        let parked = std::thread::spawn(move || {
            ready_tx.send(()).unwrap();
            let _ = stop_rx.recv();
        });
        ready_rx.recv().unwrap();

        let mut os = LinuxEnumerator::new();
        let me = std::process::id() as i32;
        let tids: Vec<i32> = os
            .pids()
            .unwrap()
            .into_iter()
            .filter(|&p| {
                p != me
                    && Process::new(p)
                        .and_then(|t| t.status())
                        .map(|s| s.tgid == me)
                        .unwrap_or(false)
            })
            .collect();
        assert!(!tids.is_empty());

        // Sibling test threads may exit mid-walk; the parked one cannot.
        let mut saw_thread = false;
        for tid in tids {
            if let Ok(facts) = os.facts(tid) {
                assert!(facts.is_thread, "tid {tid} not marked as thread");
                saw_thread = true;
            }
        }
        assert!(saw_thread);

        stop_tx.send(()).unwrap();
        parked.join().unwrap();
    }
}
