//! Per-tick sampling: OS process facts joined with database session facts,
//! with interval utilization derived from retained counter snapshots.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, warn};

use crate::db::SessionSource;
use crate::os::{MemoryFacts, OsError, ProcessEnumerator};
use crate::rate::{self, CPU_CATEGORY_COUNT, CPU_IDLE};
use crate::record::{ProcessRecord, STATE_SLOTS};

/// Previous-generation counters for one pid. Exactly one prior generation is
/// retained; anything older is discarded when the tick completes.
#[derive(Debug, Clone, Copy)]
struct PidCounter {
    ticks: u64,
    taken: Instant,
    last_active: Instant,
}

/// Everything one tick produces for the display pipeline.
#[derive(Debug)]
pub struct Sample {
    pub records: Vec<ProcessRecord>,
    /// All qualifying processes, before the selection filter runs.
    pub total: usize,
    pub state_counts: [usize; STATE_SLOTS],
    /// System-wide CPU percentages, tenths of a percent per category.
    pub cpu_pct: Vec<i64>,
    pub per_cpu_pct: Vec<Vec<i64>>,
    pub memory: MemoryFacts,
    pub load: [f64; 3],
    /// Set once when database availability changes, in either direction.
    pub db_notice: Option<String>,
}

pub struct SamplerState {
    prev_pids: HashMap<i32, PidCounter>,
    prev_cpus: Option<Vec<[u64; CPU_CATEGORY_COUNT]>>,
    db_down: bool,
}

impl SamplerState {
    pub fn new() -> Self {
        Self {
            prev_pids: HashMap::new(),
            prev_cpus: None,
            db_down: false,
        }
    }

    pub fn sample(
        &mut self,
        os: &mut dyn ProcessEnumerator,
        db: &mut dyn SessionSource,
        now: Instant,
    ) -> Result<Sample, OsError> {
        // Database first: a timeout here must not leave partial process state
        // behind. Failure degrades the tick to OS-only facts.
        let mut db_notice = None;
        let mut queries: HashMap<i32, Option<String>> = HashMap::new();
        match db.sessions() {
            Ok(rows) => {
                if self.db_down {
                    self.db_down = false;
                    db_notice = Some("database connection restored".to_string());
                }
                for row in rows {
                    queries.insert(row.pid, row.query);
                }
            }
            Err(e) => {
                warn!("session query failed: {e}");
                if !self.db_down {
                    self.db_down = true;
                    db_notice = Some(format!("database unavailable ({e}); showing OS data only"));
                }
            }
        }

        let ticks_per_sec = os.clock_ticks().max(1);
        let mut next_pids = HashMap::new();
        let mut records = Vec::new();
        let mut state_counts = [0usize; STATE_SLOTS];

        for pid in os.pids()? {
            let raw = match os.facts(pid) {
                Ok(raw) => raw,
                Err(OsError::Vanished) => {
                    // Exited between enumeration and lookup; not an error.
                    debug!("pid {pid} vanished mid-sample");
                    continue;
                }
                Err(e) => {
                    warn!("skipping pid {pid}: {e}");
                    continue;
                }
            };

            let prev = self.prev_pids.get(&pid).copied();
            let (utilization, mut last_active) = match prev {
                Some(p) if raw.cpu_ticks >= p.ticks => {
                    let delta = raw.cpu_ticks - p.ticks;
                    let elapsed = now.duration_since(p.taken).as_secs_f64();
                    let util = if elapsed > 0.0 {
                        (delta as f64 / ticks_per_sec as f64 / elapsed).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    (util, p.last_active)
                }
                // First sight of the pid, or the counter moved backwards
                // (pid reuse): never derive a figure from a stale snapshot.
                _ => (0.0, now),
            };
            if utilization > 0.0 || raw.state.is_running() {
                last_active = now;
            }
            next_pids.insert(
                pid,
                PidCounter {
                    ticks: raw.cpu_ticks,
                    taken: now,
                    last_active,
                },
            );

            state_counts[raw.state.slot()] += 1;
            records.push(ProcessRecord {
                pid,
                uid: raw.uid,
                priority: raw.priority,
                nice: raw.nice,
                vsize_kb: raw.vsize_kb,
                rss_kb: raw.rss_kb,
                state: raw.state,
                wait_channel: raw.wait_channel,
                cpu_seconds: raw.cpu_ticks / ticks_per_sec,
                utilization,
                command: raw.command,
                cmdline: raw.cmdline,
                // The OS snapshot is authoritative: a pid only the database
                // reported is dropped here by never being visited.
                query: queries.remove(&pid).flatten(),
                sleep_seconds: now.duration_since(last_active).as_secs(),
                is_system: raw.is_system,
                is_thread: raw.is_thread,
            });
        }
        self.prev_pids = next_pids;

        let cpus = os.cpu_counters()?;
        let prev_cpus = match self.prev_cpus.take() {
            Some(prev) if prev.len() == cpus.len() => prev,
            _ => cpus.clone(),
        };
        let per_cpu_pct = prev_cpus
            .iter()
            .zip(&cpus)
            .map(|(prev, cur)| rate::percentages(prev, cur, Some(CPU_IDLE)))
            .collect();
        let cpu_pct = rate::percentages(
            &rate::sum_counters(&prev_cpus),
            &rate::sum_counters(&cpus),
            Some(CPU_IDLE),
        );
        self.prev_cpus = Some(cpus);

        let total = records.len();
        Ok(Sample {
            records,
            total,
            state_counts,
            cpu_pct,
            per_cpu_pct,
            memory: os.memory()?,
            load: os.load_average()?,
            db_notice,
        })
    }
}

impl Default for SamplerState {
    fn default() -> Self {
        Self::new()
    }
}
