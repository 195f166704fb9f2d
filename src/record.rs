//! The normalized per-process row produced once per tick by the sampler.

/// Process lifecycle state, normalized across platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Start,
    Run,
    Sleep,
    Stop,
    Zombie,
    Dead,
    OnProcessor,
}

pub const STATE_SLOTS: usize = 7;

impl ProcState {
    pub fn abbrev(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Run => "run",
            Self::Sleep => "sleep",
            Self::Stop => "stop",
            Self::Zombie => "zomb",
            Self::Dead => "dead",
            Self::OnProcessor => "onproc",
        }
    }

    /// Rank used only as a sort tie-break: running first, zombies last.
    pub fn rank(self) -> u8 {
        match self {
            Self::Run | Self::OnProcessor => 6,
            Self::Start => 5,
            Self::Sleep => 4,
            Self::Stop => 3,
            Self::Zombie => 2,
            Self::Dead => 1,
        }
    }

    /// Slot in the per-state histogram of the summary display.
    pub fn slot(self) -> usize {
        match self {
            Self::Start => 0,
            Self::Run => 1,
            Self::Sleep => 2,
            Self::Stop => 3,
            Self::Zombie => 4,
            Self::Dead => 5,
            Self::OnProcessor => 6,
        }
    }

    pub fn slot_label(slot: usize) -> &'static str {
        match slot {
            0 => "starting",
            1 => "running",
            2 => "sleeping",
            3 => "stopped",
            4 => "zombie",
            5 => "dead",
            _ => "on processor",
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Run | Self::OnProcessor)
    }
}

/// One row of the monitor. Built fresh every tick, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub pid: i32,
    pub uid: u32,
    pub priority: i64,
    pub nice: i64,
    pub vsize_kb: u64,
    pub rss_kb: u64,
    pub state: ProcState,
    pub wait_channel: String,
    /// Accumulated CPU time in whole seconds.
    pub cpu_seconds: u64,
    /// Fraction of one core consumed over the last sampling interval, in [0, 1].
    pub utilization: f64,
    pub command: String,
    pub cmdline: Option<String>,
    /// Query text reported by the database for this backend, if any.
    pub query: Option<String>,
    /// Seconds since this process last consumed CPU.
    pub sleep_seconds: u64,
    pub is_system: bool,
    pub is_thread: bool,
}

impl ProcessRecord {
    /// A sleeping process past the threshold is reclassified as idle for display.
    pub fn is_idle(&self, idle_threshold: u64) -> bool {
        self.state == ProcState::Sleep && self.sleep_seconds > idle_threshold
    }
}
