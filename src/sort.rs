//! Total ordering over process records with fixed tie-break chains.

use std::cmp::Ordering;

use crate::record::ProcessRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Cpu,
    Size,
    Res,
    Time,
    Prio,
}

impl SortKey {
    pub const ALL: [SortKey; 5] = [
        SortKey::Cpu,
        SortKey::Size,
        SortKey::Res,
        SortKey::Time,
        SortKey::Prio,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Size => "size",
            Self::Res => "res",
            Self::Time => "time",
            Self::Prio => "prio",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

#[derive(Clone, Copy)]
enum Field {
    Utilization,
    CpuTime,
    StateRank,
    Priority,
    Rss,
    Vsize,
}

// Each chain is evaluated left to right until a key differs; every field
// compares descending (higher resource usage first).
const CHAINS: [(SortKey, [Field; 6]); 5] = [
    (
        SortKey::Cpu,
        [
            Field::Utilization,
            Field::CpuTime,
            Field::StateRank,
            Field::Priority,
            Field::Rss,
            Field::Vsize,
        ],
    ),
    (
        SortKey::Size,
        [
            Field::Vsize,
            Field::Rss,
            Field::Utilization,
            Field::CpuTime,
            Field::StateRank,
            Field::Priority,
        ],
    ),
    (
        SortKey::Res,
        [
            Field::Rss,
            Field::Vsize,
            Field::Utilization,
            Field::CpuTime,
            Field::StateRank,
            Field::Priority,
        ],
    ),
    (
        SortKey::Time,
        [
            Field::CpuTime,
            Field::Utilization,
            Field::StateRank,
            Field::Priority,
            Field::Vsize,
            Field::Rss,
        ],
    ),
    (
        SortKey::Prio,
        [
            Field::Priority,
            Field::Utilization,
            Field::CpuTime,
            Field::StateRank,
            Field::Rss,
            Field::Vsize,
        ],
    ),
];

fn field_cmp(field: Field, a: &ProcessRecord, b: &ProcessRecord) -> Ordering {
    match field {
        Field::Utilization => b.utilization.total_cmp(&a.utilization),
        Field::CpuTime => b.cpu_seconds.cmp(&a.cpu_seconds),
        Field::StateRank => b.state.rank().cmp(&a.state.rank()),
        Field::Priority => b.priority.cmp(&a.priority),
        Field::Rss => b.rss_kb.cmp(&a.rss_kb),
        Field::Vsize => b.vsize_kb.cmp(&a.vsize_kb),
    }
}

pub fn compare(key: SortKey, a: &ProcessRecord, b: &ProcessRecord) -> Ordering {
    let (_, chain) = CHAINS.iter().find(|(k, _)| *k == key).unwrap_or(&CHAINS[0]);
    for field in chain {
        let ord = field_cmp(*field, a, b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable sort; records whose whole chain ties keep their input order.
pub fn sort(records: &mut [ProcessRecord], key: SortKey) {
    records.sort_by(|a, b| compare(key, a, b));
}
