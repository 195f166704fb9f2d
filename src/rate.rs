//! Turns pairs of monotonic counter snapshots into interval percentages.
//!
//! Percentages are kept as fixed-point tenths of a percent so repeated ticks
//! never accumulate floating-point drift.

pub const CPU_CATEGORY_COUNT: usize = 5;

/// CPU time categories, in counter order.
pub const CPU_CATEGORIES: [&str; CPU_CATEGORY_COUNT] =
    ["user", "nice", "system", "interrupt", "idle"];

/// Index of the idle category within [`CPU_CATEGORIES`].
pub const CPU_IDLE: usize = 4;

/// Compute per-category percentages (tenths of a percent) of the total delta
/// between two counter snapshots.
///
/// A counter that moved backwards invalidates the whole sample: the result is
/// all zeros rather than anything negative. A zero total delta also yields
/// zeros, except the idle category (when given) is forced to 100%.
pub fn percentages(previous: &[u64], current: &[u64], idle: Option<usize>) -> Vec<i64> {
    debug_assert_eq!(previous.len(), current.len());
    let mut deltas = Vec::with_capacity(current.len());
    for (prev, cur) in previous.iter().zip(current) {
        match cur.checked_sub(*prev) {
            Some(d) => deltas.push(d),
            None => return vec![0; current.len()],
        }
    }

    let total: u64 = deltas.iter().sum();
    if total == 0 {
        let mut out = vec![0; current.len()];
        if let Some(i) = idle {
            out[i] = 1000;
        }
        return out;
    }

    deltas
        .iter()
        .map(|d| ((1000 * d + total / 2) / total) as i64)
        .collect()
}

/// Sum per-CPU counters into one aggregate snapshot. The system-wide figure is
/// computed from summed deltas, never by averaging per-CPU percentages.
pub fn sum_counters(per_cpu: &[[u64; CPU_CATEGORY_COUNT]]) -> [u64; CPU_CATEGORY_COUNT] {
    let mut out = [0u64; CPU_CATEGORY_COUNT];
    for counts in per_cpu {
        for (acc, c) in out.iter_mut().zip(counts) {
            *acc += c;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_sum_to_one_thousand() {
        let prev = [100, 200, 300, 0, 1000];
        let cur = [150, 230, 360, 10, 1500];
        let pct = percentages(&prev, &cur, Some(CPU_IDLE));
        let sum: i64 = pct.iter().sum();
        // Rounding may drift by at most one unit per category.
        assert!((sum - 1000).unsigned_abs() as usize <= pct.len());
        assert!(pct.iter().all(|p| *p >= 0));
    }

    #[test]
    fn backwards_counter_invalidates_sample() {
        let prev = [100, 200, 300, 0, 1000];
        let cur = [150, 190, 360, 10, 1500];
        assert_eq!(percentages(&prev, &cur, Some(CPU_IDLE)), vec![0; 5]);
    }

    #[test]
    fn zero_total_forces_idle_to_full() {
        let prev = [5, 5, 5, 5, 5];
        let pct = percentages(&prev, &prev, Some(CPU_IDLE));
        assert_eq!(pct, vec![0, 0, 0, 0, 1000]);
    }

    #[test]
    fn zero_total_without_idle_is_all_zero() {
        let prev = [7, 7];
        assert_eq!(percentages(&prev, &prev, None), vec![0, 0]);
    }

    #[test]
    fn aggregate_sums_deltas_before_dividing() {
        // cpu0 is 100% busy, cpu1 is 100% idle; the aggregate must land at
        // 50/50, which averaging rounded percentages can get wrong.
        let prev = [[0, 0, 0, 0, 0], [0, 0, 0, 0, 0]];
        let cur = [[30, 0, 0, 0, 0], [0, 0, 0, 0, 30]];
        let agg_prev = sum_counters(&prev);
        let agg_cur = sum_counters(&cur);
        let pct = percentages(&agg_prev, &agg_cur, Some(CPU_IDLE));
        assert_eq!(pct[0], 500);
        assert_eq!(pct[CPU_IDLE], 500);
    }
}
