use crate::kernel::NeighborhoodKernel;

/// Compute the force of infection for every cell.
///
/// `shim` is the normalized modified host index snapshot; `pressure` holds
/// `P_I + P_D` for cells whose discrete status is infectious and 0 for all
/// others, so the hot loop needs no status branching. `beta` is the
/// transmission rate already scaled by the year's weather index.
///
/// The kernel window is truncated at the landscape edges (no wraparound),
/// and a cell never contributes to itself (the kernel's center weight is
/// 0). A target with zero host index short-circuits to 0: an infected but
/// entirely non-susceptible cell exerts no pressure on itself.
///
/// This is a pure function of its snapshots; each output slot depends only
/// on read-only inputs, so callers may split the target range across
/// threads.
pub fn compute_foi(
    rows: usize,
    cols: usize,
    shim: &[f64],
    pressure: &[f64],
    kernel: &NeighborhoodKernel,
    beta: f64,
) -> Vec<f64> {
    debug_assert_eq!(shim.len(), rows * cols);
    debug_assert_eq!(pressure.len(), rows * cols);

    let radius = kernel.radius() as i64;
    let mut foi = vec![0.0; rows * cols];

    for row in 0..rows as i64 {
        for col in 0..cols as i64 {
            let target = (row * cols as i64 + col) as usize;
            let shim_target = shim[target];
            if shim_target == 0.0 {
                continue;
            }

            let row_lo = (row - radius).max(0);
            let row_hi = (row + radius).min(rows as i64 - 1);
            let col_lo = (col - radius).max(0);
            let col_hi = (col + radius).min(cols as i64 - 1);

            let mut sum = 0.0;
            for src_row in row_lo..=row_hi {
                for src_col in col_lo..=col_hi {
                    let src = (src_row * cols as i64 + src_col) as usize;
                    let load = pressure[src];
                    if load == 0.0 {
                        continue;
                    }
                    let weight = kernel.weight(src_row - row, src_col - col);
                    sum += weight * shim[src] * load;
                }
            }

            foi[target] = beta * shim_target * sum;
        }
    }

    foi
}
