//! Single-pass local search that moves each leaf a few positions along the
//! snake sequence when that shortens the estimated channel trunks.

use crate::cluster::{ClusterStats, CostModel};
use crate::config::PnrConfig;
use crate::netlist::{Cell, InstId};

use super::rows::max_row_size;

/// Estimated cost of `order` broken into rows of at most the maximum row width.
///
/// Rows `2k` and `2k + 1` feed the same trunk `k`. Each net pays the width
/// of its trunks plus, between consecutive trunks, the vertical distance and
/// any horizontal gap to the extent reached so far.
pub(crate) fn trunk_cost(
    model: &CostModel,
    num_nets: usize,
    order: &[(InstId, i64)],
    stats: &ClusterStats,
    vertical_cost: i64,
) -> i64 {
    let max = max_row_size(stats);
    let trunks = (stats.num_rows + 1) / 2;
    let mut extent: Vec<Vec<Option<(i64, i64)>>> = vec![vec![None; trunks.max(1)]; num_nets];

    let mut row = 0;
    let mut dis = 0;
    for &(inst, size) in order {
        let even = row % 2 == 0;
        if row + 1 < stats.num_rows {
            if even && dis > 0 && dis + size > max {
                row += 1;
                dis = max;
            } else if !even && dis < max && dis - size < 0 {
                row += 1;
                dis = 0;
            }
        }
        let even = row % 2 == 0;
        let trunk = row / 2;
        for &(net, xoff) in model.leaf_ports(inst) {
            let pos = if even { dis + xoff } else { dis - xoff };
            let slot = &mut extent[net][trunk];
            *slot = Some(match *slot {
                None => (pos, pos),
                Some((lo, hi)) => (lo.min(pos), hi.max(pos)),
            });
        }
        if even {
            dis += size;
        } else {
            dis -= size;
        }
    }

    let mut cost = 0;
    for trunks in extent.iter() {
        let mut acc: Option<(usize, i64, i64)> = None;
        for (k, (lo, hi)) in trunks
            .iter()
            .enumerate()
            .filter_map(|(k, t)| t.map(|t| (k, t)))
        {
            cost += hi - lo;
            acc = Some(match acc {
                None => (k, lo, hi),
                Some((last, alo, ahi)) => {
                    cost += (k - last) as i64 * stats.avg_height * vertical_cost;
                    if lo > ahi {
                        cost += lo - ahi;
                    } else if hi < alo {
                        cost += alo - hi;
                    }
                    (k, alo.min(lo), ahi.max(hi))
                }
            });
        }
    }
    cost
}

/// Moves each leaf, in netlist order, to the position within the balance limit
/// that strictly lowers the trunk cost.
pub fn net_balance(
    cell: &Cell,
    model: &CostModel,
    mut order: Vec<(InstId, i64)>,
    stats: ClusterStats,
    config: &PnrConfig,
) -> Vec<(InstId, i64)> {
    let num_nets = cell.nets.len();
    let cost = |order: &[(InstId, i64)]| {
        trunk_cost(model, num_nets, order, &stats, config.vertical_cost)
    };
    let start = cost(&order);
    let mut best = start;
    let limit = config.balance_limit as isize;

    for inst in cell.leaf_instances() {
        let Some(pos) = order.iter().position(|&(i, _)| i == inst) else {
            continue;
        };
        let item = order.remove(pos);
        let mut best_pos = pos;
        for offset in -limit..=limit {
            let target = pos as isize + offset;
            if offset == 0 || target < 0 || target as usize > order.len() {
                continue;
            }
            let target = target as usize;
            order.insert(target, item);
            let c = cost(&order);
            if c < best {
                best = c;
                best_pos = target;
            }
            order.remove(target);
        }
        order.insert(best_pos, item);
    }
    log::info!("net balance reduced trunk cost from {start} to {best}");
    order
}
