use crate::cluster::ClusterStats;
use crate::netlist::{Cell, InstId, InstanceKind, LeafLibrary};

use super::{Place, Placement};

/// Rule for ending a row while walking the placement sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RowBreak {
    /// End the row when the next cell would move it further from the target width.
    Closest,
    /// End the row when the next cell would exceed the target width plus half a cell.
    MaxWidth,
}

impl RowBreak {
    fn breaks(self, stats: &ClusterStats, row_size: i64, size: i64) -> bool {
        match self {
            RowBreak::Closest => {
                (stats.size_rows - row_size).abs() < (stats.size_rows - (row_size + size)).abs()
            }
            RowBreak::MaxWidth => row_size > 0 && row_size + size > max_row_size(stats),
        }
    }
}

#[inline]
pub fn max_row_size(stats: &ClusterStats) -> i64 {
    stats.size_rows + stats.avg_size / 2
}

/// Splits the snake-ordered leaf sequence into rows.
///
/// The sequence runs left to right through even rows and right to left
/// through odd rows; the returned rows are all stored left to right with
/// x positions still unset.
pub fn rows_from_sequence(
    cell: &Cell,
    leaves: &LeafLibrary,
    order: &[(InstId, i64)],
    stats: ClusterStats,
    rule: RowBreak,
) -> Placement {
    let mut placement = Placement {
        places: Vec::with_capacity(order.len()),
        rows: vec![Vec::new()],
        stats,
    };
    let mut row = 0;
    let mut row_size = 0;
    for &(inst, size) in order {
        if row + 1 < stats.num_rows && rule.breaks(&stats, row_size, size) {
            row += 1;
            row_size = 0;
            placement.rows.push(Vec::new());
        }
        let instance = &cell.instances[inst];
        let active = instance
            .proto
            .as_deref()
            .and_then(|p| leaves.find(p))
            .map(|l| l.active)
            .unwrap_or_default();
        placement.places.push(Place {
            name: instance.name.clone(),
            kind: InstanceKind::Leaf,
            inst: Some(inst),
            row,
            x: 0,
            size,
            active,
        });
        placement.rows[row].push(placement.places.len() - 1);
        row_size += size;
    }
    for (r, places) in placement.rows.iter_mut().enumerate() {
        if r % 2 == 1 {
            places.reverse();
        }
    }
    placement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::{instantiate, Cell};
    use crate::tests::leaf_library;

    fn cell_of(n: usize) -> Cell {
        let leaves = leaf_library();
        let mut cell = Cell::new("row");
        for i in 0..n {
            cell.push_instance(instantiate(format!("i{i}").into(), "inv", &[], &leaves).unwrap());
        }
        cell
    }

    #[test]
    fn snake_rows() {
        let cell = cell_of(6);
        let order: Vec<_> = cell.leaf_instances().map(|i| (i, 10)).collect();
        let stats = ClusterStats {
            num_rows: 2,
            size_inst: 60,
            size_rows: 30,
            avg_size: 10,
            avg_height: 40,
        };
        let mut placement =
            rows_from_sequence(&cell, &leaf_library(), &order, stats, RowBreak::Closest);
        placement.renumber();
        let names = |r: usize| -> Vec<String> {
            placement.rows[r]
                .iter()
                .map(|&p| placement.places[p].name.to_string())
                .collect()
        };
        assert_eq!(names(0), vec!["i0", "i1", "i2"]);
        assert_eq!(names(1), vec!["i5", "i4", "i3"]);
        assert_eq!(placement.places[placement.rows[1][0]].x, 0);
        assert_eq!(placement.places[placement.rows[1][2]].x, 20);
        assert!(placement.places[placement.rows[1][0]].mirrored());
    }

    #[test]
    fn last_row_takes_the_rest() {
        let cell = cell_of(5);
        let order: Vec<_> = cell.leaf_instances().map(|i| (i, 10)).collect();
        let stats = ClusterStats {
            num_rows: 2,
            size_inst: 50,
            size_rows: 10,
            avg_size: 10,
            avg_height: 40,
        };
        let placement =
            rows_from_sequence(&cell, &leaf_library(), &order, stats, RowBreak::MaxWidth);
        assert_eq!(placement.rows.len(), 2);
        assert_eq!(placement.rows[0].len(), 1);
        assert_eq!(placement.rows[1].len(), 4);
    }
}
