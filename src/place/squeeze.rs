use crate::config::PnrConfig;
use crate::netlist::InstanceKind;

use super::{PlaceId, Placement};

/// Slides abutting leaves together so that their active areas are exactly
/// `min_active_distance` apart, never pulling them apart.
pub fn squeeze(placement: &mut Placement, config: &PnrConfig) {
    let mut total = 0;
    for r in 0..placement.num_rows() {
        for i in 1..placement.rows[r].len() {
            let left = &placement.places[placement.rows[r][i - 1]];
            let right = &placement.places[placement.rows[r][i]];
            let overlap = left.right_active() + right.left_active() - config.min_active_distance;
            if overlap > 0 {
                placement.shift_from(r, i, -overlap);
                total += overlap;
            }
        }
    }
    log::debug!("squeeze removed {total} units of row width");
}

/// Overlap allowed between `place` and a neighbouring leaf exposing `active`.
fn overlap(
    placement: &Placement,
    place: PlaceId,
    neighbour: PlaceId,
    active: i64,
    config: &PnrConfig,
) -> i64 {
    if placement.places[neighbour].kind != InstanceKind::Leaf {
        return 0;
    }
    let overlap = active - config.min_active_distance;
    if placement.places[place].kind == InstanceKind::LateralFeed {
        overlap
    } else {
        overlap.max(0)
    }
}

/// Positions a place just inserted at `index` of `row` against its left
/// neighbour and shifts the rest of the row to make room.
pub fn resolve_new_x(placement: &mut Placement, row: usize, index: usize, config: &PnrConfig) {
    let id = placement.rows[row][index];
    let x = match index.checked_sub(1).map(|i| placement.rows[row][i]) {
        Some(prev) => {
            let p = &placement.places[prev];
            p.x + p.size - overlap(placement, id, prev, p.right_active(), config)
        }
        None => 0,
    };
    placement.places[id].x = x;

    if let Some(&next) = placement.rows[row].get(index + 1) {
        let n = &placement.places[next];
        let gap = overlap(placement, id, next, n.left_active(), config);
        let want = x + placement.places[id].size - gap;
        let dx = want - n.x;
        placement.shift_from(row, index + 1, dx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterStats;
    use crate::netlist::ActiveArea;
    use crate::place::Place;

    fn leaf(name: &str, size: i64, left: i64, right: i64) -> Place {
        let mut p = Place::synthetic(name.into(), InstanceKind::Leaf, size);
        p.inst = Some(0);
        p.active = ActiveArea {
            left,
            right,
            ..Default::default()
        };
        p
    }

    fn one_row(places: Vec<Place>, row: usize) -> Placement {
        let mut placement = Placement {
            rows: vec![Vec::new(); row + 1],
            places: Vec::new(),
            stats: ClusterStats::default(),
        };
        for (i, p) in places.into_iter().enumerate() {
            placement.insert(row, i, p);
        }
        placement.renumber();
        placement
    }

    fn xs(placement: &Placement, row: usize) -> Vec<i64> {
        placement.rows[row]
            .iter()
            .map(|&p| placement.places[p].x)
            .collect()
    }

    #[test]
    fn squeeze_even_row() {
        let config = PnrConfig::default();
        let mut p = one_row(
            vec![leaf("a", 20, 1, 6), leaf("b", 20, 5, 1), leaf("c", 20, 2, 2)],
            0,
        );
        squeeze(&mut p, &config);
        // a|b overlap 6 + 5 - 8 = 3, b|c overlap 1 + 2 - 8 < 0
        assert_eq!(xs(&p, 0), vec![0, 17, 37]);
    }

    #[test]
    fn squeeze_odd_row_uses_mirrored_sides() {
        let config = PnrConfig::default();
        let mut p = one_row(vec![leaf("a", 20, 6, 1), leaf("b", 20, 1, 5)], 1);
        squeeze(&mut p, &config);
        assert_eq!(xs(&p, 1), vec![0, 17]);
    }

    #[test]
    fn inserted_feed_pushes_row() {
        let config = PnrConfig::default();
        let mut p = one_row(vec![leaf("a", 20, 0, 10), leaf("b", 20, 12, 0)], 0);
        let feed = p.insert(0, 1, Place::synthetic("f".into(), InstanceKind::Feed, 16));
        resolve_new_x(&mut p, 0, 1, &config);
        // feed overlaps a by 10 - 8, b overlaps the feed by 12 - 8
        assert_eq!(p.places[feed].x, 18);
        assert_eq!(xs(&p, 0), vec![0, 18, 30]);
    }

    #[test]
    fn lateral_feed_may_open_a_gap() {
        let config = PnrConfig::default();
        let mut p = one_row(vec![leaf("a", 20, 0, 2), leaf("b", 20, 0, 0)], 0);
        let feed = p.insert(0, 1, Place::synthetic("lf".into(), InstanceKind::LateralFeed, 16));
        resolve_new_x(&mut p, 0, 1, &config);
        assert_eq!(p.places[feed].x, 26);
        assert_eq!(xs(&p, 0), vec![0, 26, 50]);
    }
}
