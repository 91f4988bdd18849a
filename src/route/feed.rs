use itertools::Itertools;

use crate::config::PnrConfig;
use crate::netlist::{InstanceKind, NetId, PortDir};
use crate::place::squeeze::resolve_new_x;
use crate::place::{Place, Placement};

use super::assign::synthetic_port;
use super::{NodeId, PortId, Routing};

/// Makes every net continuous between consecutive channel nodes of its chain.
///
/// For each row between two nodes, a port of the net that reaches both ways
/// and lies in the preferred window is reused; otherwise a feed-through is
/// inserted into the row.
pub fn create_pass_throughs(
    placement: &mut Placement,
    routing: &mut Routing,
    config: &PnrConfig,
) {
    let nets: Vec<NetId> = routing.nodes.iter().map(|n| n.net).sorted().dedup().collect();
    let mut feeds = 0;
    for net in nets {
        let Some(mut lower) = routing.first_node(net) else {
            continue;
        };
        while let Some(upper) = routing.nodes[lower].same_next {
            let target = routing.nodes[upper].channel;
            let mut node = lower;
            for chan in routing.nodes[lower].channel..target {
                if pass_through(placement, routing, node, upper, chan, config) {
                    feeds += 1;
                }
                match routing.node_in(chan + 1, net) {
                    Some(next) => node = next,
                    None => break,
                }
            }
            lower = upper;
        }
    }
    log::info!("inserted {feeds} feed-throughs");
}

/// Window in which a connection between two nodes would be shortest.
fn window(
    placement: &Placement,
    routing: &Routing,
    a: NodeId,
    b: NodeId,
    fuzzy: i64,
) -> (i64, i64) {
    let (min1, max1) = routing.extent(placement, a).unwrap_or_default();
    let (min2, max2) = routing.extent(placement, b).unwrap_or((min1, max1));
    let (lo, hi) = if max1 <= min2 {
        (max1, min2)
    } else if max2 <= min1 {
        (max2, min1)
    } else {
        (min1.max(min2), max1.min(max2))
    };
    (lo - fuzzy, hi + fuzzy)
}

/// Connects channel `chan` to `chan + 1` through row `chan`. Returns true when a feed was inserted.
fn pass_through(
    placement: &mut Placement,
    routing: &mut Routing,
    node: NodeId,
    upper: NodeId,
    chan: usize,
    config: &PnrConfig,
) -> bool {
    let net = routing.nodes[node].net;
    let row = chan;
    let (lo, hi) = window(placement, routing, node, upper, config.fuzzy_window);

    // a reused port joins the channels on both sides of the row, so it must face both
    let existing = routing
        .route_nodes
        .get(&(net, row))
        .and_then(|ports| {
            ports.iter().copied().find(|&p| {
                let dir = routing.ports[p].dir;
                let x = routing.port_x(placement, p);
                dir.has(PortDir::UP) && dir.has(PortDir::DOWN) && lo <= x && x <= hi
            })
        });
    if let Some(port) = existing {
        register(routing, chan, port);
        return false;
    }

    let at = feed_index(placement, row, lo, hi);
    let size = config.feed_through_size;
    let name = format!("feed{}", placement.places.len());
    let feed = placement.insert(
        row,
        at,
        Place::synthetic(name.into(), InstanceKind::Feed, size),
    );
    resolve_new_x(placement, row, at, config);
    let port = synthetic_port(routing, feed, size / 2, net, row);
    register(routing, chan, port);
    true
}

fn register(routing: &mut Routing, chan: usize, port: PortId) {
    routing.add_port_to_channel(chan, port);
    routing.add_port_to_channel(chan + 1, port);
}

/// Row index a feed should be inserted at, never beside a stitch or lateral feed.
fn feed_index(placement: &Placement, row: usize, lo: i64, hi: i64) -> usize {
    let places = &placement.rows[row];
    let blocked = |i: usize| {
        matches!(
            placement.places[places[i]].kind,
            InstanceKind::Stitch | InstanceKind::LateralFeed
        )
    };
    let eligible = (0..places.len()).filter(|&i| !blocked(i) && !(i > 0 && blocked(i - 1)));

    let mut nearest: Option<(i64, usize)> = None;
    for i in eligible {
        let x = placement.places[places[i]].x;
        if lo <= x && x <= hi {
            return i;
        }
        let dist = if x < lo { lo - x } else { x - hi };
        if nearest.map_or(true, |(d, _)| dist < d) {
            nearest = Some((dist, i));
        }
    }
    nearest.map(|(_, i)| i).unwrap_or(places.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterStats;
    use crate::place::Place;

    fn row_of(kinds: &[InstanceKind]) -> Placement {
        let mut placement = Placement {
            places: Vec::new(),
            rows: vec![Vec::new()],
            stats: ClusterStats::default(),
        };
        for (i, &kind) in kinds.iter().enumerate() {
            let size = if kind == InstanceKind::Stitch { 0 } else { 10 };
            placement.insert(0, i, Place::synthetic(format!("p{i}").into(), kind, size));
        }
        placement.renumber();
        placement
    }

    #[test]
    fn feed_goes_inside_window() {
        use InstanceKind::*;
        let placement = row_of(&[Leaf, Leaf, Leaf, Leaf]);
        assert_eq!(feed_index(&placement, 0, 15, 25), 2);
        assert_eq!(feed_index(&placement, 0, 100, 200), 3);
        assert_eq!(feed_index(&placement, 0, -50, -40), 0);
    }

    #[test]
    fn feed_avoids_stitches_and_lateral_feeds() {
        use InstanceKind::*;
        let placement = row_of(&[Leaf, LateralFeed, Leaf, Leaf]);
        // places 1 and 2 are blocked
        assert_eq!(feed_index(&placement, 0, 25, 35), 3);
        let placement = row_of(&[Stitch, Leaf]);
        assert_eq!(feed_index(&placement, 0, 0, 0), 2);
    }
}
