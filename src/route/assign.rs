use crate::config::PnrConfig;
use crate::netlist::{Cell, InstanceKind, NetId, PortDir};
use crate::place::squeeze::resolve_new_x;
use crate::place::{Place, Placement};

use super::{PortId, RoutePort, Routing, Stitch};

/// Which neighbouring rows of a (net, row) pair need the net.
#[derive(Copy, Clone, Debug)]
struct Reach {
    above: bool,
    below: bool,
}

/// Decides the channel of every port of every ordinary net.
pub fn channel_assign(
    cell: &Cell,
    placement: &mut Placement,
    routing: &mut Routing,
    config: &PnrConfig,
) {
    let keys: Vec<(NetId, usize)> = routing.route_nodes.keys().copied().collect();
    for (net, row) in keys {
        let ports = routing.route_nodes[&(net, row)].clone();
        let here = |f: fn(PortDir) -> bool| {
            ports.len() > 1 && ports.iter().any(|&p| f(routing.ports[p].dir))
        };
        let reach = Reach {
            above: routing
                .route_nodes
                .range((net, row + 1)..=(net, usize::MAX))
                .any(|(_, p)| !p.is_empty())
                || here(PortDir::is_up_only),
            below: routing
                .route_nodes
                .range((net, 0)..(net, row))
                .any(|(_, p)| !p.is_empty())
                || here(PortDir::is_down_only),
        };
        let exported = cell.export_of_net(net).is_some();

        for (i, &port) in ports.iter().enumerate() {
            if routing.ports[port].seen {
                continue;
            }
            routing.ports[port].seen = true;
            let dir = routing.ports[port].dir;
            let top = placement.num_rows() - 1;

            if dir.has(PortDir::UP) && dir.has(PortDir::DOWN) {
                if ports.len() == 1 && !reach.above && !reach.below {
                    if row == top && row != 0 {
                        routing.add_port_to_channel(row + 1, port);
                    } else if row == 0 || exported {
                        routing.add_port_to_channel(row, port);
                    } else {
                        log::debug!(
                            "port {port} of net {} is alone in row {row}, left unrouted",
                            cell.nets[net].name()
                        );
                    }
                } else {
                    let channel = vertical_channel(placement, routing, port, row, reach);
                    routing.add_port_to_channel(channel, port);
                }
            } else if dir.has(PortDir::UP) {
                routing.add_port_to_channel(row + 1, port);
            } else if dir.has(PortDir::DOWN) {
                routing.add_port_to_channel(row, port);
            } else if dir.has(PortDir::LEFT) || dir.has(PortDir::RIGHT) {
                lateral(placement, routing, &ports[i + 1..], port, row, reach, config);
            } else {
                log::error!(
                    "port {port} of net {} has no direction, cannot route it",
                    cell.nets[net].name()
                );
            }
        }
    }
}

/// Channel for a port that may leave either way.
fn vertical_channel(
    placement: &Placement,
    routing: &Routing,
    port: PortId,
    row: usize,
    reach: Reach,
) -> usize {
    if !reach.above {
        return row;
    }
    if !reach.below {
        return row + 1;
    }
    match nearest_port_offset(placement, routing, port, row) {
        Some(offset) if offset > 0 => row + 1,
        _ => row,
    }
}

/// Row offset of the port of the same net nearest to `port`.
fn nearest_port_offset(
    placement: &Placement,
    routing: &Routing,
    port: PortId,
    row: usize,
) -> Option<isize> {
    let net = routing.ports[port].net;
    let x = routing.port_x(placement, port);
    let avg_height = placement.stats.avg_height;
    let mut best: Option<(i64, isize)> = None;
    for (&(_, r), ports) in routing
        .route_nodes
        .range((net, 0)..=(net, usize::MAX))
    {
        if r == row {
            continue;
        }
        let offset = r as isize - row as isize;
        for &other in ports {
            let dist = offset.unsigned_abs() as i64 * avg_height * 2
                + (routing.port_x(placement, other) - x).abs();
            if best.map_or(true, |(d, _)| dist < d) {
                best = Some((dist, offset));
            }
        }
    }
    best.map(|(_, offset)| offset)
}

/// Whether a lateral port faces the lower end of its row.
#[inline]
fn faces_lower(row: usize, dir: PortDir) -> bool {
    // mirrored rows flip which way the cell's left side faces
    dir.has(PortDir::LEFT) == (row % 2 == 0)
}

/// Row index of the physical neighbour a lateral port faces, if any.
fn facing_index(placement: &Placement, row: usize, index: usize, dir: PortDir) -> Option<usize> {
    if faces_lower(row, dir) {
        index.checked_sub(1)
    } else {
        (index + 1 < placement.rows[row].len()).then_some(index + 1)
    }
}

fn opposite(dir: PortDir) -> PortDir {
    if dir.has(PortDir::LEFT) {
        PortDir::RIGHT
    } else {
        PortDir::LEFT
    }
}

/// Joins a left/right port to its neighbour with a stitch, or moves it onto a lateral feed.
fn lateral(
    placement: &mut Placement,
    routing: &mut Routing,
    later: &[PortId],
    port: PortId,
    row: usize,
    reach: Reach,
    config: &PnrConfig,
) {
    let place = routing.ports[port].place;
    let Some(index) = placement.index_in_row(place) else {
        return;
    };
    let dir = routing.ports[port].dir;

    let mut neighbour = facing_index(placement, row, index, dir);
    while let Some(n) = neighbour {
        if placement.places[placement.rows[row][n]].kind == InstanceKind::Leaf {
            break;
        }
        neighbour = facing_index(placement, row, n, dir);
    }
    if let Some(n) = neighbour {
        let other_place = placement.rows[row][n];
        let mate = later.iter().copied().find(|&p| {
            let p = &routing.ports[p];
            !p.seen && p.place == other_place && p.dir == opposite(dir)
        });
        if let Some(mate) = mate {
            routing.ports[mate].seen = true;
            let at = index.max(n);
            let x = placement.places[placement.rows[row][at]].x;
            let name = format!("stitch{}", routing.stitches.len());
            let stitch = placement.insert(
                row,
                at,
                Place::synthetic(name.into(), InstanceKind::Stitch, 0),
            );
            placement.places[stitch].x = x;
            routing.stitches.push(Stitch {
                place: stitch,
                a: port,
                b: mate,
            });
            return;
        }
    }

    // feed goes on the side the port faces
    let at = if faces_lower(row, dir) { index } else { index + 1 };
    let size = config.feed_through_size;
    let name = format!("lfeed{}", port);
    let feed = placement.insert(
        row,
        at,
        Place::synthetic(name.into(), InstanceKind::LateralFeed, size),
    );
    resolve_new_x(placement, row, at, config);
    let p = &mut routing.ports[port];
    p.place = feed;
    p.xoff = size / 2;
    p.dir = PortDir::vertical();
    let channel = vertical_channel(placement, routing, port, row, reach);
    routing.add_port_to_channel(channel, port);
}

/// New synthetic route port on a freshly inserted place.
pub(crate) fn synthetic_port(
    routing: &mut Routing,
    place: usize,
    xoff: i64,
    net: NetId,
    row: usize,
) -> PortId {
    let id = routing.push_port(RoutePort {
        place,
        xoff,
        dir: PortDir::vertical(),
        net,
        port: None,
        seen: true,
    });
    routing.route_nodes.entry((net, row)).or_default().push(id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::PortRef;
    use crate::route::route;
    use crate::route::tests::stacked;
    use crate::tests::{LATERAL_NETLIST, STITCH_NETLIST, TOWER_NETLIST};

    #[test]
    fn up_only_port_uses_channel_above() {
        let (cell, mut placement) = stacked(TOWER_NETLIST, 3);
        let routing = route(&cell, &mut placement, &PnrConfig::default());
        let b = cell.find_instance("B").unwrap();
        let port = routing
            .ports
            .iter()
            .position(|p| p.port == Some(PortRef::new(b, 0)))
            .unwrap();
        let node = routing.node_in(2, routing.ports[port].net).unwrap();
        assert!(routing.nodes[node].ports.contains(&port));
        assert!(routing.node_in(1, routing.ports[port].net).is_some());
    }

    #[test]
    fn facing_lateral_ports_are_stitched() {
        let (cell, mut placement) = stacked(STITCH_NETLIST, 1);
        let routing = route(&cell, &mut placement, &PnrConfig::default());
        assert_eq!(routing.stitches.len(), 1);
        let stitch = routing.stitches[0];
        assert_eq!(placement.places[stitch.place].kind, InstanceKind::Stitch);
        assert_eq!(placement.places[stitch.place].size, 0);
        // the stitched net needs no channel
        let net = routing.ports[stitch.a].net;
        assert!(routing.chain(net).is_empty());
        // the stitch sits between its two cells
        let row = &placement.rows[0];
        let at = row.iter().position(|&p| p == stitch.place).unwrap();
        assert!(at > 0 && at + 1 < row.len());
    }

    #[test]
    fn lone_lateral_port_gets_a_feed() {
        let (cell, mut placement) = stacked(LATERAL_NETLIST, 1);
        assert_eq!(cell.leaf_instances().count(), 2);
        let routing = route(&cell, &mut placement, &PnrConfig::default());
        let feeds: Vec<_> = (0..placement.places.len())
            .filter(|&p| placement.places[p].kind == InstanceKind::LateralFeed)
            .collect();
        assert_eq!(feeds.len(), 1);
        let port = routing
            .ports
            .iter()
            .position(|p| p.place == feeds[0])
            .unwrap();
        assert_eq!(routing.ports[port].xoff, 8);
        let net = routing.ports[port].net;
        assert!(routing
            .chain(net)
            .iter()
            .any(|&n| routing.nodes[n].ports.contains(&port)));
    }
}
