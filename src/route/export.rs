use crate::config::PnrConfig;
use crate::netlist::{Cell, InstanceKind};
use crate::place::{Place, Placement};

use super::assign::synthetic_port;
use super::{ExportRoute, Routing, Side};

/// Resolves how each export reaches the cell boundary.
///
/// Exports whose chain touches the bottom or top channel leave through it.
/// Otherwise a special place is added at whichever row end is closest to a
/// port of the net, and its port joins the channel of that port.
pub fn decide_exports(
    cell: &Cell,
    placement: &mut Placement,
    routing: &mut Routing,
    config: &PnrConfig,
) {
    let top = placement.num_rows();
    for export in cell.exports.iter() {
        let net = cell.export_net(export).filter(|&n| n >= 2);
        let mut route = ExportRoute {
            name: export.name.clone(),
            net,
            channel: None,
            port: None,
            side: None,
        };
        let chain = net.map(|n| routing.chain(n)).unwrap_or_default();
        let (Some(net), false) = (net, chain.is_empty()) else {
            log::warn!("export {} has no channel to reach the cell edge", export.name);
            routing.exports.push(route);
            continue;
        };

        // (distance, channel, row, side)
        let mut best: Option<(i64, usize, usize, Side)> = None;
        for &node in chain.iter() {
            let channel = routing.nodes[node].channel;
            if channel == 0 || channel == top {
                route.channel = Some(channel);
                route.port = routing.nodes[node].ports.first().copied();
                route.side = Some(if channel == 0 { Side::Bottom } else { Side::Top });
                break;
            }
            for &port in routing.nodes[node].ports.iter() {
                let row = routing.port_row(placement, port);
                let pos = routing.port_x(placement, port);
                let row_places = &placement.rows[row];
                let (Some(&first), Some(&last)) = (row_places.first(), row_places.last()) else {
                    continue;
                };
                let start = placement.places[first].x;
                let end = placement.places[last].x + placement.places[last].size;
                for (dist, side) in [(pos - start, Side::Left), (end - pos, Side::Right)] {
                    if best.map_or(true, |(d, ..)| dist < d) {
                        best = Some((dist, channel, row, side));
                    }
                }
            }
        }

        if route.side.is_none() {
            if let Some((_, channel, row, side)) = best {
                let size = config.feed_through_size;
                let row_places = &placement.rows[row];
                let (at, x) = match (side, row_places.first(), row_places.last()) {
                    (Side::Left, Some(&first), _) => (0, placement.places[first].x - size),
                    (_, _, Some(&last)) => {
                        let p = &placement.places[last];
                        (row_places.len(), p.x + p.size)
                    }
                    _ => (0, 0),
                };
                let place = placement.insert(
                    row,
                    at,
                    Place::synthetic(export.name.clone(), InstanceKind::Special, size),
                );
                placement.places[place].x = x;
                let port = synthetic_port(routing, place, size / 2, net, row);
                routing.add_port_to_channel(channel, port);
                route.channel = Some(channel);
                route.port = Some(port);
                route.side = Some(side);
            }
        }
        log::debug!("export {} leaves {:?}", export.name, route.side);
        routing.exports.push(route);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::route;
    use crate::route::tests::stacked;
    use crate::tests::{EXPORT_NETLIST, TOWER_NETLIST};

    #[test]
    fn middle_export_gets_a_boundary_place() {
        let (cell, mut placement) = stacked(EXPORT_NETLIST, 3);
        let routing = route(&cell, &mut placement, &PnrConfig::default());
        let out = routing.exports.iter().find(|e| e.name == "mid").unwrap();
        let side = out.side.unwrap();
        assert!(matches!(side, Side::Left | Side::Right));
        let port = out.port.unwrap();
        let place = &placement.places[routing.ports[port].place];
        assert_eq!(place.kind, InstanceKind::Special);
        assert_eq!(place.name, "mid");
        let channel = out.channel.unwrap();
        let node = routing.node_in(channel, out.net.unwrap()).unwrap();
        assert!(routing.nodes[node].ports.contains(&port));
    }

    #[test]
    fn bottom_row_export_leaves_downward() {
        let (cell, mut placement) = stacked(EXPORT_NETLIST, 3);
        let routing = route(&cell, &mut placement, &PnrConfig::default());
        let low = routing.exports.iter().find(|e| e.name == "low").unwrap();
        assert_eq!(low.side, Some(Side::Bottom));
        assert_eq!(low.channel, Some(0));

        let (cell, mut placement) = stacked(TOWER_NETLIST, 3);
        let routing = route(&cell, &mut placement, &PnrConfig::default());
        assert!(routing.exports.is_empty());
    }
}
