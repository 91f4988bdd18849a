//! Channel routing.
//!
//! Channel `k` runs below row `k`, so channel `0` is under the bottom row
//! and channel `R` is over the top row of an `R`-row placement. Every net
//! gets at most one node per channel; nodes of the same net are chained
//! bottom to top through `same_last`/`same_next`.

use std::collections::BTreeMap;

use arcstr::ArcStr;
use serde::Serialize;

use crate::config::PnrConfig;
use crate::netlist::{Cell, InstanceKind, NetId, PortDir, PortRef};
use crate::place::{PlaceId, Placement};

pub mod assign;
pub mod export;
pub mod feed;
pub mod track;
pub mod vcg;
pub mod zrg;

pub type PortId = usize;
pub type NodeId = usize;

/// A port as seen by the router, attached to a place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoutePort {
    pub place: PlaceId,
    pub xoff: i64,
    pub dir: PortDir,
    pub net: NetId,
    /// Netlist port behind this route port. Synthetic ports have none.
    pub port: Option<PortRef>,
    #[serde(skip)]
    pub(crate) seen: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tie {
    Power,
    Ground,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelNode {
    pub net: NetId,
    pub channel: usize,
    pub ports: Vec<PortId>,
    pub same_next: Option<NodeId>,
    pub same_last: Option<NodeId>,
    /// Set on the synthetic nodes joining a supply port to its rail.
    pub tie: Option<Tie>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub number: usize,
    pub nodes: Vec<NodeId>,
    /// Nodes of each track ordered by leftmost port, track 0 nearest the lower row.
    pub tracks: Vec<Vec<NodeId>>,
    /// Vertical constraints the tracks honor, lower node first.
    pub constraints: Vec<(NodeId, NodeId)>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Top,
    Bottom,
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExportRoute {
    pub name: ArcStr,
    pub net: Option<NetId>,
    pub channel: Option<usize>,
    pub port: Option<PortId>,
    pub side: Option<Side>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Stitch {
    pub place: PlaceId,
    pub a: PortId,
    pub b: PortId,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Routing {
    pub ports: Vec<RoutePort>,
    pub nodes: Vec<ChannelNode>,
    pub channels: Vec<Channel>,
    pub exports: Vec<ExportRoute>,
    pub stitches: Vec<Stitch>,
    /// Route ports of every (net, row) pair.
    #[serde(skip)]
    pub(crate) route_nodes: BTreeMap<(NetId, usize), Vec<PortId>>,
}

impl Routing {
    /// Collects the ports of ordinary nets on placed leaves.
    pub fn new(cell: &Cell, placement: &Placement) -> Self {
        let mut routing = Self {
            channels: (0..=placement.num_rows())
                .map(|number| Channel {
                    number,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        for (net, n) in cell.signal_nets() {
            for &r in n.ports.iter() {
                let inst = &cell.instances[r.inst];
                if inst.kind != InstanceKind::Leaf {
                    continue;
                }
                let Some(place) = placement.place_of(r.inst) else {
                    continue;
                };
                let p = &inst.ports[r.port];
                let id = routing.push_port(RoutePort {
                    place,
                    xoff: p.xoff,
                    dir: p.dir,
                    net,
                    port: Some(r),
                    seen: false,
                });
                routing
                    .route_nodes
                    .entry((net, placement.places[place].row))
                    .or_default()
                    .push(id);
            }
        }
        routing
    }

    pub fn push_port(&mut self, port: RoutePort) -> PortId {
        self.ports.push(port);
        self.ports.len() - 1
    }

    #[inline]
    pub fn port_x(&self, placement: &Placement, port: PortId) -> i64 {
        let p = &self.ports[port];
        placement.places[p.place].port_x(p.xoff)
    }

    #[inline]
    pub fn port_row(&self, placement: &Placement, port: PortId) -> usize {
        placement.places[self.ports[port].place].row
    }

    pub fn node_in(&self, channel: usize, net: NetId) -> Option<NodeId> {
        self.channels[channel]
            .nodes
            .iter()
            .copied()
            .find(|&n| self.nodes[n].net == net && self.nodes[n].tie.is_none())
    }

    /// Lowest node of the chain of `net`.
    pub fn first_node(&self, net: NetId) -> Option<NodeId> {
        self.channels
            .iter()
            .find_map(|c| self.node_in(c.number, net))
    }

    /// Leftmost and rightmost port positions of a node.
    pub fn extent(&self, placement: &Placement, node: NodeId) -> Option<(i64, i64)> {
        self.nodes[node]
            .ports
            .iter()
            .map(|&p| self.port_x(placement, p))
            .fold(None, |acc, x| match acc {
                None => Some((x, x)),
                Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
            })
    }

    /// Registers `port` in the node of its net in `channel`, creating and chaining
    /// the node if needed.
    pub fn add_port_to_channel(&mut self, channel: usize, port: PortId) -> NodeId {
        let net = self.ports[port].net;
        let node = match self.node_in(channel, net) {
            Some(node) => node,
            None => {
                self.nodes.push(ChannelNode {
                    net,
                    channel,
                    ports: Vec::new(),
                    same_next: None,
                    same_last: None,
                    tie: None,
                });
                let node = self.nodes.len() - 1;
                self.channels[channel].nodes.push(node);
                let below = (0..channel).rev().find_map(|c| self.node_in(c, net));
                let above = (channel + 1..self.channels.len()).find_map(|c| self.node_in(c, net));
                if let Some(b) = below {
                    self.nodes[b].same_next = Some(node);
                    self.nodes[node].same_last = Some(b);
                }
                if let Some(a) = above {
                    self.nodes[a].same_last = Some(node);
                    self.nodes[node].same_next = Some(a);
                }
                node
            }
        };
        if !self.nodes[node].ports.contains(&port) {
            self.nodes[node].ports.push(port);
        }
        node
    }

    /// Nodes of `net` from the bottom channel up.
    pub fn chain(&self, net: NetId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.first_node(net);
        while let Some(n) = cur {
            out.push(n);
            cur = self.nodes[n].same_next;
        }
        out
    }

    pub fn sort_ports(&mut self, placement: &Placement) {
        for node in 0..self.nodes.len() {
            let mut ports = std::mem::take(&mut self.nodes[node].ports);
            ports.sort_by_key(|&p| self.port_x(placement, p));
            self.nodes[node].ports = ports;
        }
    }
}

/// Assigns channels to every net of `cell`, inserting stitches, lateral feeds,
/// pass-throughs and export specials into `placement` as needed, then packs
/// each channel into tracks.
pub fn route(cell: &Cell, placement: &mut Placement, config: &PnrConfig) -> Routing {
    let mut routing = Routing::new(cell, placement);
    assign::channel_assign(cell, placement, &mut routing, config);
    feed::create_pass_throughs(placement, &mut routing, config);
    export::decide_exports(cell, placement, &mut routing, config);
    log::info!(
        "assigned {} channel nodes over {} channels",
        routing.nodes.len(),
        routing.channels.len()
    );
    track::assemble(cell, placement, &mut routing, config);
    routing
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cluster::ClusterStats;
    use crate::netlist::parse::read_netlist;
    use crate::place::place;
    use crate::place::rows::{rows_from_sequence, RowBreak};
    use crate::tests::{leaf_library, PAIR_NETLIST, STAR_NETLIST, TOWER_NETLIST};

    pub(crate) fn routed(text: &str, config: &PnrConfig) -> (Cell, Placement, Routing) {
        let leaves = leaf_library();
        let lib = read_netlist(text, leaves.clone()).unwrap();
        let cell = lib.current_cell().unwrap().clone();
        let mut placement = place(&cell, &leaves, config).unwrap();
        let routing = route(&cell, &mut placement, config);
        (cell, placement, routing)
    }

    #[test]
    fn pair_uses_one_channel_node() {
        let config = PnrConfig::builder()
            .num_rows(1)
            .sort_clusters(false)
            .build()
            .unwrap();
        let (cell, placement, routing) = routed(PAIR_NETLIST, &config);
        let a = cell.find_instance("A").unwrap();
        let net = cell.net_of(PortRef::new(a, 0)).unwrap();
        let nodes: Vec<_> = (0..routing.nodes.len())
            .filter(|&n| routing.nodes[n].net == net)
            .collect();
        assert_eq!(nodes.len(), 1);
        assert_eq!(routing.nodes[nodes[0]].channel, 0);
        assert_eq!(routing.extent(&placement, nodes[0]), Some((2, 18)));
    }

    /// Places the leaves of `text` one after another with the given row stats.
    pub(crate) fn stacked(text: &str, rows: usize) -> (Cell, Placement) {
        let leaves = leaf_library();
        let lib = read_netlist(text, leaves.clone()).unwrap();
        let cell = lib.current_cell().unwrap().clone();
        let order: Vec<_> = cell
            .leaf_instances()
            .map(|i| (i, cell.instances[i].size))
            .collect();
        let size_inst: i64 = order.iter().map(|o| o.1).sum();
        let stats = ClusterStats {
            num_rows: rows,
            size_inst,
            size_rows: size_inst / rows as i64,
            avg_size: size_inst / order.len() as i64,
            avg_height: 40,
        };
        let mut placement = rows_from_sequence(&cell, &leaves, &order, stats, RowBreak::Closest);
        placement.renumber();
        (cell, placement)
    }

    #[test]
    fn tower_chains_channels_with_pass_through() {
        let config = PnrConfig::default();
        let (cell, mut placement) = stacked(TOWER_NETLIST, 3);
        assert_eq!(placement.num_rows(), 3);
        let routing = route(&cell, &mut placement, &config);
        let a = cell.find_instance("A").unwrap();
        let net = cell.net_of(PortRef::new(a, 0)).unwrap();
        let chain = routing.chain(net);
        let channels: Vec<_> = chain.iter().map(|&n| routing.nodes[n].channel).collect();
        assert_eq!(channels, vec![1, 2]);
        assert_eq!(routing.nodes[chain[0]].same_next, Some(chain[1]));
        assert_eq!(routing.nodes[chain[1]].same_last, Some(chain[0]));

        // the middle port only reaches up, so a feed carries the net through row 1
        let feeds: Vec<_> = (0..placement.places.len())
            .filter(|&p| placement.places[p].kind == InstanceKind::Feed)
            .collect();
        assert_eq!(feeds.len(), 1);
        assert_eq!(placement.places[feeds[0]].row, 1);
        let feed_port = routing
            .ports
            .iter()
            .position(|p| p.place == feeds[0])
            .unwrap();
        assert!(routing.nodes[chain[0]].ports.contains(&feed_port));
        assert!(routing.nodes[chain[1]].ports.contains(&feed_port));
    }

    #[test]
    fn every_port_reaches_a_channel() {
        let config = PnrConfig::builder().num_rows(3).build().unwrap();
        let (_, _, routing) = routed(STAR_NETLIST, &config);
        for (&(net, _), ports) in routing.route_nodes.iter() {
            let in_chain: Vec<_> = routing
                .chain(net)
                .iter()
                .flat_map(|&n| routing.nodes[n].ports.clone())
                .collect();
            let total: usize = routing
                .route_nodes
                .iter()
                .filter(|((n, _), _)| *n == net)
                .map(|(_, p)| p.len())
                .sum();
            if total < 2 {
                continue;
            }
            for p in ports {
                let stitched = routing.stitches.iter().any(|s| s.a == *p || s.b == *p);
                assert!(stitched || in_chain.contains(p), "port {p} of net {net} unrouted");
            }
        }
    }

    #[test]
    fn every_node_lands_on_one_track() {
        let config = PnrConfig::builder().num_rows(3).build().unwrap();
        let (_, _, routing) = routed(crate::tests::CHAIN_NETLIST, &config);
        for channel in routing.channels.iter() {
            let mut on_tracks: Vec<_> = channel.tracks.iter().flatten().copied().collect();
            on_tracks.sort_unstable();
            let mut nodes = channel.nodes.clone();
            nodes.sort_unstable();
            assert_eq!(on_tracks, nodes, "channel {}", channel.number);
        }
        // the grounded input of A gets a tie
        assert!(routing.nodes.iter().any(|n| n.tie == Some(Tie::Ground)));
    }

    /// Checks the tracks of every channel and returns the most tracks any channel needs.
    fn check_tracks(placement: &Placement, routing: &Routing, config: &PnrConfig) -> usize {
        let mpd = config.min_port_distance;
        let mut deepest = 0;
        for channel in routing.channels.iter() {
            let mut track_of = BTreeMap::new();
            for (t, track) in channel.tracks.iter().enumerate() {
                for &n in track {
                    assert!(track_of.insert(n, t).is_none(), "node {n} on two tracks");
                }
                for (i, &a) in track.iter().enumerate() {
                    let (_, a_last) = routing.extent(placement, a).unwrap();
                    for &b in track.iter().skip(i + 1) {
                        let (b_first, _) = routing.extent(placement, b).unwrap();
                        assert!(
                            b_first >= a_last + mpd,
                            "nodes {a} and {b} crowd track {t} of channel {}",
                            channel.number
                        );
                    }
                }
            }
            let mut nodes = channel.nodes.clone();
            nodes.sort_unstable();
            assert_eq!(track_of.keys().copied().collect::<Vec<_>>(), nodes);

            // strictly rising tracks along every edge also rule out cycles
            for &(a, b) in channel.constraints.iter() {
                assert!(
                    track_of[&a] < track_of[&b],
                    "constraint {a} -> {b} broken in channel {}",
                    channel.number
                );
            }

            // nodes whose spans share an x can never share a track
            let spans: Vec<_> = channel
                .nodes
                .iter()
                .map(|&n| routing.extent(placement, n).unwrap())
                .collect();
            let density = spans
                .iter()
                .map(|&(x, _)| spans.iter().filter(|&&(lo, hi)| lo <= x && x <= hi).count())
                .max()
                .unwrap_or(0);
            assert!(channel.tracks.len() >= density);
            deepest = deepest.max(channel.tracks.len());
        }
        deepest
    }

    #[test]
    fn routed_tracks_are_legal() {
        for rows in 1..=4 {
            let config = PnrConfig::builder().num_rows(rows).build().unwrap();
            let (_, placement, routing) = routed(STAR_NETLIST, &config);
            let deepest = check_tracks(&placement, &routing, &config);
            if rows == 1 {
                // the hub net overlaps the nets it fans out to
                assert!(deepest > 1);
            }

            let (_, placement, routing) = routed(TOWER_NETLIST, &config);
            check_tracks(&placement, &routing, &config);
        }
    }
}
