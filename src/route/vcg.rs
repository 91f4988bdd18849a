//! Vertical constraint graph of one channel.
//!
//! An edge `a -> b` means node `a` takes a lower track than node `b`: some
//! port of `a` on the row below the channel sits closer than the minimum
//! port distance to a port of `b` on the row above.

use crate::config::PnrConfig;
use crate::netlist::{Cell, InstanceKind, PortRef, PortRole, GROUND, POWER};
use crate::place::Placement;

use super::{ChannelNode, NodeId, PortId, RoutePort, Routing, Tie};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vcg {
    /// Channel nodes, indexed locally.
    pub nodes: Vec<NodeId>,
    /// Children of each local node, ascending.
    pub edges: Vec<Vec<usize>>,
    /// Local nodes without parents.
    pub roots: Vec<usize>,
}

impl Vcg {
    /// Builds the graph over the non-tie nodes of `channel`.
    pub fn build(
        placement: &Placement,
        routing: &Routing,
        channel: usize,
        config: &PnrConfig,
    ) -> Self {
        let nodes: Vec<NodeId> = routing.channels[channel]
            .nodes
            .iter()
            .copied()
            .filter(|&n| routing.nodes[n].tie.is_none())
            .collect();
        let ports: Vec<Vec<(i64, usize)>> = nodes
            .iter()
            .map(|&n| {
                let mut ports: Vec<_> = routing.nodes[n]
                    .ports
                    .iter()
                    .map(|&p| (routing.port_x(placement, p), routing.port_row(placement, p)))
                    .collect();
                ports.sort();
                ports
            })
            .collect();

        let mut edges = vec![Vec::new(); nodes.len()];
        for i in 0..nodes.len() {
            for j in i + 1..nodes.len() {
                for &(xa, ra) in ports[i].iter() {
                    for &(xb, rb) in ports[j].iter() {
                        if (xa - xb).abs() >= config.min_port_distance {
                            continue;
                        }
                        if ra < rb {
                            edges[i].push(j);
                        } else if rb < ra {
                            edges[j].push(i);
                        }
                    }
                }
            }
        }
        for e in edges.iter_mut() {
            e.sort_unstable();
            e.dedup();
        }
        let mut vcg = Self {
            nodes,
            edges,
            roots: Vec::new(),
        };
        vcg.compute_roots();
        vcg
    }

    pub fn parents(&self) -> Vec<Vec<usize>> {
        let mut parents = vec![Vec::new(); self.nodes.len()];
        for (i, children) in self.edges.iter().enumerate() {
            for &c in children {
                parents[c].push(i);
            }
        }
        parents
    }

    pub fn compute_roots(&mut self) {
        let parents = self.parents();
        self.roots = (0..self.nodes.len())
            .filter(|&i| parents[i].is_empty())
            .collect();
    }

    /// A node on a cycle and the node whose edge closes it.
    pub fn find_cycle(&self) -> Option<(usize, usize)> {
        for start in 0..self.nodes.len() {
            let mut seen = vec![false; self.nodes.len()];
            let mut stack = vec![start];
            while let Some(n) = stack.pop() {
                for &c in self.edges[n].iter() {
                    if c == start {
                        return Some((start, n));
                    }
                    if !seen[c] {
                        seen[c] = true;
                        stack.push(c);
                    }
                }
            }
        }
        None
    }

    #[inline]
    pub fn is_acyclic(&self) -> bool {
        self.find_cycle().is_none()
    }

    fn add_node(&mut self, node: NodeId) -> usize {
        self.nodes.push(node);
        self.edges.push(Vec::new());
        self.nodes.len() - 1
    }

    /// Number of nodes on the longest path starting at each node.
    pub fn path_lengths(&self) -> Vec<usize> {
        let mut memo = vec![0; self.nodes.len()];
        for i in 0..self.nodes.len() {
            self.path_len(i, &mut memo);
        }
        memo
    }

    fn path_len(&self, i: usize, memo: &mut [usize]) -> usize {
        if memo[i] == 0 {
            let longest = self.edges[i]
                .iter()
                .map(|&c| self.path_len(c, memo))
                .max()
                .unwrap_or(0);
            memo[i] = longest + 1;
        }
        memo[i]
    }
}

/// Two ports of different nodes that conflict, the first on the higher row.
fn conflict(
    placement: &Placement,
    routing: &Routing,
    a: NodeId,
    b: NodeId,
    mpd: i64,
) -> Option<(PortId, PortId)> {
    for &pa in routing.nodes[a].ports.iter() {
        for &pb in routing.nodes[b].ports.iter() {
            let (xa, xb) = (routing.port_x(placement, pa), routing.port_x(placement, pb));
            if (xa - xb).abs() >= mpd {
                continue;
            }
            let (ra, rb) = (routing.port_row(placement, pa), routing.port_row(placement, pb));
            if ra == rb {
                log::error!("conflicting ports {pa} and {pb} share row {ra}");
                continue;
            }
            return Some(if ra > rb { (pa, pb) } else { (pb, pa) });
        }
    }
    None
}

/// Builds the graph of `channel`, moving places on the upper row until it is acyclic.
///
/// Gives up after the configured number of attempts and drops the edges
/// that close the remaining cycles.
pub fn resolve_cycles(
    placement: &mut Placement,
    routing: &Routing,
    channel: usize,
    config: &PnrConfig,
) -> Vcg {
    let mpd = config.min_port_distance;
    for _ in 0..config.max_cycle_iterations {
        let vcg = Vcg::build(placement, routing, channel, config);
        let Some((start, last)) = vcg.find_cycle() else {
            return vcg;
        };
        let (a, b) = (vcg.nodes[start], vcg.nodes[last]);
        let Some((mover, other)) = conflict(placement, routing, a, b, mpd) else {
            log::warn!("no conflicting ports close the cycle in channel {channel}");
            return drop_cycles(vcg, channel);
        };
        let this = routing.port_x(placement, mover);
        let that = routing.port_x(placement, other);
        let diff = if this < that {
            (that - this) + mpd
        } else {
            mpd - (this - that)
        };
        let place = routing.ports[mover].place;
        let row = placement.places[place].row;
        let Some(index) = placement.index_in_row(place) else {
            return drop_cycles(vcg, channel);
        };
        log::debug!(
            "channel {channel}: moving {} by {diff} to break a cycle",
            placement.places[place].name
        );
        placement.shift_from(row, index, diff);
    }
    let vcg = Vcg::build(placement, routing, channel, config);
    if vcg.is_acyclic() {
        vcg
    } else {
        log::warn!(
            "channel {channel}: cycles remain after {} attempts",
            config.max_cycle_iterations
        );
        drop_cycles(vcg, channel)
    }
}

fn drop_cycles(mut vcg: Vcg, channel: usize) -> Vcg {
    while let Some((start, last)) = vcg.find_cycle() {
        log::warn!("channel {channel}: dropping constraint {last} -> {start}");
        vcg.edges[last].retain(|&c| c != start);
    }
    vcg.compute_roots();
    vcg
}

/// Adds power ties on the row below and ground ties on the row above `channel`.
///
/// A tie joins a leaf port connected to a supply net to the supply port of
/// the same instance. Power ties take tracks below every node whose widened
/// span covers the supply port, ground ties above.
pub fn add_ties(
    cell: &Cell,
    placement: &Placement,
    routing: &mut Routing,
    vcg: &mut Vcg,
    channel: usize,
    config: &PnrConfig,
) {
    let mpd = config.min_port_distance;
    let existing = vcg.nodes.len();
    let mut spans = Vec::with_capacity(existing);
    for &n in vcg.nodes.iter() {
        spans.push(routing.extent(placement, n).unwrap_or_default());
    }

    let mut sides = Vec::new();
    if channel > 0 {
        sides.push((channel - 1, POWER, PortRole::Power, Tie::Power));
    }
    if channel < placement.num_rows() {
        sides.push((channel, GROUND, PortRole::Ground, Tie::Ground));
    }
    for (row, net, role, tie) in sides {
        for &place in placement.rows[row].iter() {
            let p = &placement.places[place];
            let (InstanceKind::Leaf, Some(id)) = (p.kind, p.inst) else {
                continue;
            };
            let inst = &cell.instances[id];
            for (port, signal) in inst.signal_ports() {
                if signal.net != Some(net) {
                    continue;
                }
                let Some(supply) = inst.supply_port(role) else {
                    log::warn!(
                        "{} ties {} to {:?} but has no such supply port",
                        inst.name,
                        signal.name,
                        role
                    );
                    continue;
                };
                let mut tie_port = |r: usize| {
                    let q = &inst.ports[r];
                    routing.push_port(RoutePort {
                        place,
                        xoff: q.xoff,
                        dir: q.dir,
                        net,
                        port: Some(PortRef::new(id, r)),
                        seen: true,
                    })
                };
                let a = tie_port(port);
                let b = tie_port(supply);
                routing.nodes.push(ChannelNode {
                    net,
                    channel,
                    ports: vec![a, b],
                    same_next: None,
                    same_last: None,
                    tie: Some(tie),
                });
                let node = routing.nodes.len() - 1;
                routing.channels[channel].nodes.push(node);
                let local = vcg.add_node(node);

                let x = routing.port_x(placement, b);
                for (j, &(first, last)) in spans.iter().enumerate() {
                    if first - mpd < x && x < last + mpd {
                        match tie {
                            Tie::Power => vcg.edges[local].push(j),
                            Tie::Ground => vcg.edges[j].push(local),
                        }
                    }
                }
            }
        }
    }
    vcg.compute_roots();
}
