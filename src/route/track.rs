use crate::config::PnrConfig;
use crate::netlist::Cell;
use crate::place::Placement;

use super::vcg::{add_ties, resolve_cycles, Vcg};
use super::zrg::Zones;
use super::Routing;

/// Packs the nodes of a graph into tracks, bottom track first.
///
/// Each track starts from the ready node with the longest constraint chain
/// and is filled with the widest ready nodes that share no zone with what
/// the track already holds. Returns local node indices.
pub fn assign_tracks(vcg: &Vcg, zones: &Zones, spans: &[(i64, i64)]) -> Vec<Vec<usize>> {
    let n = vcg.nodes.len();
    let parents = vcg.parents();
    let lengths = vcg.path_lengths();
    let mut assigned = vec![false; n];
    let mut top: Vec<usize> = vcg.roots.clone();
    let mut tracks = Vec::new();

    while !top.is_empty() {
        let mut longest = top[0];
        for &t in top.iter().skip(1) {
            if lengths[t] > lengths[longest] {
                longest = t;
            }
        }

        let mut unusable = vec![false; n];
        let mut track = Vec::new();
        let take = |node: usize, track: &mut Vec<usize>, unusable: &mut [bool]| {
            track.push(node);
            for &z in zones.member_of[node].iter() {
                for &m in zones.zones[z].iter() {
                    unusable[m] = true;
                }
            }
            unusable[node] = true;
        };
        take(longest, &mut track, &mut unusable);
        loop {
            let mut best: Option<usize> = None;
            for &t in top.iter() {
                if unusable[t] {
                    continue;
                }
                let width = spans[t].1 - spans[t].0;
                if best.map_or(true, |b| width >= spans[b].1 - spans[b].0) {
                    best = Some(t);
                }
            }
            match best {
                Some(b) => take(b, &mut track, &mut unusable),
                None => break,
            }
        }

        for &t in track.iter() {
            assigned[t] = true;
        }
        top.retain(|t| !assigned[*t]);
        for &t in track.iter() {
            for &c in vcg.edges[t].iter() {
                if !assigned[c] && !top.contains(&c) && parents[c].iter().all(|&p| assigned[p]) {
                    top.push(c);
                }
            }
        }
        track.sort_by_key(|&t| spans[t].0);
        tracks.push(track);
    }
    tracks
}

/// Builds the tracks of every channel.
pub fn assemble(cell: &Cell, placement: &mut Placement, routing: &mut Routing, config: &PnrConfig) {
    for channel in 0..routing.channels.len() {
        let mut vcg = resolve_cycles(placement, routing, channel, config);
        add_ties(cell, placement, routing, &mut vcg, channel, config);

        let spans: Vec<(i64, i64)> = vcg
            .nodes
            .iter()
            .map(|&n| routing.extent(placement, n).unwrap_or_default())
            .collect();
        let zones = Zones::build(&spans, config.min_port_distance);
        let tracks = assign_tracks(&vcg, &zones, &spans);
        log::info!(
            "channel {channel}: {} nodes in {} tracks",
            vcg.nodes.len(),
            tracks.len()
        );
        let ch = &mut routing.channels[channel];
        ch.tracks = tracks
            .into_iter()
            .map(|t| t.into_iter().map(|i| vcg.nodes[i]).collect())
            .collect();
        ch.constraints = vcg
            .edges
            .iter()
            .enumerate()
            .flat_map(|(a, children)| children.iter().map(move |&b| (a, b)))
            .map(|(a, b)| (vcg.nodes[a], vcg.nodes[b]))
            .collect();
    }
    routing.sort_ports(placement);
}
