//! Emission plan for a geometry writer.
//!
//! Flattens a placement and its routing into rows of positioned instances
//! and channels of spaced tracks, each track listing the vias it drops to
//! the rows above and below.

use arcstr::ArcStr;
use serde::Serialize;

use crate::config::PnrConfig;
use crate::netlist::{Cell, InstanceKind};
use crate::place::Placement;
use crate::route::{PortId, Routing, Side, Tie};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub cell: ArcStr,
    pub rows: Vec<LayoutRow>,
    pub channels: Vec<LayoutChannel>,
    pub exports: Vec<LayoutExport>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LayoutRow {
    pub number: usize,
    pub instances: Vec<LayoutInstance>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LayoutInstance {
    pub name: ArcStr,
    pub kind: InstanceKind,
    pub x: i64,
    pub width: i64,
    pub mirrored: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LayoutChannel {
    pub number: usize,
    pub height: i64,
    pub tracks: Vec<LayoutTrack>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LayoutTrack {
    /// Offset from the bottom of the channel.
    pub y: i64,
    pub nodes: Vec<LayoutNode>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LayoutNode {
    pub net: ArcStr,
    pub tie: Option<Tie>,
    pub vias: Vec<Via>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ViaFlags {
    /// The via lands on a supply port.
    pub power: bool,
    /// The via lands on the port an export leaves through.
    pub export: bool,
    /// Draw a wide node instead of a via.
    pub special: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Via {
    pub x: i64,
    pub instance: ArcStr,
    pub port: ArcStr,
    pub flags: ViaFlags,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LayoutExport {
    pub name: ArcStr,
    pub net: Option<ArcStr>,
    pub channel: Option<usize>,
    pub x: Option<i64>,
    pub side: Option<Side>,
}

/// Builds the emission plan of a placed and routed cell.
pub fn plan(cell: &Cell, placement: &Placement, routing: &Routing, config: &PnrConfig) -> Layout {
    let rows = placement
        .rows
        .iter()
        .enumerate()
        .map(|(number, row)| LayoutRow {
            number,
            instances: row
                .iter()
                .map(|&p| &placement.places[p])
                .filter(|p| {
                    matches!(
                        p.kind,
                        InstanceKind::Leaf | InstanceKind::Feed | InstanceKind::LateralFeed
                    )
                })
                .map(|p| LayoutInstance {
                    name: p.name.clone(),
                    kind: p.kind,
                    x: p.x,
                    width: p.size,
                    mirrored: p.mirrored(),
                })
                .collect(),
        })
        .collect();

    let channels = routing
        .channels
        .iter()
        .map(|channel| {
            let tracks: Vec<Vec<LayoutNode>> = channel
                .tracks
                .iter()
                .map(|track| {
                    track
                        .iter()
                        .map(|&n| {
                            let node = &routing.nodes[n];
                            let mut vias: Vec<Via> = node
                                .ports
                                .iter()
                                .map(|&p| via(cell, placement, routing, p))
                                .collect();
                            vias.sort_by_key(|v| v.x);
                            mark_special(&mut vias, config);
                            LayoutNode {
                                net: net_name(cell, node.net),
                                tie: node.tie,
                                vias,
                            }
                        })
                        .collect()
                })
                .collect();
            let xs: Vec<Vec<i64>> = tracks
                .iter()
                .map(|t| t.iter().flat_map(|n| n.vias.iter().map(|v| v.x)).collect())
                .collect();
            let (ys, height) = track_offsets(&xs, config);
            log::debug!(
                "channel {} is {height} high with {} tracks",
                channel.number,
                ys.len()
            );
            LayoutChannel {
                number: channel.number,
                height,
                tracks: ys
                    .into_iter()
                    .zip(tracks)
                    .map(|(y, nodes)| LayoutTrack { y, nodes })
                    .collect(),
            }
        })
        .collect();

    let exports = routing
        .exports
        .iter()
        .map(|e| LayoutExport {
            name: e.name.clone(),
            net: e.net.map(|n| net_name(cell, n)),
            channel: e.channel,
            x: e.port.map(|p| routing.port_x(placement, p)),
            side: e.side,
        })
        .collect();

    Layout {
        cell: cell.name.clone(),
        rows,
        channels,
        exports,
    }
}

fn net_name(cell: &Cell, net: usize) -> ArcStr {
    cell.nets
        .get(net)
        .and_then(|n| n.name.clone())
        .unwrap_or_else(|| arcstr::format!("n{net}"))
}

fn via(cell: &Cell, placement: &Placement, routing: &Routing, port: PortId) -> Via {
    let p = &routing.ports[port];
    let place = &placement.places[p.place];
    let (name, power) = match p.port {
        Some(r) => {
            let q = &cell.instances[r.inst].ports[r.port];
            (q.name.clone(), q.role.is_supply())
        }
        None => (place.name.clone(), false),
    };
    Via {
        x: routing.port_x(placement, port),
        instance: place.name.clone(),
        port: name,
        flags: ViaFlags {
            power,
            export: routing.exports.iter().any(|e| e.port == Some(port)),
            special: false,
        },
    }
}

/// Flags vias too close to the next signal via for two separate cuts.
///
/// An export via keeps its cut and the following via becomes the wide node.
fn mark_special(vias: &mut [Via], config: &PnrConfig) {
    let limit = config.via_size + config.min_metal_spacing;
    for i in 0..vias.len() {
        if vias[i].flags.power {
            continue;
        }
        let Some(j) = (i + 1..vias.len()).find(|&j| !vias[j].flags.power) else {
            break;
        };
        if vias[j].x - vias[i].x < limit {
            if vias[i].flags.export {
                vias[j].flags.special = true;
            } else {
                vias[i].flags.special = true;
            }
        }
    }
}

/// Y offset of each track and the resulting channel height.
///
/// `tracks` holds the via positions of each track, bottom track first.
fn track_offsets(tracks: &[Vec<i64>], config: &PnrConfig) -> (Vec<i64>, i64) {
    let wide = config.max_track_to_track();
    let mut ys = Vec::with_capacity(tracks.len());
    let mut y = config.row_to_track();
    for (t, xs) in tracks.iter().enumerate() {
        if t > 0 {
            let close = tracks[t - 1]
                .iter()
                .any(|a| xs.iter().any(|b| (a - b).abs() < wide));
            y += if close {
                wide
            } else {
                config.min_track_to_track()
            };
        }
        ys.push(y);
    }
    let height = match ys.last() {
        Some(&last) => last + config.row_to_track(),
        None => 0,
    };
    (ys, height)
}
