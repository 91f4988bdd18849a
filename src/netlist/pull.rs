use std::collections::HashSet;

use super::extract::extract;
use super::{
    Cell, InstId, InstanceKind, Library, Net, NetId, PortRef, GROUND, GROUND_INST, POWER,
    POWER_INST,
};
use crate::error::{Error, Result};

/// Flattens every COMPLEX instance of `cell`, recursively.
///
/// `cells` holds the cells that complex instances may refer to; `cell`
/// itself must not be among them.
pub fn pull(cell: &mut Cell, cells: &[Cell]) -> Result<()> {
    if !cell.is_extracted() {
        extract(cell);
    }

    let mut pulled = HashSet::new();
    while let Some(ci) = cell
        .instances
        .iter()
        .enumerate()
        .find(|(id, inst)| inst.kind == InstanceKind::Complex && !pulled.contains(id))
        .map(|(id, _)| id)
    {
        pulled.insert(ci);
        let proto = cell.instances[ci]
            .proto
            .clone()
            .ok_or_else(|| Error::UnknownCell(cell.instances[ci].name.clone()))?;
        let sub = cells
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&proto))
            .ok_or_else(|| Error::UnknownCell(proto.clone()))?;
        if sub.is_extracted() {
            inline(cell, ci, sub)?;
        } else {
            log::warn!("cell {} has not been extracted, extracting a copy", sub.name);
            let mut sub = sub.clone();
            extract(&mut sub);
            inline(cell, ci, &sub)?;
        }
    }

    if !pulled.is_empty() {
        remove_complex(cell);
        cell.name_unnamed_nets();
        rebuild_connections(cell);
        log::info!(
            "pulled {} complex instances into cell {}",
            pulled.len(),
            cell.name
        );
    }
    Ok(())
}

/// Pulls the cell at `idx`, resolving complex instances against the other cells.
pub fn pull_cell(lib: &mut Library, idx: usize) -> Result<()> {
    let mut cell = lib.cells.remove(idx);
    let res = pull(&mut cell, &lib.cells);
    lib.cells.insert(idx, cell);
    res
}

/// Copies the contents of `sub` into `cell` in place of instance `ci`.
fn inline(cell: &mut Cell, ci: InstId, sub: &Cell) -> Result<()> {
    let mut net_map: Vec<Option<NetId>> = vec![None; sub.nets.len()];
    net_map[GROUND] = Some(GROUND);
    net_map[POWER] = Some(POWER);

    for (j, export) in sub.exports.iter().enumerate() {
        let (Some(sn), Some(pn)) = (
            sub.export_net(export),
            cell.instances[ci].ports.get(j).and_then(|p| p.net),
        ) else {
            continue;
        };
        // exports sharing a sub-cell net short their parent nets together
        match net_map[sn] {
            None => net_map[sn] = Some(pn),
            Some(keep) => {
                let Some((keep, gone)) = merge_nets(cell, keep, pn) else {
                    continue;
                };
                for mapped in net_map.iter_mut() {
                    if *mapped == Some(gone) {
                        *mapped = Some(keep);
                    }
                }
            }
        }
    }
    for mapped in net_map.iter_mut().skip(2) {
        if mapped.is_none() {
            cell.nets.push(Net::default());
            *mapped = Some(cell.nets.len() - 1);
        }
    }

    let prefix = cell.instances[ci].name.clone();
    for (id, inst) in sub.instances.iter().enumerate() {
        if id == GROUND_INST || id == POWER_INST || inst.kind == InstanceKind::Special {
            continue;
        }
        let name: arcstr::ArcStr = format!("{}.{}", prefix, inst.name).into();
        if cell.find_instance(&name).is_some() {
            return Err(Error::DuplicateInstance(name));
        }
        let mut copy = inst.clone();
        copy.name = name;
        for port in copy.ports.iter_mut() {
            port.net = port.net.and_then(|n| net_map[n]);
        }
        let new_id = cell.push_instance(copy);
        for (port, p) in cell.instances[new_id].ports.iter().enumerate() {
            if let Some(n) = p.net {
                cell.nets[n].ports.push(PortRef::new(new_id, port));
            }
        }
    }

    for net in cell.nets.iter_mut() {
        net.ports.retain(|r| r.inst != ci);
    }
    Ok(())
}

/// Moves the ports of one net onto the other, keeping a supply net if either is one.
///
/// Returns the surviving and the emptied net, or `None` when nothing moved.
fn merge_nets(cell: &mut Cell, a: NetId, b: NetId) -> Option<(NetId, NetId)> {
    if a == b {
        return None;
    }
    if a < 2 && b < 2 {
        log::error!("cell {} shorts power to ground", cell.name);
        return None;
    }
    let (keep, gone) = if b < 2 { (b, a) } else { (a, b) };
    let ports = std::mem::take(&mut cell.nets[gone].ports);
    for &r in ports.iter() {
        cell.instances[r.inst].ports[r.port].net = Some(keep);
    }
    cell.nets[keep].ports.extend(ports);
    if cell.nets[keep].name.is_none() {
        cell.nets[keep].name = cell.nets[gone].name.take();
    }
    Some((keep, gone))
}

/// Drops complex instances and empty ordinary nets, compacting indices.
fn remove_complex(cell: &mut Cell) {
    let mut inst_map: Vec<Option<InstId>> = Vec::with_capacity(cell.instances.len());
    let mut next = 0;
    for inst in cell.instances.iter() {
        if inst.kind == InstanceKind::Complex {
            inst_map.push(None);
        } else {
            inst_map.push(Some(next));
            next += 1;
        }
    }
    cell.instances.retain(|i| i.kind != InstanceKind::Complex);
    for export in cell.exports.iter_mut() {
        if let Some(id) = inst_map[export.inst] {
            export.inst = id;
        }
    }

    let mut net_map: Vec<Option<NetId>> = Vec::with_capacity(cell.nets.len());
    let mut nets = Vec::with_capacity(cell.nets.len());
    for (id, mut net) in std::mem::take(&mut cell.nets).into_iter().enumerate() {
        net.ports = net
            .ports
            .iter()
            .filter_map(|r| inst_map[r.inst].map(|inst| PortRef::new(inst, r.port)))
            .collect();
        if id >= 2 && net.ports.is_empty() {
            net_map.push(None);
        } else {
            net_map.push(Some(nets.len()));
            nets.push(net);
        }
    }
    cell.nets = nets;
    for inst in cell.instances.iter_mut() {
        for port in inst.ports.iter_mut() {
            port.net = port.net.and_then(|n| net_map[n]);
        }
    }
}

/// Regenerates the declared connections so that extraction reproduces the nets.
fn rebuild_connections(cell: &mut Cell) {
    let mut connections = Vec::new();
    for (id, net) in cell.nets.iter().enumerate() {
        if id == GROUND || id == POWER {
            let special = PortRef::new(if id == GROUND { GROUND_INST } else { POWER_INST }, 0);
            for &r in net.ports.iter() {
                let inst = &cell.instances[r.inst];
                let supply = inst.ports[r.port].role.is_supply() && inst.kind == InstanceKind::Leaf;
                if !supply {
                    connections.push((r, special));
                }
            }
        } else if let Some((&first, rest)) = net.ports.split_first() {
            for &r in rest {
                connections.push((first, r));
            }
        }
    }
    cell.connections.clear();
    for (a, b) in connections {
        cell.connect(a, b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::{extract::extract, instantiate, PortRole};
    use crate::tests::leaf_library;

    /// `buf` = two inverters in series, exporting `in` and `out`.
    fn buffer_cell() -> Cell {
        let leaves = leaf_library();
        let mut cell = Cell::new("buf");
        let i0 = cell.push_instance(instantiate("i0".into(), "inv", &[], &leaves).unwrap());
        let i1 = cell.push_instance(instantiate("i1".into(), "inv", &[], &leaves).unwrap());
        cell.connect(PortRef::new(i0, 1), PortRef::new(i1, 0));
        cell.add_export(PortRef::new(i0, 0), "in".into(), PortRole::Input);
        cell.add_export(PortRef::new(i1, 1), "out".into(), PortRole::Output);
        extract(&mut cell);
        cell
    }

    #[test]
    fn flattens_complex_instances() {
        let leaves = leaf_library();
        let buf = buffer_cell();
        let cells = vec![buf];

        let mut top = Cell::new("top");
        let u0 = top.push_instance(instantiate("u0".into(), "buf", &cells, &leaves).unwrap());
        let u1 = top.push_instance(instantiate("u1".into(), "buf", &cells, &leaves).unwrap());
        top.connect(PortRef::new(u0, 1), PortRef::new(u1, 0));
        top.add_export(PortRef::new(u1, 1), "z".into(), PortRole::Output);
        extract(&mut top);
        pull(&mut top, &cells).unwrap();

        assert!(top
            .instances
            .iter()
            .all(|i| i.kind != InstanceKind::Complex));
        let u0i1 = top.find_instance("u0.i1").unwrap();
        let u1i0 = top.find_instance("u1.i0").unwrap();
        let u1i1 = top.find_instance("u1.i1").unwrap();
        assert_eq!(
            top.net_of(PortRef::new(u0i1, 1)),
            top.net_of(PortRef::new(u1i0, 0))
        );
        let z = top.net_of(PortRef::new(u1i1, 1)).unwrap();
        assert_eq!(top.nets[z].name(), "z");

        // no net refers to a removed instance, and nets survive a re-extraction
        for net in top.nets.iter() {
            for r in net.ports.iter() {
                assert!(r.inst < top.instances.len());
            }
        }
        let before: Vec<_> = (0..top.instances.len())
            .flat_map(|i| (0..top.instances[i].ports.len()).map(move |p| (i, p)))
            .map(|(i, p)| top.net_of(PortRef::new(i, p)))
            .collect();
        let mut again = top.clone();
        extract(&mut again);
        let after: Vec<_> = (0..again.instances.len())
            .flat_map(|i| (0..again.instances[i].ports.len()).map(move |p| (i, p)))
            .map(|(i, p)| again.net_of(PortRef::new(i, p)))
            .collect();
        assert_eq!(before.len(), after.len());
        for (i, x) in before.iter().enumerate() {
            for (j, y) in before.iter().enumerate() {
                assert_eq!(x == y, after[i] == after[j]);
            }
        }
    }

    #[test]
    fn shared_export_nets_are_merged() {
        let leaves = leaf_library();
        let mut tee = Cell::new("tee");
        let i0 = tee.push_instance(instantiate("i0".into(), "inv", &[], &leaves).unwrap());
        let i1 = tee.push_instance(instantiate("i1".into(), "inv", &[], &leaves).unwrap());
        tee.connect(PortRef::new(i0, 1), PortRef::new(i1, 0));
        tee.connect(PortRef::new(i0, 0), PortRef::new(GROUND_INST, 0));
        tee.add_export(PortRef::new(i0, 1), "p".into(), PortRole::Output);
        tee.add_export(PortRef::new(i1, 0), "q".into(), PortRole::Input);
        tee.add_export(PortRef::new(i0, 0), "g".into(), PortRole::Input);
        extract(&mut tee);
        let cells = vec![tee];

        let mut top = Cell::new("top");
        let a = top.push_instance(instantiate("A".into(), "drv", &cells, &leaves).unwrap());
        let b = top.push_instance(instantiate("B".into(), "rcv", &cells, &leaves).unwrap());
        let c = top.push_instance(instantiate("C".into(), "drv", &cells, &leaves).unwrap());
        let u0 = top.push_instance(instantiate("u0".into(), "tee", &cells, &leaves).unwrap());
        top.connect(PortRef::new(a, 0), PortRef::new(u0, 0));
        top.connect(PortRef::new(b, 0), PortRef::new(u0, 1));
        top.connect(PortRef::new(c, 0), PortRef::new(u0, 2));
        extract(&mut top);
        assert_ne!(
            top.net_of(PortRef::new(a, 0)),
            top.net_of(PortRef::new(b, 0))
        );
        pull(&mut top, &cells).unwrap();

        let a = top.find_instance("A").unwrap();
        let b = top.find_instance("B").unwrap();
        let c = top.find_instance("C").unwrap();
        let i0 = top.find_instance("u0.i0").unwrap();
        let net = top.net_of(PortRef::new(a, 0));
        assert!(net.is_some());
        assert_eq!(top.net_of(PortRef::new(b, 0)), net);
        assert_eq!(top.net_of(PortRef::new(i0, 1)), net);
        // an export on the ground net takes the parent net along
        assert_eq!(top.net_of(PortRef::new(c, 0)), Some(GROUND));
        assert!(top.nets[GROUND].ports.contains(&PortRef::new(c, 0)));
    }

    #[test]
    fn name_collision_is_an_error() {
        let leaves = leaf_library();
        let cells = vec![buffer_cell()];
        let mut top = Cell::new("top");
        top.push_instance(instantiate("u0".into(), "buf", &cells, &leaves).unwrap());
        top.push_instance(instantiate("u0.i0".into(), "inv", &cells, &leaves).unwrap());
        extract(&mut top);
        assert!(matches!(
            pull(&mut top, &cells),
            Err(Error::DuplicateInstance(_))
        ));
    }
}
