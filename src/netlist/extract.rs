use std::collections::HashMap;

use super::{
    Cell, InstanceKind, Net, NetId, PortRef, PortRole, GROUND, GROUND_INST, POWER, POWER_INST,
};

/// Disjoint sets over every port slot of a cell.
struct PortSets {
    parent: Vec<usize>,
    offsets: Vec<usize>,
}

impl PortSets {
    fn new(cell: &Cell) -> Self {
        let mut offsets = Vec::with_capacity(cell.instances.len());
        let mut total = 0;
        for inst in cell.instances.iter() {
            offsets.push(total);
            total += inst.ports.len();
        }
        Self {
            parent: (0..total).collect(),
            offsets,
        }
    }

    #[inline]
    fn slot(&self, r: PortRef) -> usize {
        self.offsets[r.inst] + r.port
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Keep the smaller slot as root so results do not depend on connection order.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Resolves declared connections into extracted nets.
///
/// Net 0 collects everything tied to the ground special, net 1 everything
/// tied to the power special, along with the supply-role ports of leaf
/// instances. Remaining groups become ordinary nets in order of first
/// appearance. Nets carrying an export are named after it; other nets get
/// generic `nK` names.
pub fn extract(cell: &mut Cell) {
    let mut sets = PortSets::new(cell);
    for c in cell.connections.iter() {
        let (a, b) = (sets.slot(c.a), sets.slot(c.b));
        sets.union(a, b);
    }
    let ground_root = sets.find(sets.slot(PortRef::new(GROUND_INST, 0)));
    let power_root = sets.find(sets.slot(PortRef::new(POWER_INST, 0)));

    let mut nets = vec![
        Net::named(arcstr::literal!("ground")),
        Net::named(arcstr::literal!("power")),
    ];
    let mut by_root: HashMap<usize, NetId> = HashMap::new();
    by_root.insert(ground_root, GROUND);
    by_root.insert(power_root, POWER);

    for (id, inst) in cell.instances.iter_mut().enumerate() {
        if id == GROUND_INST || id == POWER_INST {
            inst.ports[0].net = Some(if id == GROUND_INST { GROUND } else { POWER });
            continue;
        }
        let leaf = inst.kind == InstanceKind::Leaf;
        for (port, p) in inst.ports.iter_mut().enumerate() {
            let r = PortRef::new(id, port);
            let net = match p.role {
                PortRole::Ground if leaf => GROUND,
                PortRole::Power if leaf => POWER,
                _ => {
                    let root = sets.find(sets.offsets[id] + port);
                    *by_root.entry(root).or_insert_with(|| {
                        nets.push(Net::default());
                        nets.len() - 1
                    })
                }
            };
            p.net = Some(net);
            nets[net].ports.push(r);
        }
    }

    for export in cell.exports.iter() {
        if let Some(net) = cell.instances[export.inst].ports[0].net {
            if net >= 2 && nets[net].name.is_none() {
                nets[net].name = Some(export.name.clone());
            }
        }
    }

    log::debug!(
        "extracted {} nets from {} connections in cell {}",
        nets.len(),
        cell.connections.len(),
        cell.name
    );
    cell.nets = nets;
    cell.name_unnamed_nets();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::{instantiate, PortRole};
    use crate::tests::leaf_library;

    fn leaf(cell: &mut Cell, name: &str, ty: &str) -> usize {
        let inst = instantiate(name.into(), ty, &[], &leaf_library()).unwrap();
        cell.push_instance(inst)
    }

    #[test]
    fn partitions_ports_by_connectivity() {
        let mut cell = Cell::new("top");
        let a = leaf(&mut cell, "a", "inv");
        let b = leaf(&mut cell, "b", "inv");
        let c = leaf(&mut cell, "c", "inv");
        // a.y -> b.a, b.y -> c.a, c.y unconnected
        cell.connect(PortRef::new(a, 1), PortRef::new(b, 0));
        cell.connect(PortRef::new(b, 1), PortRef::new(c, 0));
        cell.connect(PortRef::new(a, 0), PortRef::new(GROUND_INST, 0));
        extract(&mut cell);

        assert_eq!(cell.net_of(PortRef::new(a, 0)), Some(GROUND));
        let ab = cell.net_of(PortRef::new(a, 1)).unwrap();
        assert_eq!(cell.net_of(PortRef::new(b, 0)), Some(ab));
        let bc = cell.net_of(PortRef::new(b, 1)).unwrap();
        assert_eq!(cell.net_of(PortRef::new(c, 0)), Some(bc));
        assert_ne!(ab, bc);
        let cy = cell.net_of(PortRef::new(c, 1)).unwrap();
        assert!(cy != ab && cy != bc && cy >= 2);

        // every port is listed in exactly one net
        for (id, inst) in cell.instances.iter().enumerate().skip(2) {
            for port in 0..inst.ports.len() {
                let r = PortRef::new(id, port);
                let holders = cell.nets.iter().filter(|n| n.ports.contains(&r)).count();
                assert_eq!(holders, 1);
            }
        }
    }

    #[test]
    fn supply_role_ports_join_supply_nets() {
        let mut cell = Cell::new("top");
        let a = leaf(&mut cell, "a", "inv");
        extract(&mut cell);
        let inst = &cell.instances[a];
        let vdd = inst.supply_port(PortRole::Power).unwrap();
        let vss = inst.supply_port(PortRole::Ground).unwrap();
        assert_eq!(inst.ports[vdd].net, Some(POWER));
        assert_eq!(inst.ports[vss].net, Some(GROUND));
        assert!(cell.nets[POWER].ports.contains(&PortRef::new(a, vdd)));
    }

    #[test]
    fn exports_name_their_nets() {
        let mut cell = Cell::new("top");
        let a = leaf(&mut cell, "a", "inv");
        let b = leaf(&mut cell, "b", "inv");
        cell.connect(PortRef::new(a, 1), PortRef::new(b, 0));
        cell.add_export(PortRef::new(b, 1), "out".into(), PortRole::Output);
        extract(&mut cell);

        assert_eq!(cell.nets[cell.net_of(PortRef::new(b, 1)).unwrap()].name(), "out");
        assert_eq!(cell.nets[cell.net_of(PortRef::new(a, 0)).unwrap()].name(), "n2");
        assert_eq!(cell.nets[cell.net_of(PortRef::new(a, 1)).unwrap()].name(), "n3");
    }
}
