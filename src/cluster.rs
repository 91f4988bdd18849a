//! Binary cluster tree over leaf instances.
//!
//! Leaves are paired bottom-up by shared connectivity, then the tree is
//! reordered by mirroring subtrees whenever that lowers the estimated
//! wiring cost of the resulting in-order sequence.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::config::PnrConfig;
use crate::error::{Error, Result};
use crate::netlist::{Cell, InstId, LeafLibrary, NetId};

pub type ClusterId = usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClusterNode {
    Leaf { inst: InstId, size: i64 },
    Internal { left: ClusterId, right: ClusterId },
}

/// Size figures shared by clustering and placement.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    pub num_rows: usize,
    /// Total width of all leaf instances.
    pub size_inst: i64,
    /// Target width of a row.
    pub size_rows: i64,
    pub avg_size: i64,
    pub avg_height: i64,
}

#[derive(Clone, Debug)]
pub struct ClusterTree {
    pub nodes: Vec<ClusterNode>,
    pub root: ClusterId,
    pub stats: ClusterStats,
}

/// Inputs to the tree cost that do not change while sorting.
pub(crate) struct CostModel {
    /// Ordinary nets and port offsets of each leaf instance, by instance id.
    ports: HashMap<InstId, Vec<(NetId, i64)>>,
    /// Exported nets that may only leave upward (`true`) or downward.
    exports: Vec<(NetId, bool)>,
    num_nets: usize,
    stats: ClusterStats,
    vertical_cost: i64,
}

impl CostModel {
    pub(crate) fn new(cell: &Cell, stats: ClusterStats, config: &PnrConfig) -> Self {
        let ports = cell
            .leaf_instances()
            .map(|id| {
                let nets = cell.instances[id]
                    .ports
                    .iter()
                    .filter_map(|p| p.net.filter(|&n| n >= 2).map(|n| (n, p.xoff)))
                    .collect();
                (id, nets)
            })
            .collect();
        let exports = cell
            .exports
            .iter()
            .filter_map(|e| {
                let net = cell.export_net(e).filter(|&n| n >= 2)?;
                if e.dir.is_up_only() {
                    Some((net, true))
                } else if e.dir.is_down_only() {
                    Some((net, false))
                } else {
                    None
                }
            })
            .collect();
        Self {
            ports,
            exports,
            num_nets: cell.nets.len(),
            stats,
            vertical_cost: config.vertical_cost,
        }
    }

    pub(crate) fn leaf_ports(&self, inst: InstId) -> &[(NetId, i64)] {
        self.ports.get(&inst).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Cost of placing leaves in `order`, each at the running sum of prior widths.
    pub(crate) fn sequence_cost(&self, order: impl Iterator<Item = (InstId, i64)>) -> i64 {
        let mut extent: Vec<Option<(i64, i64)>> = vec![None; self.num_nets];
        let mut x = 0;
        for (inst, size) in order {
            for &(net, xoff) in self.leaf_ports(inst) {
                let pos = x + xoff;
                extent[net] = Some(match extent[net] {
                    None => (pos, pos),
                    Some((lo, hi)) => (lo.min(pos), hi.max(pos)),
                });
            }
            x += size;
        }

        let mut cost: i64 = extent.iter().flatten().map(|(lo, hi)| hi - lo).sum();
        let stats = &self.stats;
        let size_rows = stats.size_rows.max(1);
        let rows = stats.num_rows as i64;
        for &(net, up) in self.exports.iter() {
            let Some((lo, hi)) = extent[net] else {
                continue;
            };
            if up {
                let row = hi / size_rows;
                if row + 1 < rows {
                    cost += (rows - row - 1) * stats.avg_height * self.vertical_cost;
                }
            } else {
                let row = lo / size_rows;
                cost += row * stats.avg_height * self.vertical_cost;
            }
        }
        cost
    }
}

#[derive(Copy, Clone, Debug)]
struct Pair {
    a: usize,
    b: usize,
    count: usize,
}

impl ClusterTree {
    /// Builds and optionally sorts the cluster tree for the leaf instances of `cell`.
    pub fn build(cell: &Cell, leaves: &LeafLibrary, config: &PnrConfig) -> Result<Self> {
        let insts: Vec<InstId> = cell.leaf_instances().collect();
        if insts.is_empty() {
            return Err(Error::NoLeafInstances(cell.name.clone()));
        }
        let num = insts.len() as i64;
        let mut nodes = Vec::with_capacity(2 * insts.len());
        let mut size_inst = 0;
        let mut height = 0;
        for &inst in insts.iter() {
            let size = cell.instances[inst].size;
            size_inst += size;
            height += cell.instances[inst]
                .proto
                .as_deref()
                .and_then(|p| leaves.find(p))
                .map(|l| l.height)
                .unwrap_or_default();
            nodes.push(ClusterNode::Leaf { inst, size });
        }
        let num_rows = config.num_rows.clamp(1, insts.len());
        let stats = ClusterStats {
            num_rows,
            size_inst,
            size_rows: size_inst / num_rows as i64,
            avg_size: size_inst / num,
            avg_height: height / num,
        };

        let mut tree = Self {
            nodes,
            root: 0,
            stats,
        };
        let roots: Vec<ClusterId> = (0..insts.len()).collect();
        tree.root = tree.pair_all(cell, roots);
        log::info!(
            "built cluster tree of {} nodes over {} instances",
            tree.nodes.len(),
            insts.len()
        );

        if config.sort_clusters {
            let model = CostModel::new(cell, stats, config);
            tree.sort(&model);
        }
        Ok(tree)
    }

    fn pair_all(&mut self, cell: &Cell, mut roots: Vec<ClusterId>) -> ClusterId {
        while roots.len() > 1 {
            roots = self.pair_round(cell, &roots);
        }
        roots[0]
    }

    /// Ordinary nets reached by each port in the subtree of `id`.
    fn subtree_nets(&self, cell: &Cell, id: ClusterId, out: &mut Vec<NetId>) {
        match self.nodes[id] {
            ClusterNode::Leaf { inst, .. } => out.extend(
                cell.instances[inst]
                    .ports
                    .iter()
                    .filter_map(|p| p.net)
                    .filter(|&n| n >= 2),
            ),
            ClusterNode::Internal { left, right } => {
                self.subtree_nets(cell, left, out);
                self.subtree_nets(cell, right, out);
            }
        }
    }

    fn pair_round(&mut self, cell: &Cell, roots: &[ClusterId]) -> Vec<ClusterId> {
        let port_nets: Vec<Vec<NetId>> = roots
            .iter()
            .map(|&r| {
                let mut nets = Vec::new();
                self.subtree_nets(cell, r, &mut nets);
                nets
            })
            .collect();
        let net_sets: Vec<HashSet<NetId>> = port_nets
            .iter()
            .map(|n| n.iter().copied().collect())
            .collect();

        let mut pairs = Vec::new();
        for a in 0..roots.len() {
            for b in a + 1..roots.len() {
                let count = port_nets[b]
                    .iter()
                    .filter(|n| net_sets[a].contains(n))
                    .count();
                if count > 0 {
                    pairs.push(Pair { a, b, count });
                }
            }
        }
        pairs.sort_by(|x, y| y.count.cmp(&x.count));

        let mut placed = vec![false; roots.len()];
        let mut next = Vec::new();
        if pairs.is_empty() {
            pairs.push(Pair { a: 0, b: 1, count: 0 });
        }
        let mut idx = 0;
        while idx < pairs.len() {
            let p = pairs[idx];
            if placed[p.a] || placed[p.b] {
                idx += 1;
                continue;
            }
            let best = best_pair(&pairs, idx, &placed);
            let Pair { a, b, .. } = pairs.remove(best);
            placed[a] = true;
            placed[b] = true;
            self.nodes.push(ClusterNode::Internal {
                left: roots[a],
                right: roots[b],
            });
            next.push(self.nodes.len() - 1);
        }
        next.extend(
            roots
                .iter()
                .zip(placed.iter())
                .filter(|(_, &p)| !p)
                .map(|(&r, _)| r),
        );
        next
    }

    /// Leaf instances and widths in left-to-right order.
    pub fn in_order(&self) -> Vec<(InstId, i64)> {
        let mut out = Vec::with_capacity(self.nodes.len() / 2 + 1);
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            match self.nodes[id] {
                ClusterNode::Leaf { inst, size } => out.push((inst, size)),
                ClusterNode::Internal { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        out
    }

    pub(crate) fn cost(&self, model: &CostModel) -> i64 {
        model.sequence_cost(self.in_order().into_iter())
    }

    /// Swaps the children of every internal node under `id`, inclusive.
    fn mirror(&mut self, id: ClusterId) {
        if let ClusterNode::Internal { left, right } = self.nodes[id] {
            self.nodes[id] = ClusterNode::Internal {
                left: right,
                right: left,
            };
            self.mirror(left);
            self.mirror(right);
        }
    }

    fn internal_nodes(&self, id: ClusterId, preorder: bool, out: &mut Vec<ClusterId>) {
        if let ClusterNode::Internal { left, right } = self.nodes[id] {
            if preorder {
                out.push(id);
            }
            self.internal_nodes(left, preorder, out);
            self.internal_nodes(right, preorder, out);
            if !preorder {
                out.push(id);
            }
        }
    }

    /// One top-down and one bottom-up pass of trial mirrors, keeping strict improvements.
    fn sort(&mut self, model: &CostModel) {
        let mut best = self.cost(model);
        let start = best;
        for preorder in [true, false] {
            let mut order = Vec::new();
            self.internal_nodes(self.root, preorder, &mut order);
            for id in order {
                self.mirror(id);
                let cost = self.cost(model);
                if cost < best {
                    best = cost;
                } else {
                    self.mirror(id);
                }
            }
        }
        log::info!("cluster sort reduced cost from {start} to {best}");
    }
}

/// Among the pairs tied with `pairs[idx]`, picks one whose members are shared by the fewest ties.
fn best_pair(pairs: &[Pair], idx: usize, placed: &[bool]) -> usize {
    let count = pairs[idx].count;
    // member -> (occurrences, first pair index)
    let mut members: Vec<(usize, usize, usize)> = Vec::new();
    for (i, p) in pairs.iter().enumerate().skip(idx) {
        if p.count != count {
            break;
        }
        if placed[p.a] || placed[p.b] {
            continue;
        }
        for m in [p.a, p.b] {
            match members.iter_mut().find(|(id, _, _)| *id == m) {
                Some(entry) => entry.1 += 1,
                None => members.push((m, 1, i)),
            }
        }
    }
    let mut best = idx;
    let mut min = usize::MAX;
    for &(_, n, first) in members.iter() {
        if n <= min {
            min = n;
            best = first;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::parse::read_netlist;
    use crate::tests::{leaf_library, CHAIN_NETLIST, STAR_NETLIST};

    fn tree(text: &str, config: &PnrConfig) -> (Cell, ClusterTree) {
        let leaves = leaf_library();
        let lib = read_netlist(text, leaves.clone()).unwrap();
        let cell = lib.current_cell().unwrap().clone();
        let tree = ClusterTree::build(&cell, &leaves, config).unwrap();
        (cell, tree)
    }

    fn check_binary(tree: &ClusterTree, id: ClusterId, seen: &mut Vec<InstId>) {
        match tree.nodes[id] {
            ClusterNode::Leaf { inst, .. } => seen.push(inst),
            ClusterNode::Internal { left, right } => {
                assert_ne!(left, right);
                check_binary(tree, left, seen);
                check_binary(tree, right, seen);
            }
        }
    }

    #[test]
    fn every_leaf_appears_once() {
        let (cell, tree) = tree(STAR_NETLIST, &PnrConfig::default());
        let mut seen = Vec::new();
        check_binary(&tree, tree.root, &mut seen);
        seen.sort();
        let mut leaves: Vec<_> = cell.leaf_instances().collect();
        leaves.sort();
        assert_eq!(seen, leaves);
        assert_eq!(tree.nodes.len(), 2 * leaves.len() - 1);
    }

    #[test]
    fn stats_are_integer_averages() {
        let (_, tree) = tree(CHAIN_NETLIST, &PnrConfig::default());
        // inv is 10 wide and 40 tall, nand2 is 16 wide and 40 tall
        assert_eq!(tree.stats.size_inst, 36);
        assert_eq!(tree.stats.avg_size, 12);
        assert_eq!(tree.stats.avg_height, 40);
        assert_eq!(tree.stats.num_rows, 3);
        assert_eq!(tree.stats.size_rows, 12);
    }

    #[test]
    fn sorting_never_increases_cost() {
        let config = PnrConfig::builder().sort_clusters(false).build().unwrap();
        let (cell, unsorted) = tree(STAR_NETLIST, &config);
        let (_, sorted) = tree(STAR_NETLIST, &PnrConfig::default());
        let model = CostModel::new(&cell, unsorted.stats, &config);
        assert!(sorted.cost(&model) <= unsorted.cost(&model));
    }

    #[test]
    fn clustering_is_deterministic() {
        let (_, a) = tree(STAR_NETLIST, &PnrConfig::default());
        let (_, b) = tree(STAR_NETLIST, &PnrConfig::default());
        assert_eq!(a.in_order(), b.in_order());
    }

    #[test]
    fn mirror_is_an_involution() {
        let (_, mut t) = tree(STAR_NETLIST, &PnrConfig::default());
        let before = t.in_order();
        let root = t.root;
        t.mirror(root);
        let mirrored = t.in_order();
        assert_eq!(
            mirrored.iter().rev().copied().collect::<Vec<_>>(),
            before
        );
        t.mirror(root);
        assert_eq!(t.in_order(), before);
    }

    fn leaves_under(tree: &ClusterTree, cell: &Cell, id: ClusterId) -> Vec<String> {
        let mut seen = Vec::new();
        check_binary(tree, id, &mut seen);
        let mut names: Vec<_> = seen
            .into_iter()
            .map(|i| cell.instances[i].name.to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn supply_nets_do_not_pair_clusters() {
        let text = "\
create cell islands
create instance A inv
create instance B inv
create instance C inv
create instance D inv
create instance E inv
connect A y B a
connect B y A a
connect C y D a
connect D y C a
connect E a C y
";
        let config = PnrConfig::builder().sort_clusters(false).build().unwrap();
        let (cell, tree) = tree(text, &config);
        let ClusterNode::Internal { left, right } = tree.nodes[tree.root] else {
            panic!("root is a leaf");
        };
        let sides = [
            leaves_under(&tree, &cell, left),
            leaves_under(&tree, &cell, right),
        ];
        let with_e = sides.iter().find(|s| s.iter().any(|n| n == "E")).unwrap();
        assert_eq!(with_e, &["C", "D", "E"]);
        assert!(sides.contains(&vec!["A".to_string(), "B".to_string()]));
    }

    #[test]
    fn best_pair_prefers_least_shared_member() {
        // roots 0..4: (0,1) and (0,2) and (3,4) all tie; 0 is shared twice
        let pairs = vec![
            Pair { a: 0, b: 1, count: 2 },
            Pair { a: 0, b: 2, count: 2 },
            Pair { a: 3, b: 4, count: 2 },
            Pair { a: 1, b: 3, count: 1 },
        ];
        let placed = vec![false; 5];
        assert_eq!(best_pair(&pairs, 0, &placed), 2);
    }
}
