//! Zone representation of one channel.
//!
//! A zone is a set of nodes whose spans, widened by the minimum port
//! distance, share a common x. Nodes of a common zone never share a track.

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Zones {
    pub zones: Vec<Vec<usize>>,
    /// Zones each node belongs to.
    pub member_of: Vec<Vec<usize>>,
}

impl Zones {
    /// Groups nodes given their leftmost and rightmost port positions.
    pub fn build(spans: &[(i64, i64)], mpd: i64) -> Self {
        let mut zones: Vec<Vec<usize>> = Vec::new();
        let mut marked = vec![false; spans.len()];
        loop {
            let mut pivot: Option<usize> = None;
            for (i, &(first, _)) in spans.iter().enumerate() {
                if !marked[i] && pivot.map_or(true, |p| first < spans[p].0) {
                    pivot = Some(i);
                }
            }
            let Some(pivot) = pivot else {
                break;
            };
            let x = spans[pivot].0;
            let list: Vec<usize> = (0..spans.len())
                .filter(|&i| spans[i].0 - mpd < x && x < spans[i].1 + mpd)
                .collect();
            match zones.last_mut() {
                Some(zone) if zone.iter().all(|n| list.contains(n)) => {
                    for n in list {
                        if !zone.contains(&n) {
                            zone.push(n);
                        }
                    }
                }
                _ => zones.push(list),
            }
            marked[pivot] = true;
        }

        let mut member_of = vec![Vec::new(); spans.len()];
        for (z, zone) in zones.iter().enumerate() {
            for &n in zone {
                member_of[n].push(z);
            }
        }
        log::debug!("{} zones over {} nodes", zones.len(), spans.len());
        Self { zones, member_of }
    }

    /// Whether nodes `a` and `b` share a zone.
    pub fn conflicts(&self, a: usize, b: usize) -> bool {
        self.member_of[a].iter().any(|z| self.member_of[b].contains(z))
    }
}
