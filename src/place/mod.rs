//! Row placement of leaf instances.
//!
//! Rows are stored left to right after finalization. Odd rows hold
//! mirrored cells, so a port at offset `xoff` sits at `x + size - xoff`.

use arcstr::ArcStr;
use serde::Serialize;

use crate::cluster::{ClusterStats, ClusterTree, CostModel};
use crate::config::PnrConfig;
use crate::error::Result;
use crate::netlist::{ActiveArea, Cell, InstId, InstanceKind, LeafLibrary};

pub mod balance;
pub mod rows;
pub mod squeeze;

pub type PlaceId = usize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Place {
    pub name: ArcStr,
    pub kind: InstanceKind,
    /// Netlist instance of a leaf place.
    pub inst: Option<InstId>,
    pub row: usize,
    pub x: i64,
    pub size: i64,
    #[serde(skip)]
    pub active: ActiveArea,
}

impl Place {
    pub fn synthetic(name: ArcStr, kind: InstanceKind, size: i64) -> Self {
        Self {
            name,
            kind,
            inst: None,
            row: 0,
            x: 0,
            size,
            active: ActiveArea::default(),
        }
    }

    #[inline]
    pub fn mirrored(&self) -> bool {
        self.row % 2 == 1
    }

    /// Absolute position of a port at offset `xoff` from the unmirrored left edge.
    #[inline]
    pub fn port_x(&self, xoff: i64) -> i64 {
        if self.mirrored() {
            self.x + self.size - xoff
        } else {
            self.x + xoff
        }
    }

    /// Active distance on the physical left side, accounting for mirroring.
    pub fn left_active(&self) -> i64 {
        if self.mirrored() {
            self.active.right
        } else {
            self.active.left
        }
    }

    pub fn right_active(&self) -> i64 {
        if self.mirrored() {
            self.active.left
        } else {
            self.active.right
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Placement {
    pub places: Vec<Place>,
    /// Place ids of each row, left to right. Row 0 is the bottom row.
    pub rows: Vec<Vec<PlaceId>>,
    pub stats: ClusterStats,
}

impl Placement {
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Place of each netlist instance, if it was placed.
    pub fn place_of(&self, inst: InstId) -> Option<PlaceId> {
        self.places.iter().position(|p| p.inst == Some(inst))
    }

    /// Index of `place` within its row.
    pub fn index_in_row(&self, place: PlaceId) -> Option<usize> {
        let row = self.places[place].row;
        self.rows[row].iter().position(|&p| p == place)
    }

    /// Inserts `place` at `index` of `row` without touching any x position.
    pub fn insert(&mut self, row: usize, index: usize, mut place: Place) -> PlaceId {
        place.row = row;
        self.places.push(place);
        let id = self.places.len() - 1;
        self.rows[row].insert(index, id);
        id
    }

    /// Moves every place of `row` from `index` on by `dx`.
    pub fn shift_from(&mut self, row: usize, index: usize, dx: i64) {
        if dx == 0 {
            return;
        }
        for &p in self.rows[row].iter().skip(index) {
            self.places[p].x += dx;
        }
    }

    /// Assigns cumulative x positions from 0 in every row.
    pub fn renumber(&mut self) {
        for (r, row) in self.rows.iter().enumerate() {
            let mut x = 0;
            for &p in row.iter() {
                let place = &mut self.places[p];
                place.row = r;
                place.x = x;
                x += place.size;
            }
        }
    }

    pub fn row_width(&self, row: usize) -> i64 {
        match (self.rows[row].first(), self.rows[row].last()) {
            (Some(&first), Some(&last)) => {
                let last = &self.places[last];
                last.x + last.size - self.places[first].x
            }
            _ => 0,
        }
    }
}

/// Clusters, rows, optionally balances and then squeezes the leaf instances of `cell`.
pub fn place(cell: &Cell, leaves: &LeafLibrary, config: &PnrConfig) -> Result<Placement> {
    let tree = ClusterTree::build(cell, leaves, config)?;
    let order = tree.in_order();
    let mut placement = if config.net_balance {
        let model = CostModel::new(cell, tree.stats, config);
        let order = balance::net_balance(cell, &model, order, tree.stats, config);
        rows::rows_from_sequence(cell, leaves, &order, tree.stats, rows::RowBreak::MaxWidth)
    } else {
        rows::rows_from_sequence(cell, leaves, &order, tree.stats, rows::RowBreak::Closest)
    };
    placement.renumber();
    squeeze::squeeze(&mut placement, config);
    log::info!(
        "placed {} instances in {} rows",
        placement.places.len(),
        placement.num_rows()
    );
    for (r, row) in placement.rows.iter().enumerate() {
        log::debug!(
            "row {r}: {} places, width {}",
            row.len(),
            placement.row_width(r)
        );
    }
    Ok(placement)
}
