use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Solver constants for one place-and-route run.
///
/// All lengths share the unit of the leaf-cell library.
#[derive(Debug, Eq, PartialEq, Clone, Hash, Builder, Serialize, Deserialize)]
#[builder(derive(Debug), default)]
#[serde(default)]
pub struct PnrConfig {
    /// Requested number of rows.
    ///
    /// Reduced to the number of leaf instances when there are fewer.
    pub num_rows: usize,
    pub via_size: i64,
    pub min_metal_spacing: i64,
    /// Minimum distance between the active areas of abutting cells.
    pub min_active_distance: i64,
    /// Ports closer than this conflict in a channel.
    pub min_port_distance: i64,
    /// Width of feed-throughs, lateral feeds and export specials.
    pub feed_through_size: i64,
    pub horiz_arc_width: i64,
    pub vert_arc_width: i64,
    /// Margin added on both sides of the preferred pass-through window.
    pub fuzzy_window: i64,
    /// Multiplier applied to vertical distance in placement costs.
    pub vertical_cost: i64,
    /// How many positions net balancing may move an instance.
    pub balance_limit: usize,
    /// Run the cluster tree swap optimizer.
    pub sort_clusters: bool,
    /// Run net balancing after row construction.
    pub net_balance: bool,
    /// Bound on VCG cycle-resolution attempts per channel.
    pub max_cycle_iterations: usize,
}

impl Default for PnrConfig {
    fn default() -> Self {
        Self {
            num_rows: 4,
            via_size: 4,
            min_metal_spacing: 6,
            min_active_distance: 8,
            min_port_distance: 8,
            feed_through_size: 16,
            horiz_arc_width: 4,
            vert_arc_width: 4,
            fuzzy_window: 6400,
            vertical_cost: 2,
            balance_limit: 2,
            sort_clusters: true,
            net_balance: false,
            max_cycle_iterations: 100,
        }
    }
}

impl PnrConfig {
    #[inline]
    pub fn builder() -> PnrConfigBuilder {
        PnrConfigBuilder::default()
    }

    /// Distance from a row edge to the nearest track.
    pub fn row_to_track(&self) -> i64 {
        self.via_size / 2 + self.min_metal_spacing
    }

    pub fn min_track_to_track(&self) -> i64 {
        self.via_size / 2 + self.min_metal_spacing + self.horiz_arc_width / 2
    }

    pub fn max_track_to_track(&self) -> i64 {
        self.via_size + self.min_metal_spacing
    }
}

pub fn parse_pnr_config(path: impl AsRef<Path>) -> Result<PnrConfig> {
    let contents = fs::read_to_string(path)?;
    let data = toml::from_str(&contents)?;
    Ok(data)
}
