use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Result};
use arcstr::ArcStr;
use serde::Serialize;

use crate::cli::progress::StepContext;
use crate::config::PnrConfig;
use crate::maker::{self, Layout};
use crate::netlist::parse::read_netlist;
use crate::netlist::pull::pull_cell;
use crate::netlist::{Cell, LeafLibrary};
use crate::paths::{out_layout, out_placement, out_route};
use crate::place::{place, Placement};
use crate::route::{route, Routing};

/// A flattened cell ready to be placed and routed.
pub struct PnrPlan {
    pub cell: Cell,
    pub leaves: LeafLibrary,
    pub config: PnrConfig,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskKey {
    ReadNetlist,
    Place,
    Route,
    WriteLayout,
}

pub struct ExecutePlanParams<'a> {
    pub work_dir: &'a Path,
    pub plan: &'a PnrPlan,
    pub ctx: Option<&'a mut StepContext>,
}

/// Results of one run, also written to the work directory.
pub struct PnrOutput {
    pub placement: Placement,
    pub routing: Routing,
    pub layout: Layout,
}

/// Reads `netlist` against `leaves` and flattens the requested cell.
///
/// Without a cell name the last cell of the netlist is used.
pub fn generate_plan(
    netlist: &str,
    leaves: LeafLibrary,
    cell: Option<&str>,
    config: PnrConfig,
) -> Result<PnrPlan> {
    if config.num_rows == 0 {
        bail!("The number of rows must be at least 1");
    }
    if config.feed_through_size <= 0 {
        bail!("The feed-through size must be positive");
    }

    let mut lib = read_netlist(netlist, leaves)?;
    let idx = match cell {
        Some(name) => lib
            .find_cell(name)
            .ok_or_else(|| anyhow!("Cannot find cell '{name}' in the netlist"))?,
        None => lib
            .current
            .ok_or_else(|| anyhow!("The netlist does not create any cells"))?,
    };
    if lib.current != Some(idx) {
        pull_cell(&mut lib, idx)?;
    }
    let cell = lib.cells.swap_remove(idx);
    log::info!(
        "cell {} has {} instances and {} nets",
        cell.name,
        cell.instances.len(),
        cell.nets.len()
    );

    Ok(PnrPlan {
        cell,
        leaves: lib.leaves,
        config,
    })
}

macro_rules! try_finish_task {
    ( $ctx:expr, $task:expr ) => {
        if let Some(ctx) = $ctx.as_mut() {
            ctx.finish($task);
        }
    };
}

fn write_json(path: impl AsRef<Path>, value: &impl Serialize) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn execute_plan(params: ExecutePlanParams) -> Result<PnrOutput> {
    let ExecutePlanParams {
        work_dir,
        plan,
        mut ctx,
    } = params;

    fs::create_dir_all(work_dir)?;
    let name: ArcStr = plan.cell.name.clone();

    let mut placement = place(&plan.cell, &plan.leaves, &plan.config)?;
    write_json(out_placement(work_dir, &name), &placement)?;
    try_finish_task!(ctx, TaskKey::Place);

    let routing = route(&plan.cell, &mut placement, &plan.config);
    // routing may move and insert places
    write_json(out_placement(work_dir, &name), &placement)?;
    write_json(out_route(work_dir, &name), &routing)?;
    try_finish_task!(ctx, TaskKey::Route);

    let layout = maker::plan(&plan.cell, &placement, &routing, &plan.config);
    write_json(out_layout(work_dir, &name), &layout)?;
    try_finish_task!(ctx, TaskKey::WriteLayout);

    Ok(PnrOutput {
        placement,
        routing,
        layout,
    })
}
