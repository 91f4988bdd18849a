use std::fs::canonicalize;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::cli::args::Args;
use crate::cli::progress::StepContext;
use crate::config::{parse_pnr_config, PnrConfig};
use crate::netlist::LeafLibrary;
use crate::plan::{execute_plan, generate_plan, ExecutePlanParams, TaskKey};

pub mod args;
pub mod progress;

pub const BANNER: &str = r"
      _ _
  ___(_) | ___
 / __| | |/ __|
 \__ \ | | (__
 |___/_|_|\___|

SILC v0.2
";

pub fn run() -> Result<()> {
    let args = Args::parse();

    println!("{BANNER}");

    println!("Reading configuration file...\n");
    let config = if args.config.exists() {
        let config_path = canonicalize(&args.config)?;
        println!("Configuration file: {:?}", &config_path);
        parse_pnr_config(&config_path)?
    } else {
        println!("No configuration file at {:?}, using defaults", &args.config);
        PnrConfig::default()
    };
    println!("Place and route parameters:");
    println!("\tNumber of rows: {}", config.num_rows);
    println!("\tMinimum port distance: {}", config.min_port_distance);
    println!("\tFeed-through size: {}", config.feed_through_size);
    println!("\tNet balancing: {}", config.net_balance);
    println!();

    let mut ctx = StepContext::new();

    let plan = ctx.check((|| -> Result<_> {
        let leaves = LeafLibrary::load(&args.library)?;
        let netlist = std::fs::read_to_string(&args.netlist)?;
        generate_plan(&netlist, leaves, args.cell.as_deref(), config)
    })())?;
    ctx.finish(TaskKey::ReadNetlist);

    let work_dir = if let Some(output_dir) = args.output_dir {
        output_dir
    } else {
        PathBuf::from(plan.cell.name.as_str())
    };
    std::fs::create_dir_all(&work_dir)?;
    let work_dir = canonicalize(work_dir)?;

    let res = execute_plan(ExecutePlanParams {
        work_dir: &work_dir,
        plan: &plan,
        ctx: Some(&mut ctx),
    });

    ctx.check(res)?;
    println!("Artifacts saved to: {:?}\n", &work_dir);

    Ok(())
}
