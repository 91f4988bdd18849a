use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about,
    help_template(
        "{before-help}{name} {version}\n{author-with-newline}{about-with-newline}\n{usage-heading} {usage}\n\n{all-args}{after-help}"
    )
)]
pub struct Args {
    /// Path to the netlist to place and route.
    #[arg(short, long)]
    pub netlist: PathBuf,

    /// Path to the TOML leaf cell library.
    #[arg(short, long)]
    pub library: PathBuf,

    /// Path to TOML configuration file.
    #[arg(short, long, default_value = "silc.toml")]
    pub config: PathBuf,

    /// Directory to which output files should be saved.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Cell to place and route. Defaults to the last cell of the netlist.
    #[arg(long)]
    pub cell: Option<String>,
}
