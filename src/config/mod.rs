pub mod pnr;

pub use pnr::{parse_pnr_config, PnrConfig, PnrConfigBuilder};
