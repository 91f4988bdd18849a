use arcstr::ArcStr;
use thiserror::Error;

use crate::netlist::parse::CommandError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ERROR line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: CommandError,
    },

    #[error("no cell or leaf cell named '{0}'")]
    UnknownCell(ArcStr),

    #[error("instance '{0}' already exists")]
    DuplicateInstance(ArcStr),

    #[error("no cell selected")]
    NoCellSelected,

    #[error("no leaf cells found to place in cell '{0}'")]
    NoLeafInstances(ArcStr),

    #[error("cell '{0}' has not been extracted")]
    NotExtracted(ArcStr),
}

pub type Result<T> = std::result::Result<T, Error>;
