//! Reader for the line-oriented netlist protocol.
//!
//! ```text
//! create cell top
//! create instance a inv
//! create instance b inv
//! connect a y b a
//! connect a vin ground
//! export b y out output
//! extract
//! ```
use arcstr::ArcStr;
use thiserror::Error;

use super::extract::extract;
use super::pull::pull_cell;
use super::{instantiate, Cell, LeafLibrary, Library, PortDir, PortRef, PortRole};
use crate::error::{Error, Result};

/// A statement that could not be applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unbalanced quotes")]
    UnbalancedQuotes,
    #[error("Unknown keyword: {0}")]
    UnknownKeyword(String),

    #[error("No keyword for CREATE command")]
    NoCreateKeyword,
    #[error("No name for CREATE CELL command")]
    NoCellName,
    #[error("Cell '{0}' already exists in current library")]
    CellExists(String),
    #[error("No instance name for CREATE INSTANCE command")]
    NoInstanceName,
    #[error("No type name for CREATE INSTANCE command")]
    NoTypeName,
    #[error("There is no '{0}' in the standard cell library")]
    NoSuchType(String),
    #[error("No cell selected")]
    NoCellSelected,
    #[error("Instance '{0}' already exists")]
    InstanceExists(String),
    #[error("Unknown CREATE command: {0}")]
    UnknownCreate(String),

    #[error("Not enough parameters for CONNECT command")]
    ConnectParams,
    #[error("Cannot find instance '{0}'")]
    NoInstance(String),
    #[error("Cannot find port '{port}' on instance '{inst}'")]
    NoPort { port: String, inst: String },

    #[error("No instance specified for EXPORT command")]
    ExportNoInstance,
    #[error("Cannot find instance '{0}' for EXPORT command")]
    ExportUnknownInstance(String),
    #[error("No port specified for EXPORT command")]
    ExportNoPort,
    #[error("Cannot find port '{port}' on instance '{inst}' for EXPORT command")]
    ExportUnknownPort { port: String, inst: String },
    #[error("No export name specified for EXPORT command")]
    ExportNoName,
    #[error("Unknown port type '{0}' for EXPORT command")]
    ExportUnknownType(String),
    #[error("Export name '{0}' is not unique")]
    ExportNotUnique(String),

    #[error("Unknown option '{0}' for SET command")]
    UnknownSetOption(String),
    #[error("Cannot find cell '{0}'")]
    NoCell(String),
    #[error("Unknown option '{0}' for SET LEAF-CELL-NUMBERS command")]
    UnknownLeafOption(String),
    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
    #[error("Insufficent parameters for SET NODE-NAME command")]
    NodeNameParams,
    #[error("Cannot find instance '{0}' in SET NODE-NAME command")]
    NodeNameInstance(String),
    #[error("Cannot find port '{port}' on instance '{inst}' in SET NODE-NAME command")]
    NodeNamePort { port: String, inst: String },
    #[error("Cannot find extracted node to set name in SET NODE-NAME command")]
    NodeNameNotExtracted,
    #[error("Cannot find port '{port}' on cell '{cell}'")]
    NoCellPort { port: String, cell: String },
    #[error("Unknown port direction specifier '{0}'")]
    UnknownDirection(String),
}

type CmdResult<T> = std::result::Result<T, CommandError>;

/// Splits a statement into tokens. Quoted tokens may contain blanks.
pub fn tokenize(line: &str) -> CmdResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == ' ' || c == '\t' {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if c == '"' {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(c) => token.push(c),
                    None => return Err(CommandError::UnbalancedQuotes),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' || c == '\t' {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// Reads a netlist and flattens the last cell it creates.
pub fn read_netlist(text: &str, leaves: LeafLibrary) -> Result<Library> {
    let mut lib = Library::new(leaves);
    for (i, line) in text.lines().enumerate() {
        execute_line(&mut lib, line).map_err(|source| Error::Parse {
            line: i + 1,
            source,
        })?;
    }
    if let Some(idx) = lib.current {
        pull_cell(&mut lib, idx)?;
    }
    Ok(lib)
}

/// Applies a single statement to `lib`.
pub fn execute_line(lib: &mut Library, line: &str) -> CmdResult<()> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('!') {
        return Ok(());
    }
    let tokens = tokenize(line)?;
    let Some(keyword) = tokens.first() else {
        return Ok(());
    };
    let args = &tokens[1..];
    match keyword.to_ascii_lowercase().as_str() {
        "create" => create(lib, args),
        "connect" => connect(lib, args),
        "export" => export(lib, args),
        "extract" => {
            let cell = lib
                .current_cell_mut()
                .ok_or(CommandError::NoCellSelected)?;
            extract(cell);
            Ok(())
        }
        "set" => set(lib, args),
        _ => Err(CommandError::UnknownKeyword(keyword.clone())),
    }
}

fn create(lib: &mut Library, args: &[String]) -> CmdResult<()> {
    let what = args.first().ok_or(CommandError::NoCreateKeyword)?;
    match what.to_ascii_lowercase().as_str() {
        "cell" => {
            let name = args.get(1).ok_or(CommandError::NoCellName)?;
            if lib.find_cell(name).is_some() {
                return Err(CommandError::CellExists(name.clone()));
            }
            if lib.leaves.find(name).is_some() {
                log::warn!("cell {name} shadows a leaf cell of the same name");
            }
            lib.cells.push(Cell::new(name.as_str()));
            lib.current = Some(lib.cells.len() - 1);
            Ok(())
        }
        "instance" => {
            let name = args.get(1).ok_or(CommandError::NoInstanceName)?;
            let ty = args.get(2).ok_or(CommandError::NoTypeName)?;
            let idx = lib.current.ok_or(CommandError::NoCellSelected)?;
            if lib.cells[idx].find_instance(name).is_some() {
                return Err(CommandError::InstanceExists(name.clone()));
            }
            let others = &lib.cells[..idx];
            let inst = instantiate(name.as_str().into(), ty, others, &lib.leaves)
                .map_err(|_| CommandError::NoSuchType(ty.clone()))?;
            lib.cells[idx].push_instance(inst);
            Ok(())
        }
        _ => Err(CommandError::UnknownCreate(what.clone())),
    }
}

fn connect(lib: &mut Library, args: &[String]) -> CmdResult<()> {
    if args.len() < 3 {
        return Err(CommandError::ConnectParams);
    }
    let cell = lib
        .current_cell_mut()
        .ok_or(CommandError::NoCellSelected)?;
    let a = resolve_port(cell, &args[0], Some(&args[1]))?;
    let b = resolve_port(cell, &args[2], args.get(3))?;
    cell.connect(a, b);
    Ok(())
}

fn resolve_port(cell: &Cell, inst: &str, port: Option<&String>) -> CmdResult<PortRef> {
    let id = cell
        .find_instance(inst)
        .ok_or_else(|| CommandError::NoInstance(inst.to_string()))?;
    let instance = &cell.instances[id];
    if instance.kind == super::InstanceKind::Special {
        return Ok(PortRef::new(id, 0));
    }
    let port = port.ok_or(CommandError::ConnectParams)?;
    let p = instance
        .find_port(port)
        .ok_or_else(|| CommandError::NoPort {
            port: port.clone(),
            inst: inst.to_string(),
        })?;
    Ok(PortRef::new(id, p))
}

fn export(lib: &mut Library, args: &[String]) -> CmdResult<()> {
    let cell = lib
        .current_cell_mut()
        .ok_or(CommandError::NoCellSelected)?;
    let inst = args.first().ok_or(CommandError::ExportNoInstance)?;
    let id = cell
        .find_instance(inst)
        .ok_or_else(|| CommandError::ExportUnknownInstance(inst.clone()))?;
    let port = args.get(1).ok_or(CommandError::ExportNoPort)?;
    let p = cell.instances[id]
        .find_port(port)
        .ok_or_else(|| CommandError::ExportUnknownPort {
            port: port.clone(),
            inst: inst.clone(),
        })?;
    let name = args.get(2).ok_or(CommandError::ExportNoName)?;
    let role = match args.get(3).map(|s| s.to_ascii_lowercase()) {
        None => PortRole::Unknown,
        Some(s) => match s.as_str() {
            "input" => PortRole::Input,
            "output" => PortRole::Output,
            "bidirectional" => PortRole::Bidirectional,
            _ => return Err(CommandError::ExportUnknownType(args[3].clone())),
        },
    };
    let taken = cell.exports.iter().any(|e| e.name.eq_ignore_ascii_case(name))
        || cell.find_instance(name).is_some();
    if taken {
        return Err(CommandError::ExportNotUnique(name.clone()));
    }
    cell.add_export(PortRef::new(id, p), ArcStr::from(name.as_str()), role);
    Ok(())
}

fn set(lib: &mut Library, args: &[String]) -> CmdResult<()> {
    let option = args
        .first()
        .ok_or_else(|| CommandError::UnknownSetOption(String::new()))?;
    let rest = &args[1..];
    match option.to_ascii_lowercase().as_str() {
        "leaf-cell-numbers" => set_leaf_numbers(lib, rest),
        "node-name" => set_node_name(lib, rest),
        "port-direction" => set_port_direction(lib, rest),
        _ => Err(CommandError::UnknownSetOption(option.clone())),
    }
}

fn set_leaf_numbers(lib: &mut Library, args: &[String]) -> CmdResult<()> {
    let name = args
        .first()
        .ok_or_else(|| CommandError::NoCell(String::new()))?;
    let leaf = lib
        .leaves
        .find_mut(name)
        .ok_or_else(|| CommandError::NoCell(name.clone()))?;
    for pair in args[1..].chunks(2) {
        let value = pair
            .get(1)
            .ok_or_else(|| CommandError::InvalidNumber(String::new()))?;
        let value: i64 = value
            .parse()
            .map_err(|_| CommandError::InvalidNumber(value.clone()))?;
        match pair[0].to_ascii_lowercase().as_str() {
            "top-active" => leaf.active.top = value,
            "bottom-active" => leaf.active.bottom = value,
            "left-active" => leaf.active.left = value,
            "right-active" => leaf.active.right = value,
            _ => return Err(CommandError::UnknownLeafOption(pair[0].clone())),
        }
    }
    Ok(())
}

fn set_node_name(lib: &mut Library, args: &[String]) -> CmdResult<()> {
    if args.len() < 3 {
        return Err(CommandError::NodeNameParams);
    }
    let cell = lib
        .current_cell_mut()
        .ok_or(CommandError::NoCellSelected)?;
    let id = cell
        .find_instance(&args[0])
        .ok_or_else(|| CommandError::NodeNameInstance(args[0].clone()))?;
    let port = cell.instances[id]
        .find_port(&args[1])
        .ok_or_else(|| CommandError::NodeNamePort {
            port: args[1].clone(),
            inst: args[0].clone(),
        })?;
    let net = cell
        .net_of(PortRef::new(id, port))
        .filter(|&n| n < cell.nets.len())
        .ok_or(CommandError::NodeNameNotExtracted)?;
    cell.nets[net].name = Some(args[2].as_str().into());
    Ok(())
}

fn set_port_direction(lib: &mut Library, args: &[String]) -> CmdResult<()> {
    let name = args
        .first()
        .ok_or_else(|| CommandError::NoCell(String::new()))?;
    let port = args.get(1).ok_or_else(|| CommandError::NoCellPort {
        port: String::new(),
        cell: name.clone(),
    })?;
    let letters = args.get(2).map(String::as_str).unwrap_or("");
    let dir =
        PortDir::parse(letters).ok_or_else(|| CommandError::UnknownDirection(letters.into()))?;
    let no_port = || CommandError::NoCellPort {
        port: port.clone(),
        cell: name.clone(),
    };

    if let Some(idx) = lib.find_cell(name) {
        let export = lib.cells[idx]
            .exports
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(port))
            .ok_or_else(no_port)?;
        export.dir = dir;
        return Ok(());
    }
    let leaf = lib
        .leaves
        .find_mut(name)
        .ok_or_else(|| CommandError::NoCell(name.clone()))?;
    let p = leaf.find_port(port).ok_or_else(no_port)?;
    leaf.ports[p].dir = dir;
    Ok(())
}
