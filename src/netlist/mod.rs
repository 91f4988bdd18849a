//! Cells, instances, ports and extracted nets.
//!
//! Everything is stored in flat vectors and cross-referenced by index.
//! Instance `0` of every cell is the `ground` special and instance `1` is
//! the `power` special; net `0` is ground and net `1` is power once the
//! cell has been extracted.

use std::fmt::Display;
use std::fs;
use std::ops::BitOr;
use std::path::Path;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod extract;
pub mod parse;
pub mod pull;

pub type InstId = usize;
pub type NetId = usize;

pub const GROUND: NetId = 0;
pub const POWER: NetId = 1;
pub const GROUND_INST: InstId = 0;
pub const POWER_INST: InstId = 1;

/// Sides of a row a port may be attached from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortDir(u8);

impl PortDir {
    pub const NONE: PortDir = PortDir(0);
    pub const UP: PortDir = PortDir(0x1);
    pub const DOWN: PortDir = PortDir(0x2);
    pub const RIGHT: PortDir = PortDir(0x4);
    pub const LEFT: PortDir = PortDir(0x8);

    #[inline]
    pub fn vertical() -> Self {
        Self::UP | Self::DOWN
    }

    #[inline]
    pub fn has(self, other: PortDir) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_up_only(self) -> bool {
        self.has(Self::UP) && !self.has(Self::DOWN)
    }

    pub fn is_down_only(self) -> bool {
        self.has(Self::DOWN) && !self.has(Self::UP)
    }

    /// Parses a string of `u`, `d`, `r` and `l` characters.
    pub fn parse(s: &str) -> Option<Self> {
        let mut dir = Self::NONE;
        for c in s.chars() {
            dir = dir
                | match c.to_ascii_lowercase() {
                    'u' => Self::UP,
                    'd' => Self::DOWN,
                    'r' => Self::RIGHT,
                    'l' => Self::LEFT,
                    _ => return None,
                };
        }
        Some(dir)
    }
}

impl BitOr for PortDir {
    type Output = PortDir;
    fn bitor(self, rhs: Self) -> Self::Output {
        PortDir(self.0 | rhs.0)
    }
}

impl Display for PortDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (dir, c) in [
            (Self::UP, 'u'),
            (Self::DOWN, 'd'),
            (Self::RIGHT, 'r'),
            (Self::LEFT, 'l'),
        ] {
            if self.has(dir) {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for PortDir {
    type Error = String;
    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid port direction '{value}'"))
    }
}

impl From<PortDir> for String {
    fn from(value: PortDir) -> Self {
        value.to_string()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRole {
    Ground,
    Power,
    Bidirectional,
    Output,
    Input,
    #[default]
    Unknown,
}

impl PortRole {
    #[inline]
    pub fn is_supply(self) -> bool {
        matches!(self, PortRole::Ground | PortRole::Power)
    }
}

/// Distances from each cell edge to its active area.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveArea {
    pub top: i64,
    pub bottom: i64,
    pub left: i64,
    pub right: i64,
}

fn default_dir() -> PortDir {
    PortDir::vertical()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafPort {
    pub name: ArcStr,
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default = "default_dir")]
    pub dir: PortDir,
    #[serde(default)]
    pub role: PortRole,
}

/// Geometry facts of a library cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafCell {
    pub name: ArcStr,
    pub width: i64,
    pub height: i64,
    #[serde(default)]
    pub active: ActiveArea,
    #[serde(default)]
    pub ports: Vec<LeafPort>,
}

impl LeafCell {
    pub fn find_port(&self, name: &str) -> Option<usize> {
        self.ports
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafLibrary {
    #[serde(default, rename = "cell")]
    pub cells: Vec<LeafCell>,
}

impl LeafLibrary {
    pub fn new(cells: Vec<LeafCell>) -> Self {
        Self { cells }
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn find(&self, name: &str) -> Option<&LeafCell> {
        self.cells
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut LeafCell> {
        self.cells
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    Leaf,
    Complex,
    Special,
    Feed,
    Stitch,
    LateralFeed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstPort {
    pub name: ArcStr,
    /// Offset from the left edge of the unmirrored instance.
    pub xoff: i64,
    pub dir: PortDir,
    pub role: PortRole,
    pub net: Option<NetId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    pub name: ArcStr,
    pub kind: InstanceKind,
    /// Leaf or complex cell this is an instance of.
    pub proto: Option<ArcStr>,
    pub number: usize,
    pub size: i64,
    pub ports: Vec<InstPort>,
}

impl Instance {
    fn special(name: ArcStr) -> Self {
        Self {
            ports: vec![InstPort {
                name: name.clone(),
                xoff: 0,
                dir: PortDir::NONE,
                role: PortRole::Unknown,
                net: None,
            }],
            name,
            kind: InstanceKind::Special,
            proto: None,
            number: 0,
            size: 0,
        }
    }

    /// Finds a connectable port by name. Supply ports are not connectable.
    pub fn find_port(&self, name: &str) -> Option<usize> {
        if self.kind == InstanceKind::Special {
            return Some(0);
        }
        self.ports
            .iter()
            .position(|p| !p.role.is_supply() && p.name.eq_ignore_ascii_case(name))
    }

    pub fn signal_ports(&self) -> impl Iterator<Item = (usize, &InstPort)> {
        self.ports
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.role.is_supply())
    }

    /// The first supply port of the given role.
    pub fn supply_port(&self, role: PortRole) -> Option<usize> {
        self.ports.iter().position(|p| p.role == role)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub inst: InstId,
    pub port: usize,
}

impl PortRef {
    #[inline]
    pub fn new(inst: InstId, port: usize) -> Self {
        Self { inst, port }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub a: PortRef,
    pub b: PortRef,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Export {
    pub name: ArcStr,
    /// Special instance standing for the export.
    pub inst: InstId,
    pub role: PortRole,
    pub dir: PortDir,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Net {
    pub name: Option<ArcStr>,
    pub ports: Vec<PortRef>,
}

impl Net {
    pub fn named(name: ArcStr) -> Self {
        Self {
            name: Some(name),
            ports: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub name: ArcStr,
    pub instances: Vec<Instance>,
    pub connections: Vec<Connection>,
    pub exports: Vec<Export>,
    /// Extracted nets, empty until [`extract::extract`] runs.
    pub nets: Vec<Net>,
    next_number: usize,
}

impl Cell {
    pub fn new(name: impl Into<ArcStr>) -> Self {
        let mut cell = Self {
            name: name.into(),
            instances: Vec::new(),
            connections: Vec::new(),
            exports: Vec::new(),
            nets: Vec::new(),
            next_number: 0,
        };
        cell.push_instance(Instance::special(arcstr::literal!("ground")));
        cell.push_instance(Instance::special(arcstr::literal!("power")));
        cell
    }

    pub fn push_instance(&mut self, mut inst: Instance) -> InstId {
        inst.number = self.next_number;
        self.next_number += 1;
        self.instances.push(inst);
        self.instances.len() - 1
    }

    pub fn find_instance(&self, name: &str) -> Option<InstId> {
        self.instances
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(name))
    }

    pub fn connect(&mut self, a: PortRef, b: PortRef) {
        self.connections.push(Connection { a, b });
    }

    /// Creates the special instance for an export and connects it to `port`.
    pub fn add_export(&mut self, port: PortRef, name: ArcStr, role: PortRole) -> InstId {
        let inst = self.push_instance(Instance::special(name.clone()));
        self.exports.push(Export {
            name,
            inst,
            role,
            dir: PortDir::NONE,
        });
        self.connect(port, PortRef::new(inst, 0));
        inst
    }

    #[inline]
    pub fn port(&self, r: PortRef) -> &InstPort {
        &self.instances[r.inst].ports[r.port]
    }

    #[inline]
    pub fn net_of(&self, r: PortRef) -> Option<NetId> {
        self.port(r).net
    }

    pub fn is_extracted(&self) -> bool {
        self.nets.len() >= 2
    }

    pub fn export_net(&self, export: &Export) -> Option<NetId> {
        self.net_of(PortRef::new(export.inst, 0))
    }

    pub fn export_of_net(&self, net: NetId) -> Option<&Export> {
        self.exports
            .iter()
            .find(|e| self.export_net(e) == Some(net))
    }

    pub fn leaf_instances(&self) -> impl Iterator<Item = InstId> + '_ {
        self.instances
            .iter()
            .enumerate()
            .filter(|(_, i)| i.kind == InstanceKind::Leaf)
            .map(|(id, _)| id)
    }

    /// Ordinary nets, excluding the two supply nets.
    pub fn signal_nets(&self) -> impl Iterator<Item = (NetId, &Net)> {
        self.nets.iter().enumerate().skip(2)
    }

    /// Names every unnamed net `nK`, continuing after the largest such name present.
    pub fn name_unnamed_nets(&mut self) {
        let mut last = self
            .nets
            .iter()
            .filter_map(|n| n.name.as_deref())
            .filter_map(generic_net_number)
            .max()
            .unwrap_or(1);
        for net in self.nets.iter_mut().skip(2) {
            if net.name.is_none() {
                last += 1;
                net.name = Some(format!("n{last}").into());
            }
        }
    }
}

fn generic_net_number(name: &str) -> Option<usize> {
    let rest = name.strip_prefix(['n', 'N'])?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Builds an unplaced instance of a complex cell or a leaf cell.
///
/// Complex cells take precedence over leaf cells of the same name.
pub fn instantiate(
    name: ArcStr,
    type_name: &str,
    cells: &[Cell],
    leaves: &LeafLibrary,
) -> Result<Instance> {
    if let Some(cell) = cells
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(type_name))
    {
        let ports = cell
            .exports
            .iter()
            .map(|e| InstPort {
                name: e.name.clone(),
                xoff: 0,
                dir: e.dir,
                role: e.role,
                net: None,
            })
            .collect();
        return Ok(Instance {
            name,
            kind: InstanceKind::Complex,
            proto: Some(cell.name.clone()),
            number: 0,
            size: 0,
            ports,
        });
    }
    let leaf = leaves
        .find(type_name)
        .ok_or_else(|| Error::UnknownCell(type_name.into()))?;
    let ports = leaf
        .ports
        .iter()
        .map(|p| InstPort {
            name: p.name.clone(),
            xoff: p.x,
            dir: p.dir,
            role: p.role,
            net: None,
        })
        .collect();
    Ok(Instance {
        name,
        kind: InstanceKind::Leaf,
        proto: Some(leaf.name.clone()),
        number: 0,
        size: leaf.width,
        ports,
    })
}

/// A set of cells read from one netlist together with the leaf cells they use.
#[derive(Clone, Debug, Default)]
pub struct Library {
    pub leaves: LeafLibrary,
    pub cells: Vec<Cell>,
    /// Index of the cell most recently created.
    pub current: Option<usize>,
}

impl Library {
    pub fn new(leaves: LeafLibrary) -> Self {
        Self {
            leaves,
            cells: Vec::new(),
            current: None,
        }
    }

    pub fn find_cell(&self, name: &str) -> Option<usize> {
        self.cells
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn current_cell(&self) -> Option<&Cell> {
        self.current.map(|i| &self.cells[i])
    }

    pub fn current_cell_mut(&mut self) -> Option<&mut Cell> {
        self.current.map(|i| &mut self.cells[i])
    }

    pub fn leaf_of(&self, inst: &Instance) -> Option<&LeafCell> {
        if inst.kind != InstanceKind::Leaf {
            return None;
        }
        inst.proto.as_ref().and_then(|p| self.leaves.find(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_dir_parse() {
        assert_eq!(PortDir::parse("ud"), Some(PortDir::vertical()));
        assert_eq!(PortDir::parse("L"), Some(PortDir::LEFT));
        assert_eq!(PortDir::parse("ux"), None);
        assert!(PortDir::parse("u").unwrap().is_up_only());
        assert!(PortDir::parse("dr").unwrap().is_down_only());
        assert_eq!(PortDir::parse("ldu").unwrap().to_string(), "udl");
    }

    #[test]
    fn new_cell_has_supply_specials() {
        let cell = Cell::new("top");
        assert_eq!(cell.instances.len(), 2);
        assert_eq!(cell.instances[GROUND_INST].name, "ground");
        assert_eq!(cell.instances[POWER_INST].name, "power");
        assert_eq!(cell.instances[POWER_INST].number, 1);
        assert_eq!(cell.find_instance("POWER"), Some(POWER_INST));
    }

    #[test]
    fn generic_names_continue_numbering() {
        let mut cell = Cell::new("top");
        cell.nets = vec![
            Net::named("ground".into()),
            Net::named("power".into()),
            Net::named("n7".into()),
            Net::default(),
            Net::named("nx3".into()),
            Net::default(),
        ];
        cell.name_unnamed_nets();
        assert_eq!(cell.nets[3].name(), "n8");
        assert_eq!(cell.nets[5].name(), "n9");
    }

    #[test]
    fn leaf_library_from_toml() {
        let lib = LeafLibrary::from_toml(
            r#"
            [[cell]]
            name = "inv"
            width = 10
            height = 40
            active = { left = 2, right = 3 }
            ports = [
                { name = "a", x = 2 },
                { name = "y", x = 8, dir = "u", role = "output" },
                { name = "vdd", x = 5, role = "power" },
            ]
            "#,
        )
        .unwrap();
        let inv = lib.find("INV").unwrap();
        assert_eq!(inv.width, 10);
        assert_eq!(inv.active.right, 3);
        assert_eq!(inv.ports[0].dir, PortDir::vertical());
        assert_eq!(inv.ports[1].dir, PortDir::UP);
        assert_eq!(inv.ports[2].role, PortRole::Power);
    }
}
