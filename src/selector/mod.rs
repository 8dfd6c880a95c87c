//! Battle chip name tables and the 4-byte command sent for a selection.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const BCG_NAMES: &str = include_str!("../../data/bcg.txt");
const PCG_NAMES: &str = include_str!("../../data/pcg.txt");
const BLG_NAMES: &str = include_str!("../../data/blg.txt");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("wire code 0 is reserved")]
    ReservedCode,

    #[error("no chip with code {code} on the {gate}")]
    UnknownCode { gate: GateKind, code: u32 },

    #[error("no chip named {name:?} on the {gate}")]
    UnknownName { gate: GateKind, name: String },

    #[error("unknown gate type {0:?} (expected bcg, pcg or blg)")]
    UnknownGate(String),
}

/// Which accessory the chip list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    /// First-generation Battle Chip Gate
    Bcg,
    /// Progress Chip Gate
    Pcg,
    /// Beast Link Gate
    Blg,
}

impl GateKind {
    pub const ALL: [GateKind; 3] = [GateKind::Bcg, GateKind::Pcg, GateKind::Blg];

    pub fn table(self) -> NameTable {
        match self {
            GateKind::Bcg => NameTable::parse(BCG_NAMES),
            GateKind::Pcg => NameTable::parse(PCG_NAMES),
            GateKind::Blg => NameTable::parse(BLG_NAMES),
        }
    }

    pub fn next(self) -> Self {
        match self {
            GateKind::Bcg => GateKind::Pcg,
            GateKind::Pcg => GateKind::Blg,
            GateKind::Blg => GateKind::Bcg,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            GateKind::Bcg => GateKind::Blg,
            GateKind::Pcg => GateKind::Bcg,
            GateKind::Blg => GateKind::Pcg,
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GateKind::Bcg => "Battle Chip Gate",
            GateKind::Pcg => "Progress Chip Gate",
            GateKind::Blg => "Beast Link Gate",
        };
        f.write_str(name)
    }
}

impl FromStr for GateKind {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bcg" => Ok(GateKind::Bcg),
            "pcg" => Ok(GateKind::Pcg),
            "blg" => Ok(GateKind::Blg),
            _ => Err(SelectorError::UnknownGate(s.to_string())),
        }
    }
}

/// A selectable chip. `code` is the chip's table position plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChipEntry {
    pub code: u32,
    pub name: &'static str,
}

/// Ordered chip names. Blank slots have no chip but still occupy a position.
#[derive(Debug, Clone)]
pub struct NameTable {
    names: Vec<&'static str>,
}

impl NameTable {
    pub fn from_names(names: Vec<&'static str>) -> Self {
        Self { names }
    }

    fn parse(raw: &'static str) -> Self {
        Self::from_names(raw.lines().map(str::trim_end).collect())
    }

    /// Number of slots, blanks included.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Visible entries only, each keeping the code of its table slot.
    pub fn entries(&self) -> Vec<ChipEntry> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(index, name)| ChipEntry {
                code: index as u32 + 1,
                name,
            })
            .collect()
    }

    pub fn name_of(&self, code: u32) -> Option<&'static str> {
        let index = code.checked_sub(1)? as usize;
        self.names.get(index).copied().filter(|name| !name.is_empty())
    }

    pub fn find(&self, name: &str) -> Option<ChipEntry> {
        let wanted = name.trim();
        self.entries()
            .into_iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(wanted))
    }
}

/// Wire encoding of one selection: the code as a big-endian u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command([u8; 4]);

impl Command {
    pub fn new(code: u32) -> Result<Self, SelectorError> {
        if code == 0 {
            return Err(SelectorError::ReservedCode);
        }
        Ok(Self(code.to_be_bytes()))
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

/// Resolves a chip given either a numeric code or a name.
pub fn resolve(gate: GateKind, code: Option<u32>, name: Option<&str>) -> Result<ChipEntry, SelectorError> {
    let table = gate.table();
    if let Some(code) = code {
        if code == 0 {
            return Err(SelectorError::ReservedCode);
        }
        return table
            .name_of(code)
            .map(|name| ChipEntry { code, name })
            .ok_or(SelectorError::UnknownCode { gate, code });
    }
    let name = name.unwrap_or_default();
    table.find(name).ok_or_else(|| SelectorError::UnknownName {
        gate,
        name: name.to_string(),
    })
}
