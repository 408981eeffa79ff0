//! Core data types for ionflow
//!
//! Value types carried inside streams: ion hits, colours, axis-aligned bounds,
//! range tables and drawable overlays.
//!
//! # Main Types
//!
//! - [`IonHit`] - A single detected ion (position plus one scalar value)
//! - [`Colour`] - RGBA colour with hex round-tripping
//! - [`BoundingCube`] - Axis-aligned bounds accumulated from points
//! - [`RangeTable`] - Named ions with value intervals mapping to them
//! - [`Drawable`] - Overlay primitives emitted by geometry filters

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One detected ion.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IonHit {
    pub pos: [f32; 3],
    /// Scalar attached to the hit (mass-to-charge for atom-probe data).
    pub value: f32,
}

impl IonHit {
    pub fn new(x: f32, y: f32, z: f32, value: f32) -> Self {
        Self {
            pos: [x, y, z],
            value,
        }
    }
}

/// RGBA colour, components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Colour {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Colour {
    pub const RED: Colour = Colour::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Colour = Colour::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Colour = Colour::rgb(0.0, 0.0, 1.0);
    pub const WHITE: Colour = Colour::rgb(1.0, 1.0, 1.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Parse `#rrggbb` or `#rrggbbaa` (leading `#` optional).
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches('#');
        if !(s.len() == 6 || s.len() == 8) || !s.is_ascii() {
            return None;
        }
        let channel = |i: usize| -> Option<f32> {
            u8::from_str_radix(&s[i..i + 2], 16)
                .ok()
                .map(|v| v as f32 / 255.0)
        };
        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: if s.len() == 8 { channel(6)? } else { 1.0 },
        })
    }

    pub fn to_hex(&self) -> String {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        if c(self.a) == 255 {
            format!("#{:02x}{:02x}{:02x}", c(self.r), c(self.g), c(self.b))
        } else {
            format!(
                "#{:02x}{:02x}{:02x}{:02x}",
                c(self.r),
                c(self.g),
                c(self.b),
                c(self.a)
            )
        }
    }
}

impl Default for Colour {
    fn default() -> Self {
        Self::RED
    }
}

/// Axis-aligned bounding box. An empty cube has `min > max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingCube {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingCube {
    pub fn empty() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
        }
    }

    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    pub fn from_hits(hits: &[IonHit]) -> Self {
        let mut cube = Self::empty();
        for hit in hits {
            cube.expand(hit.pos);
        }
        cube
    }

    pub fn expand(&mut self, p: [f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    pub fn merge(&mut self, other: &BoundingCube) {
        if other.is_valid() {
            self.expand(other.min);
            self.expand(other.max);
        }
    }

    pub fn is_valid(&self) -> bool {
        (0..3).all(|axis| self.min[axis] <= self.max[axis])
    }

    pub fn contains(&self, p: [f32; 3]) -> bool {
        (0..3).all(|axis| p[axis] >= self.min[axis] && p[axis] <= self.max[axis])
    }

    pub fn size(&self) -> [f32; 3] {
        if !self.is_valid() {
            return [0.0; 3];
        }
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn centre(&self) -> [f32; 3] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }
}

impl Default for BoundingCube {
    fn default() -> Self {
        Self::empty()
    }
}

/// Overlay primitive for the 3D view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Drawable {
    BoundingBox {
        bounds: BoundingCube,
        colour: Colour,
    },
    /// Closed polygon, vertices in order.
    Polygon {
        vertices: Vec<[f32; 3]>,
        colour: Colour,
    },
    Text {
        position: [f32; 3],
        text: String,
        colour: Colour,
    },
}

/// A named species in a range table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeIon {
    pub name: String,
    pub colour: Colour,
}

/// Inclusive value interval `[lo, hi]` assigned to `ions[ion]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub lo: f32,
    pub hi: f32,
    pub ion: usize,
}

/// Errors from parsing a textual range table.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangeParseError {
    #[error("Entry '{0}' is missing ':' between name and ranges")]
    MissingSeparator(String),

    #[error("Empty ion name")]
    EmptyName,

    #[error("Duplicate ion name '{0}'")]
    DuplicateName(String),

    #[error("Invalid colour '{0}'")]
    BadColour(String),

    #[error("Invalid interval '{0}', expected lo..hi")]
    BadInterval(String),

    #[error("Interval {lo}..{hi} is reversed")]
    Reversed { lo: f32, hi: f32 },

    #[error("Interval {lo}..{hi} overlaps another range")]
    Overlap { lo: f32, hi: f32 },
}

/// Named ions plus non-overlapping value intervals mapping to them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeTable {
    ions: Vec<RangeIon>,
    ranges: Vec<ValueRange>,
}

/// Colours assigned to ions that do not specify one.
const DEFAULT_PALETTE: [Colour; 6] = [
    Colour::rgb(0.2, 0.4, 1.0),
    Colour::rgb(1.0, 0.6, 0.0),
    Colour::rgb(0.1, 0.7, 0.2),
    Colour::rgb(0.8, 0.1, 0.6),
    Colour::rgb(0.0, 0.7, 0.8),
    Colour::rgb(0.6, 0.5, 0.2),
];

impl RangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `name[#rrggbb]:lo..hi[,lo..hi];...`. Whitespace is ignored, an
    /// empty string gives an empty table and an empty interval list declares
    /// an ion without ranges.
    pub fn parse(text: &str) -> Result<Self, RangeParseError> {
        let mut table = RangeTable::new();
        for entry in text.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (head, intervals) = entry
                .split_once(':')
                .ok_or_else(|| RangeParseError::MissingSeparator(entry.to_string()))?;

            let (name, colour) = match head.split_once('#') {
                Some((name, hex)) => (
                    name.trim(),
                    Some(
                        Colour::from_hex(hex)
                            .ok_or_else(|| RangeParseError::BadColour(hex.to_string()))?,
                    ),
                ),
                None => (head.trim(), None),
            };
            if name.is_empty() {
                return Err(RangeParseError::EmptyName);
            }
            let colour =
                colour.unwrap_or(DEFAULT_PALETTE[table.ions.len() % DEFAULT_PALETTE.len()]);
            let ion = table.add_ion(name, colour)?;

            for interval in intervals.split(',').map(str::trim).filter(|i| !i.is_empty()) {
                let (lo, hi) = interval
                    .split_once("..")
                    .ok_or_else(|| RangeParseError::BadInterval(interval.to_string()))?;
                let lo: f32 = lo
                    .trim()
                    .parse()
                    .map_err(|_| RangeParseError::BadInterval(interval.to_string()))?;
                let hi: f32 = hi
                    .trim()
                    .parse()
                    .map_err(|_| RangeParseError::BadInterval(interval.to_string()))?;
                table.add_range(lo, hi, ion)?;
            }
        }
        Ok(table)
    }

    pub fn add_ion(&mut self, name: &str, colour: Colour) -> Result<usize, RangeParseError> {
        if name.is_empty() {
            return Err(RangeParseError::EmptyName);
        }
        if self.ions.iter().any(|i| i.name == name) {
            return Err(RangeParseError::DuplicateName(name.to_string()));
        }
        self.ions.push(RangeIon {
            name: name.to_string(),
            colour,
        });
        Ok(self.ions.len() - 1)
    }

    pub fn add_range(&mut self, lo: f32, hi: f32, ion: usize) -> Result<(), RangeParseError> {
        if !(lo <= hi) {
            return Err(RangeParseError::Reversed { lo, hi });
        }
        if self.ranges.iter().any(|r| lo <= r.hi && r.lo <= hi) {
            return Err(RangeParseError::Overlap { lo, hi });
        }
        debug_assert!(ion < self.ions.len());
        self.ranges.push(ValueRange { lo, hi, ion });
        Ok(())
    }

    pub fn ions(&self) -> &[RangeIon] {
        &self.ions
    }

    pub fn ranges(&self) -> &[ValueRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Index of the ion whose interval contains `value`, bounds inclusive.
    pub fn classify(&self, value: f32) -> Option<usize> {
        self.ranges
            .iter()
            .find(|r| value >= r.lo && value <= r.hi)
            .map(|r| r.ion)
    }

    /// Inverse of [`RangeTable::parse`].
    pub fn to_spec_string(&self) -> String {
        self.ions
            .iter()
            .enumerate()
            .map(|(idx, ion)| {
                let intervals: Vec<String> = self
                    .ranges
                    .iter()
                    .filter(|r| r.ion == idx)
                    .map(|r| format!("{}..{}", r.lo, r.hi))
                    .collect();
                format!("{}{}:{}", ion.name, ion.colour.to_hex(), intervals.join(","))
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl fmt::Display for RangeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_spec_string())
    }
}
