use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;

use crate::geometry::{Point, Shape};

/// Round a float to N decimal places.
pub fn round_f64(v: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (v * factor).round() / factor
}

/// Wrapper that rounds f64 to 6 decimal places on serialization.
fn serialize_f64_rounded<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round_f64(*v, 6))
}

pub(crate) fn serialize_point<S: Serializer>(p: &Point, s: S) -> Result<S::Ok, S::Error> {
    let rounded = [round_f64(p[0], 6), round_f64(p[1], 6)];
    rounded.serialize(s)
}

pub(crate) fn serialize_points<S: Serializer>(points: &[Point], s: S) -> Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(points.len()))?;
    for p in points {
        seq.serialize_element(&[round_f64(p[0], 6), round_f64(p[1], 6)])?;
    }
    seq.end()
}

pub(crate) fn serialize_rings<S: Serializer>(
    rings: &[Vec<Point>],
    s: S,
) -> Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(rings.len()))?;
    for ring in rings {
        let rounded: Vec<[f64; 2]> = ring
            .iter()
            .map(|p| [round_f64(p[0], 6), round_f64(p[1], 6)])
            .collect();
        seq.serialize_element(&rounded)?;
    }
    seq.end()
}

/// Unit system declared by a file. Output is always in millimeters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Millimeters,
    Inches,
}

impl Units {
    /// Multiplier converting file units to millimeters.
    pub fn scale(self) -> f64 {
        match self {
            Units::Millimeters => 1.0,
            Units::Inches => 25.4,
        }
    }
}

// ─── Excellon output ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    pub id: u32,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub diameter: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drill {
    pub tool_id: u32,
    #[serde(serialize_with = "serialize_point")]
    pub position: Point,
}

/// A milled slot: the tool path through consecutive positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mill {
    pub tool_id: u32,
    #[serde(serialize_with = "serialize_points")]
    pub positions: Vec<Point>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExcellonFile {
    /// Only the tools referenced by a drill or mill, ordered by id.
    pub tools: Vec<Tool>,
    pub drills: Vec<Drill>,
    pub mills: Vec<Mill>,
    pub geometry: Shape,
}
