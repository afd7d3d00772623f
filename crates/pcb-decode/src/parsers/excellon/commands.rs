use log::debug;

use crate::error::{DecodeError, Location};
use crate::types::Units;

/// Which zeros a fixed-point coordinate keeps.
///
/// `TZ` keeps trailing zeros (leading ones are dropped), `LZ` keeps leading
/// zeros (trailing ones are dropped).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZeroSuppression {
    #[default]
    KeepTrailing,
    KeepLeading,
}

/// Coordinate format: how many integer and decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat {
    pub integer: u8,
    pub decimal: u8,
}

impl NumberFormat {
    /// Format assumed when a file declares units but no digit layout.
    pub fn default_for(units: Units) -> Self {
        match units {
            Units::Millimeters => NumberFormat {
                integer: 3,
                decimal: 3,
            },
            Units::Inches => NumberFormat {
                integer: 2,
                decimal: 4,
            },
        }
    }
}

/// One coordinate value as written in the file.
#[derive(Debug, Clone, PartialEq)]
pub enum Coordinate {
    /// Has an explicit decimal point: `X14.478`.
    Decimal(f64),
    /// Fixed-point digits whose decimal position comes from the format: `X14478`.
    Fixed { negative: bool, digits: String },
}

impl Coordinate {
    /// Value in file units.
    pub fn value(&self, format: NumberFormat, zeros: ZeroSuppression) -> f64 {
        match self {
            Coordinate::Decimal(v) => *v,
            Coordinate::Fixed { negative, digits } => {
                let total = (format.integer + format.decimal) as usize;
                let mut padded = digits.clone();
                while padded.len() < total {
                    match zeros {
                        ZeroSuppression::KeepTrailing => padded.insert(0, '0'),
                        ZeroSuppression::KeepLeading => padded.push('0'),
                    }
                }
                let raw = padded
                    .bytes()
                    .fold(0f64, |acc, b| acc * 10.0 + f64::from(b - b'0'));
                let value = raw / 10f64.powi(format.decimal as i32);
                if *negative {
                    -value
                } else {
                    value
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExcellonCommand {
    UnitMode {
        units: Units,
        zeros: Option<ZeroSuppression>,
        format: Option<NumberFormat>,
    },
    ToolDefinition {
        id: u32,
        diameter: f64,
    },
    /// `T0` unloads the current tool.
    SelectTool(u32),
    Drill {
        x: Option<Coordinate>,
        y: Option<Coordinate>,
    },
    Move {
        x: Option<Coordinate>,
        y: Option<Coordinate>,
    },
    Mill {
        x: Option<Coordinate>,
        y: Option<Coordinate>,
    },
    AbsolutePositioning,
    RelativePositioning,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub location: Location,
    pub kind: ExcellonCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Start,
    Header,
    Body,
}

/// Parse Excellon drill text into an ordered command list.
///
/// The `M48` header is optional. The body must end with `M30`; anything after
/// it is ignored.
pub fn parse(text: &str) -> Result<Vec<Command>, DecodeError> {
    let mut commands = Vec::new();
    let mut section = Section::Start;

    for (index, raw) in text.lines().enumerate() {
        let indent = raw.len() - raw.trim_start().len();
        let location = Location::new(index + 1, raw[..indent].chars().count() + 1);
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        let upper = line.to_ascii_uppercase();

        if section == Section::Start {
            section = Section::Body;
            if upper == "M48" {
                section = Section::Header;
                continue;
            }
        }

        if section == Section::Header {
            if upper == "%" || upper == "M95" {
                section = Section::Body;
            } else if let Some(kind) = parse_header_line(&upper, location)? {
                commands.push(Command { location, kind });
            }
            continue;
        }

        let kind = parse_body_line(&upper, location)?;
        let end = kind == Some(ExcellonCommand::End);
        if let Some(kind) = kind {
            commands.push(Command { location, kind });
        }
        if end {
            return Ok(commands);
        }
    }

    let message = match section {
        Section::Header => "unterminated M48 header",
        _ => "missing M30",
    };
    Err(DecodeError::syntax(Location::end_of(text), message))
}

/// `T<digits>...C<diameter>`; excludes header switches such as `TCST,ON`.
fn is_tool_definition(line: &str) -> bool {
    line.strip_prefix('T')
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()) && rest.contains('C'))
}

fn parse_header_line(
    line: &str,
    location: Location,
) -> Result<Option<ExcellonCommand>, DecodeError> {
    if let Some(kind) = parse_unit_mode(line, location)? {
        return Ok(Some(kind));
    }
    if is_tool_definition(line) {
        return parse_tool_definition(line, location).map(Some);
    }
    debug!("Excellon: ignoring header line '{line}'");
    Ok(None)
}

fn parse_body_line(
    line: &str,
    location: Location,
) -> Result<Option<ExcellonCommand>, DecodeError> {
    if let Some(kind) = parse_unit_mode(line, location)? {
        return Ok(Some(kind));
    }

    let kind = match line {
        "M30" => ExcellonCommand::End,
        "G90" => ExcellonCommand::AbsolutePositioning,
        "G91" => ExcellonCommand::RelativePositioning,
        "G05" | "M15" | "M16" | "M17" => return Ok(None),
        _ if is_tool_definition(line) => {
            parse_tool_definition(line, location)?
        }
        _ if line.starts_with('T') => ExcellonCommand::SelectTool(parse_tool_id(line, location)?),
        _ if line.starts_with('X') || line.starts_with('Y') => {
            let (x, y) = parse_coordinates(line, location)?;
            ExcellonCommand::Drill { x, y }
        }
        _ => {
            if let Some(rest) = line.strip_prefix("G00") {
                let (x, y) = parse_coordinates(rest, location)?;
                ExcellonCommand::Move { x, y }
            } else if let Some(rest) = line.strip_prefix("G01") {
                let (x, y) = parse_coordinates(rest, location)?;
                ExcellonCommand::Mill { x, y }
            } else {
                return Err(DecodeError::syntax(
                    location,
                    format!("unrecognized drill command '{line}'"),
                ));
            }
        }
    };
    Ok(Some(kind))
}

/// `METRIC[,TZ|LZ][,000.000]`, `INCH[,...]`, `M71` or `M72`.
fn parse_unit_mode(
    line: &str,
    location: Location,
) -> Result<Option<ExcellonCommand>, DecodeError> {
    match line {
        "M71" => {
            return Ok(Some(ExcellonCommand::UnitMode {
                units: Units::Millimeters,
                zeros: None,
                format: None,
            }))
        }
        "M72" => {
            return Ok(Some(ExcellonCommand::UnitMode {
                units: Units::Inches,
                zeros: None,
                format: None,
            }))
        }
        _ => {}
    }

    let mut parts = line.split(',').map(str::trim);
    let units = match parts.next() {
        Some("METRIC") => Units::Millimeters,
        Some("INCH") => Units::Inches,
        _ => return Ok(None),
    };

    let mut zeros = None;
    let mut format = None;
    for part in parts {
        match part {
            "TZ" => zeros = Some(ZeroSuppression::KeepTrailing),
            "LZ" => zeros = Some(ZeroSuppression::KeepLeading),
            _ => format = Some(parse_number_format(part, location)?),
        }
    }

    Ok(Some(ExcellonCommand::UnitMode {
        units,
        zeros,
        format,
    }))
}

/// Digit layout written as zeros around a point, e.g. `000.000` or `00.0000`.
fn parse_number_format(part: &str, location: Location) -> Result<NumberFormat, DecodeError> {
    let invalid = || DecodeError::syntax(location, format!("invalid number format '{part}'"));
    let (integer, decimal) = part.split_once('.').ok_or_else(invalid)?;
    if !integer.bytes().chain(decimal.bytes()).all(|b| b == b'0') {
        return Err(invalid());
    }
    if integer.is_empty() || decimal.is_empty() || integer.len() + decimal.len() > 12 {
        return Err(invalid());
    }
    Ok(NumberFormat {
        integer: integer.len() as u8,
        decimal: decimal.len() as u8,
    })
}

fn parse_tool_id(line: &str, location: Location) -> Result<u32, DecodeError> {
    let digits: String = line[1..].chars().take_while(char::is_ascii_digit).collect();
    digits
        .parse()
        .map_err(|_| DecodeError::syntax(location, format!("invalid tool number in '{line}'")))
}

/// `Tnn[F..][S..]Cdd.dd[...]`: only the diameter is kept.
fn parse_tool_definition(line: &str, location: Location) -> Result<ExcellonCommand, DecodeError> {
    let id = parse_tool_id(line, location)?;
    let diameter = parameter(line, 'C')
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|d| *d >= 0.0)
        .ok_or_else(|| {
            DecodeError::syntax(location, format!("invalid tool diameter in '{line}'"))
        })?;
    Ok(ExcellonCommand::ToolDefinition { id, diameter })
}

/// Text following `letter` up to the next letter.
fn parameter(line: &str, letter: char) -> Option<&str> {
    let start = line.find(letter)? + 1;
    let rest = &line[start..];
    let end = rest
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn parse_coordinates(
    line: &str,
    location: Location,
) -> Result<(Option<Coordinate>, Option<Coordinate>), DecodeError> {
    let invalid = || DecodeError::syntax(location, format!("invalid coordinates '{line}'"));

    let mut x = None;
    let mut y = None;
    let mut rest = line;
    while let Some(axis) = rest.chars().next() {
        let body = &rest[axis.len_utf8()..];
        let end = body
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(body.len());
        let value = parse_coordinate(&body[..end]).ok_or_else(invalid)?;
        match axis {
            'X' if x.is_none() => x = Some(value),
            'Y' if y.is_none() => y = Some(value),
            _ => return Err(invalid()),
        }
        rest = &body[end..];
    }

    if x.is_none() && y.is_none() {
        return Err(invalid());
    }
    Ok((x, y))
}

fn parse_coordinate(text: &str) -> Option<Coordinate> {
    if text.contains('.') {
        return text.parse().ok().map(Coordinate::Decimal);
    }
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(Coordinate::Fixed {
        negative,
        digits: digits.to_string(),
    })
}
