use std::iter::Peekable;
use std::num::IntErrorKind;
use std::vec::IntoIter;

use log::debug;

use crate::error::{DecodeError, Location, SemanticError};
use crate::types::Units;

use super::coord::{CoordinateFormat, Notation, ZeroOmission};
use super::lexer::{GerberToken, Token};
use super::macros::{parse_macro_body, MacroStatement};

/// Aperture shape template from an %AD command. Sizes are in file units.
#[derive(Debug, Clone, PartialEq)]
pub enum ApertureTemplate {
    Circle {
        diameter: f64,
        hole: Option<f64>,
    },
    Rectangle {
        x_size: f64,
        y_size: f64,
        hole: Option<f64>,
    },
    Obround {
        x_size: f64,
        y_size: f64,
        hole: Option<f64>,
    },
    Polygon {
        outer_diameter: f64,
        num_vertices: u32,
        rotation: f64,
        hole: Option<f64>,
    },
    /// Reference to a user-defined aperture macro.
    Macro { name: String, params: Vec<f64> },
}

/// Layer polarity from %LP command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Polarity {
    #[default]
    Dark,
    Clear,
}

/// Aperture mirroring from %LM command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mirroring {
    #[default]
    None,
    X,
    Y,
    XY,
}

/// One closed outline inside a G36/G37 region.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    /// Only Move, Plot, interpolation-mode and Comment commands.
    pub commands: Vec<Command>,
}

/// A parsed Gerber command and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub location: Location,
    pub kind: GerberCommand,
}

impl Command {
    pub fn new(location: Location, kind: GerberCommand) -> Self {
        Self { location, kind }
    }
}

/// A fully parsed Gerber command.
#[derive(Debug, Clone, PartialEq)]
pub enum GerberCommand {
    /// %MO - Unit mode
    UnitsMode(Units),
    /// %FS - Format specification
    FormatSpecification(CoordinateFormat),
    /// %AD - Aperture definition
    ApertureDefinition {
        code: u32,
        template: ApertureTemplate,
    },
    /// %AM - Aperture macro definition
    ApertureMacro {
        name: String,
        body: Vec<MacroStatement>,
    },
    /// Dnn (n >= 10) - Select aperture
    SetCurrentAperture(u32),
    /// D01 - Plot (draw)
    Plot {
        x: Option<i64>,
        y: Option<i64>,
        i: Option<i64>,
        j: Option<i64>,
    },
    /// D02 - Move
    Move { x: Option<i64>, y: Option<i64> },
    /// D03 - Flash
    Flash { x: Option<i64>, y: Option<i64> },
    /// G01 - Linear interpolation mode
    LinearMode,
    /// G02 - Clockwise circular interpolation
    CwCircularMode,
    /// G03 - Counter-clockwise circular interpolation
    CcwCircularMode,
    /// G74/G75 - Legacy quadrant mode; arcs are always multi-quadrant
    PrepareCircularMode,
    /// %LP - Load polarity
    Polarity(Polarity),
    /// %LM - Load mirroring
    Mirror(Mirroring),
    /// %LR - Load rotation, degrees counter-clockwise
    Rotate(f64),
    /// %LS - Load scaling
    Scale(f64),
    /// %TF
    FileAttribute { name: String, values: Vec<String> },
    /// %TA
    ApertureAttribute { name: String, values: Vec<String> },
    /// %TO
    ObjectAttribute { name: String, values: Vec<String> },
    /// %TD
    DeleteAttribute { name: Option<String> },
    /// G36 ... G37
    Region { contours: Vec<Contour> },
    /// %ABDnn*% ... %AB*%
    BlockAperture { code: u32, body: Vec<Command> },
    /// %SRXiYjIxJy*% ... %SR*%
    StepAndRepeat {
        x_repeats: u32,
        y_repeats: u32,
        x_step: f64,
        y_step: f64,
        body: Vec<Command>,
    },
    /// G04
    Comment(String),
    /// M02 - End of file
    End,
    /// A word command that is not recognized.
    UnknownCommand(String),
    /// An extended (`%`) command that is not recognized.
    UnknownMacro(String),
}

impl GerberCommand {
    fn name(&self) -> &'static str {
        match self {
            GerberCommand::UnitsMode(_) => "MO",
            GerberCommand::FormatSpecification(_) => "FS",
            GerberCommand::ApertureDefinition { .. } => "AD",
            GerberCommand::ApertureMacro { .. } => "AM",
            GerberCommand::SetCurrentAperture(_) => "Dnn",
            GerberCommand::Plot { .. } => "D01",
            GerberCommand::Move { .. } => "D02",
            GerberCommand::Flash { .. } => "D03",
            GerberCommand::LinearMode => "G01",
            GerberCommand::CwCircularMode => "G02",
            GerberCommand::CcwCircularMode => "G03",
            GerberCommand::PrepareCircularMode => "G75",
            GerberCommand::Polarity(_) => "LP",
            GerberCommand::Mirror(_) => "LM",
            GerberCommand::Rotate(_) => "LR",
            GerberCommand::Scale(_) => "LS",
            GerberCommand::FileAttribute { .. } => "TF",
            GerberCommand::ApertureAttribute { .. } => "TA",
            GerberCommand::ObjectAttribute { .. } => "TO",
            GerberCommand::DeleteAttribute { .. } => "TD",
            GerberCommand::Region { .. } => "G36",
            GerberCommand::BlockAperture { .. } => "AB",
            GerberCommand::StepAndRepeat { .. } => "SR",
            GerberCommand::Comment(_) => "G04",
            GerberCommand::End => "M02",
            GerberCommand::UnknownCommand(_) | GerberCommand::UnknownMacro(_) => "unknown command",
        }
    }

    fn allowed_in_region(&self) -> bool {
        matches!(
            self,
            GerberCommand::Plot { .. }
                | GerberCommand::Move { .. }
                | GerberCommand::LinearMode
                | GerberCommand::CwCircularMode
                | GerberCommand::CcwCircularMode
                | GerberCommand::PrepareCircularMode
                | GerberCommand::Comment(_)
        )
    }
}

/// Step-and-repeat grid parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Grid {
    x_repeats: u32,
    y_repeats: u32,
    x_step: f64,
    y_step: f64,
}

/// Flat classification of one statement, before nesting is resolved.
#[derive(Debug)]
enum Item {
    Command(Command),
    RegionBegin(Location),
    RegionEnd(Location),
    BlockOpen(Location, u32),
    BlockClose(Location),
    RepeatOpen(Location, Grid),
    RepeatClose(Location),
    End(Location),
}

/// Modal state that changes how later words are read.
#[derive(Debug, Default)]
struct WordState {
    last_operation: Option<u32>,
    format: Option<CoordinateFormat>,
}

/// Parse a token stream into a tree of Gerber commands.
///
/// `eof` is reported when the input ends before `M02*`.
pub fn parse_commands(tokens: Vec<Token>, eof: Location) -> Result<Vec<Command>, DecodeError> {
    let mut items = Vec::with_capacity(tokens.len());
    let mut state = WordState::default();

    for Token { location, token } in tokens {
        match token {
            GerberToken::Extended(text) => {
                let item = parse_extended(&text, location)?;
                if let Item::Command(Command {
                    kind: GerberCommand::FormatSpecification(format),
                    ..
                }) = &item
                {
                    state.format = Some(*format);
                }
                items.push(item);
            }
            GerberToken::ApertureMacro { name, body } => {
                let body = parse_macro_body(&body)?;
                items.push(Item::Command(Command::new(
                    location,
                    GerberCommand::ApertureMacro { name, body },
                )));
            }
            GerberToken::Word(text) => {
                items.extend(parse_word(&text, location, &mut state)?);
            }
        }
    }

    let mut items = items.into_iter().peekable();
    parse_scope(&mut items, Scope::File, eof)
}

// ─── Nesting ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scope {
    File,
    Block(Location),
    Repeat(Location),
}

type Items = Peekable<IntoIter<Item>>;

fn parse_scope(items: &mut Items, scope: Scope, eof: Location) -> Result<Vec<Command>, DecodeError> {
    let mut commands = Vec::new();

    let unterminated = |what: &str, location: Location| {
        DecodeError::syntax(location, format!("unterminated {what}"))
    };

    loop {
        let Some(item) = items.next() else {
            return Err(match scope {
                Scope::File => DecodeError::syntax(eof, "missing M02*"),
                Scope::Block(open) => unterminated("block aperture", open),
                Scope::Repeat(open) => unterminated("step and repeat", open),
            });
        };

        match item {
            Item::Command(command) => commands.push(command),
            Item::End(location) => match scope {
                Scope::File => {
                    commands.push(Command::new(location, GerberCommand::End));
                    if items.peek().is_some() {
                        debug!("Gerber: ignoring content after M02 at {location}");
                    }
                    return Ok(commands);
                }
                Scope::Block(open) => return Err(unterminated("block aperture", open)),
                Scope::Repeat(open) => return Err(unterminated("step and repeat", open)),
            },
            Item::RegionBegin(location) => {
                let contours = parse_region(items, location)?;
                commands.push(Command::new(location, GerberCommand::Region { contours }));
            }
            Item::RegionEnd(location) => {
                return Err(DecodeError::syntax(location, "G37 without G36"));
            }
            Item::BlockOpen(location, code) => {
                let body = parse_scope(items, Scope::Block(location), eof)?;
                commands.push(Command::new(
                    location,
                    GerberCommand::BlockAperture { code, body },
                ));
            }
            Item::BlockClose(location) => match scope {
                Scope::Block(_) => return Ok(commands),
                _ => return Err(DecodeError::syntax(location, "%AB*% without open block")),
            },
            Item::RepeatOpen(location, grid) => {
                let single = grid.x_repeats == 1 && grid.y_repeats == 1;
                match scope {
                    // Legacy files reset SR with a 1x1 grid instead of a bare %SR*%.
                    Scope::Repeat(_) if single => return Ok(commands),
                    Scope::Repeat(open) => {
                        return Err(DecodeError::syntax(
                            location,
                            format!("step and repeat nested in the one opened at {open}"),
                        ));
                    }
                    _ if single => debug!("Gerber: ignoring 1x1 step and repeat at {location}"),
                    _ => {
                        let body = parse_scope(items, Scope::Repeat(location), eof)?;
                        commands.push(Command::new(
                            location,
                            GerberCommand::StepAndRepeat {
                                x_repeats: grid.x_repeats,
                                y_repeats: grid.y_repeats,
                                x_step: grid.x_step,
                                y_step: grid.y_step,
                                body,
                            },
                        ));
                    }
                }
            }
            Item::RepeatClose(location) => match scope {
                Scope::Repeat(_) => return Ok(commands),
                _ => return Err(DecodeError::syntax(location, "%SR*% without open step and repeat")),
            },
        }
    }
}

/// Collect contours up to G37. A D02 starts a new contour.
fn parse_region(items: &mut Items, begin: Location) -> Result<Vec<Contour>, DecodeError> {
    let mut contours = Vec::new();
    let mut current: Vec<Command> = Vec::new();

    loop {
        match items.next() {
            None | Some(Item::End(_)) => {
                return Err(DecodeError::syntax(begin, "unterminated region"));
            }
            Some(Item::RegionEnd(_)) => {
                if !current.is_empty() {
                    contours.push(Contour { commands: current });
                }
                return Ok(contours);
            }
            Some(Item::Command(command)) => {
                if !command.kind.allowed_in_region() {
                    return Err(DecodeError::syntax(
                        command.location,
                        format!("unexpected {} inside region", command.kind.name()),
                    ));
                }
                if matches!(command.kind, GerberCommand::Move { .. }) && !current.is_empty() {
                    contours.push(Contour {
                        commands: std::mem::take(&mut current),
                    });
                }
                current.push(command);
            }
            Some(
                Item::RegionBegin(location)
                | Item::BlockOpen(location, _)
                | Item::BlockClose(location)
                | Item::RepeatOpen(location, _)
                | Item::RepeatClose(location),
            ) => {
                return Err(DecodeError::syntax(location, "unexpected command inside region"));
            }
        }
    }
}

// ─── Extended commands ──────────────────────────────────────────────

/// Parse one statement of a `%` block.
fn parse_extended(content: &str, location: Location) -> Result<Item, DecodeError> {
    let command = |kind| Ok(Item::Command(Command::new(location, kind)));

    if let Some(text) = comment_text(content) {
        return command(GerberCommand::Comment(text));
    }

    // Attributes keep their spacing; everything else ignores whitespace.
    if let Some(attr) = parse_attribute(content) {
        return command(attr);
    }

    let content: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let syntax = |message: String| DecodeError::syntax(location, message);

    if content.starts_with("FS") {
        return command(parse_format_spec(&content).map_err(syntax)?);
    }
    if let Some(units) = content.strip_prefix("MO") {
        return match units {
            "MM" => command(GerberCommand::UnitsMode(Units::Millimeters)),
            "IN" => command(GerberCommand::UnitsMode(Units::Inches)),
            other => Err(DecodeError::semantic(
                location,
                SemanticError::UnsupportedUnits(other.to_string()),
            )),
        };
    }
    if let Some(rest) = content.strip_prefix("AD") {
        let (code, template) = parse_aperture_define(rest).map_err(syntax)?;
        return command(GerberCommand::ApertureDefinition { code, template });
    }
    if let Some(rest) = content.strip_prefix("LP") {
        return match rest {
            "D" => command(GerberCommand::Polarity(Polarity::Dark)),
            "C" => command(GerberCommand::Polarity(Polarity::Clear)),
            other => Err(syntax(format!("LP: expected C or D, got '{other}'"))),
        };
    }
    if let Some(rest) = content.strip_prefix("LM") {
        let mirroring = match rest {
            "N" => Mirroring::None,
            "X" => Mirroring::X,
            "Y" => Mirroring::Y,
            "XY" => Mirroring::XY,
            other => return Err(syntax(format!("LM: expected N, X, Y or XY, got '{other}'"))),
        };
        return command(GerberCommand::Mirror(mirroring));
    }
    if let Some(rest) = content.strip_prefix("LR") {
        let degrees = parse_decimal(rest).map_err(syntax)?;
        return command(GerberCommand::Rotate(degrees));
    }
    if let Some(rest) = content.strip_prefix("LS") {
        let factor = parse_decimal(rest).map_err(syntax)?;
        return command(GerberCommand::Scale(factor));
    }
    if let Some(rest) = content.strip_prefix("AB") {
        if rest.is_empty() {
            return Ok(Item::BlockClose(location));
        }
        let code = rest
            .strip_prefix('D')
            .and_then(|c| c.parse::<u32>().ok())
            .ok_or_else(|| syntax(format!("AB: bad aperture code '{rest}'")))?;
        return Ok(Item::BlockOpen(location, code));
    }
    if let Some(rest) = content.strip_prefix("SR") {
        if rest.is_empty() {
            return Ok(Item::RepeatClose(location));
        }
        return Ok(Item::RepeatOpen(location, parse_step_repeat(rest).map_err(syntax)?));
    }

    debug!("Gerber: unknown extended command '{content}' at {location}");
    command(GerberCommand::UnknownMacro(content))
}

fn comment_text(s: &str) -> Option<String> {
    let rest = s.strip_prefix("G04").or_else(|| {
        s.strip_prefix("G4")
            .filter(|r| !r.starts_with(|c: char| c.is_ascii_digit()))
    })?;
    Some(rest.trim().to_string())
}

/// %TF / %TA / %TO / %TD. Values are kept verbatim.
fn parse_attribute(content: &str) -> Option<GerberCommand> {
    let (kind, rest) = content.split_at_checked(2)?;
    if kind == "TD" {
        let name = rest.trim();
        return Some(GerberCommand::DeleteAttribute {
            name: (!name.is_empty()).then(|| name.to_string()),
        });
    }
    let mut fields = rest.split(',');
    let name = fields.next()?.trim().to_string();
    let values = fields.map(str::to_string).collect();
    match kind {
        "TF" => Some(GerberCommand::FileAttribute { name, values }),
        "TA" => Some(GerberCommand::ApertureAttribute { name, values }),
        "TO" => Some(GerberCommand::ObjectAttribute { name, values }),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Result<f64, String> {
    s.parse::<f64>().map_err(|_| format!("bad decimal '{s}'"))
}

/// Parse %FS command. Example: `FSLAX24Y24`
fn parse_format_spec(content: &str) -> Result<GerberCommand, String> {
    // Expected format: FS[L|T][A|I]X<n><m>Y<n><m>
    let s = &content[2..]; // skip "FS"

    let (zeros, s) = match s.strip_prefix('T') {
        Some(rest) => (ZeroOmission::Trailing, rest),
        None => (ZeroOmission::Leading, s.strip_prefix('L').unwrap_or(s)),
    };
    let (notation, s) = match s.strip_prefix('I') {
        Some(rest) => (Notation::Incremental, rest),
        None => (Notation::Absolute, s.strip_prefix('A').unwrap_or(s)),
    };
    if !s.starts_with('X') {
        return Err(format!("FS: unexpected modes in '{content}'"));
    }

    let x_pos = s.find('X').ok_or("FS: missing X")?;
    let y_pos = s.find('Y').ok_or("FS: missing Y")?;
    if y_pos < x_pos {
        return Err(format!("FS: X must come before Y in '{content}'"));
    }

    let (x_integer, x_decimal) = parse_format_digits(&s[x_pos + 1..y_pos])?;
    let (y_integer, y_decimal) = parse_format_digits(&s[y_pos + 1..])?;

    Ok(GerberCommand::FormatSpecification(CoordinateFormat {
        zeros,
        notation,
        x_integer,
        x_decimal,
        y_integer,
        y_decimal,
    }))
}

fn parse_format_digits(part: &str) -> Result<(u8, u8), String> {
    if part.len() < 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("FS: invalid format digits '{part}'"));
    }
    let split = part.len() - 1;
    let integer = part[..split]
        .parse::<u8>()
        .map_err(|_| format!("FS: bad integer digits '{part}'"))?;
    let decimal = part[split..]
        .parse::<u8>()
        .map_err(|_| format!("FS: bad decimal digits '{part}'"))?;
    Ok((integer, decimal))
}

/// Parse the part of an %AD command after `AD`. Example: `D10C,0.020`
fn parse_aperture_define(s: &str) -> Result<(u32, ApertureTemplate), String> {
    // Must start with D followed by aperture code
    let s = s
        .strip_prefix('D')
        .ok_or_else(|| format!("AD: expected D, got: {s}"))?;

    // Find where the code ends and the template name begins
    let type_pos = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("AD: no template in: {s}"))?;

    let code: u32 = s[..type_pos]
        .parse()
        .map_err(|_| format!("AD: bad aperture code: {s}"))?;
    if code < 10 {
        return Err(format!("AD: aperture code D{code} is reserved"));
    }

    let template = parse_aperture_template(&s[type_pos..])?;
    Ok((code, template))
}

/// Parse aperture template. Example: `C,0.020` or `R,0.040X0.020`
fn parse_aperture_template(s: &str) -> Result<ApertureTemplate, String> {
    let (type_name, params_str) = match s.split_once(',') {
        Some((name, params)) => (name, params),
        None => (s, ""),
    };

    let params: Vec<f64> = if params_str.is_empty() {
        Vec::new()
    } else {
        params_str
            .split('X')
            .map(|p| p.parse::<f64>().map_err(|_| format!("AD: bad param: {p}")))
            .collect::<Result<Vec<_>, _>>()?
    };

    let arity = |min: usize, max: usize| {
        if params.len() < min || params.len() > max {
            Err(format!(
                "AD {type_name}: expected {min} to {max} parameters, got {}",
                params.len()
            ))
        } else {
            Ok(())
        }
    };

    match type_name {
        "C" => {
            arity(1, 2)?;
            Ok(ApertureTemplate::Circle {
                diameter: params[0],
                hole: params.get(1).copied(),
            })
        }
        "R" => {
            arity(2, 3)?;
            Ok(ApertureTemplate::Rectangle {
                x_size: params[0],
                y_size: params[1],
                hole: params.get(2).copied(),
            })
        }
        "O" => {
            arity(2, 3)?;
            Ok(ApertureTemplate::Obround {
                x_size: params[0],
                y_size: params[1],
                hole: params.get(2).copied(),
            })
        }
        "P" => {
            arity(2, 4)?;
            let num_vertices = params[1];
            if num_vertices.fract() != 0.0 || !(3.0..=12.0).contains(&num_vertices) {
                return Err(format!("AD P: vertex count must be 3 to 12, got {num_vertices}"));
            }
            Ok(ApertureTemplate::Polygon {
                outer_diameter: params[0],
                num_vertices: num_vertices as u32,
                rotation: params.get(2).copied().unwrap_or(0.0),
                hole: params.get(3).copied(),
            })
        }
        "" => Err("AD: missing template name".into()),
        // Aperture macro reference: params are passed through
        _ => Ok(ApertureTemplate::Macro {
            name: type_name.to_string(),
            params,
        }),
    }
}

/// Parse the part of an %SR command after `SR`. Example: `X3Y2I5.0J10.0`
fn parse_step_repeat(s: &str) -> Result<Grid, String> {
    // All fields optional, defaults are 1/1/0/0.
    let x_repeats = parse_sr_field::<u32>(s, 'X')?.unwrap_or(1);
    let y_repeats = parse_sr_field::<u32>(s, 'Y')?.unwrap_or(1);
    let x_step = parse_sr_field::<f64>(s, 'I')?.unwrap_or(0.0);
    let y_step = parse_sr_field::<f64>(s, 'J')?.unwrap_or(0.0);
    if x_repeats == 0 || y_repeats == 0 {
        return Err(format!("SR: repeat counts must be positive in '{s}'"));
    }
    Ok(Grid {
        x_repeats,
        y_repeats,
        x_step,
        y_step,
    })
}

/// Extract the value after a given key letter in a SR parameter string.
fn parse_sr_field<T: std::str::FromStr>(s: &str, key: char) -> Result<Option<T>, String> {
    let Some(pos) = s.find(key) else {
        return Ok(None);
    };
    let after = &s[pos + 1..];
    let end = after
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(after.len());
    after[..end]
        .parse()
        .map(Some)
        .map_err(|_| format!("SR: bad {key} value in '{s}'"))
}

// ─── Word commands ──────────────────────────────────────────────────

/// Parse a word command (e.g., "D10", "X100Y200D01", "G01", "M02").
///
/// A word may carry a leading interpolation mode (e.g., "G01X100Y200D01"),
/// which is emitted as its own command before the operation.
fn parse_word(word: &str, location: Location, state: &mut WordState) -> Result<Vec<Item>, DecodeError> {
    let command = |kind| Item::Command(Command::new(location, kind));

    if let Some(text) = comment_text(word) {
        return Ok(vec![command(GerberCommand::Comment(text))]);
    }

    let compact: String = word
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if !compact.is_ascii() {
        return Err(DecodeError::syntax(
            location,
            format!("non-ASCII character in command '{word}'"),
        ));
    }
    let unknown = || {
        debug!("Gerber: unknown command '{word}' at {location}");
        Ok(vec![command(GerberCommand::UnknownCommand(word.to_string()))])
    };

    if compact == "M02" || compact == "M2" {
        return Ok(vec![Item::End(location)]);
    }

    let mut items = Vec::new();
    let mut rest = compact.as_str();

    if let Some(after_g) = rest.strip_prefix('G') {
        let digits = after_g
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after_g.len());
        let Ok(code) = after_g[..digits].parse::<u32>() else {
            return unknown();
        };
        rest = &after_g[digits..];
        match code {
            1 => items.push(command(GerberCommand::LinearMode)),
            2 => items.push(command(GerberCommand::CwCircularMode)),
            3 => items.push(command(GerberCommand::CcwCircularMode)),
            74 | 75 if rest.is_empty() => {
                return Ok(vec![command(GerberCommand::PrepareCircularMode)]);
            }
            36 if rest.is_empty() => return Ok(vec![Item::RegionBegin(location)]),
            37 if rest.is_empty() => return Ok(vec![Item::RegionEnd(location)]),
            70 if rest.is_empty() => {
                return Ok(vec![command(GerberCommand::UnitsMode(Units::Inches))]);
            }
            71 if rest.is_empty() => {
                return Ok(vec![command(GerberCommand::UnitsMode(Units::Millimeters))]);
            }
            // Legacy "select aperture" prefix: G54D10
            54 | 55 if !rest.is_empty() => {}
            _ => return unknown(),
        }
        if rest.is_empty() {
            return Ok(items);
        }
    }

    match parse_operation(rest, state).map_err(|message| DecodeError::syntax(location, message))? {
        Some(kind) => {
            items.push(command(kind));
            Ok(items)
        }
        None => unknown(),
    }
}

/// Read one coordinate value, restoring omitted trailing zeros.
///
/// `Ok(None)` means the value is not a number at all.
fn parse_coordinate(
    key: char,
    value: &str,
    format: Option<&CoordinateFormat>,
) -> Result<Option<i64>, String> {
    let is_x = matches!(key, 'X' | 'I');
    let (sign, digits) = match value.strip_prefix(['+', '-']) {
        Some(digits) => (&value[..1], digits),
        None => ("", value),
    };
    let digits = match format {
        Some(format) => format.pad(digits, is_x),
        None => digits.into(),
    };
    match format!("{sign}{digits}").parse::<i64>() {
        Ok(v) => Ok(Some(v)),
        Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => {
            Err(format!("coordinate {key}{value} overflows a 64-bit integer"))
        }
        Err(_) => Ok(None),
    }
}

/// Parse `[X][Y][I][J]Dnn`. Without a D code the previous operation repeats.
///
/// `Ok(None)` marks a word that is not an operation.
fn parse_operation(s: &str, state: &mut WordState) -> Result<Option<GerberCommand>, String> {
    let mut x: Option<i64> = None;
    let mut y: Option<i64> = None;
    let mut i: Option<i64> = None;
    let mut j: Option<i64> = None;
    let mut d_code: Option<u32> = None;

    let bytes = s.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        let key = bytes[pos];
        pos += 1;
        let start = pos;
        if pos < bytes.len() && (bytes[pos] == b'+' || bytes[pos] == b'-') {
            pos += 1;
        }
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let value = &s[start..pos];
        let slot = match key {
            b'X' => &mut x,
            b'Y' => &mut y,
            b'I' => &mut i,
            b'J' => &mut j,
            b'D' => match value.parse() {
                Ok(code) => {
                    d_code = Some(code);
                    continue;
                }
                Err(_) => return Ok(None),
            },
            _ => return Ok(None),
        };
        match parse_coordinate(key as char, value, state.format.as_ref())? {
            Some(v) => *slot = Some(v),
            None => return Ok(None),
        }
    }

    let has_coords = x.is_some() || y.is_some() || i.is_some() || j.is_some();
    let code = match d_code {
        Some(code) if code >= 10 && !has_coords => {
            return Ok(Some(GerberCommand::SetCurrentAperture(code)));
        }
        Some(code @ 1..=3) => {
            state.last_operation = Some(code);
            code
        }
        None if has_coords => match state.last_operation {
            Some(code) => code,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };

    Ok(Some(match code {
        1 => GerberCommand::Plot { x, y, i, j },
        2 => GerberCommand::Move { x, y },
        _ => GerberCommand::Flash { x, y },
    }))
}
