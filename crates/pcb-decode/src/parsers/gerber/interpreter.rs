use std::f64::consts::PI;

use log::debug;

use crate::error::{DecodeError, Location, SemanticError};
use crate::geometry::{arc_points, GeometryKernel, Point, Shape};
use crate::types::Units;

use super::apertures::{resolve, Aperture, ApertureTable, MacroTable};
use super::commands::{ApertureTemplate, Command, Contour, GerberCommand, Mirroring, Polarity};
use super::coord::{CoordinateConverter, CoordinateFormat, Notation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterpolationMode {
    Linear,
    ClockwiseArc,
    CounterClockwiseArc,
}

/// Gerber state machine. Walks commands and composes one shape.
struct Interpreter<'a> {
    kernel: &'a dyn GeometryKernel,
    arc_step: f64,
    units: Units,
    format: Option<CoordinateFormat>,
    aperture: Option<u32>,
    interpolation: InterpolationMode,
    polarity: Polarity,
    mirroring: Mirroring,
    rotation: f64,
    scale: f64,
    /// Current point in mm, before the grid offset is applied.
    position: Point,
    /// Added to every coordinate; moved by step-and-repeat and block flashes.
    offset: Point,
    apertures: ApertureTable<'a>,
    macros: MacroTable<'a>,
    /// Block apertures currently being flashed, innermost last.
    active_blocks: Vec<u32>,
    shape: Shape,
    /// Dark pieces not yet merged into `shape`.
    pending: Vec<Shape>,
}

impl<'a> Interpreter<'a> {
    fn new(kernel: &'a dyn GeometryKernel, arc_step: f64) -> Self {
        Self {
            kernel,
            arc_step,
            units: Units::Millimeters,
            format: None,
            aperture: None,
            interpolation: InterpolationMode::Linear,
            polarity: Polarity::Dark,
            mirroring: Mirroring::None,
            rotation: 0.0,
            scale: 1.0,
            position: [0.0, 0.0],
            offset: [0.0, 0.0],
            apertures: ApertureTable::default(),
            macros: MacroTable::default(),
            active_blocks: Vec::new(),
            shape: Shape::empty(),
            pending: Vec::new(),
        }
    }

    fn run(&mut self, commands: &'a [Command]) -> Result<(), DecodeError> {
        for cmd in commands {
            self.process(cmd)?;
        }
        Ok(())
    }

    fn process(&mut self, cmd: &'a Command) -> Result<(), DecodeError> {
        let location = cmd.location;
        let semantic = |error| DecodeError::semantic(location, error);

        match &cmd.kind {
            GerberCommand::UnitsMode(units) => {
                self.units = *units;
            }
            GerberCommand::FormatSpecification(format) => {
                self.format = Some(*format);
            }
            GerberCommand::ApertureDefinition { code, template } => {
                let shape = resolve(template, &self.macros, self.kernel).map_err(semantic)?;
                let s = self.units.scale();
                let stroke_width = match template {
                    ApertureTemplate::Circle { diameter, .. } => Some(diameter * s),
                    _ => None,
                };
                self.apertures.define(
                    *code,
                    Aperture::Standard {
                        shape: self.kernel.scale(&shape, [s, s]),
                        stroke_width,
                    },
                );
            }
            GerberCommand::ApertureMacro { name, body } => {
                self.macros.define(name, body);
            }
            GerberCommand::SetCurrentAperture(code) => {
                if self.apertures.get(*code).is_none() {
                    return Err(semantic(SemanticError::UnknownAperture(*code)));
                }
                self.aperture = Some(*code);
            }
            GerberCommand::Plot { x, y, i, j } => {
                self.plot(*x, *y, *i, *j, location)?;
            }
            GerberCommand::Move { x, y } => {
                self.position = self.target(*x, *y, location)?;
            }
            GerberCommand::Flash { x, y } => {
                self.flash(*x, *y, location)?;
            }
            GerberCommand::LinearMode => {
                self.interpolation = InterpolationMode::Linear;
            }
            GerberCommand::CwCircularMode => {
                self.interpolation = InterpolationMode::ClockwiseArc;
            }
            GerberCommand::CcwCircularMode => {
                self.interpolation = InterpolationMode::CounterClockwiseArc;
            }
            GerberCommand::Polarity(p) => {
                self.polarity = *p;
            }
            GerberCommand::Mirror(m) => {
                self.mirroring = *m;
            }
            GerberCommand::Rotate(degrees) => {
                self.rotation = *degrees;
            }
            GerberCommand::Scale(factor) => {
                self.scale = *factor;
            }
            GerberCommand::Region { contours } => {
                self.region(contours)?;
            }
            GerberCommand::BlockAperture { code, body } => {
                self.apertures.define(*code, Aperture::Block(body));
            }
            GerberCommand::StepAndRepeat {
                x_repeats,
                y_repeats,
                x_step,
                y_step,
                body,
            } => {
                self.step_and_repeat(*x_repeats, *y_repeats, [*x_step, *y_step], body)?;
            }
            GerberCommand::UnknownCommand(text) | GerberCommand::UnknownMacro(text) => {
                debug!("Gerber: skipping '{text}' at {location}");
            }
            GerberCommand::PrepareCircularMode
            | GerberCommand::FileAttribute { .. }
            | GerberCommand::ApertureAttribute { .. }
            | GerberCommand::ObjectAttribute { .. }
            | GerberCommand::DeleteAttribute { .. }
            | GerberCommand::Comment(_)
            | GerberCommand::End => {}
        }
        Ok(())
    }

    fn converter(&self, location: Location) -> Result<CoordinateConverter, DecodeError> {
        let format = self.format.ok_or_else(|| {
            DecodeError::semantic(location, SemanticError::MissingFormatSpecification)
        })?;
        Ok(CoordinateConverter {
            format,
            units: self.units,
        })
    }

    /// Resolve an operation's target; omitted axes keep the current value.
    fn target(&self, x: Option<i64>, y: Option<i64>, location: Location) -> Result<Point, DecodeError> {
        if x.is_none() && y.is_none() {
            return Ok(self.position);
        }
        let conv = self.converter(location)?;
        let (base_x, base_y) = match conv.format.notation {
            Notation::Absolute => (0.0, 0.0),
            Notation::Incremental => (self.position[0], self.position[1]),
        };
        Ok([
            x.map(|v| base_x + conv.to_mm(v, true)).unwrap_or(self.position[0]),
            y.map(|v| base_y + conv.to_mm(v, false)).unwrap_or(self.position[1]),
        ])
    }

    /// Point list from `start` to `end` under `mode`; arcs are sampled.
    fn path(
        &self,
        mode: InterpolationMode,
        start: Point,
        end: Point,
        i: Option<i64>,
        j: Option<i64>,
        location: Location,
    ) -> Result<Vec<Point>, DecodeError> {
        if mode == InterpolationMode::Linear {
            return Ok(vec![start, end]);
        }

        // I,J are offsets from the start point to the center
        let (di, dj) = if i.is_none() && j.is_none() {
            (0.0, 0.0)
        } else {
            let conv = self.converter(location)?;
            (
                conv.to_mm(i.unwrap_or(0), true),
                conv.to_mm(j.unwrap_or(0), false),
            )
        };
        let center = [start[0] + di, start[1] + dj];
        let radius = (di * di + dj * dj).sqrt();
        if radius < 1e-9 {
            return Ok(vec![start, end]);
        }

        let start_angle = (start[1] - center[1]).atan2(start[0] - center[0]);
        let mut end_angle = (end[1] - center[1]).atan2(end[0] - center[0]);

        // Coincident start and end sweep a full circle.
        let step = if mode == InterpolationMode::ClockwiseArc {
            if end_angle >= start_angle {
                end_angle -= 2.0 * PI;
            }
            -self.arc_step
        } else {
            if end_angle <= start_angle {
                end_angle += 2.0 * PI;
            }
            self.arc_step
        };

        let mut points = arc_points(center, radius, start_angle, end_angle, step);
        if let Some(last) = points.last_mut() {
            *last = end;
        }
        Ok(points)
    }

    fn shifted(&self, points: &[Point]) -> Vec<Point> {
        points
            .iter()
            .map(|p| [p[0] + self.offset[0], p[1] + self.offset[1]])
            .collect()
    }

    /// Combine a piece with the accumulated shape under the current polarity.
    ///
    /// Dark pieces are queued and merged in one pass when the image is next
    /// needed.
    fn apply(&mut self, piece: Shape) {
        if piece.is_empty() {
            return;
        }
        match self.polarity {
            Polarity::Dark => self.pending.push(piece),
            Polarity::Clear => {
                self.flush();
                self.shape = self.kernel.difference(&self.shape, &piece);
            }
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut pieces = std::mem::take(&mut self.pending);
        pieces.push(std::mem::take(&mut self.shape));
        self.shape = self.kernel.union_all(&pieces);
    }

    fn finish(mut self) -> Shape {
        self.flush();
        self.shape
    }

    fn plot(
        &mut self,
        x: Option<i64>,
        y: Option<i64>,
        i: Option<i64>,
        j: Option<i64>,
        location: Location,
    ) -> Result<(), DecodeError> {
        let semantic = |error| DecodeError::semantic(location, error);
        let code = self
            .aperture
            .ok_or(SemanticError::NoApertureSelected("D01"))
            .map_err(semantic)?;
        let width = self.apertures.stroke_width(code).map_err(semantic)? * self.scale;

        let start = self.position;
        let end = self.target(x, y, location)?;
        let path = self.path(self.interpolation, start, end, i, j, location)?;
        let stroke = self.kernel.line(&self.shifted(&path), width);
        self.apply(stroke);
        self.position = end;
        Ok(())
    }

    fn flash(&mut self, x: Option<i64>, y: Option<i64>, location: Location) -> Result<(), DecodeError> {
        let code = self.aperture.ok_or_else(|| {
            DecodeError::semantic(location, SemanticError::NoApertureSelected("D03"))
        })?;
        let target = self.target(x, y, location)?;
        self.position = target;

        let aperture = self
            .apertures
            .get(code)
            .ok_or_else(|| DecodeError::semantic(location, SemanticError::UnknownAperture(code)))?;

        match aperture {
            Aperture::Standard { shape, .. } => {
                let stamp = self.transform(shape, target);
                self.apply(stamp);
            }
            Aperture::Block(body) => {
                let body: &'a [Command] = *body;
                if self.active_blocks.contains(&code) {
                    return Err(DecodeError::semantic(
                        location,
                        SemanticError::RecursiveBlockAperture { code },
                    ));
                }
                self.active_blocks.push(code);
                let result = self.flash_block(body, target);
                self.active_blocks.pop();
                result?;
            }
        }
        Ok(())
    }

    /// Mirror, scale, rotate, then move to the flash point.
    fn transform(&self, shape: &Shape, target: Point) -> Shape {
        let k = self.kernel;
        let (mx, my) = match self.mirroring {
            Mirroring::None => (1.0, 1.0),
            Mirroring::X => (-1.0, 1.0),
            Mirroring::Y => (1.0, -1.0),
            Mirroring::XY => (-1.0, -1.0),
        };
        let mut out = shape.clone();
        if mx < 0.0 || my < 0.0 {
            out = k.scale(&out, [mx, my]);
        }
        if self.scale != 1.0 {
            out = k.scale(&out, [self.scale, self.scale]);
        }
        out = k.rotate(&out, self.rotation, [0.0, 0.0]);
        let at = [target[0] + self.offset[0], target[1] + self.offset[1]];
        k.translate(&out, at)
    }

    /// Replay a block body with its origin at `target`.
    fn flash_block(&mut self, body: &'a [Command], target: Point) -> Result<(), DecodeError> {
        let saved_offset = self.offset;
        let saved_aperture = self.aperture;
        let saved_polarity = self.polarity;
        let saved_interpolation = self.interpolation;

        self.offset = [saved_offset[0] + target[0], saved_offset[1] + target[1]];
        self.position = [0.0, 0.0];
        let result = self.run(body);

        self.offset = saved_offset;
        self.aperture = saved_aperture;
        self.polarity = saved_polarity;
        self.interpolation = saved_interpolation;
        self.position = target;
        result
    }

    fn step_and_repeat(
        &mut self,
        x_repeats: u32,
        y_repeats: u32,
        step: Point,
        body: &'a [Command],
    ) -> Result<(), DecodeError> {
        let saved = self.offset;
        let s = self.units.scale();
        for ix in 0..x_repeats {
            for iy in 0..y_repeats {
                // Each cell is offset from the block's origin, not from the previous cell.
                self.offset = [
                    saved[0] + ix as f64 * step[0] * s,
                    saved[1] + iy as f64 * step[1] * s,
                ];
                self.run(body)?;
            }
        }
        self.offset = saved;
        self.position = [0.0, 0.0];
        Ok(())
    }

    fn region(&mut self, contours: &'a [Contour]) -> Result<(), DecodeError> {
        // Mode changes inside the region do not leak out of it.
        let mut mode = self.interpolation;
        let mut pieces = Vec::with_capacity(contours.len());

        for contour in contours {
            let mut points = vec![self.position];
            for cmd in &contour.commands {
                match &cmd.kind {
                    GerberCommand::Move { x, y } => {
                        self.position = self.target(*x, *y, cmd.location)?;
                        points = vec![self.position];
                    }
                    GerberCommand::Plot { x, y, i, j } => {
                        let end = self.target(*x, *y, cmd.location)?;
                        let path = self.path(mode, self.position, end, *i, *j, cmd.location)?;
                        points.extend_from_slice(&path[1..]);
                        self.position = end;
                    }
                    GerberCommand::LinearMode => mode = InterpolationMode::Linear,
                    GerberCommand::CwCircularMode => mode = InterpolationMode::ClockwiseArc,
                    GerberCommand::CcwCircularMode => {
                        mode = InterpolationMode::CounterClockwiseArc
                    }
                    _ => {}
                }
            }

            if points.len() < 3 {
                debug!("Gerber: skipping degenerate region contour");
                continue;
            }
            pieces.push(self.kernel.polygon(&self.shifted(&points)));
        }

        let region = self.kernel.union_all(&pieces);
        self.apply(region);
        Ok(())
    }
}

/// Interpret a parsed Gerber command tree into a single shape in millimeters.
///
/// `arc_step` is the angular sampling step for arcs, in radians.
pub fn interpret(
    commands: &[Command],
    kernel: &dyn GeometryKernel,
    arc_step: f64,
) -> Result<Shape, DecodeError> {
    let mut interp = Interpreter::new(kernel, arc_step);
    interp.run(commands)?;
    Ok(interp.finish())
}
