use std::collections::HashMap;
use std::f64::consts::PI;

use log::warn;

use crate::error::SemanticError;
use crate::geometry::{GeometryKernel, Point, Shape};

use super::commands::{ApertureTemplate, Command};
use super::macros::{Expr, MacroPrimitive, MacroStatement, Variables};

/// An aperture in the aperture table.
#[derive(Debug, Clone)]
pub enum Aperture<'a> {
    /// A resolved shape in millimeters, centered on the flash point.
    /// `stroke_width` is set for circles, the only apertures that may plot.
    Standard {
        shape: Shape,
        stroke_width: Option<f64>,
    },
    /// A block aperture: its body is replayed at every flash.
    Block(&'a [Command]),
}

/// Aperture table built from %AD and %AB commands.
#[derive(Debug, Default)]
pub struct ApertureTable<'a> {
    apertures: HashMap<u32, Aperture<'a>>,
}

impl<'a> ApertureTable<'a> {
    pub fn define(&mut self, code: u32, aperture: Aperture<'a>) {
        if self.apertures.insert(code, aperture).is_some() {
            warn!("Gerber: aperture D{code} redefined");
        }
    }

    pub fn get(&self, code: u32) -> Option<&Aperture<'a>> {
        self.apertures.get(&code)
    }

    /// Effective stroke width of aperture `code` when used for D01 draws.
    pub fn stroke_width(&self, code: u32) -> Result<f64, SemanticError> {
        match self.apertures.get(&code) {
            Some(Aperture::Standard {
                stroke_width: Some(width),
                ..
            }) => Ok(*width),
            Some(Aperture::Standard { .. }) => Err(SemanticError::InvalidAperture {
                code,
                reason: "only circular apertures can plot",
            }),
            Some(Aperture::Block(_)) => Err(SemanticError::InvalidAperture {
                code,
                reason: "block apertures can only be flashed",
            }),
            None => Err(SemanticError::UnknownAperture(code)),
        }
    }
}

/// Table of macro definitions, keyed by name.
#[derive(Debug, Default)]
pub struct MacroTable<'a> {
    macros: HashMap<&'a str, &'a [MacroStatement]>,
}

impl<'a> MacroTable<'a> {
    pub fn define(&mut self, name: &'a str, body: &'a [MacroStatement]) {
        if self.macros.insert(name, body).is_some() {
            warn!("Gerber: aperture macro '{name}' redefined");
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a [MacroStatement]> {
        self.macros.get(name).copied()
    }
}

/// Build the shape of an aperture template, in file units, centered on the origin.
pub fn resolve(
    template: &ApertureTemplate,
    macros: &MacroTable<'_>,
    kernel: &dyn GeometryKernel,
) -> Result<Shape, SemanticError> {
    let (shape, hole) = match template {
        ApertureTemplate::Circle { diameter, hole } => (kernel.circle(*diameter, [0.0, 0.0]), hole),
        ApertureTemplate::Rectangle {
            x_size,
            y_size,
            hole,
        } => {
            let (hx, hy) = (x_size / 2.0, y_size / 2.0);
            (kernel.rect([-hx, -hy], [hx, hy]), hole)
        }
        ApertureTemplate::Obround {
            x_size,
            y_size,
            hole,
        } => (obround(*x_size, *y_size, kernel), hole),
        ApertureTemplate::Polygon {
            outer_diameter,
            num_vertices,
            rotation,
            hole,
        } => {
            let points = regular_polygon([0.0, 0.0], *outer_diameter, *num_vertices, *rotation);
            (kernel.polygon(&points), hole)
        }
        ApertureTemplate::Macro { name, params } => {
            let body = macros
                .get(name)
                .ok_or_else(|| SemanticError::UnknownMacro(name.clone()))?;
            (evaluate_macro(body, params, kernel)?, &None)
        }
    };

    Ok(match hole {
        Some(d) if *d > 0.0 => kernel.difference(&shape, &kernel.circle(*d, [0.0, 0.0])),
        _ => shape,
    })
}

/// A stadium: a stroke between the centers of the two round ends.
fn obround(x_size: f64, y_size: f64, kernel: &dyn GeometryKernel) -> Shape {
    let width = x_size.min(y_size);
    let half = (x_size.max(y_size) - width) / 2.0;
    let ends = if x_size >= y_size {
        [[-half, 0.0], [half, 0.0]]
    } else {
        [[0.0, -half], [0.0, half]]
    };
    kernel.line(&ends, width)
}

/// Vertices of a regular polygon; `rotation` is in degrees.
fn regular_polygon(center: Point, diameter: f64, vertices: u32, rotation: f64) -> Vec<Point> {
    let r = diameter / 2.0;
    let rot = rotation.to_radians();
    (0..vertices)
        .map(|k| {
            let a = rot + 2.0 * PI * (k as f64) / (vertices as f64);
            [center[0] + r * a.cos(), center[1] + r * a.sin()]
        })
        .collect()
}

/// Rectangle of the given width around the segment `start → end`, square ends.
fn bar(start: Point, end: Point, width: f64) -> Vec<Point> {
    let (dx, dy) = (end[0] - start[0], end[1] - start[1]);
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-12 {
        return Vec::new();
    }
    let n = [-dy / len * width / 2.0, dx / len * width / 2.0];
    vec![
        [start[0] - n[0], start[1] - n[1]],
        [end[0] - n[0], end[1] - n[1]],
        [end[0] + n[0], end[1] + n[1]],
        [start[0] + n[0], start[1] + n[1]],
    ]
}

/// Walk a macro body in order, composing primitives into one shape.
fn evaluate_macro(
    body: &[MacroStatement],
    params: &[f64],
    kernel: &dyn GeometryKernel,
) -> Result<Shape, SemanticError> {
    let mut env = Variables::from_params(params);
    let mut shape = Shape::empty();

    for statement in body {
        let prim = match statement {
            MacroStatement::Comment(_) => continue,
            MacroStatement::Assign { variable, value } => {
                let v = value.eval(&env);
                env.set(*variable, v);
                continue;
            }
            MacroStatement::Primitive(prim) => prim,
        };

        let (piece, exposure_on) = build_primitive(prim, &env, kernel)?;
        shape = if exposure_on {
            kernel.union(&shape, &piece)
        } else {
            kernel.difference(&shape, &piece)
        };
    }

    Ok(shape)
}

/// Build one primitive in macro coordinates, rotated about the macro origin.
/// Returns the shape and whether it adds (exposure on) or clears.
fn build_primitive(
    prim: &MacroPrimitive,
    env: &Variables,
    kernel: &dyn GeometryKernel,
) -> Result<(Shape, bool), SemanticError> {
    let on = |exposure: &Expr| exposure.eval(env) >= 0.5;

    let (shape, rotation, exposure) = match prim {
        MacroPrimitive::Circle {
            exposure,
            diameter,
            center_x,
            center_y,
            rotation,
        } => {
            let center = [center_x.eval(env), center_y.eval(env)];
            let rot = rotation.as_ref().map(|r| r.eval(env)).unwrap_or(0.0);
            (kernel.circle(diameter.eval(env).abs(), center), rot, on(exposure))
        }
        MacroPrimitive::VectorLine {
            exposure,
            width,
            start_x,
            start_y,
            end_x,
            end_y,
            rotation,
        } => {
            let start = [start_x.eval(env), start_y.eval(env)];
            let end = [end_x.eval(env), end_y.eval(env)];
            let points = bar(start, end, width.eval(env));
            (kernel.polygon(&points), rotation.eval(env), on(exposure))
        }
        MacroPrimitive::CenterLine {
            exposure,
            width,
            height,
            center_x,
            center_y,
            rotation,
        } => {
            let (cx, cy) = (center_x.eval(env), center_y.eval(env));
            let (hw, hh) = (width.eval(env) / 2.0, height.eval(env) / 2.0);
            (
                kernel.rect([cx - hw, cy - hh], [cx + hw, cy + hh]),
                rotation.eval(env),
                on(exposure),
            )
        }
        MacroPrimitive::Outline {
            exposure,
            num_points,
            values,
        } => {
            // n segments: n + 1 points with the last repeating the first.
            let n = num_points.eval(env).round().max(0.0) as usize;
            let expected = n + 1;
            let found = values.len().saturating_sub(1) / 2;
            if values.len() != 2 * expected + 1 {
                return Err(SemanticError::OutlinePointCount { expected, found });
            }
            let points: Vec<Point> = values[..2 * expected]
                .chunks(2)
                .map(|xy| [xy[0].eval(env), xy[1].eval(env)])
                .collect();
            let rot = values[2 * expected].eval(env);
            (kernel.polygon(&points), rot, on(exposure))
        }
        MacroPrimitive::Polygon {
            exposure,
            num_vertices,
            center_x,
            center_y,
            diameter,
            rotation,
        } => {
            let n = num_vertices.eval(env).round().max(0.0) as u32;
            let center = [center_x.eval(env), center_y.eval(env)];
            let points = regular_polygon(center, diameter.eval(env), n, 0.0);
            (kernel.polygon(&points), rotation.eval(env), on(exposure))
        }
        MacroPrimitive::Thermal {
            center_x,
            center_y,
            outer_diameter,
            inner_diameter,
            gap_thickness,
            rotation,
        } => {
            let center = [center_x.eval(env), center_y.eval(env)];
            let od = outer_diameter.eval(env);
            let gap = gap_thickness.eval(env);
            let ring = kernel.difference(
                &kernel.circle(od, center),
                &kernel.circle(inner_diameter.eval(env), center),
            );
            let (hg, r) = (gap / 2.0, od);
            let cross = kernel.union(
                &kernel.rect(
                    [center[0] - r, center[1] - hg],
                    [center[0] + r, center[1] + hg],
                ),
                &kernel.rect(
                    [center[0] - hg, center[1] - r],
                    [center[0] + hg, center[1] + r],
                ),
            );
            (kernel.difference(&ring, &cross), rotation.eval(env), true)
        }
    };

    Ok((kernel.rotate(&shape, rotation, [0.0, 0.0]), exposure))
}
