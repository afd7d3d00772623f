use std::collections::{BTreeSet, HashMap};

use crate::error::{DecodeError, SemanticError};
use crate::geometry::{GeometryKernel, Point, Shape};
use crate::types::{Drill, ExcellonFile, Mill, Tool, Units};

use super::commands::{Command, Coordinate, ExcellonCommand, NumberFormat, ZeroSuppression};

struct Interpreter<'k> {
    kernel: &'k dyn GeometryKernel,
    units: Units,
    zeros: ZeroSuppression,
    format: Option<NumberFormat>,
    relative: bool,
    /// Tool id to diameter in millimeters.
    tools: HashMap<u32, f64>,
    tool: Option<u32>,
    position: Option<Point>,
    /// Index into `mills` of the run the next mill command extends.
    open_mill: Option<usize>,
    used: BTreeSet<u32>,
    drills: Vec<Drill>,
    mills: Vec<Mill>,
    pieces: Vec<Shape>,
}

impl<'k> Interpreter<'k> {
    fn new(kernel: &'k dyn GeometryKernel) -> Self {
        Self {
            kernel,
            units: Units::Millimeters,
            zeros: ZeroSuppression::default(),
            format: None,
            relative: false,
            tools: HashMap::new(),
            tool: None,
            position: None,
            open_mill: None,
            used: BTreeSet::new(),
            drills: Vec::new(),
            mills: Vec::new(),
            pieces: Vec::new(),
        }
    }

    fn run(&mut self, commands: &[Command]) -> Result<(), DecodeError> {
        for command in commands {
            self.execute(command)
                .map_err(|error| DecodeError::semantic(command.location, error))?;
        }
        Ok(())
    }

    fn execute(&mut self, command: &Command) -> Result<(), SemanticError> {
        match &command.kind {
            ExcellonCommand::UnitMode {
                units,
                zeros,
                format,
            } => {
                self.units = *units;
                if let Some(zeros) = zeros {
                    self.zeros = *zeros;
                }
                if format.is_some() {
                    self.format = *format;
                }
            }
            ExcellonCommand::ToolDefinition { id, diameter } => {
                self.tools.insert(*id, diameter * self.units.scale());
            }
            ExcellonCommand::SelectTool(id) => self.select_tool(*id)?,
            ExcellonCommand::Drill { x, y } => self.drill(x.as_ref(), y.as_ref())?,
            ExcellonCommand::Move { x, y } => {
                self.position = Some(self.target(x.as_ref(), y.as_ref()));
                self.open_mill = None;
            }
            ExcellonCommand::Mill { x, y } => self.mill(x.as_ref(), y.as_ref())?,
            ExcellonCommand::AbsolutePositioning => self.relative = false,
            ExcellonCommand::RelativePositioning => self.relative = true,
            ExcellonCommand::End => {}
        }
        Ok(())
    }

    fn select_tool(&mut self, id: u32) -> Result<(), SemanticError> {
        let next = match id {
            0 => None,
            _ if self.tools.contains_key(&id) => Some(id),
            _ => return Err(SemanticError::UnknownTool(id)),
        };
        if next != self.tool {
            self.open_mill = None;
        }
        self.tool = next;
        Ok(())
    }

    /// Current tool id and diameter.
    fn current_tool(&self, operation: &'static str) -> Result<(u32, f64), SemanticError> {
        let id = self.tool.ok_or(SemanticError::NoToolSelected(operation))?;
        let diameter = self
            .tools
            .get(&id)
            .copied()
            .ok_or(SemanticError::UnknownTool(id))?;
        Ok((id, diameter))
    }

    /// Absolute position in millimeters; an omitted axis keeps its value.
    fn target(&self, x: Option<&Coordinate>, y: Option<&Coordinate>) -> Point {
        let format = self
            .format
            .unwrap_or_else(|| NumberFormat::default_for(self.units));
        let scale = self.units.scale();
        let base = self.position.unwrap_or([0.0, 0.0]);
        let axis = |value: Option<&Coordinate>, current: f64| match value {
            Some(c) => {
                let v = c.value(format, self.zeros) * scale;
                if self.relative {
                    current + v
                } else {
                    v
                }
            }
            None => current,
        };
        [axis(x, base[0]), axis(y, base[1])]
    }

    fn drill(&mut self, x: Option<&Coordinate>, y: Option<&Coordinate>) -> Result<(), SemanticError> {
        let (tool_id, diameter) = self.current_tool("drill")?;
        let position = self.target(x, y);
        self.pieces.push(self.kernel.circle(diameter, position));
        self.drills.push(Drill { tool_id, position });
        self.used.insert(tool_id);
        self.position = Some(position);
        self.open_mill = None;
        Ok(())
    }

    fn mill(&mut self, x: Option<&Coordinate>, y: Option<&Coordinate>) -> Result<(), SemanticError> {
        let start = self.position.ok_or(SemanticError::MillWithoutPosition)?;
        let (tool_id, diameter) = self.current_tool("mill")?;
        let end = self.target(x, y);
        self.pieces.push(self.kernel.line(&[start, end], diameter));

        let run = self
            .open_mill
            .filter(|&i| self.mills.get(i).is_some_and(|m| m.tool_id == tool_id));
        match run {
            Some(i) => self.mills[i].positions.push(end),
            None => {
                self.mills.push(Mill {
                    tool_id,
                    positions: vec![start, end],
                });
                self.open_mill = Some(self.mills.len() - 1);
            }
        }
        self.used.insert(tool_id);
        self.position = Some(end);
        Ok(())
    }

    fn finish(self) -> ExcellonFile {
        let tools = self
            .used
            .iter()
            .filter_map(|id| {
                self.tools.get(id).map(|&diameter| Tool {
                    id: *id,
                    diameter,
                })
            })
            .collect();
        ExcellonFile {
            tools,
            drills: self.drills,
            mills: self.mills,
            geometry: self.kernel.union_all(&self.pieces),
        }
    }
}

/// Interpret parsed drill commands. Positions and diameters come out in millimeters.
pub fn interpret(
    commands: &[Command],
    kernel: &dyn GeometryKernel,
) -> Result<ExcellonFile, DecodeError> {
    let mut interp = Interpreter::new(kernel);
    interp.run(commands)?;
    Ok(interp.finish())
}
