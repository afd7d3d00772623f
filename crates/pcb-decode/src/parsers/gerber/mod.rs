mod apertures;
pub mod commands;
pub mod coord;
pub mod interpreter;
pub mod lexer;
pub mod macros;

use crate::error::{DecodeError, Location};
use crate::geometry::{GeometryKernel, Shape};

use self::commands::Command;

/// Parse Gerber text into its command tree without interpreting it.
pub fn parse(text: &str) -> Result<Vec<Command>, DecodeError> {
    let tokens = lexer::tokenize(text)?;
    commands::parse_commands(tokens, Location::end_of(text))
}

/// Parse and interpret a Gerber file into a single shape in millimeters.
pub fn parse_and_interpret(
    text: &str,
    kernel: &dyn GeometryKernel,
    arc_step: f64,
) -> Result<Shape, DecodeError> {
    let commands = parse(text)?;
    interpreter::interpret(&commands, kernel, arc_step)
}
