pub mod commands;
pub mod interpreter;

use crate::error::DecodeError;
use crate::geometry::GeometryKernel;
use crate::types::ExcellonFile;

use self::commands::Command;

/// Parse Excellon drill text into commands without interpreting them.
pub fn parse(text: &str) -> Result<Vec<Command>, DecodeError> {
    commands::parse(text)
}

/// Parse and interpret an Excellon drill file.
pub fn parse_and_interpret(
    text: &str,
    kernel: &dyn GeometryKernel,
) -> Result<ExcellonFile, DecodeError> {
    let commands = parse(text)?;
    interpreter::interpret(&commands, kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::OverlayKernel;
    use approx::assert_abs_diff_eq;

    const KICAD_DRILL: &str = "\
M48
; DRILL file {KiCad 7.0.0} date 2023-03-01
; FORMAT={-:-/ absolute / metric / decimal}
FMAT,2
METRIC
T1C0.400
T2C1.000
T3C0.800
%
G90
G05
T1
X120.65Y-85.09
X123.19Y-85.09
T2
X130.0Y-80.0
T3
G00X100.0Y-90.0
M15
G01X104.0Y-90.0
M17
T0
M30
";

    #[test]
    fn test_kicad_drill_file() {
        let file = parse_and_interpret(KICAD_DRILL, &OverlayKernel::default()).unwrap();
        assert_eq!(file.drills.len(), 3);
        assert_eq!(file.mills.len(), 1);
        assert_eq!(file.tools.len(), 3);
        assert_abs_diff_eq!(file.drills[1].position[0], 123.19, epsilon = 1e-9);
        assert_abs_diff_eq!(file.drills[1].position[1], -85.09, epsilon = 1e-9);

        let b = file.geometry.bounds().unwrap();
        assert_abs_diff_eq!(b[0], 99.6, epsilon = 1e-6);
        assert_abs_diff_eq!(b[2], 130.5, epsilon = 1e-6);
    }

    #[test]
    fn test_truncated_file() {
        let truncated = KICAD_DRILL.trim_end().trim_end_matches("M30");
        assert!(matches!(
            parse_and_interpret(truncated, &OverlayKernel::default()),
            Err(DecodeError::Syntax { .. })
        ));
    }
}
