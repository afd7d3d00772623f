pub mod bundle;
pub mod error;
pub mod geometry;
pub mod parsers;
pub mod types;

use serde::Serialize;
use std::path::Path;

pub use error::{DecodeError, Location, SemanticError};
pub use geometry::{GeometryKernel, OverlayKernel, Shape};
pub use types::ExcellonFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Gerber,
    Excellon,
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Angular step used to sample arcs, in radians.
    pub arc_step: f64,
    /// Vertex count used to approximate circles.
    pub circle_segments: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            arc_step: 0.1,
            circle_segments: 64,
        }
    }
}

impl DecodeOptions {
    pub fn kernel(&self) -> OverlayKernel {
        OverlayKernel::new(self.circle_segments)
    }
}

/// Result of decoding one file.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum Decoded {
    Gerber { geometry: Shape },
    Excellon(ExcellonFile),
}

/// Detect format from file extension.
pub fn detect_format(path: &Path) -> Option<FileFormat> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some(
            "gbr" | "ger" | "pho" | "art" | "gtl" | "gbl" | "gto" | "gbo" | "gts" | "gbs" | "gtp"
            | "gbp" | "gko" | "gm1" | "gml",
        ) => Some(FileFormat::Gerber),
        Some("drl" | "xln" | "exc" | "drd" | "ncd") => Some(FileFormat::Excellon),
        _ => None,
    }
}

/// Guess the format from file content.
pub fn sniff_format(text: &str) -> Option<FileFormat> {
    if text.contains("%FS") || text.contains("%MO") {
        return Some(FileFormat::Gerber);
    }
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with(';'));
    if lines.next()?.eq_ignore_ascii_case("M48") {
        return Some(FileFormat::Excellon);
    }
    if text.contains("M02*") {
        return Some(FileFormat::Gerber);
    }
    if text.lines().any(|l| l.trim().eq_ignore_ascii_case("M30")) {
        return Some(FileFormat::Excellon);
    }
    None
}

/// Decode a Gerber file into a single shape in millimeters.
pub fn decode_gerber(text: &str, opts: &DecodeOptions) -> Result<Shape, DecodeError> {
    parsers::gerber::parse_and_interpret(text, &opts.kernel(), opts.arc_step)
}

/// Decode an Excellon drill file.
pub fn decode_excellon(text: &str, opts: &DecodeOptions) -> Result<ExcellonFile, DecodeError> {
    parsers::excellon::parse_and_interpret(text, &opts.kernel())
}

/// Decode text with explicit format.
pub fn decode_text(
    text: &str,
    format: FileFormat,
    opts: &DecodeOptions,
) -> Result<Decoded, DecodeError> {
    match format {
        FileFormat::Gerber => decode_gerber(text, opts).map(|geometry| Decoded::Gerber { geometry }),
        FileFormat::Excellon => decode_excellon(text, opts).map(Decoded::Excellon),
    }
}

/// Decode from bytes with explicit format.
pub fn decode_bytes(
    data: &[u8],
    format: FileFormat,
    opts: &DecodeOptions,
) -> Result<Decoded, DecodeError> {
    decode_text(&String::from_utf8_lossy(data), format, opts)
}

/// Detect format from the extension, falling back to the content, and decode.
pub fn decode_file(path: &Path, opts: &DecodeOptions) -> Result<Decoded, DecodeError> {
    let data = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&data);
    let format = detect_format(path)
        .or_else(|| sniff_format(&text))
        .ok_or_else(|| DecodeError::UnsupportedFormat(path.display().to_string()))?;
    decode_text(&text, format, opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GERBER: &str = "%FSLAX24Y24*%\n%MOMM*%\n%ADD10C,1*%\nD10*\nX0Y0D03*\nM02*\n";
    const DRILL: &str = "M48\nMETRIC\nT1C0.5\n%\nT1\nX1.0Y1.0\nM30\n";

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format(Path::new("board-F_Cu.gbr")),
            Some(FileFormat::Gerber)
        );
        assert_eq!(detect_format(Path::new("BOARD.GTL")), Some(FileFormat::Gerber));
        assert_eq!(
            detect_format(Path::new("board-PTH.drl")),
            Some(FileFormat::Excellon)
        );
        assert_eq!(detect_format(Path::new("board.txt")), None);
        assert_eq!(detect_format(Path::new("noext")), None);
    }

    #[test]
    fn test_sniff_format() {
        assert_eq!(sniff_format(GERBER), Some(FileFormat::Gerber));
        assert_eq!(sniff_format(DRILL), Some(FileFormat::Excellon));
        assert_eq!(sniff_format("; header\nT1C0.5\nT1\nX0Y0\nM30\n"), Some(FileFormat::Excellon));
        assert_eq!(sniff_format("hello world"), None);
        assert_eq!(sniff_format(""), None);
    }

    #[test]
    fn test_decode_text() {
        let opts = DecodeOptions::default();
        match decode_text(GERBER, FileFormat::Gerber, &opts).unwrap() {
            Decoded::Gerber { geometry } => assert_eq!(geometry.polygons().len(), 1),
            other => panic!("expected gerber, got {other:?}"),
        }
        match decode_bytes(DRILL.as_bytes(), FileFormat::Excellon, &opts).unwrap() {
            Decoded::Excellon(file) => assert_eq!(file.drills.len(), 1),
            other => panic!("expected excellon, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_format_is_an_error() {
        let opts = DecodeOptions::default();
        assert!(decode_text(DRILL, FileFormat::Gerber, &opts).is_err());
        assert!(decode_text(GERBER, FileFormat::Excellon, &opts).is_err());
    }

    #[test]
    fn test_decoded_json_is_tagged() {
        let opts = DecodeOptions::default();
        let decoded = decode_text(DRILL, FileFormat::Excellon, &opts).unwrap();
        let json = serde_json::to_value(&decoded).unwrap();
        assert_eq!(json["format"], "excellon");
        assert_eq!(json["tools"][0]["id"], 1);
        assert_eq!(json["drills"][0]["position"][0], 1.0);
    }

    #[test]
    fn test_decode_file_sniffs_unknown_extension() {
        let path = std::env::temp_dir().join(format!("pcb-decode-{}.txt", std::process::id()));
        std::fs::write(&path, DRILL).unwrap();
        let decoded = decode_file(&path, &DecodeOptions::default());
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(decoded.unwrap(), Decoded::Excellon(_)));
    }

    #[test]
    fn test_decode_missing_file() {
        let err = decode_file(Path::new("/nonexistent/board.gbr"), &DecodeOptions::default());
        assert!(matches!(err, Err(DecodeError::Io(_))));
    }
}
