//! Decoding every Gerber and drill file in a fabrication zip.

use std::io::{Cursor, Read};
use std::path::Path;

use log::{debug, warn};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use crate::error::DecodeError;
use crate::{decode_text, detect_format, sniff_format, DecodeOptions, Decoded, FileFormat};

/// One archive member and its decode result.
#[derive(Debug)]
pub struct ArchiveEntry {
    pub name: String,
    pub format: FileFormat,
    pub result: Result<Decoded, DecodeError>,
}

impl Serialize for ArchiveEntry {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut state = s.serialize_struct("ArchiveEntry", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("format", &self.format)?;
        match &self.result {
            Ok(decoded) => state.serialize_field("decoded", decoded)?,
            Err(e) => state.serialize_field("error", &e.to_string())?,
        }
        state.end()
    }
}

/// Decode every Gerber or Excellon member of a zip archive.
///
/// Members that fail to decode are reported per entry; the archive only fails
/// as a whole when it cannot be read or holds no recognizable file.
pub fn decode_archive(data: &[u8], opts: &DecodeOptions) -> Result<Vec<ArchiveEntry>, DecodeError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let mut entries = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();

        let mut content = String::new();
        if file.read_to_string(&mut content).is_err() {
            debug!("Bundle: skipping non-text member {name}");
            continue;
        }

        let Some(format) = detect_format(Path::new(&name)).or_else(|| sniff_format(&content))
        else {
            debug!("Bundle: skipping unrecognized member {name}");
            continue;
        };

        let result = decode_text(&content, format, opts);
        if let Err(e) = &result {
            warn!("Bundle: failed to decode {name}: {e}");
        }
        entries.push(ArchiveEntry {
            name,
            format,
            result,
        });
    }

    if entries.is_empty() {
        return Err(DecodeError::UnsupportedFormat(
            "archive contains no Gerber or Excellon files".into(),
        ));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const COPPER: &[u8] = b"%FSLAX24Y24*%\n%MOMM*%\n%ADD10C,1*%\nD10*\nX0Y0D03*\nM02*\n";
    const DRILL: &[u8] = b"M48\nMETRIC\nT1C0.5\n%\nT1\nX1.0Y1.0\nM30\n";

    #[test]
    fn test_decodes_each_member() {
        let data = build_zip(&[
            ("board-F_Cu.gbr", COPPER),
            ("README.md", b"fabrication notes"),
            ("board.drl", DRILL),
        ]);
        let entries = decode_archive(&data, &DecodeOptions::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "board-F_Cu.gbr");
        assert_eq!(entries[0].format, FileFormat::Gerber);
        assert!(matches!(entries[0].result, Ok(Decoded::Gerber { .. })));
        assert_eq!(entries[1].format, FileFormat::Excellon);
        assert!(matches!(entries[1].result, Ok(Decoded::Excellon(_))));
    }

    #[test]
    fn test_sniffs_members_without_known_extension() {
        let data = build_zip(&[("drill.txt", DRILL)]);
        let entries = decode_archive(&data, &DecodeOptions::default()).unwrap();
        assert_eq!(entries[0].format, FileFormat::Excellon);
    }

    #[test]
    fn test_failed_member_is_reported() {
        let data = build_zip(&[
            ("broken.gbr", b"%FSLAX24Y24*%\n%MOMM*%\n"),
            ("board.drl", DRILL),
        ]);
        let entries = decode_archive(&data, &DecodeOptions::default()).unwrap();
        assert!(matches!(entries[0].result, Err(DecodeError::Syntax { .. })));
        assert!(entries[1].result.is_ok());

        let json = serde_json::to_value(&entries).unwrap();
        assert!(json[0]["error"].as_str().unwrap().contains("syntax error"));
        assert_eq!(json[0]["format"], "gerber");
        assert_eq!(json[1]["decoded"]["format"], "excellon");
    }

    #[test]
    fn test_no_recognizable_files() {
        let data = build_zip(&[("notes.md", b"nothing here")]);
        assert!(matches!(
            decode_archive(&data, &DecodeOptions::default()),
            Err(DecodeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_not_a_zip() {
        assert!(matches!(
            decode_archive(b"not a zip", &DecodeOptions::default()),
            Err(DecodeError::Zip(_))
        ));
    }
}
