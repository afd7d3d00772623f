use clap::Parser;
use pcb_decode::{bundle, decode_bytes, decode_file, DecodeError, DecodeOptions, FileFormat};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pcb-decode", about = "Decode Gerber and Excellon files to JSON geometry")]
struct Cli {
    /// Input file (.gbr, .drl, ... or a .zip of fabrication outputs)
    input: PathBuf,

    /// Output JSON file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override auto-detected format (gerber, excellon)
    #[arg(short, long)]
    format: Option<String>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Arc sampling step in radians
    #[arg(long, default_value_t = 0.1)]
    arc_step: f64,

    /// Number of segments used to approximate circles
    #[arg(long, default_value_t = 64)]
    circle_segments: usize,
}

fn parse_format(s: &str) -> Result<FileFormat, String> {
    match s.to_lowercase().as_str() {
        "gerber" => Ok(FileFormat::Gerber),
        "excellon" | "drill" => Ok(FileFormat::Excellon),
        _ => Err(format!("Unknown format: {s}. Use: gerber, excellon")),
    }
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String, DecodeError> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}

fn run(cli: &Cli) -> Result<String, DecodeError> {
    let opts = DecodeOptions {
        arc_step: cli.arc_step,
        circle_segments: cli.circle_segments,
    };

    if let Some(fmt_str) = &cli.format {
        let format = parse_format(fmt_str).map_err(DecodeError::UnsupportedFormat)?;
        let data = std::fs::read(&cli.input)?;
        return to_json(&decode_bytes(&data, format, &opts)?, cli.pretty);
    }

    if is_zip(&cli.input) {
        let data = std::fs::read(&cli.input)?;
        return to_json(&bundle::decode_archive(&data, &opts)?, cli.pretty);
    }

    to_json(&decode_file(&cli.input, &opts)?, cli.pretty)
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let json = match run(&cli) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Some(output_path) = &cli.output {
        if let Err(e) = std::fs::write(output_path, &json) {
            eprintln!("Error writing {}: {e}", output_path.display());
            std::process::exit(1);
        }
        eprintln!("Written to {}", output_path.display());
    } else {
        println!("{json}");
    }
}
