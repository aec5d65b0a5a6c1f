//! Command-line interface for trellis
//! Parses a document with a serialized grammar and prints the syntax tree.
//!
//! Usage:
//!   trellis <grammar.json|grammar.yaml> <file> [--format treeviz|json] [--dialect <name>]

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use clap::{Arg, Command};
use trellis_lr::{GrammarSpec, LrParser};
use trellis_tree::{IncrementalParser, StringInput};

mod render;

fn main() -> ExitCode {
    let matches = Command::new("trellis")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Parse files with a serialized trellis grammar and dump the tree")
        .arg(
            Arg::new("grammar")
                .help("Path to the grammar table (.json or .yaml)")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("file")
                .help("Path to the document to parse")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .short('f')
                .help("Output format: treeviz or json")
                .default_value("treeviz"),
        )
        .arg(
            Arg::new("dialect")
                .long("dialect")
                .short('d')
                .help("Grammar dialect to enable"),
        )
        .get_matches();

    let grammar_path = matches.get_one::<String>("grammar").expect("required");
    let file_path = matches.get_one::<String>("file").expect("required");
    let format = matches.get_one::<String>("format").expect("defaulted");

    let spec = match load_spec(Path::new(grammar_path)) {
        Ok(spec) => spec,
        Err(message) => {
            eprintln!("error: {}", message);
            return ExitCode::from(2);
        }
    };
    let parser = match LrParser::from_spec(spec) {
        Ok(parser) => parser,
        Err(error) => {
            eprintln!("error: malformed grammar table: {}", error);
            return ExitCode::from(2);
        }
    };
    let parser = match matches.get_one::<String>("dialect") {
        Some(name) => match parser.with_dialect(name) {
            Ok(parser) => parser,
            Err(error) => {
                eprintln!("error: {}", error);
                return ExitCode::from(2);
            }
        },
        None => parser,
    };

    let text = match fs::read_to_string(file_path) {
        Ok(text) => text,
        Err(error) => {
            eprintln!("error: can't read {}: {}", file_path, error);
            return ExitCode::FAILURE;
        }
    };
    let input = StringInput::new(&text);
    let tree = parser.parse(&input, &[]);

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&render::json(&tree)).expect("tree serializes")),
        "treeviz" => print!("{}", render::treeviz(&tree)),
        other => {
            eprintln!("error: unknown format {:?} (expected treeviz or json)", other);
            return ExitCode::from(2);
        }
    }
    ExitCode::SUCCESS
}

fn load_spec(path: &Path) -> Result<GrammarSpec, String> {
    let text = fs::read_to_string(path)
        .map_err(|error| format!("can't read {}: {}", path.display(), error))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&text)
            .map_err(|error| format!("{}: {}", path.display(), error)),
        _ => serde_json::from_str(&text).map_err(|error| format!("{}: {}", path.display(), error)),
    }
}
