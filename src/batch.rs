//! Parallel parsing of PAC files found under a directory.

use rayon::prelude::*;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::model::PacFile;
use crate::parser::Parser;

/// Outcome of parsing one file of a batch.
#[derive(Debug)]
pub struct BatchEntry {
    /// File that was parsed
    pub path: PathBuf,
    /// Parsed model, or the read or parse error
    pub result: Result<PacFile>,
}

fn is_pac(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pac"))
}

/// Collect `*.pac` files under `root`, sorted by path.
///
/// Only the top level is searched unless `recursive` is set.
pub fn collect_pac_files(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut walker = WalkDir::new(root).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut paths = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && is_pac(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    // WalkDir does not guarantee an order
    paths.sort();
    Ok(paths)
}

/// Read and parse every path in parallel. Results keep the input order.
pub fn parse_paths(paths: &[PathBuf], parser: &Parser<'_>) -> Vec<BatchEntry> {
    paths
        .par_iter()
        .map(|path| {
            let result = std::fs::read(path)
                .map_err(Into::into)
                .and_then(|data| parser.parse(&data));
            if let Err(err) = &result {
                warn!(path = %path.display(), %err, "failed to parse");
            }
            BatchEntry {
                path: path.clone(),
                result,
            }
        })
        .collect()
}

/// Parse every `*.pac` file under `root`.
pub fn parse_directory(root: &Path, parser: &Parser<'_>, recursive: bool) -> Result<Vec<BatchEntry>> {
    let paths = collect_pac_files(root, recursive)?;
    debug!(root = %root.display(), files = paths.len(), "parsing directory");
    Ok(parse_paths(&paths, parser))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParserOptions;
    use crate::templates::{InstructionTemplate, Templates};

    #[test]
    fn test_parse_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pac"), [0x25, 0x01, 0x00, 0x00]).unwrap();
        std::fs::write(dir.path().join("a.PAC"), [0x00, 0x00, 0x00, 0x00]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("c.pac"), [0x25]).unwrap();

        let templates = Templates::from_templates([InstructionTemplate::new(0x2501_0000, "cmd_end")]);
        let parser = Parser::new(&templates, ParserOptions::new());

        let entries = parse_directory(dir.path(), &parser, false).unwrap();
        let names: Vec<_> = entries
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PAC", "b.pac"]);
        let b = entries[1].result.as_ref().unwrap();
        assert_eq!(b.instructions_count(), 1);

        let entries = parse_directory(dir.path(), &parser, true).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.result.is_ok()));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let templates = Templates::new();
        let parser = Parser::new(&templates, ParserOptions::new());
        let entries = parse_paths(&[PathBuf::from("/nonexistent/x.pac")], &parser);
        assert!(entries[0].result.is_err());
    }
}
