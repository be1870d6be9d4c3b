use anyhow::{Context, Result};
use rayon::prelude::*;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

const MAIN_SIGNATURE: &str =
    r"int\s*main\s*\(int\s*argc,\s*(const)?\s*char\s*(const)?\s*\*\s*argv\[\]\)";

/// Collects all files from a directory recursively
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if !dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Path is not a directory: {}",
            dir.display()
        ));
    }

    for entry in fs::read_dir(dir).context("Failed to read directory")? {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();

        if path.is_file() {
            files.push(path);
        } else if path.is_dir() {
            files.extend(collect_files(&path)?);
        }
    }

    Ok(files)
}

/// Processes files in parallel; results come back in the order of `files`
pub fn process_files_parallel<F, R>(files: &[PathBuf], process_file: F) -> Vec<R>
where
    F: Fn(&PathBuf) -> R + Send + Sync,
    R: Send + Sync,
{
    files.par_iter().map(process_file).collect()
}

fn collect_with_extensions(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files: Vec<_> = collect_files(dir)?
        .into_iter()
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.contains(&e))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// All C++ sources and headers (`.cc`, `.h`) under `dir`.
pub fn source_files(dir: &Path) -> Result<Vec<PathBuf>> {
    collect_with_extensions(dir, &["cc", "h"])
}

pub fn is_cc_file(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "cc")
}

/// Whether the file defines `int main(int argc, char const *argv[])`.
pub fn has_main_function(path: &Path) -> Result<bool> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let main_regex = Regex::new(MAIN_SIGNATURE)?;
    Ok(main_regex.is_match(&source))
}

/// Line-by-line comparison of two texts. Empty when they are identical.
pub fn line_diff(old: &str, new: &str, old_label: &str, new_label: &str) -> Vec<String> {
    let old_lines: Vec<_> = old.lines().collect();
    let new_lines: Vec<_> = new.lines().collect();
    if old_lines == new_lines {
        return Vec::new();
    }

    let mut diff = vec![format!("*** {old_label}"), format!("--- {new_label}")];
    for line in 0..old_lines.len().max(new_lines.len()) {
        let before = old_lines.get(line);
        let after = new_lines.get(line);
        if before == after {
            continue;
        }
        diff.push(format!("@@ line {} @@", line + 1));
        if let Some(before) = before {
            diff.push(format!("- {before}"));
        }
        if let Some(after) = after {
            diff.push(format!("+ {after}"));
        }
    }

    diff
}
