use std::path::PathBuf;
use std::slice;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::assignment::TidyOptions;
use crate::tools::{self, ToolLimits};

/// Lints each file with the default clang-tidy checks. Returns the process
/// exit status: 1 if any file has findings.
pub fn lint_files(files: &[PathBuf], limits: &ToolLimits) -> Result<i32> {
    if files.is_empty() {
        warn!("Only {} files provided.", files.len());
        warn!("Provide a list of files to check.");
    }

    let options = TidyOptions::default();
    let mut status = 0;
    for file in files {
        info!("Linting file: {}", file.display());
        if !file.exists() {
            debug!("File {} does not exist. Continuing.", file.display());
            continue;
        }

        tools::write_compile_db(slice::from_ref(file), limits.make)?;
        let warnings = tools::lint_check(file, &options, false, limits.tidy)?;
        if warnings.is_empty() {
            info!("Linting passed");
        } else {
            error!("Linter found improvements.");
            warn!("{}", warnings.join("\n"));
            status = 1;
        }
    }

    Ok(status)
}
