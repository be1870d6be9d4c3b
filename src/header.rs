//! The identifying comment block students put at the top of every file.
//!
//! ```text
//! // Tuffy Titan
//! // CPSC 120-01
//! // 2022-01-27
//! // tuffy.titan@csu.fullerton.edu
//! // @tuffytitan
//! //
//! // Lab 01-02
//! // Partners: @peteranteater
//! ```

use std::fs;
use std::path::Path;

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Header {
    pub name: Option<String>,
    pub email: Option<String>,
    pub github: Option<String>,
    pub partners: Vec<String>,
}

impl Header {
    pub fn parse(contents: &str) -> Self {
        let mut header = Header::default();

        let comment_lines = contents
            .lines()
            .map(str::trim)
            .take_while(|line| line.starts_with("//"))
            .map(|line| line.trim_start_matches('/').trim())
            .filter(|line| !line.is_empty());

        for line in comment_lines {
            if let Some(rest) = strip_prefix_ignore_case(line, "partners:") {
                header.partners = rest
                    .split([',', ' '])
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect();
            } else if header.github.is_none() && is_github_handle(line) {
                header.github = Some(line.to_string());
            } else if header.email.is_none() && is_email(line) {
                header.email = Some(line.to_string());
            } else if header.name.is_none() {
                header.name = Some(line.to_string());
            }
        }

        header
    }

    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.email.is_some() && self.github.is_some()
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &line[prefix.len()..])
}

fn is_github_handle(line: &str) -> bool {
    line.len() > 1
        && line.starts_with('@')
        && !line.contains(char::is_whitespace)
        && !line[1..].contains('@')
}

fn is_email(line: &str) -> bool {
    match line.split_once('@') {
        Some((user, domain)) => {
            !user.is_empty()
                && domain.contains('.')
                && !line.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Reads `path` and returns its header if the file has a complete one.
pub fn read_header(path: &Path) -> Option<Header> {
    let contents = fs::read_to_string(path).ok()?;
    let header = Header::parse(&contents);
    header.is_complete().then_some(header)
}

pub fn has_header(path: &Path) -> bool {
    read_header(path).is_some()
}

/// Who is being graded.
pub fn identify(header: Option<&Header>) -> String {
    match header {
        Some(h) => format!(
            "Grading {} {} {}",
            h.name.as_deref().unwrap_or_default(),
            h.email.as_deref().unwrap_or_default(),
            h.github.as_deref().unwrap_or_default()
        ),
        None => "(Malformed Header)".to_string(),
    }
}
