use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::runner::{Step, TestCase};

// Each part of the assignment expects a single run with no input:
// part-1 converts 451 degrees Fahrenheit to Celsius
// part-2 solves 4x^2 + 7x - 13 = 0 with the quadratic formula
// part-3 greets the world
const PART_1_OUTPUT: &str =
    r"\s*451\s+degrees\s+Fahrenheit\s+is\s+843.8[0-9]*\s+degrees\s+Celsius.";
const PART_2_OUTPUT: &str = r"\s*There\s+are\s+two\s+solutions\s+for\s+4x\^2\s+\+\s+7x\s+-\s+13\s+=\s+0.\s+The\s+first\s+is\s+1.1[0-9]*\s+and\s+the\s+second\s+is\s+-2.8[0-9]*\.\s+";
const PART_3_OUTPUT: &str = r"\s*Hello\s+World!";

const NO_PARAMETERS: &str = "No parameters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Part {
    One,
    Two,
    Three,
}

#[derive(Error, Debug, PartialEq)]
#[error("no match for assignment part {0:?}; expected part-1 | part-2 | part-3")]
pub struct UnknownPart(pub String);

impl FromStr for Part {
    type Err = UnknownPart;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches('/') {
            "part-1" => Ok(Part::One),
            "part-2" => Ok(Part::Two),
            "part-3" => Ok(Part::Three),
            other => Err(UnknownPart(other.to_string())),
        }
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match self {
            Part::One => "part-1",
            Part::Two => "part-2",
            Part::Three => "part-3",
        };
        f.write_str(id)
    }
}

/// clang-tidy options, passed as separate arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TidyOptions {
    pub checks: String,
    pub config: Option<String>,
}

impl TidyOptions {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![format!("-checks={}", self.checks)];
        if let Some(config) = &self.config {
            args.push(format!("-config={config}"));
        }
        args
    }
}

impl Default for TidyOptions {
    fn default() -> Self {
        Self {
            checks: [
                "-*",
                "google-*",
                "modernize-*",
                "readability-*",
                "cppcoreguidelines-*",
                "-google-build-using-namespace",
                "-google-readability-todo",
                "-modernize-use-trailing-return-type",
                "-cppcoreguidelines-avoid-magic-numbers",
                "-readability-magic-numbers",
                "-cppcoreguidelines-pro-type-union-access",
                "-cppcoreguidelines-pro-bounds-constant-array-index",
            ]
            .join(","),
            config: None,
        }
    }
}

fn assignment_tidy_options() -> TidyOptions {
    TidyOptions {
        checks: [
            "*",
            "-misc-unused-parameters",
            "-modernize-use-trailing-return-type",
            "-google-build-using-namespace",
            "-cppcoreguidelines-avoid-magic-numbers",
            "-readability-magic-numbers",
        ]
        .join(","),
        config: Some(
            "{CheckOptions: [ \
             {key: readability-identifier-naming.VariableCase, value: lower_case}, \
             {key: readability-identifier-naming.FunctionCase, value: CamelCase}, \
             {key: readability-identifier-naming.GlobalConstantCase, value: UPPER_CASE}, \
             {key: readability-identifier-naming.GlobalConstantPrefix, value: k} ]}"
                .to_string(),
        ),
    }
}

/// What gets checked for one part of the assignment.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub part: Part,
    pub files: &'static [&'static str],
    pub format_check: bool,
    pub lint_check: bool,
    pub tidy_options: TidyOptions,
    pub skip_compile_cmd: bool,
}

impl Part {
    pub fn assignment(self) -> Assignment {
        match self {
            Part::One => Assignment {
                part: self,
                files: &["celius_to_fahrenheit.cc"],
                format_check: true,
                lint_check: false,
                tidy_options: TidyOptions::default(),
                skip_compile_cmd: false,
            },
            Part::Two => Assignment {
                part: self,
                files: &["quadratic_formula.cc"],
                format_check: false,
                lint_check: true,
                tidy_options: assignment_tidy_options(),
                skip_compile_cmd: true,
            },
            Part::Three => Assignment {
                part: self,
                files: &["hello.cc"],
                format_check: true,
                lint_check: true,
                tidy_options: assignment_tidy_options(),
                skip_compile_cmd: true,
            },
        }
    }

    pub fn test_cases(self, timeout: Duration) -> Result<Vec<TestCase>, regex::Error> {
        let pattern = match self {
            Part::One => PART_1_OUTPUT,
            Part::Two => PART_2_OUTPUT,
            Part::Three => PART_3_OUTPUT,
        };

        let case =
            TestCase::new(NO_PARAMETERS, vec![Step::expect(pattern)?]).with_timeout(timeout);
        Ok(vec![case])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{Miss, Verifier, VerifyFailure, DEFAULT_TIMEOUT};

    fn run(part: Part, script: &str) -> crate::runner::Verification {
        let cases = part.test_cases(DEFAULT_TIMEOUT).unwrap();
        Verifier::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .verify(&cases[0])
    }

    #[test]
    fn parses_part_ids() {
        assert_eq!("part-1".parse::<Part>(), Ok(Part::One));
        assert_eq!("part-2/".parse::<Part>(), Ok(Part::Two));
        assert_eq!("part-3".parse::<Part>(), Ok(Part::Three));
        assert_eq!(
            "part-4".parse::<Part>(),
            Err(UnknownPart("part-4".to_string()))
        );
        assert_eq!(Part::Two.to_string(), "part-2");
    }

    #[test]
    fn every_part_has_one_case() {
        for part in [Part::One, Part::Two, Part::Three] {
            let cases = part.test_cases(Duration::from_secs(3)).unwrap();
            assert_eq!(cases.len(), 1);
            assert_eq!(cases[0].name, NO_PARAMETERS);
            assert_eq!(cases[0].timeout, Duration::from_secs(3));
            assert!(cases[0].steps.iter().all(|s| s.send.is_none()));
        }
    }

    #[test]
    fn part_table_matches_assignment() {
        let one = Part::One.assignment();
        assert_eq!(one.files, &["celius_to_fahrenheit.cc"]);
        assert!(!one.lint_check);

        let two = Part::Two.assignment();
        assert!(!two.format_check && two.lint_check && two.skip_compile_cmd);

        let three = Part::Three.assignment();
        assert_eq!(three.files, &["hello.cc"]);
        assert!(three.tidy_options.to_args()[1].starts_with("-config={CheckOptions"));
    }

    #[test]
    fn default_tidy_options_have_no_config() {
        let args = TidyOptions::default().to_args();
        assert_eq!(args.len(), 1);
        assert!(args[0].starts_with("-checks=-*,google-*"));
    }

    #[test]
    fn part_1_accepts_converted_temperature() {
        let result = run(
            Part::One,
            "printf '451 degrees Fahrenheit is 843.8 degrees Celsius.\\n'",
        );
        assert!(result.passed(), "{:?}", result.outcome);
    }

    #[test]
    fn part_2_accepts_solutions_followed_by_newline() {
        let result = run(
            Part::Two,
            "printf 'There are two solutions for 4x^2 + 7x - 13 = 0.\\n\
             The first is 1.12887 and the second is -2.87887.\\n'",
        );
        assert!(result.passed(), "{:?}", result.outcome);
    }

    #[test]
    fn part_2_requires_whitespace_after_final_period() {
        let result = run(
            Part::Two,
            "printf 'There are two solutions for 4x^2 + 7x - 13 = 0. \
             The first is 1.12887 and the second is -2.87887.'",
        );
        assert!(matches!(
            result.outcome,
            Err(VerifyFailure::OutputNotFound {
                cause: Miss::EndOfOutput,
                ..
            })
        ));
    }

    #[test]
    fn part_2_rejects_wrong_second_root() {
        let result = run(
            Part::Two,
            "printf 'There are two solutions for 4x^2 + 7x - 13 = 0. \
             The first is 1.15 and the second is -2.90. \\n'",
        );
        assert!(!result.passed());
    }

    #[test]
    fn part_3_accepts_hello_world() {
        assert!(run(Part::Three, "echo 'Hello World!'").passed());
        assert!(run(Part::Three, "echo 'HELLO   world!'").passed());
        assert!(!run(Part::Three, "echo 'Hello, World!'").passed());
    }
}
