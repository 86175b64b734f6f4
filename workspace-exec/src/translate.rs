//! Normalizes compiler and process signals into [`RunResult`]s.

use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

use crate::{
    driver::{ProcessOutput, Termination},
    snippet::CompilationUnit,
    types::{Diagnostic, ExceptionInfo, FaultKind, Location, RunResult, Severity},
};

static LOCATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<file>[^\s(][^(]*?)\((?P<line>\d+),(?P<col>\d+)(?:,\d+,\d+)?\)\s*:\s*(?P<sev>error|warning|info|hidden)\s+(?P<code>[A-Za-z]+\d+)\s*:\s*(?P<msg>.*?)(?:\s+\[[^\]]*\])?\s*$",
    )
    .expect("static regex")
});

static UNLOCATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:[^:\[]+?\s*:\s*)?(?P<sev>error|warning)\s+(?P<code>[A-Za-z]+\d+)\s*:\s*(?P<msg>.*?)(?:\s+\[[^\]]*\])?\s*$",
    )
    .expect("static regex")
});

static UNHANDLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Unhandled [Ee]xception[.:]\s*(?P<type>[\w.`+]+)(?::\s?(?P<msg>.*))?$")
        .expect("static regex")
});

/// What to do after the compile step.
#[derive(Debug)]
pub enum BuildVerdict {
    /// Build succeeded; carry these (non-error) diagnostics into the run.
    Proceed { warnings: Vec<Diagnostic> },
    /// Build ended the request.
    Finished(RunResult),
}

/// Parse compiler output into diagnostics, deduplicated and ordered by
/// location, with locations mapped back onto the snippet.
pub fn parse_diagnostics(text: &str, unit: &CompilationUnit) -> Vec<Diagnostic> {
    let mut seen = HashSet::new();
    let mut diagnostics = Vec::new();

    for line in text.lines() {
        let Some(diagnostic) = parse_line(line, unit) else {
            continue;
        };
        if seen.insert(diagnostic.clone()) {
            diagnostics.push(diagnostic);
        }
    }

    diagnostics.sort_by(|a, b| a.location.cmp(&b.location));
    diagnostics
}

fn parse_line(line: &str, unit: &CompilationUnit) -> Option<Diagnostic> {
    if let Some(caps) = LOCATED.captures(line) {
        let file = Path::new(caps["file"].trim())
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| caps["file"].trim().to_string());
        let location = Location {
            file,
            line: caps["line"].parse().ok()?,
            column: caps["col"].parse().ok()?,
        };
        return Some(Diagnostic {
            severity: caps["sev"].parse::<Severity>().ok()?,
            code: Some(caps["code"].to_string()),
            message: caps["msg"].to_string(),
            location: Some(unit.to_snippet_location(location)),
        });
    }

    let caps = UNLOCATED.captures(line)?;
    Some(Diagnostic {
        severity: caps["sev"].parse::<Severity>().ok()?,
        code: Some(caps["code"].to_string()),
        message: caps["msg"].to_string(),
        location: None,
    })
}

/// Parse the runtime's report of an uncaught exception, if stderr holds one.
pub fn parse_unhandled_exception(stderr: &str) -> Option<ExceptionInfo> {
    let mut lines = stderr.lines().skip_while(|line| !UNHANDLED.is_match(line));
    let caps = UNHANDLED.captures(lines.next()?)?;

    let mut message = caps
        .name("msg")
        .map(|m| m.as_str().trim_end().to_string())
        .unwrap_or_default();
    let mut stack_trace = Vec::new();

    for line in lines {
        let trimmed = line.trim_start();
        if trimmed.starts_with("at ") {
            stack_trace.push(trimmed.to_string());
        } else if stack_trace.is_empty() && !trimmed.starts_with("--->") && !trimmed.is_empty() {
            // Multi-line message text before the first frame.
            message.push('\n');
            message.push_str(line.trim_end());
        }
    }

    Some(ExceptionInfo {
        kind: FaultKind::RuntimeFault,
        type_name: Some(caps["type"].to_string()),
        message,
        stack_trace,
    })
}

/// Split console output into lines in emission order.
pub fn output_lines(text: &str, raw_output: bool) -> Vec<String> {
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| {
            if raw_output {
                line.to_string()
            } else {
                line.strip_suffix('\r').unwrap_or(line).to_string()
            }
        })
        .collect();
    if lines.last().is_some_and(|last| last.is_empty()) {
        lines.pop();
    }
    lines
}

/// Decide the compile step: error diagnostics or a failed build end the
/// request; warnings-only builds proceed.
pub fn translate_build(build: &ProcessOutput, unit: &CompilationUnit) -> BuildVerdict {
    let mut diagnostics = parse_diagnostics(
        &format!("{}\n{}", build.stdout_text(), build.stderr_text()),
        unit,
    );

    match build.termination {
        Termination::TimedOut => {
            return BuildVerdict::Finished(RunResult::timed_out(
                Vec::new(),
                format!("Compilation timed out after {}s", build.elapsed.as_secs()),
                diagnostics,
            ));
        }
        Termination::Cancelled => {
            return BuildVerdict::Finished(RunResult::timed_out(
                Vec::new(),
                "Run cancelled during compilation",
                diagnostics,
            ));
        }
        Termination::Exited { .. } => {}
    }

    if diagnostics.iter().any(Diagnostic::is_error) {
        return BuildVerdict::Finished(RunResult::compile_failed(diagnostics));
    }

    if !build.success() {
        diagnostics.insert(0, Diagnostic::error(build_failure_message(build)));
        return BuildVerdict::Finished(RunResult::compile_failed(diagnostics));
    }

    BuildVerdict::Proceed {
        warnings: diagnostics,
    }
}

/// Map the run step onto the unified result.
pub fn translate_run(
    run: &ProcessOutput,
    diagnostics: Vec<Diagnostic>,
    raw_output: bool,
) -> RunResult {
    if run.truncated {
        warn!("Program output exceeded the capture limit and was truncated");
    }
    let output = output_lines(&run.stdout_text(), raw_output);

    match run.termination {
        Termination::TimedOut => RunResult::timed_out(
            output,
            format!("Run timed out after {} ms", run.elapsed.as_millis()),
            diagnostics,
        ),
        Termination::Cancelled => RunResult::timed_out(output, "Run cancelled", diagnostics),
        Termination::Exited { .. } if run.success() => RunResult::success(output, diagnostics),
        Termination::Exited { code, signal } => {
            let stderr = run.stderr_text();
            let exception = parse_unhandled_exception(&stderr).unwrap_or_else(|| {
                let trimmed = stderr.trim();
                let message = if !trimmed.is_empty() {
                    trimmed.to_string()
                } else if let Some(signal) = signal {
                    format!("Process killed by signal {}", signal)
                } else {
                    format!("Process exited with code {}", code.unwrap_or(-1))
                };
                ExceptionInfo {
                    kind: FaultKind::RuntimeFault,
                    type_name: None,
                    message,
                    stack_trace: Vec::new(),
                }
            });
            RunResult::runtime_fault(output, exception, diagnostics)
        }
    }
}

fn build_failure_message(build: &ProcessOutput) -> String {
    let combined = format!("{}{}", build.stdout_text(), build.stderr_text());
    let tail: Vec<&str> = combined
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let tail = tail[tail.len().saturating_sub(10)..].join("\n");
    match build.exit_code() {
        Some(code) => format!("Build failed with exit code {}: {}", code, tail),
        None => format!("Build failed: {}", tail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::SOURCE_FILE;
    use crate::types::Outcome;
    use std::time::Duration;

    fn unit(snippet: &str) -> CompilationUnit {
        CompilationUnit::wrap(snippet, 64 * 1024).unwrap()
    }

    fn exited(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            termination: Termination::Exited {
                code: Some(code),
                signal: None,
            },
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            truncated: false,
            elapsed: Duration::from_millis(40),
        }
    }

    fn header_columns() -> u32 {
        let unit = unit("");
        unit.source.find("Main() { ").unwrap() as u32 + "Main() { ".len() as u32
    }

    #[test]
    fn parses_msbuild_errors_and_maps_to_snippet() {
        let col = header_columns() + 9;
        let text = format!(
            "/tmp/ws/Program.cs(1,{col}): error CS1525: Invalid expression term ';' [/tmp/ws/Snippet.csproj]\n\
             Build FAILED.\n\
             /tmp/ws/Program.cs(1,{col}): error CS1525: Invalid expression term ';' [/tmp/ws/Snippet.csproj]\n"
        );
        let diagnostics = parse_diagnostics(&text, &unit("int x = ;"));

        assert_eq!(diagnostics.len(), 1);
        let diag = &diagnostics[0];
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.code.as_deref(), Some("CS1525"));
        assert_eq!(diag.message, "Invalid expression term ';'");
        let location = diag.location.as_ref().unwrap();
        assert_eq!(
            (location.file.as_str(), location.line, location.column),
            (SOURCE_FILE, 1, 9)
        );
    }

    #[test]
    fn diagnostics_are_sorted_by_location() {
        let text = "Program.cs(3,1): warning CS0219: unused\n\
                    Program.cs(2,5): error CS0103: missing\n\
                    CSC : error CS5001: Program does not contain a static 'Main' method\n";
        let diagnostics = parse_diagnostics(text, &unit("a\nb\nc"));
        let codes: Vec<_> = diagnostics.iter().filter_map(|d| d.code.as_deref()).collect();
        assert_eq!(codes, ["CS5001", "CS0103", "CS0219"]);
        assert!(diagnostics[0].location.is_none());
    }

    #[test]
    fn ignores_ordinary_build_chatter() {
        let text = "  Determining projects to restore...\n  Snippet -> /tmp/ws/bin/Snippet.dll\n\nBuild succeeded.\n    0 Warning(s)\n    0 Error(s)\n";
        assert!(parse_diagnostics(text, &unit("")).is_empty());
    }

    #[test]
    fn parses_unhandled_exception() {
        let stderr = "Unhandled exception. System.Exception: boom\n   at Program.Main() in /tmp/ws/Program.cs:line 1\n";
        let exception = parse_unhandled_exception(stderr).unwrap();
        assert_eq!(exception.type_name.as_deref(), Some("System.Exception"));
        assert_eq!(exception.message, "boom");
        assert_eq!(
            exception.stack_trace,
            ["at Program.Main() in /tmp/ws/Program.cs:line 1"]
        );
    }

    #[test]
    fn unknown_stderr_is_not_an_exception() {
        assert!(parse_unhandled_exception("Segmentation fault\n").is_none());
    }

    #[test]
    fn output_lines_respect_raw_flag() {
        assert_eq!(output_lines("2\r\nx\n", false), ["2", "x"]);
        assert_eq!(output_lines("2\r\nx\n", true), ["2\r", "x"]);
        assert_eq!(output_lines("", false), Vec::<String>::new());
        assert_eq!(output_lines("a\n\nb", false), ["a", "", "b"]);
    }

    #[test]
    fn warnings_only_build_proceeds() {
        let build = exited(0, "Program.cs(1,200): warning CS0219: assigned but never used\n", "");
        match translate_build(&build, &unit("int a = 1;")) {
            BuildVerdict::Proceed { warnings } => {
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].severity, Severity::Warning);
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
    }

    #[test]
    fn failed_build_without_diagnostics_is_compile_failure() {
        let build = exited(1, "", "MSBUILD : something went sideways\n");
        let BuildVerdict::Finished(result) = translate_build(&build, &unit("")) else {
            panic!("build should finish the request");
        };
        assert_eq!(result.outcome, Outcome::CompileFailed);
        assert!(result.output.is_empty());
        assert!(result.diagnostics[0].message.contains("something went sideways"));
    }

    #[test]
    fn non_zero_exit_becomes_runtime_fault() {
        let run = exited(134, "before\n", "Unhandled exception. System.Exception: boom\n");
        let result = translate_run(&run, vec![], false);
        assert_eq!(result.outcome, Outcome::RuntimeFault);
        assert!(!result.succeeded);
        assert_eq!(result.output, ["before"]);
        assert_eq!(result.exception.unwrap().message, "boom");

        let run = exited(2, "", "plain failure\n");
        let result = translate_run(&run, vec![], false);
        assert_eq!(result.exception.unwrap().message, "plain failure");
    }

    #[test]
    fn timeout_is_distinct_and_keeps_partial_output() {
        let mut run = exited(0, "tick\ntick\n", "");
        run.termination = Termination::TimedOut;
        let result = translate_run(&run, vec![], false);
        assert!(result.is_timed_out());
        assert_eq!(result.output, ["tick", "tick"]);
        assert_eq!(result.exception.unwrap().kind, FaultKind::TimedOut);
    }

    #[test]
    fn warnings_do_not_flip_success() {
        let warning = Diagnostic {
            severity: Severity::Warning,
            code: Some("CS0219".to_string()),
            message: "unused".to_string(),
            location: None,
        };
        let result = translate_run(&exited(0, "2\n", ""), vec![warning], false);
        assert!(result.succeeded);
        assert_eq!(result.output, ["2"]);
        assert_eq!(result.diagnostics.len(), 1);
    }
}
