//! Wrapping of statement snippets into a complete C# program.
//!
//! The snippet is placed on the first line of the generated file, right after
//! the entry-point header, so compiler locations on later lines already match
//! snippet lines and locations on the first line only need the header width
//! subtracted.

use serde::{Deserialize, Serialize};
use std::iter::Peekable;
use std::str::Chars;

use crate::{error::Error, types::Location, Result};

/// Name of the generated source file inside a workspace.
pub const SOURCE_FILE: &str = "Program.cs";

const HEADER: &str = "using System; using System.Linq; using System.Collections.Generic; \
class Program { static void Main() { ";
const FOOTER: &str = "\n    }\n}\n";

/// A snippet wrapped into a self-contained program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub file_name: String,
    pub source: String,
    /// Number of lines the snippet spans in `source`
    pub snippet_lines: u32,
    header_columns: u32,
    /// Column just past the snippet's last character, in snippet coordinates
    end_column: u32,
}

impl CompilationUnit {
    /// Wraps `snippet` in the fixed program template.
    pub fn wrap(snippet: &str, max_bytes: usize) -> Result<Self> {
        validate(snippet, max_bytes)?;

        let mut source = String::with_capacity(HEADER.len() + snippet.len() + FOOTER.len());
        source.push_str(HEADER);
        source.push_str(snippet);
        source.push_str(FOOTER);

        let last_line = snippet.rsplit('\n').next().unwrap_or_default();
        Ok(Self {
            file_name: SOURCE_FILE.to_string(),
            source,
            snippet_lines: snippet.split('\n').count() as u32,
            header_columns: HEADER.chars().count() as u32,
            end_column: last_line.trim_end_matches('\r').chars().count() as u32 + 1,
        })
    }

    /// Translates a location in the generated file into snippet coordinates.
    /// Locations in the closing wrapper collapse onto the end of the snippet.
    /// Locations in other files are returned unchanged.
    pub fn to_snippet_location(&self, location: Location) -> Location {
        if location.file != self.file_name {
            return location;
        }
        if location.line > self.snippet_lines {
            return Location {
                line: self.snippet_lines,
                column: self.end_column,
                ..location
            };
        }
        if location.line != 1 {
            return location;
        }
        Location {
            column: location.column.saturating_sub(self.header_columns).max(1),
            ..location
        }
    }
}

fn validate(snippet: &str, max_bytes: usize) -> Result<()> {
    if snippet.len() > max_bytes {
        return Err(Error::InvalidSnippet(format!(
            "snippet is {} bytes, limit is {}",
            snippet.len(),
            max_bytes
        )));
    }
    if snippet.contains('\0') {
        return Err(Error::InvalidSnippet("snippet contains a NUL character".to_string()));
    }
    if let Some(line) = first_unopened_brace(snippet) {
        return Err(Error::InvalidSnippet(format!(
            "line {} closes a brace that was never opened",
            line
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Code,
    LineComment,
    BlockComment,
    Str { verbatim: bool, interpolated: bool },
    /// `"""` raw literal closed by a run of at least `quotes` quotes
    Raw { quotes: usize },
    Char,
}

/// Returns the 1-based line of the first `}` that would close the generated
/// `Main` body, ignoring braces inside literals and comments. Braces inside
/// interpolation holes count as code.
fn first_unopened_brace(snippet: &str) -> Option<u32> {
    let mut state = Scan::Code;
    let mut depth: i64 = 0;
    // String to resume and the depth it was left at, per open hole
    let mut holes: Vec<(Scan, i64)> = Vec::new();
    let mut line = 1;
    let mut chars = snippet.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
        }
        state = match state {
            Scan::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    Scan::LineComment
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    Scan::BlockComment
                }
                '"' | '$' | '@' => open_string(c, &mut chars),
                '\'' => Scan::Char,
                '{' => {
                    depth += 1;
                    Scan::Code
                }
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Some(line);
                    }
                    match holes.last() {
                        Some(&(resume, at)) if at == depth => {
                            holes.pop();
                            resume
                        }
                        _ => Scan::Code,
                    }
                }
                _ => Scan::Code,
            },
            Scan::LineComment if c == '\n' => Scan::Code,
            Scan::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                chars.next();
                Scan::Code
            }
            Scan::Str { interpolated: true, .. } if c == '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    state
                } else {
                    holes.push((state, depth));
                    depth += 1;
                    Scan::Code
                }
            }
            Scan::Str { verbatim: false, .. } if c == '\\' => {
                chars.next();
                state
            }
            Scan::Str { verbatim: false, .. } if c == '"' || c == '\n' => Scan::Code,
            Scan::Str { verbatim: true, .. } if c == '"' => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    state
                } else {
                    Scan::Code
                }
            }
            Scan::Raw { quotes } if c == '"' => {
                if 1 + take_quotes(&mut chars) >= quotes {
                    Scan::Code
                } else {
                    state
                }
            }
            Scan::Char if c == '\\' => {
                chars.next();
                state
            }
            Scan::Char if c == '\'' || c == '\n' => Scan::Code,
            other => other,
        };
    }
    None
}

/// Classifies a literal starting at `first` (`"`, or a `$`/`@` prefix).
/// A prefix not followed by a quote is ordinary code.
fn open_string(first: char, chars: &mut Peekable<Chars<'_>>) -> Scan {
    let mut verbatim = first == '@';
    let mut interpolated = first == '$';
    if first != '"' {
        while let Some(&(c @ ('$' | '@'))) = chars.peek() {
            verbatim |= c == '@';
            interpolated |= c == '$';
            chars.next();
        }
        if chars.next_if_eq(&'"').is_none() {
            return Scan::Code;
        }
    }
    let quotes = 1 + take_quotes(chars);

    if verbatim {
        // `""` inside a verbatim literal is an escaped quote
        if quotes % 2 == 1 {
            Scan::Str {
                verbatim,
                interpolated,
            }
        } else {
            Scan::Code
        }
    } else if quotes >= 3 {
        Scan::Raw { quotes }
    } else if quotes == 2 {
        Scan::Code
    } else {
        Scan::Str {
            verbatim,
            interpolated,
        }
    }
}

fn take_quotes(chars: &mut Peekable<Chars<'_>>) -> usize {
    let mut count = 0;
    while chars.next_if_eq(&'"').is_some() {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 64 * 1024;

    #[test]
    fn wrapping_is_deterministic() {
        let a = CompilationUnit::wrap("Console.WriteLine(1+1);", LIMIT).unwrap();
        let b = CompilationUnit::wrap("Console.WriteLine(1+1);", LIMIT).unwrap();
        assert_eq!(a, b);
        assert!(a
            .source
            .starts_with("using System; using System.Linq; using System.Collections.Generic;"));
        assert!(a.source.contains("static void Main() { Console.WriteLine(1+1);\n"));
    }

    #[test]
    fn blank_snippet_is_a_no_op_program() {
        let unit = CompilationUnit::wrap("   \n\t", LIMIT).unwrap();
        assert_eq!(unit.snippet_lines, 2);
        assert!(unit.source.ends_with("\n    }\n}\n"));
    }

    #[test]
    fn first_line_columns_are_shifted_back() {
        let unit = CompilationUnit::wrap("int x = ;", LIMIT).unwrap();
        let header = HEADER.chars().count() as u32;
        let mapped = unit.to_snippet_location(Location {
            file: SOURCE_FILE.to_string(),
            line: 1,
            column: header + 9,
        });
        assert_eq!(mapped.column, 9);

        let second = unit.to_snippet_location(Location {
            file: SOURCE_FILE.to_string(),
            line: 2,
            column: 4,
        });
        assert_eq!((second.line, second.column), (2, 4));
    }

    #[test]
    fn rejects_brace_that_escapes_main() {
        let err = CompilationUnit::wrap("}\nstatic void Other() {", LIMIT).unwrap_err();
        assert!(matches!(err, Error::InvalidSnippet(msg) if msg.contains("line 1")));
    }

    #[test]
    fn braces_in_literals_and_comments_are_ignored() {
        let snippet = r#"
            var s = "}}}";
            var v = @"say ""}"" twice";
            var c = '}';
            // }
            /* } */
            if (true) { Console.WriteLine(s); }
        "#;
        assert!(CompilationUnit::wrap(snippet, LIMIT).is_ok());
    }

    #[test]
    fn raw_and_verbatim_interpolated_strings_are_ignored() {
        let verbatim = r#"var p = @$"C:\"; var s = "}"; Console.WriteLine(p + s);"#;
        assert!(CompilationUnit::wrap(verbatim, LIMIT).is_ok());

        let swapped = r#"var n = 1; var p = $@"{n}\}}"; Console.WriteLine(p);"#;
        assert!(CompilationUnit::wrap(swapped, LIMIT).is_ok());

        let raw = r#"var s = """ say "}" """; Console.WriteLine(s);"#;
        assert!(CompilationUnit::wrap(raw, LIMIT).is_ok());

        let raw_multi_line = "var s = \"\"\"\"\n  }\"\"\"}\n  \"\"\"\"; Console.WriteLine(s);";
        assert!(CompilationUnit::wrap(raw_multi_line, LIMIT).is_ok());
    }

    #[test]
    fn interpolation_holes_are_code() {
        let nested = r#"Console.WriteLine($"{new[] { 1, 2 }.Length} {"}"} {{ }}");"#;
        assert!(CompilationUnit::wrap(nested, LIMIT).is_ok());

        let empty = r#"var e = ""; var v = @""; Console.WriteLine(e + v); }"#;
        assert!(matches!(
            CompilationUnit::wrap(empty, LIMIT),
            Err(Error::InvalidSnippet(_))
        ));
    }

    #[test]
    fn footer_locations_clamp_to_snippet_end() {
        let unit = CompilationUnit::wrap("if (true) {", LIMIT).unwrap();
        let mapped = unit.to_snippet_location(Location {
            file: SOURCE_FILE.to_string(),
            line: 3,
            column: 2,
        });
        assert_eq!((mapped.line, mapped.column), (1, 12));

        let unit = CompilationUnit::wrap("int a = 1;\nif (a > 0) {", LIMIT).unwrap();
        let mapped = unit.to_snippet_location(Location {
            file: SOURCE_FILE.to_string(),
            line: 4,
            column: 1,
        });
        assert_eq!((mapped.line, mapped.column), (2, 13));
    }

    #[test]
    fn rejects_oversized_and_nul_snippets() {
        assert!(matches!(
            CompilationUnit::wrap("int a = 1;", 4),
            Err(Error::InvalidSnippet(_))
        ));
        assert!(matches!(
            CompilationUnit::wrap("int a\0= 1;", LIMIT),
            Err(Error::InvalidSnippet(_))
        ));
    }

    #[test]
    fn malformed_expressions_are_left_to_the_compiler() {
        assert!(CompilationUnit::wrap("int x = ;", LIMIT).is_ok());
        assert!(CompilationUnit::wrap("if (true) {", LIMIT).is_ok());
    }
}
