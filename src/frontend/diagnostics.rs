/// Scraping of compiler diagnostics from tool stderr/stdout
use crate::core::types::{Diagnostic, Severity};
use crate::frontend::compiled;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static LOCATED: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"^(?P<file>[^\s:][^:\s]*):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?:(?P<sev>fatal error|error|warning|note|remark|info)\s*:\s*)?(?P<msg>.+)$",
    )
    .ok()
});
static UNLOCATED: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^(?:[\w.+-]+: )?(?P<sev>fatal error|error|warning): (?P<msg>.+)$").ok()
});

/// Extract diagnostics from tool output.
///
/// Lines of the form `file:line[:col]: severity: message` keep their location.
/// A javac caret line two lines below a located diagnostic supplies the
/// column. Located lines without a severity word (go, gofmt) are only taken
/// when they name `source_file`, and get `Error` when the tool `failed`.
pub fn scrape(text: &str, source_file: &str, failed: bool) -> Vec<Diagnostic> {
    let (Ok(located), Ok(unlocated)) = (
        compiled(&LOCATED, "located diagnostic"),
        compiled(&UNLOCATED, "unlocated diagnostic"),
    ) else {
        return Vec::new();
    };

    let lines: Vec<&str> = text.lines().collect();
    let mut found: Vec<Diagnostic> = Vec::new();

    for (index, raw) in lines.iter().enumerate() {
        let line = raw.trim_end();
        let line = line.strip_prefix("vet: ").unwrap_or(line);
        let line = line.trim_start_matches("./");

        if let Some(caps) = located.captures(line) {
            let file = &caps["file"];
            let names_source = Path::new(file).file_name()
                == Some(std::ffi::OsStr::new(source_file));
            let severity = match caps.name("sev") {
                Some(sev) => Severity::from_tool(sev.as_str()),
                None if names_source => Some(if failed {
                    Severity::Error
                } else {
                    Severity::Warning
                }),
                None => None,
            };
            let Some(severity) = severity else {
                continue;
            };
            let line_no = caps["line"].parse::<u32>().ok();
            let mut column = caps.name("col").and_then(|c| c.as_str().parse::<u32>().ok());
            if column.is_none() {
                column = caret_column(&lines, index);
            }
            found.push(Diagnostic::new(severity, caps["msg"].trim()).at(line_no, column));
            continue;
        }

        if let Some(caps) = unlocated.captures(line.trim_start()) {
            if let Some(severity) = Severity::from_tool(&caps["sev"]) {
                found.push(Diagnostic::new(severity, caps["msg"].trim()));
            }
        }
    }

    let mut unique: Vec<Diagnostic> = Vec::with_capacity(found.len());
    for diagnostic in found {
        if !unique.contains(&diagnostic) {
            unique.push(diagnostic);
        }
    }
    unique
}

/// javac prints the offending source line and then a caret under the column
fn caret_column(lines: &[&str], index: usize) -> Option<u32> {
    let caret = lines.get(index + 2)?;
    let trimmed = caret.trim_end();
    if trimmed.trim_start() != "^" {
        return None;
    }
    let offset = trimmed.chars().position(|c| c == '^')?;
    u32::try_from(offset + 1).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clang_diagnostics() {
        let text = "\
main.c:3:5: warning: unused variable 'x' [-Wunused-variable]
    int x;
    ^
main.c:4:12: error: use of undeclared identifier 'y'
    return y;
           ^
1 warning and 1 error generated.
";
        let found = scrape(text, "main.c", true);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].severity, Severity::Warning);
        assert_eq!(found[0].line, Some(3));
        assert_eq!(found[0].column, Some(5));
        assert_eq!(found[1].severity, Severity::Error);
        assert_eq!(found[1].message, "use of undeclared identifier 'y'");
        assert_eq!(found[1].column, Some(12));
    }

    #[test]
    fn test_javac_caret_column() {
        let text = "\
Main.java:3: error: ';' expected
        int x = 1
                 ^
1 error
";
        let found = scrape(text, "Main.java", true);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, Some(3));
        assert_eq!(found[0].column, Some(18));
        assert_eq!(found[0].message, "';' expected");
    }

    #[test]
    fn test_go_diagnostics_without_severity() {
        let text = "\
# command-line-arguments
./main.go:4:2: undefined: fmt.Printl
vet: ./main.go:6:1: missing return
other.go:1:1: ignored because it names another file
";
        let found = scrape(text, "main.go", true);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| d.severity == Severity::Error));
        assert_eq!(found[0].line, Some(4));
        assert_eq!(found[0].column, Some(2));
        assert_eq!(found[1].message, "missing return");

        let found = scrape("main.go:4:2: expected declaration", "main.go", false);
        assert_eq!(found[0].severity, Severity::Warning);
    }

    #[test]
    fn test_unlocated_diagnostics_have_no_position() {
        let found = scrape(
            "clang: error: linker command failed with exit code 1\nerror: no input files",
            "main.c",
            true,
        );
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| d.line.is_none() && d.column.is_none()));
        assert_eq!(found[0].message, "linker command failed with exit code 1");
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let text = "a.c:1:1: error: boom\na.c:1:1: error: boom\n";
        assert_eq!(scrape(text, "a.c", true).len(), 1);
    }
}
