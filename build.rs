//! Source hygiene checks run on every build.
//!
//! Only `src/` is inspected.

use std::path::{Path, PathBuf};

const MAX_LINES: usize = 750;

const CHECKED_EXTENSIONS: &[&str] = &["rs", "md", "yaml", "toml"];

const SKIP_PATTERNS: &[&str] = &[
    "Skipping test",
    "skipping test",
    "Test skipped",
    "test skipped",
];

fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR must be set");
    let root = PathBuf::from(manifest_dir);
    let src = root.join("src");
    println!("cargo:rerun-if-changed=src");

    let mut files = Vec::new();
    collect_files(&src, &mut files);
    files.sort();

    let sources: Vec<(PathBuf, String)> = files
        .iter()
        .filter_map(|path| {
            let content = std::fs::read_to_string(path).ok()?;
            let rel = path.strip_prefix(&root).unwrap_or(path).to_path_buf();
            Some((rel, content))
        })
        .collect();
    let rust_sources: Vec<&(PathBuf, String)> = sources
        .iter()
        .filter(|(path, _)| path.extension().and_then(|e| e.to_str()) == Some("rs"))
        .collect();

    let mut failures = Vec::new();
    failures.extend(check_line_limits(&sources));
    for (path, content) in &rust_sources {
        failures.extend(check_dead_code_allows(path, content));
        failures.extend(check_test_bodies(path, content));
        failures.extend(check_nested_runtimes(path, content));
    }

    if !failures.is_empty() {
        eprintln!("\n========================================");
        eprintln!("SOURCE HYGIENE CHECKS FAILED");
        eprintln!("========================================");
        for failure in &failures {
            eprintln!("  {}", failure);
        }
        eprintln!("========================================\n");
        panic!("Build failed: {} hygiene violation(s)", failures.len());
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| CHECKED_EXTENSIONS.contains(&ext))
        {
            files.push(path);
        }
    }
}

fn check_line_limits(sources: &[(PathBuf, String)]) -> Vec<String> {
    sources
        .iter()
        .filter_map(|(path, content)| {
            let lines = content.lines().filter(|l| !l.trim().is_empty()).count();
            (lines > MAX_LINES).then(|| {
                format!(
                    "{}: {} non-empty lines (max {}), split it into smaller modules",
                    path.display(),
                    lines,
                    MAX_LINES
                )
            })
        })
        .collect()
}

fn check_dead_code_allows(path: &Path, content: &str) -> Vec<String> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            (trimmed.starts_with("#[allow(") || trimmed.starts_with("#![allow("))
                && trimmed.contains("dead_code")
        })
        .map(|(i, _)| {
            format!(
                "{}:{}: #[allow(dead_code)] is not allowed, delete the unused code",
                path.display(),
                i + 1
            )
        })
        .collect()
}

/// A test function found by scanning attributes and brace depth.
struct TestBody<'a> {
    name: String,
    start_line: usize,
    serial: bool,
    lines: Vec<&'a str>,
}

fn find_tests(content: &str) -> Vec<TestBody<'_>> {
    let lines: Vec<&str> = content.lines().collect();
    let mut tests = Vec::new();
    let mut serial_pending = false;
    let mut i = 0;

    while i < lines.len() {
        let trimmed = lines.get(i).map(|l| l.trim()).unwrap_or_default();
        if trimmed == "#[serial]" || trimmed == "#[serial_test::serial]" {
            serial_pending = true;
        }
        if trimmed != "#[test]" && !trimmed.starts_with("#[tokio::test") {
            i += 1;
            continue;
        }

        // Attributes may sit on either side of #[test].
        let mut serial = serial_pending;
        let mut j = i + 1;
        while let Some(line) = lines.get(j) {
            let t = line.trim();
            if t == "#[serial]" || t == "#[serial_test::serial]" {
                serial = true;
            }
            if t.contains("fn ") {
                break;
            }
            j += 1;
        }

        let name = lines
            .get(j)
            .and_then(|l| l.split("fn ").nth(1))
            .and_then(|rest| rest.split('(').next())
            .unwrap_or_default()
            .trim()
            .to_string();

        let mut depth = 0i32;
        let mut body = Vec::new();
        let mut k = j;
        while let Some(line) = lines.get(k) {
            body.push(*line);
            for c in line.chars() {
                match c {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            k += 1;
            if depth <= 0 && line.contains('}') {
                break;
            }
        }

        tests.push(TestBody {
            name,
            start_line: i + 1,
            serial,
            lines: body,
        });
        serial_pending = false;
        i = k;
    }
    tests
}

/// Bans silently skipped tests and env mutation without `#[serial]`.
fn check_test_bodies(path: &Path, content: &str) -> Vec<String> {
    let mut failures = Vec::new();
    for test in find_tests(content) {
        let skips = test
            .lines
            .iter()
            .any(|line| SKIP_PATTERNS.iter().any(|p| line.contains(p)));
        let early_return = test
            .lines
            .iter()
            .skip(1)
            .any(|line| line.trim() == "return;");
        if skips || early_return {
            failures.push(format!(
                "{}:{}: test `{}` skips silently, make it fail instead",
                path.display(),
                test.start_line,
                test.name
            ));
        }

        let mutates_env = test.lines.iter().any(|line| {
            let t = line.trim();
            !t.starts_with("//") && (t.contains("env::set_var") || t.contains("env::remove_var"))
        });
        if mutates_env && !test.serial {
            failures.push(format!(
                "{}:{}: test `{}` mutates env without #[serial]",
                path.display(),
                test.start_line,
                test.name
            ));
        }
    }
    failures
}

/// Bans threads that build their own tokio runtime.
fn check_nested_runtimes(path: &Path, content: &str) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    let mut failures = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("//") || !trimmed.contains("thread::spawn(") {
            continue;
        }
        let nested = lines
            .iter()
            .skip(i)
            .take(20)
            .any(|l| l.contains("Runtime::new()") || l.contains("runtime::Builder"));
        if nested {
            failures.push(format!(
                "{}:{}: thread spawns its own tokio runtime, use tokio::spawn instead",
                path.display(),
                i + 1
            ));
        }
    }
    failures
}
