use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources.
const SOURCE_DIRS: [&str; 3] = ["spike", "cli", "tests"];

// Collects the offending lines of one file for a single policy.
struct ViolationCollector {
    violations: Vec<String>,
    file_path: PathBuf,
    policy: Policy,
}

#[derive(Clone, Copy)]
enum Policy {
    UnderscorePrefix,
    AllowDeadCode,
}

impl Policy {
    fn pattern(self) -> &'static str {
        match self {
            Self::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b",
            Self::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::UnderscorePrefix => "underscore-prefixed variables",
            Self::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn remedy(self) -> &'static str {
        match self {
            Self::UnderscorePrefix => {
                "   Either use the variable (removing the underscore) or remove it completely.\n"
            }
            Self::AllowDeadCode => {
                "   Either use the code (removing the attribute) or remove it completely.\n"
            }
        }
    }
}

impl ViolationCollector {
    fn new(file_path: &Path, policy: Policy) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
            policy,
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.policy.describe(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!(
            "\n⚠️ {} are not allowed in this project.\n",
            self.policy.describe()
        ));
        error_msg.push_str(self.policy.remedy());

        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if let Policy::UnderscorePrefix = self.policy {
            let is_comment = line_text.trim_start().starts_with("//");
            // Odd-numbered segments between double quotes are string contents.
            let is_in_string = line_text
                .split('"')
                .enumerate()
                .any(|(i, part)| i % 2 == 1 && part.contains('_'));
            if is_comment || is_in_string {
                return Ok(true);
            }
        }

        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=ARRAY_SPIKER_BUILD_TIMESTAMP={timestamp}");

    for policy in [Policy::UnderscorePrefix, Policy::AllowDeadCode] {
        if let Err(e) = scan_sources(policy) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn scan_sources(policy: Policy) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(policy.pattern())?;
    let mut searcher = Searcher::new();

    for entry in SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
    {
        let path = entry.path();
        let mut collector = ViolationCollector::new(path, policy);
        searcher.search_path(&matcher, path, &mut collector)?;

        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }

    Ok(())
}
