//! Textual signal matchers for the three signal classes.

use regex::Regex;

use crate::models::detection::{DetectionResult, SignalKind};
use crate::{AppError, Result};

/// Module-path substrings associated with the container runtime ecosystem.
pub const IMPORT_TOKENS: &[&str] = &[
    "github.com/containerd",
    "containerd/containerd",
    "containerd/shim",
    "containerd/ttrpc",
    "containerd-shim",
];

/// Runtime lifecycle calls: task create/start, shim entry points, socket and
/// FIFO opens, lightweight-RPC client construction.
pub const RUNTIME_API_CALLS: &[&str] = &[
    "ttrpc.NewClient",
    "ttrpc.NewServer",
    "shim.Init",
    "shim.Start",
    "shim.Run",
    "shim.NewSocket",
    "shim.AnonDialer",
    "task.Create",
    "task.Start",
    "net.DialUnix",
    "net.ListenUnix",
    "fifo.OpenFifo",
];

/// Process-spawn calls whose argument list is inspected for a shim token.
/// The match ends at the opening paren; [`call_arguments`] finds the close.
const SPAWN_CALL_PATTERN: &str =
    r"\b(?:exec\.CommandContext|exec\.Command|os\.StartProcess|syscall\.Exec)\s*\(";

/// Quoted string literal mentioning a shim, used for binary path extraction.
const SHIM_LITERAL_PATTERN: &str = r#"(?i)["`]([^"`\s]*shim[^"`\s]*)["`]"#;

/// Compiled matchers for one classifier instance.
#[derive(Debug, Clone)]
pub struct SignalSet {
    import_tokens: Vec<String>,
    spawn_call: Regex,
    shim_literal: Regex,
    runtime_call: Regex,
}

impl SignalSet {
    /// Build the matchers, appending `extra_import_tokens` to the built-in list.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a pattern fails to compile.
    pub fn new(extra_import_tokens: &[String]) -> Result<Self> {
        let mut import_tokens: Vec<String> =
            IMPORT_TOKENS.iter().map(|t| (*t).to_owned()).collect();
        import_tokens.extend(
            extra_import_tokens
                .iter()
                .filter(|t| !t.trim().is_empty())
                .cloned(),
        );

        let alternation = RUNTIME_API_CALLS
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            import_tokens,
            spawn_call: compile(SPAWN_CALL_PATTERN)?,
            shim_literal: compile(SHIM_LITERAL_PATTERN)?,
            runtime_call: compile(&format!(r"\b({alternation})\s*\("))?,
        })
    }

    /// Scan one file's contents. All matching evidence is reported, not only
    /// the first hit.
    #[must_use]
    pub fn scan(&self, file: &str, content: &str) -> DetectionResult {
        let mut result = DetectionResult::negative();

        for (idx, line) in content.lines().enumerate() {
            for token in &self.import_tokens {
                if line.contains(token.as_str()) {
                    result.record(file, idx + 1, SignalKind::Import, token);
                    result.matched_import_tokens.insert(token.clone());
                }
            }
        }

        for call in self.spawn_call.find_iter(content) {
            let args = call_arguments(&content[call.end()..]);
            if !args.to_ascii_lowercase().contains("shim") {
                continue;
            }
            let line = line_of(content, call.start());
            match self.extract_binary(args) {
                Some(binary) => {
                    result.record(file, line, SignalKind::Execution, &binary);
                    result.shim_binaries.insert(binary);
                }
                None => {
                    result.record(file, line, SignalKind::Execution, "<unresolved shim binary>");
                }
            }
        }

        for caps in self.runtime_call.captures_iter(content) {
            let (Some(call), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let line = line_of(content, call.start());
            result.record(file, line, SignalKind::RuntimeApi, name.as_str());
        }

        result
    }

    /// Best-effort binary path from a spawn call's argument list. Flag
    /// literals such as `"--shim"` are not paths.
    #[must_use]
    pub fn extract_binary(&self, args: &str) -> Option<String> {
        self.shim_literal
            .captures_iter(args)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .find(|literal| !literal.starts_with('-'))
            .map(str::to_owned)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|err| AppError::Config(format!("invalid signal pattern `{pattern}`: {err}")))
}

/// Argument list of a call, given the text right after its opening paren.
///
/// Nested parens are balanced and quoted literals are skipped, so
/// `f(g(), ")")` yields `g(), ")"`. An unterminated call yields the rest of
/// the input.
fn call_arguments(rest: &str) -> &str {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in rest.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' && q != '`' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '`' | '\'' => quote = Some(ch),
            '(' => depth += 1,
            ')' if depth == 0 => return &rest[..idx],
            ')' => depth -= 1,
            _ => {}
        }
    }
    rest
}

/// 1-based line number of a byte offset.
fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}

// ── Tests ─────────────────────────────────────────────────────────────────────
