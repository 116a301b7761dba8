use crate::record::{CallSite, StackFrame};
use std::backtrace::Backtrace;
use std::collections::BTreeSet;

/// Modules skipped by [`CallSiteResolver::default`]: this crate plus the
/// runtime and `tracing` frames that sit between the caller and the pipeline.
pub const DEFAULT_IGNORED_MODULES: &[&str] = &[
    "tracing_dual_sink",
    "std",
    "core",
    "alloc",
    "tracing",
    "tracing_core",
    "tracing_subscriber",
];

/// Finds the first stack frame that does not belong to the logging machinery.
#[derive(Debug, Clone)]
pub struct CallSiteResolver {
    ignored: BTreeSet<String>,
}

impl Default for CallSiteResolver {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_MODULES.iter().copied())
    }
}

impl CallSiteResolver {
    pub fn new<I, S>(ignored: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: ignored.into_iter().map(Into::into).collect(),
        }
    }

    /// Add more modules to skip, e.g. an application's own logging wrapper.
    pub fn ignore(mut self, module: impl Into<String>) -> Self {
        self.ignored.insert(module.into());
        self
    }

    /// A module is ignored when it equals an entry or is nested below one.
    pub fn is_ignored(&self, module: &str) -> bool {
        self.ignored.iter().any(|ignored| covers(ignored, module))
    }

    /// Like [`is_ignored`](Self::is_ignored), but a crate-relative frame
    /// (`log_setup`) is also matched against entries with their crate
    /// segment removed (`app::log_setup`).
    pub fn is_ignored_frame(&self, frame: &StackFrame) -> bool {
        self.is_ignored(&frame.module)
            || (frame.crate_relative
                && self
                    .ignored
                    .iter()
                    .filter_map(|ignored| ignored.split_once("::").map(|(_, rest)| rest))
                    .any(|rest| covers(rest, &frame.module)))
    }

    /// Scan `frames` innermost first and return the first frame outside the
    /// ignore set, or the `unknown:0` sentinel.
    pub fn resolve(&self, frames: &[StackFrame]) -> CallSite {
        frames
            .iter()
            .find(|frame| !frame.module.is_empty() && !self.is_ignored_frame(frame))
            .map(|frame| CallSite::new(frame.module.clone(), frame.line))
            .unwrap_or_else(CallSite::unknown)
    }

    /// Capture the current thread's stack and resolve it.
    pub fn resolve_current(&self) -> CallSite {
        self.resolve(&capture_frames())
    }

    /// Resolve the recorded `frames`; when none of them qualifies (e.g. the
    /// only frame is an ignored logging wrapper), walk the live stack.
    pub fn resolve_or_current(&self, frames: &[StackFrame]) -> CallSite {
        let site = self.resolve(frames);
        if site.is_unknown() {
            self.resolve_current()
        } else {
            site
        }
    }
}

/// `module` equals `ignored` or is nested below it.
pub(crate) fn covers(ignored: &str, module: &str) -> bool {
    module == ignored || (module.starts_with(ignored) && module[ignored.len()..].starts_with("::"))
}

/// Capture the current stack as frames, innermost first.
///
/// Frames without symbol or line information are skipped, so a binary built
/// without debug info yields an empty list.
pub fn capture_frames() -> Vec<StackFrame> {
    parse_backtrace(&Backtrace::force_capture().to_string())
}

/// Parse the textual form of a [`Backtrace`].
pub(crate) fn parse_backtrace(text: &str) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    let mut pending: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(module) = pending.take() {
                if let Some(line_no) = line_number(location) {
                    frames.push(StackFrame::new(module, line_no));
                }
            }
        } else if let Some((index, symbol)) = trimmed.split_once(": ") {
            if index.chars().all(|c| c.is_ascii_digit()) {
                pending = Some(module_of_symbol(symbol));
            }
        }
    }
    frames
}

fn line_number(location: &str) -> Option<u32> {
    // path:line:column
    let mut parts = location.rsplitn(3, ':');
    let _column = parts.next()?;
    parts.next()?.parse().ok()
}

/// Module path of a demangled symbol: `app::handlers` for
/// `app::handlers::login::{{closure}}`, `app::db` for `<app::db::Db as app::Store>::get`.
/// Compiler and libc shims (`__rust_try`, `__libc_start_main`) have no module.
pub(crate) fn module_of_symbol(symbol: &str) -> String {
    if symbol.starts_with("__") {
        return String::new();
    }
    let symbol = match symbol.strip_prefix('<') {
        Some(rest) => rest.split(" as ").next().unwrap_or(rest).trim_end_matches('>'),
        None => symbol,
    };
    let segments: Vec<&str> = symbol
        .split("::")
        .filter(|s| !s.starts_with("{{") && !is_hash_segment(s))
        .collect();
    match segments.len() {
        0 => String::new(),
        1 => segments[0].to_string(),
        n => segments[..n - 1].join("::"),
    }
}

fn is_hash_segment(segment: &str) -> bool {
    segment.len() == 17
        && segment.starts_with('h')
        && segment[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Module path guessed from a source file path, as reported by
/// `std::panic::Location`: `src/api/login.rs` becomes `api::login`.
pub fn module_of_file(file: &str) -> String {
    let file = file.replace('\\', "/");
    let relative = match file.rfind("src/") {
        Some(idx) => &file[idx + 4..],
        None => file.rsplit('/').next().unwrap_or(&file),
    };
    let stem = relative.trim_end_matches(".rs");
    let mut segments: Vec<&str> = stem.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() > 1 && matches!(segments.last(), Some(&"mod")) {
        segments.pop();
    }
    segments.join("::")
}
