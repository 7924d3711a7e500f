//! Dispatch logging with glob filtering and a bounded in-memory history
//!
//! [`DispatchLogger`] is a [`Middleware`] that reports dispatches through
//! `tracing` and, optionally, keeps the most recent ones in a
//! [`DispatchLog`] shared with the application.
//!
//! # Example
//!
//! ```
//! use flux_dispatch_core::log::{DispatchLogger, LogFilter};
//!
//! // Tracing only, everything except Tick
//! let logger = DispatchLogger::new(LogFilter::default());
//! assert!(logger.log_handle().is_none());
//!
//! // Keep the last 50 dispatches of Play* actions
//! let logger = DispatchLogger::with_log(50, LogFilter::new(Some("Play*"), None));
//! let log = logger.log_handle().unwrap();
//! assert!(log.borrow().is_empty());
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::action::ActionSummary;
use crate::config::LogConfig;
use crate::middleware::{DispatchOutcome, Middleware};

/// Include/exclude filter over action names
///
/// Patterns are globs: `*` matches any run of characters, `?` exactly one.
/// An empty include list admits every name; excludes are applied afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    /// If non-empty, only names matching one of these are admitted
    pub include: Vec<String>,
    /// Names matching any of these are rejected
    pub exclude: Vec<String>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: vec!["Tick".to_string()],
        }
    }
}

impl LogFilter {
    /// Build a filter from comma-separated pattern lists
    ///
    /// `None` for `include` admits everything; `None` for `exclude` keeps the
    /// default exclusion of `Tick`.
    ///
    /// ```
    /// use flux_dispatch_core::log::LogFilter;
    ///
    /// let filter = LogFilter::new(Some("Play*, Seek"), Some("PlayPreview"));
    /// assert!(filter.allows("PlayTrack"));
    /// assert!(filter.allows("Seek"));
    /// assert!(!filter.allows("PlayPreview"));
    /// assert!(!filter.allows("Pause"));
    /// ```
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        let split = |s: &str| -> Vec<String> {
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        };
        Self {
            include: include.map(split).unwrap_or_default(),
            exclude: exclude.map(split).unwrap_or_else(|| Self::default().exclude),
        }
    }

    /// Create a filter from explicit pattern vectors
    pub fn with_patterns(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// A filter that admits every action
    pub fn allow_all() -> Self {
        Self::with_patterns(Vec::new(), Vec::new())
    }

    /// Whether an action with this name should be logged
    pub fn allows(&self, name: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|p| glob_match(p, name));
        included && !self.exclude.iter().any(|p| glob_match(p, name))
    }
}

/// Match `text` against a glob supporting `*` and `?`
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // dp[j]: pattern[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for &p in &pattern {
        let mut next = vec![false; text.len() + 1];
        if p == '*' {
            let mut seen = false;
            for j in 0..=text.len() {
                seen |= dp[j];
                next[j] = seen;
            }
        } else {
            for j in 1..=text.len() {
                next[j] = dp[j - 1] && (p == '?' || p == text[j - 1]);
            }
        }
        dp = next;
    }
    dp[text.len()]
}

/// One recorded dispatch
#[derive(Debug, Clone, Serialize)]
pub struct DispatchLogEntry {
    /// Monotonic sequence number within the log
    pub sequence: u64,
    /// Action name
    pub action: &'static str,
    /// Summary from [`ActionSummary::summary`]
    pub summary: String,
    /// How the dispatch ended; `None` while it is still running
    pub outcome: Option<DispatchOutcome>,
    #[serde(skip)]
    recorded_at: Instant,
}

impl DispatchLogEntry {
    fn new(sequence: u64, action: &'static str, summary: String) -> Self {
        Self {
            sequence,
            action,
            summary,
            outcome: None,
            recorded_at: Instant::now(),
        }
    }

    /// Time since the dispatch was recorded
    pub fn elapsed(&self) -> Duration {
        self.recorded_at.elapsed()
    }

    /// Elapsed time formatted for display (`"2.3s"`, `"150ms"`)
    pub fn elapsed_display(&self) -> String {
        let elapsed = self.elapsed();
        if elapsed.as_secs() >= 1 {
            format!("{:.1}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        }
    }
}

/// Bounded history of recent dispatches, oldest first
#[derive(Debug, Clone)]
pub struct DispatchLog {
    entries: VecDeque<DispatchLogEntry>,
    capacity: usize,
    next_sequence: u64,
}

/// Dispatch log shared between a [`DispatchLogger`] and its readers
pub type SharedDispatchLog = Rc<RefCell<DispatchLog>>;

impl Default for DispatchLog {
    fn default() -> Self {
        Self::new(LogConfig::default().capacity)
    }
}

impl DispatchLog {
    /// Create an empty log keeping at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 0,
        }
    }

    /// Append an entry, evicting the oldest one when full. Returns its sequence.
    pub fn record<A: ActionSummary>(&mut self, action: &A) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if self.capacity == 0 {
            return sequence;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries
            .push_back(DispatchLogEntry::new(sequence, action.name(), action.summary()));
        sequence
    }

    /// Set the outcome of the entry with the given sequence, if still present
    pub fn finish(&mut self, sequence: u64, outcome: DispatchOutcome) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|entry| entry.sequence == sequence)
        {
            entry.outcome = Some(outcome);
        }
    }

    /// Set the outcome of the newest entry if it has none yet
    pub fn finish_last(&mut self, outcome: DispatchOutcome) -> bool {
        match self.entries.back_mut() {
            Some(entry) if entry.outcome.is_none() => {
                entry.outcome = Some(outcome);
                true
            }
            _ => false,
        }
    }

    /// Entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &DispatchLogEntry> {
        self.entries.iter()
    }

    /// The most recent `count` entries, newest first
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &DispatchLogEntry> {
        self.entries.iter().rev().take(count)
    }

    /// Most recent entry
    pub fn last(&self) -> Option<&DispatchLogEntry> {
        self.entries.back()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry; sequence numbers keep counting
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Export the stored entries as a JSON array
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.entries)
    }
}

/// Middleware that reports dispatches through `tracing` and an optional log
#[derive(Debug, Clone)]
pub struct DispatchLogger {
    filter: LogFilter,
    log: Option<SharedDispatchLog>,
    // Sequence of the admitted dispatch awaiting its outcome
    pending: Option<u64>,
    active: bool,
}

impl DispatchLogger {
    /// Tracing only, no history
    pub fn new(filter: LogFilter) -> Self {
        Self {
            filter,
            log: None,
            pending: None,
            active: true,
        }
    }

    /// Tracing plus a history of at most `capacity` entries
    pub fn with_log(capacity: usize, filter: LogFilter) -> Self {
        Self {
            log: Some(Rc::new(RefCell::new(DispatchLog::new(capacity)))),
            ..Self::new(filter)
        }
    }

    /// Build from configuration; a disabled log gives a tracing-only logger
    pub fn from_config(config: &LogConfig) -> Self {
        if config.enabled {
            Self::with_log(config.capacity, config.filter())
        } else {
            Self::new(config.filter())
        }
    }

    /// Turn the logger on or off. Inactive loggers do nothing.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Whether the logger is active
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Shared handle to the history, if one is kept
    pub fn log_handle(&self) -> Option<SharedDispatchLog> {
        self.log.clone()
    }

    /// The filter in use
    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }
}

impl<A: ActionSummary> Middleware<A> for DispatchLogger {
    fn before(&mut self, action: &A) {
        self.pending = None;
        if !self.active || !self.filter.allows(action.name()) {
            return;
        }
        tracing::debug!(action = %action.name(), "dispatch");
        if let Some(log) = &self.log {
            self.pending = Some(log.borrow_mut().record(action));
        }
    }

    fn after(&mut self, action: &A, outcome: DispatchOutcome) {
        if !self.active || !self.filter.allows(action.name()) {
            return;
        }
        match outcome {
            DispatchOutcome::Rejected => {
                // Rejected dispatches never reach `before`
                tracing::debug!(action = %action.name(), "dispatch rejected");
                if let Some(log) = &self.log {
                    let mut log = log.borrow_mut();
                    let sequence = log.record(action);
                    log.finish(sequence, outcome);
                }
            }
            _ => {
                if let (Some(log), Some(sequence)) = (&self.log, self.pending.take()) {
                    log.borrow_mut().finish(sequence, outcome);
                }
            }
        }
    }
}
