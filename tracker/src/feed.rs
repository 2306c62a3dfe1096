//! Query interface over the server's console output.
//!
//! The console is a plain line stream. A query writes a command and then
//! collects the lines that answer it, using the leading `N)` index the server
//! prints on every listing row to order them.

use regex_lite::Regex;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Timing of a single console query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Upper bound on the whole query
    pub timeout_delay: Duration,
    /// Quiet period after the last match before the listing is considered done
    pub after_match_delay: Duration,
}

/// A source of console listings.
///
/// `pattern` must contain a named `index` group matching the leading row
/// number. Implementations return the matching lines ordered by that index.
/// A query that times out returns whatever arrived so far, possibly nothing.
pub trait LogFeed: Send + Sync {
    fn watch_chunk(
        &self,
        command: &str,
        pattern: &Regex,
        options: ChunkOptions,
    ) -> impl Future<Output = Vec<String>> + Send;
}

/// Row index of a line, if it matches `pattern`
pub fn leading_index(pattern: &Regex, line: &str) -> Option<u32> {
    pattern
        .captures(line)?
        .name("index")?
        .as_str()
        .parse::<u32>()
        .ok()
}

/// Keeps the lines matching `pattern`, ordered by row index.
/// A repeated index keeps the most recent line.
pub fn collect_chunk<'a, I>(pattern: &Regex, lines: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut rows = BTreeMap::new();
    for line in lines {
        if let Some(index) = leading_index(pattern, line) {
            rows.insert(index, line.to_string());
        }
    }
    rows.into_values().collect()
}
