//! Pattern-matching reader over a console connection.

use log::{debug, log_enabled, trace, Level};
use regex::Regex;
use std::time::{Duration, Instant};

use crate::connection::ConsoleConnection;
use crate::dut::DutError;

/// Longest single read while waiting for a pattern.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A successful [`Console::expect_any`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectMatch {
    /// Which of the given patterns matched
    pub pattern: usize,
    /// Console text received before the match
    pub before: String,
    /// Capture groups, group 0 being the whole match
    pub groups: Vec<Option<String>>,
}

impl ExpectMatch {
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }
}

/// Buffers console output and consumes it pattern by pattern.
pub struct Console {
    connection: Box<dyn ConsoleConnection>,
    buffer: String,
    /// Start of a UTF-8 sequence whose remaining bytes have not arrived yet
    partial: Vec<u8>,
}

impl Console {
    pub fn new(connection: Box<dyn ConsoleConnection>) -> Self {
        Self {
            connection,
            buffer: String::new(),
            partial: Vec::new(),
        }
    }

    pub fn describe(&self) -> String {
        self.connection.describe()
    }

    pub fn write_line(&mut self, line: &str) -> Result<(), DutError> {
        debug!("[{}] <- {line:?}", self.connection.describe());
        self.connection.write_line(line)
    }

    /// Drops buffered text and anything already waiting on the connection.
    pub fn clear(&mut self) -> Result<(), DutError> {
        self.buffer.clear();
        self.partial.clear();
        // a board that logs continuously never drains, give up after a while
        let deadline = Instant::now() + POLL_INTERVAL;
        while Instant::now() < deadline {
            if self.connection.read_available(Duration::ZERO)?.is_empty() {
                break;
            }
        }
        Ok(())
    }

    /// Restarts the board and forgets any pending output.
    pub fn reset(&mut self) -> Result<(), DutError> {
        self.buffer.clear();
        self.partial.clear();
        self.connection.reset()
    }

    /// Waits until one of `patterns` matches the console output.
    ///
    /// When several patterns match, the one whose match starts first wins.
    /// Text up to the end of the match is consumed.
    pub fn expect_any(
        &mut self,
        patterns: &[&Regex],
        timeout: Duration,
        waiting_for: &str,
    ) -> Result<ExpectMatch, DutError> {
        // `Instant + Duration` overflows for huge timeouts, count elapsed time instead
        let started = Instant::now();
        loop {
            if let Some(found) = self.take_match(patterns) {
                return Ok(found);
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(DutError::Timeout {
                    waiting_for: waiting_for.to_string(),
                    timeout,
                });
            }
            let chunk = self.connection.read_available(remaining.min(POLL_INTERVAL))?;
            if !chunk.is_empty() {
                let text = self.decode(&chunk);
                if log_enabled!(Level::Trace) {
                    for line in text.lines() {
                        trace!("[{}] -> {line}", self.connection.describe());
                    }
                }
                self.buffer.push_str(&text);
            }
        }
    }

    /// Single-pattern form of [`Console::expect_any`].
    pub fn expect(
        &mut self,
        pattern: &Regex,
        timeout: Duration,
        waiting_for: &str,
    ) -> Result<ExpectMatch, DutError> {
        self.expect_any(&[pattern], timeout, waiting_for)
    }

    /// Decodes `chunk`, holding back a trailing incomplete UTF-8 sequence
    /// until the rest of it arrives.
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.partial.extend_from_slice(chunk);
        let tail = incomplete_tail(&self.partial);
        let rest = self.partial.split_off(self.partial.len() - tail);
        let text = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial = rest;
        text
    }

    fn take_match(&mut self, patterns: &[&Regex]) -> Option<ExpectMatch> {
        let (pattern, captures) = patterns
            .iter()
            .enumerate()
            .filter_map(|(i, re)| re.captures(&self.buffer).map(|caps| (i, caps)))
            .min_by_key(|(_, caps)| caps.get(0).map(|m| m.start()).unwrap_or(usize::MAX))?;

        let whole = captures.get(0)?;
        let (start, end) = (whole.start(), whole.end());
        let groups = captures
            .iter()
            .map(|g| g.map(|m| m.as_str().to_string()))
            .collect();
        let before = self.buffer[..start].to_string();
        self.buffer.drain(..end);

        Some(ExpectMatch {
            pattern,
            before,
            groups,
        })
    }

    pub fn close(&mut self) -> Result<(), DutError> {
        self.connection.close()
    }
}

/// Number of trailing bytes forming the start of an unfinished UTF-8 sequence.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Canned {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ConsoleConnection for Canned {
        fn write_line(&mut self, _line: &str) -> Result<(), DutError> {
            Ok(())
        }

        fn read_available(&mut self, _timeout: Duration) -> Result<Vec<u8>, DutError> {
            Ok(self.chunks.pop_front().unwrap_or_default())
        }

        fn describe(&self) -> String {
            "canned".to_string()
        }
    }

    fn console(chunks: &[&str]) -> Console {
        raw_console(chunks.iter().map(|c| c.as_bytes().to_vec()).collect())
    }

    fn raw_console(chunks: Vec<Vec<u8>>) -> Console {
        Console::new(Box::new(Canned {
            chunks: chunks.into(),
        }))
    }

    #[test]
    fn matches_across_chunk_boundaries() {
        let mut console = console(&["boot log\nPress ENT", "ER to see the list of tests.\n"]);
        let re = Regex::new(r"Press ENTER to see the list of tests").unwrap();
        let m = console.expect(&re, Duration::from_secs(1), "banner").unwrap();
        assert_eq!(m.before, "boot log\n");
        assert_eq!(m.pattern, 0);
    }

    #[test]
    fn earliest_match_wins() {
        let mut console = console(&["Guru Meditation Error\n1 Tests 0 Failures 0 Ignored\n"]);
        let summary = Regex::new(r"(\d+) Tests (\d+) Failures").unwrap();
        let crash = Regex::new(r"Guru Meditation Error").unwrap();
        let m = console
            .expect_any(&[&summary, &crash], Duration::from_secs(1), "result")
            .unwrap();
        assert_eq!(m.pattern, 1);

        // the rest of the buffer is still there
        let m = console.expect(&summary, Duration::from_secs(1), "summary").unwrap();
        assert_eq!(m.group(1), Some("1"));
        assert_eq!(m.group(2), Some("0"));
    }

    #[test]
    fn times_out_without_match() {
        let mut console = console(&["nothing useful"]);
        let re = Regex::new("never").unwrap();
        let err = console
            .expect(&re, Duration::from_millis(50), "never")
            .unwrap_err();
        assert!(matches!(err, DutError::Timeout { .. }));
    }

    #[test]
    fn huge_timeout_waits_instead_of_overflowing() {
        let mut console = console(&["booting\n", "Press ENTER to see the list of tests.\n"]);
        let re = Regex::new(r"Press ENTER").unwrap();
        let m = console
            .expect(&re, Duration::from_secs(u64::MAX), "banner")
            .unwrap();
        assert_eq!(m.before, "booting\n");
    }

    #[test]
    fn multibyte_character_split_across_reads() {
        let line = "main/test_app.c:7:DAC 输出电压:PASS\n".as_bytes().to_vec();
        // cut in the middle of the first CJK character
        let cut = line.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let mut console = raw_console(vec![line[..cut].to_vec(), line[cut..].to_vec()]);
        let re = Regex::new(r":DAC 输出电压:(PASS|FAIL)").unwrap();
        let m = console.expect(&re, Duration::from_secs(1), "result").unwrap();
        assert_eq!(m.group(1), Some("PASS"));
        assert_eq!(m.before, "main/test_app.c:7");
    }

    #[test]
    fn incomplete_tail_only_counts_unfinished_sequences() {
        assert_eq!(incomplete_tail(b"abc"), 0);
        assert_eq!(incomplete_tail("é".as_bytes()), 0);
        assert_eq!(incomplete_tail(&"输".as_bytes()[..2]), 2);
        assert_eq!(incomplete_tail(&"输".as_bytes()[..1]), 1);
        // a stray continuation byte is left to lossy decoding
        assert_eq!(incomplete_tail(&[b'a', 0x80]), 0);
    }
}
