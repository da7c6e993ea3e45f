//! Completion markers for structured command execution
//!
//! A command is written to the shell followed by a `printf` that prints a
//! marker carrying the command's exit status. Output is scanned until the
//! marker appears; everything before it is the command's captured output.

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::bridge::CommandOutcome;

const MARKER_PREFIX: &str = "__TERMDOCK_DONE_";

pub(crate) fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Text written to the PTY for `command`.
///
/// The echoed `printf` line shows a literal `%s` where the status goes, so
/// it never parses as a completed marker.
pub(crate) fn wrap_command(command: &str, token: &str) -> String {
    format!(
        "{}\nprintf '\\n{}{}:%s__\\n' \"$?\"\n",
        command.trim_end(),
        MARKER_PREFIX,
        token
    )
}

/// Output kept per in-flight command; older bytes are dropped first.
const MAX_CAPTURE: usize = 1024 * 1024;

/// Accumulates output for one in-flight command.
pub(crate) struct CompletionScanner {
    command: String,
    needle: String,
    captured: Vec<u8>,
    /// Bytes before this offset hold no marker start
    scan_from: usize,
}

impl CompletionScanner {
    pub(crate) fn new(command: &str, token: &str) -> Self {
        Self {
            command: command.trim().to_string(),
            needle: format!("{}{}:", MARKER_PREFIX, token),
            captured: Vec::new(),
            scan_from: 0,
        }
    }

    /// Feed an output chunk; returns the outcome once the marker is seen.
    ///
    /// Only bytes not yet ruled out are searched, so total work stays linear
    /// in the output size.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Option<CommandOutcome> {
        self.captured.extend_from_slice(chunk);
        let needle = self.needle.as_bytes();

        while let Some(offset) = find(&self.captured[self.scan_from..], needle) {
            let start = self.scan_from + offset;
            let tail = &self.captured[start + needle.len()..];
            let digits = tail
                .iter()
                .take_while(|b| b.is_ascii_digit() || **b == b'-')
                .count();

            if tail.len() < digits + 2 {
                // Marker may still be arriving
                self.scan_from = start;
                self.trim_capture();
                return None;
            }
            if digits > 0 && &tail[digits..digits + 2] == b"__" {
                let exit_code = std::str::from_utf8(&tail[..digits])
                    .ok()
                    .and_then(|d| d.parse().ok())
                    .unwrap_or(-1);
                let raw = String::from_utf8_lossy(&self.captured[..start]);
                return Some(CommandOutcome {
                    output: self.clean_output(&raw),
                    exit_code,
                });
            }
            // Echoed printf (`%s`) or garbage after the needle
            self.scan_from = start + 1;
        }

        self.scan_from = self
            .captured
            .len()
            .saturating_sub(needle.len().saturating_sub(1))
            .max(self.scan_from);
        self.trim_capture();
        None
    }

    fn trim_capture(&mut self) {
        if self.captured.len() > MAX_CAPTURE {
            let overflow = self.captured.len() - MAX_CAPTURE;
            self.captured.drain(..overflow);
            self.scan_from = self.scan_from.saturating_sub(overflow);
        }
    }

    fn clean_output(&self, raw: &str) -> String {
        let normalized = raw.replace("\r\n", "\n");
        let mut lines: Vec<&str> = normalized
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.contains(MARKER_PREFIX))
            .collect();

        if lines
            .first()
            .is_some_and(|line| line.trim_end().ends_with(self.command.as_str()))
        {
            lines.remove(0);
        }
        while lines.last().is_some_and(|line| line.trim().is_empty()) {
            lines.pop();
        }
        while lines.first().is_some_and(|line| line.trim().is_empty()) {
            lines.remove(0);
        }

        lines.join("\n")
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// A command waiting for its completion marker.
pub(crate) struct PendingCommand {
    token: String,
    scanner: CompletionScanner,
    reply: Option<oneshot::Sender<CommandOutcome>>,
}

impl PendingCommand {
    pub(crate) fn new(command: &str, token: String, reply: oneshot::Sender<CommandOutcome>) -> Self {
        let scanner = CompletionScanner::new(command, &token);
        Self {
            token,
            scanner,
            reply: Some(reply),
        }
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    /// Returns true once the command has been answered.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> bool {
        if let Some(outcome) = self.scanner.feed(chunk) {
            if let Some(reply) = self.reply.take() {
                // The caller may have given up waiting.
                let _ = reply.send(outcome);
            }
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_command_appends_marker() {
        let wrapped = wrap_command("ls -la\n", "abc");
        assert!(wrapped.starts_with("ls -la\nprintf"));
        assert!(wrapped.contains("__TERMDOCK_DONE_abc:%s__"));
        assert!(wrapped.ends_with("\"$?\"\n"));
    }

    #[test]
    fn test_scanner_ignores_echoed_printf() {
        let mut scanner = CompletionScanner::new("echo hi", "tok");
        let echoed = b"echo hi\r\nhi\r\n$ printf '\\n__TERMDOCK_DONE_tok:%s__\\n' \"$?\"\r\n";
        assert!(scanner.feed(echoed).is_none());

        let outcome = scanner.feed(b"\r\n__TERMDOCK_DONE_tok:0__\r\n$ ").unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.output, "hi");
    }

    #[test]
    fn test_scanner_handles_marker_split_across_chunks() {
        let mut scanner = CompletionScanner::new("false", "tok");
        assert!(scanner.feed(b"false\r\n__TERMDOCK_DO").is_none());
        assert!(scanner.feed(b"NE_tok:1").is_none());
        let outcome = scanner.feed(b"__\r\n").unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.output, "");
    }

    #[test]
    fn test_scanner_handles_one_byte_chunks() {
        let mut scanner = CompletionScanner::new("true", "tok");
        let stream = b"true\r\nprintf '\\n__TERMDOCK_DONE_tok:%s__\\n' \"$?\"\r\n\r\n__TERMDOCK_DONE_tok:-1__\r\n";
        let mut outcome = None;
        for byte in stream.iter() {
            if let Some(done) = scanner.feed(std::slice::from_ref(byte)) {
                outcome = Some(done);
                break;
            }
        }
        assert_eq!(outcome.map(|o| o.exit_code), Some(-1));
    }

    #[test]
    fn test_scanner_caps_captured_output() {
        let mut scanner = CompletionScanner::new("yes", "tok");
        let noise = vec![b'y'; 64 * 1024];
        for _ in 0..40 {
            assert!(scanner.feed(&noise).is_none());
        }
        assert!(scanner.captured.len() <= MAX_CAPTURE);
        assert!(scanner.scan_from <= scanner.captured.len());

        let outcome = scanner.feed(b"\r\n__TERMDOCK_DONE_tok:0__\r\n").unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.output.len() <= MAX_CAPTURE);
    }

    #[test]
    fn test_scanner_ignores_other_tokens() {
        let mut scanner = CompletionScanner::new("true", "mine");
        assert!(scanner.feed(b"__TERMDOCK_DONE_theirs:0__\r\n").is_none());
    }

    #[test]
    fn test_pending_command_replies_once() {
        let (tx, mut rx) = oneshot::channel();
        let mut pending = PendingCommand::new("echo hi", "t1".to_string(), tx);
        assert_eq!(pending.token(), "t1");
        assert!(!pending.feed(b"echo hi\r\nhi\r\n"));
        assert!(pending.feed(b"__TERMDOCK_DONE_t1:0__\r\n"));

        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome.output, "hi");
        assert_eq!(outcome.exit_code, 0);
    }
}
