// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lister and extractor backed by the `yt-dlp` command line tool.

mod extract;
mod listing;

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

pub use listing::parse_listing;

/// Lines of stderr kept in error messages
const STDERR_TAIL_LINES: usize = 5;
const STDERR_TAIL_CHARS: usize = 500;

/// Handle on a yt-dlp installation
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    cookies: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies: None,
        }
    }

    /// Authenticate requests with a Netscape cookie file
    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// A command killed when its future is dropped (timeouts, cancellation)
    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cookies) = &self.cookies {
            command.arg("--cookies").arg(cookies);
        }

        command
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

/// Last few lines of a process' stderr, for error messages
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join(" | ");

    if tail.chars().count() > STDERR_TAIL_CHARS {
        let skip = tail.chars().count() - STDERR_TAIL_CHARS;
        tail.chars().skip(skip).collect()
    } else {
        tail
    }
}
