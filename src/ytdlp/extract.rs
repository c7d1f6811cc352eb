// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{YtDlp, stderr_tail};
use crate::episode::{AUDIO_EXTENSION, AudioExtractor};
use crate::error::ExtractError;

const AUDIO_QUALITY: &str = "192K";

#[async_trait]
impl AudioExtractor for YtDlp {
    async fn extract(
        &self,
        url: &str,
        output_dir: &Path,
        stem: &str,
    ) -> Result<Option<PathBuf>, ExtractError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| ExtractError::OutputDir {
                path: output_dir.to_path_buf(),
                source: e,
            })?;

        let template = output_dir.join(format!("{stem}.%(ext)s"));
        debug!(%url, template = %template.display(), "extracting audio");

        let output = self
            .command()
            .args([
                "--no-playlist",
                "--no-progress",
                "--no-simulate",
                "--extract-audio",
                "--audio-format",
                AUDIO_EXTENSION,
                "--audio-quality",
                AUDIO_QUALITY,
                "--embed-metadata",
                "--print",
                "after_move:filepath",
                "--output",
            ])
            .arg(&template)
            .arg(url)
            .output()
            .await
            .map_err(|e| ExtractError::SpawnFailed {
                program: self.program_name(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ExtractError::ExitFailure {
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(reported_path(&output.stdout))
    }
}

/// The final file path printed by `--print after_move:filepath`
fn reported_path(stdout: &[u8]) -> Option<PathBuf> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty() && *line != "NA")
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reported_path_takes_last_line() {
        let stdout = b"/tmp/a/v1.mp3\n";
        assert_eq!(reported_path(stdout), Some(PathBuf::from("/tmp/a/v1.mp3")));
    }

    #[test]
    fn reported_path_ignores_placeholders() {
        assert_eq!(reported_path(b"NA\n"), None);
        assert_eq!(reported_path(b"\n  \n"), None);
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let dir = tempdir().unwrap();
        let extractor = YtDlp::new("/nonexistent/castmirror-yt-dlp");

        let result = extractor
            .extract("https://www.youtube.com/watch?v=v1", dir.path(), "v1")
            .await;

        assert!(matches!(result, Err(ExtractError::SpawnFailed { .. })));
    }
}
