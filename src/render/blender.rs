use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use crate::error::{FarmError, Result};
use crate::render::progress::{LogEvent, LogScanner};
use crate::render::{RenderBackend, RenderOutput, RenderRequest};

/// Keep this much of stderr for error messages.
const STDERR_TAIL_BYTES: usize = 4 * 1024;

/// Renders frames with a local Blender installation.
///
/// Each render gets its own temporary directory holding the staged scene
/// and the output image. The directory is removed when the render ends,
/// and the Blender process is killed if the render future is dropped.
#[derive(Debug, Clone)]
pub struct BlenderRenderer {
    binary: PathBuf,
}

impl BlenderRenderer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, request: &RenderRequest, input: &Path, output_pattern: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-noaudio")
            .arg("-b")
            .arg(input)
            .arg("-E")
            .arg(&request.renderer)
            .arg("-o")
            .arg(output_pattern)
            .arg("-F")
            .arg("PNG")
            .arg("-s")
            .arg(request.start_frame.to_string())
            // Relative to the start frame set above
            .arg("-f")
            .arg(format!("+{}", request.frame_offset))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for BlenderRenderer {
    fn default() -> Self {
        Self::new("blender")
    }
}

#[async_trait]
impl RenderBackend for BlenderRenderer {
    async fn render(
        &self,
        request: RenderRequest,
        progress: watch::Sender<u8>,
    ) -> Result<RenderOutput> {
        let started = Instant::now();
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("input.blend");
        tokio::fs::write(&input, &request.input).await?;
        let output_pattern = workdir.path().join("frame_####");

        tracing::info!(
            job_id = request.job_id,
            frame = request.frame_number(),
            renderer = %request.renderer,
            binary = %self.binary.display(),
            "Starting render"
        );

        let mut child = self
            .command(&request, &input, &output_pattern)
            .spawn()
            .map_err(|e| FarmError::Render(format!("failed to start {}: {e}", self.binary.display())))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FarmError::Render("renderer stdout not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| FarmError::Render("renderer stderr not captured".into()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            let from = buf.len().saturating_sub(STDERR_TAIL_BYTES);
            String::from_utf8_lossy(&buf[from..]).into_owned()
        });

        let mut scanner = LogScanner::new(&request.renderer);
        let mut saved: Option<PathBuf> = None;
        let mut reported_time = None;
        let mut lines = BufReader::new(stdout).lines();

        while let Some(line) = lines.next_line().await? {
            tracing::trace!(job_id = request.job_id, line = %line, "renderer");
            match scanner.scan(&line) {
                Some(LogEvent::Progress(p)) => {
                    progress.send_replace(p);
                }
                Some(LogEvent::Saved { path, time }) => {
                    progress.send_replace(100);
                    saved = Some(path);
                    reported_time = time.or(reported_time);
                }
                Some(LogEvent::RenderTime(t)) => reported_time = Some(t),
                None => {}
            }
        }

        let status = child.wait().await?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !status.success() {
            tracing::error!(
                job_id = request.job_id,
                frame = request.frame_number(),
                exit_code = ?status.code(),
                "Render failed"
            );
            let detail = stderr_tail.trim();
            return Err(FarmError::Render(if detail.is_empty() {
                format!("renderer exited with {status}")
            } else {
                format!("renderer exited with {status}: {detail}")
            }));
        }

        let output = match saved {
            Some(path) => path,
            None => find_output(workdir.path()).await?.ok_or_else(|| {
                FarmError::Render("renderer finished without saving a frame".into())
            })?,
        };
        let data = tokio::fs::read(&output).await?;
        let elapsed = reported_time.unwrap_or_else(|| started.elapsed());

        tracing::info!(
            job_id = request.job_id,
            frame = request.frame_number(),
            bytes = data.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Render finished"
        );

        Ok(RenderOutput { data, elapsed })
    }
}

/// Fallback for renderers that do not print a `Saved:` line.
async fn find_output(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_frame = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("frame_"));
        if is_frame {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
