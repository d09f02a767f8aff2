//! [`MediaResolver`] backed by the `yt-dlp` command-line tool.
//!
//! Search uses the resolver's `<prefix><N>:<query>` pseudo-URL with
//! `--flat-playlist -j`, which prints one JSON object per candidate without
//! touching each video page. Stream resolution uses `-g`.

use crate::config::ResolverConfig;
use crate::error::{MediaError, Result};
use crate::resolver::MediaResolver;
use crate::types::TrackInfo;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Maximum number of stderr bytes carried into an error message.
const STDERR_SNIPPET_LEN: usize = 300;

/// Resolver that shells out to `yt-dlp` (or a compatible fork).
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    config: ResolverConfig,
}

impl YtDlpResolver {
    /// Create a resolver after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Config`] if the configuration is invalid.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    async fn run(&self, args: Vec<String>) -> Result<String> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.extra_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(MediaError::Resolver(format!(
                    "failed to run {}: {e}",
                    self.config.program
                )));
            }
            Err(_) => {
                return Err(MediaError::Timeout(format!(
                    "{} exceeded {}s",
                    self.config.program, self.config.timeout_seconds
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let snippet: String = stderr.trim().chars().take(STDERR_SNIPPET_LEN).collect();
            return Err(MediaError::Resolver(format!(
                "{} exited with {}: {snippet}",
                self.config.program, output.status
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| MediaError::Parse(format!("resolver output is not UTF-8: {e}")))
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackInfo>> {
        let limit = limit.max(1);
        debug!(limit, "resolver search");
        let target = format!("{}{limit}:{}", self.config.search_prefix, query.trim());
        let stdout = self
            .run(vec![
                "--flat-playlist".into(),
                "--dump-json".into(),
                "--no-warnings".into(),
                target,
            ])
            .await?;
        let mut tracks = parse_search_output(&stdout)?;
        tracks.truncate(limit);
        Ok(tracks)
    }

    async fn stream_url(&self, source: &str) -> Result<String> {
        let stdout = self
            .run(vec![
                "--get-url".into(),
                "--format".into(),
                self.config.format.clone(),
                "--no-playlist".into(),
                "--no-warnings".into(),
                source.to_owned(),
            ])
            .await?;
        stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| MediaError::NoResults(source.to_owned()))
    }
}

/// Parse `--dump-json` output: one JSON object per line.
///
/// Lines that are not objects, or objects with no usable URL, are skipped.
/// Output that contains lines but no parseable object at all is an error.
pub fn parse_search_output(stdout: &str) -> Result<Vec<TrackInfo>> {
    let mut tracks = Vec::new();
    let mut saw_line = false;
    let mut parsed_any = false;

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        saw_line = true;
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        parsed_any = true;

        let url = ["webpage_url", "url"]
            .iter()
            .filter_map(|k| value.get(*k).and_then(serde_json::Value::as_str))
            .find(|u| u.starts_with("http"));
        let Some(url) = url else {
            continue;
        };

        let title = value
            .get("title")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(url)
            .to_owned();
        let duration_secs = value
            .get("duration")
            .and_then(serde_json::Value::as_f64)
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round() as u64);

        tracks.push(TrackInfo {
            title,
            url: url.to_owned(),
            duration_secs,
        });
    }

    if saw_line && !parsed_any {
        return Err(MediaError::Parse("no JSON objects in resolver output".into()));
    }
    Ok(tracks)
}
