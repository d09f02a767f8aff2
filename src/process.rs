//! Child-process helper shared by the CLI-backed collaborators.

use std::io;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum stderr characters carried into error messages.
pub const STDERR_SNIPPET_LEN: usize = 300;

/// Run `program` with `args`, optionally feeding `stdin`, and capture output.
///
/// The child is killed if the returned future is dropped, so wrapping the
/// call in [`tokio::time::timeout`] bounds the process lifetime as well.
///
/// # Errors
///
/// Returns an I/O error if the program cannot be spawned or waited on.
pub async fn run_captured(program: &str, args: &[String], stdin: Option<&[u8]>) -> io::Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let pipe = child.stdin.take();

    let feed = async move {
        if let (Some(mut pipe), Some(data)) = (pipe, stdin) {
            pipe.write_all(data).await?;
            pipe.shutdown().await?;
        }
        Ok::<_, io::Error>(())
    };

    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    match fed {
        // The program may legitimately exit without draining stdin.
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
        _ => {}
    }
    output
}

/// First [`STDERR_SNIPPET_LEN`] characters of stderr, trimmed.
pub fn stderr_snippet(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .trim()
        .chars()
        .take(STDERR_SNIPPET_LEN)
        .collect()
}
