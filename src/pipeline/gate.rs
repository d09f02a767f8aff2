//! Transcript gate: debounced turn assembly, wake-word filter and agent
//! dispatch for one call.
//!
//! Recognized text is appended to a per-call buffer and a debounce deadline
//! is (re)armed on every append. When the deadline passes the buffer is
//! judged as one turn: without a wake word (and with always-respond off) it
//! is discarded; otherwise it is taken atomically, cleaned and sent to the
//! agent under the call's session. Only one turn is in flight per call; text
//! arriving meanwhile waits for the next deadline after the turn completes.

use crate::agent::ConversationAgent;
use crate::config::GateConfig;
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::{CallId, SessionId, Transcription};
use crate::pipeline::reply::ReplyPath;
use crate::runtime::{EventBus, RuntimeEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_QUEUE: usize = 128;

/// Punctuation trimmed between a stripped wake phrase and the prompt.
const LEADING_PUNCTUATION: &[char] = &[',', ':', ';', '.', '!', '?', '-', ' '];

fn strip_punctuation(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, punctuation-free form used for matching only.
pub fn normalize(text: &str) -> String {
    strip_punctuation(text).to_lowercase()
}

fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Wake-word test and prompt cleanup.
#[derive(Debug, Clone)]
pub struct WakeMatcher {
    words: Vec<String>,
    word_tokens: Vec<Vec<String>>,
    greetings: Vec<String>,
}

impl WakeMatcher {
    pub fn new(wake_words: &[String], greetings: &[String]) -> Self {
        let words: Vec<String> = wake_words
            .iter()
            .map(|w| normalize(w))
            .filter(|w| !w.is_empty())
            .collect();
        let word_tokens = words
            .iter()
            .map(|w| w.split(' ').map(str::to_owned).collect())
            .collect();
        let greetings = greetings
            .iter()
            .map(|g| normalize_token(g))
            .filter(|g| !g.is_empty())
            .collect();
        Self {
            words,
            word_tokens,
            greetings,
        }
    }

    /// A wake word appears anywhere in the text, or the text opens with
    /// "hey <word>" / "okay <word>".
    pub fn matches(&self, text: &str) -> bool {
        let normalized = normalize(text);
        self.words.iter().any(|w| {
            normalized.contains(w.as_str())
                || normalized.starts_with(&format!("hey {w}"))
                || normalized.starts_with(&format!("okay {w}"))
        })
    }

    /// Strip leading greetings and wake words from the original-case text.
    ///
    /// Falls back to the trimmed input when nothing would be left.
    pub fn clean_prompt(&self, text: &str) -> String {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut start = 0;
        while start < tokens.len() {
            if self.greetings.contains(&normalize_token(tokens[start])) {
                start += 1;
                continue;
            }
            match self.wake_len_at(&tokens[start..]) {
                Some(len) => start += len,
                None => break,
            }
        }

        let rest = tokens[start..].join(" ");
        let rest = rest.trim_start_matches(LEADING_PUNCTUATION).trim();
        if rest.is_empty() {
            text.trim().to_owned()
        } else {
            rest.to_owned()
        }
    }

    fn wake_len_at(&self, tokens: &[&str]) -> Option<usize> {
        self.word_tokens.iter().find_map(|word| {
            let hit = word.len() <= tokens.len()
                && word
                    .iter()
                    .zip(tokens)
                    .all(|(w, t)| normalize_token(t) == *w);
            hit.then_some(word.len())
        })
    }
}

/// Session id for `call`. Stable, so repeated joins reuse agent context.
pub fn session_for(prefix: &str, call: &CallId) -> SessionId {
    SessionId::new(format!("{prefix}-{call}"))
}

/// Messages accepted by the gate task.
#[derive(Debug)]
pub enum GateCommand {
    Transcript(Transcription),
    SetAlwaysRespond(bool),
    ResetSession { reply: oneshot::Sender<Result<()>> },
}

/// Cloneable front end of a gate task.
#[derive(Debug, Clone)]
pub struct GateHandle {
    tx: mpsc::Sender<GateCommand>,
}

impl GateHandle {
    /// # Errors
    ///
    /// Fails only if the gate task is gone.
    pub async fn push(&self, transcription: Transcription) -> Result<()> {
        self.send(GateCommand::Transcript(transcription)).await
    }

    /// # Errors
    ///
    /// Fails only if the gate task is gone.
    pub async fn set_always_respond(&self, enabled: bool) -> Result<()> {
        self.send(GateCommand::SetAlwaysRespond(enabled)).await
    }

    /// Forget the primed marker and ask the agent to drop the session.
    ///
    /// # Errors
    ///
    /// The agent's reset error, or [`HuddleError::Channel`] if the task is gone.
    pub async fn reset_session(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(GateCommand::ResetSession { reply }).await?;
        rx.await
            .map_err(|_| HuddleError::Channel("gate dropped the reply".into()))?
    }

    async fn send(&self, cmd: GateCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| HuddleError::Channel("gate task stopped".into()))
    }
}

/// Collaborators of one call's gate.
pub struct GateContext {
    pub call: CallId,
    pub config: GateConfig,
    pub agent: Arc<dyn ConversationAgent>,
    pub agent_timeout: Duration,
    pub primer: Option<String>,
    pub reply: ReplyPath,
    pub events: EventBus,
}

struct TurnDone {
    generation: u64,
    agent_answered: bool,
}

struct TranscriptGate {
    ctx: Arc<GateContext>,
    matcher: WakeMatcher,
    session: SessionId,
    debounce: Duration,
    always_respond: bool,
    buffer: String,
    deadline: Option<Instant>,
    in_flight: bool,
    primed: bool,
    generation: u64,
    done_tx: mpsc::UnboundedSender<TurnDone>,
    cancel: CancellationToken,
}

/// Spawn the gate task for a call.
pub fn spawn_gate(ctx: GateContext, cancel: CancellationToken) -> (GateHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let gate = TranscriptGate {
        matcher: WakeMatcher::new(&ctx.config.wake_words, &ctx.config.greetings),
        session: session_for(&ctx.config.session_prefix, &ctx.call),
        debounce: Duration::from_millis(ctx.config.debounce_ms),
        always_respond: ctx.config.always_respond,
        ctx: Arc::new(ctx),
        buffer: String::new(),
        deadline: None,
        in_flight: false,
        primed: false,
        generation: 0,
        done_tx,
        cancel: cancel.clone(),
    };
    let task = tokio::spawn(gate.run(rx, done_rx, cancel));
    (GateHandle { tx }, task)
}

impl TranscriptGate {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<GateCommand>,
        mut done_rx: mpsc::UnboundedReceiver<TurnDone>,
        cancel: CancellationToken,
    ) {
        info!(call = %self.ctx.call, session = %self.session, "transcript gate started");
        loop {
            let deadline = if self.in_flight { None } else { self.deadline };
            let debounce = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        GateCommand::Transcript(t) => self.append(&t.text),
                        GateCommand::SetAlwaysRespond(enabled) => {
                            info!(call = %self.ctx.call, enabled, "always-respond changed");
                            self.always_respond = enabled;
                        }
                        GateCommand::ResetSession { reply } => {
                            let _ = reply.send(self.reset().await);
                        }
                    }
                }
                Some(done) = done_rx.recv() => self.turn_finished(done),
                () = debounce => {
                    self.deadline = None;
                    self.judge();
                }
            }
        }
        debug!(call = %self.ctx.call, "transcript gate stopped");
    }

    fn append(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(text);
        self.deadline = Some(Instant::now() + self.debounce);
        debug!(call = %self.ctx.call, in_flight = self.in_flight, "transcript buffered");
    }

    fn turn_finished(&mut self, done: TurnDone) {
        self.in_flight = false;
        if done.agent_answered && done.generation == self.generation {
            self.primed = true;
        }
        if !self.buffer.is_empty() && self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.debounce);
        }
    }

    fn judge(&mut self) {
        if self.in_flight {
            return;
        }
        let text = self.buffer.trim().to_owned();
        if text.is_empty() {
            self.buffer.clear();
            return;
        }

        if !self.always_respond && !self.matcher.matches(&text) {
            debug!(call = %self.ctx.call, %text, "no wake word, discarding turn");
            self.buffer.clear();
            self.ctx.events.emit(RuntimeEvent::TranscriptDiscarded {
                call: self.ctx.call.clone(),
                text,
            });
            return;
        }

        self.buffer.clear();
        self.in_flight = true;

        let prompt = self.matcher.clean_prompt(&text);
        let message = match (&self.ctx.primer, self.primed) {
            (Some(primer), false) if !primer.trim().is_empty() => format!("{primer}\n\n{prompt}"),
            _ => prompt.clone(),
        };

        info!(call = %self.ctx.call, session = %self.session, %prompt, "dispatching turn");
        self.ctx.events.emit(RuntimeEvent::TurnDispatched {
            call: self.ctx.call.clone(),
            session: self.session.clone(),
            prompt,
        });

        let ctx = Arc::clone(&self.ctx);
        let session = self.session.clone();
        let generation = self.generation;
        let done_tx = self.done_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let agent_answered = tokio::select! {
                () = cancel.cancelled() => {
                    debug!(call = %ctx.call, "turn abandoned; call is closing");
                    return;
                }
                answered = run_turn(&ctx, &session, &message) => answered,
            };
            let _ = done_tx.send(TurnDone {
                generation,
                agent_answered,
            });
        });
    }

    async fn reset(&mut self) -> Result<()> {
        self.generation += 1;
        self.primed = false;
        info!(call = %self.ctx.call, session = %self.session, "resetting agent session");
        tokio::time::timeout(self.ctx.agent_timeout, self.ctx.agent.reset(&self.session))
            .await
            .map_err(|_| HuddleError::Timeout("agent session reset".into()))??;
        self.ctx.events.emit(RuntimeEvent::SessionReset {
            call: self.ctx.call.clone(),
            session: self.session.clone(),
        });
        Ok(())
    }
}

/// One agent round trip plus output. Returns whether the agent answered.
async fn run_turn(ctx: &GateContext, session: &SessionId, message: &str) -> bool {
    let fail = |reason: String| {
        warn!(call = %ctx.call, %reason, "turn produced no speech");
        ctx.events.emit(RuntimeEvent::TurnFailed {
            call: ctx.call.clone(),
            reason,
        });
    };

    let reply = match tokio::time::timeout(ctx.agent_timeout, ctx.agent.send(session, message)).await {
        Err(_) => {
            fail(format!("agent timed out after {:?}", ctx.agent_timeout));
            return false;
        }
        Ok(Err(e)) => {
            fail(e.to_string());
            return false;
        }
        Ok(Ok(reply)) => reply,
    };

    let reply = reply.trim();
    if reply.is_empty() {
        fail("agent returned an empty reply".into());
        return true;
    }
    if reply.to_ascii_lowercase().starts_with("error:") {
        fail(format!("agent reported {reply}"));
        return true;
    }

    ctx.events.emit(RuntimeEvent::ReplyReceived {
        call: ctx.call.clone(),
        text: reply.to_owned(),
    });
    ctx.reply.post(reply).await;

    let chars = reply.chars().count();
    if chars > ctx.config.max_reply_chars {
        fail(format!(
            "reply too long to speak ({chars} > {} chars)",
            ctx.config.max_reply_chars
        ));
        return true;
    }
    if let Err(e) = ctx.reply.speak(reply).await {
        fail(format!("speaking reply failed: {e}"));
    }
    true
}
