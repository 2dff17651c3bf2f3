//! In-memory wallet sessions for tests
//!
//! A [`ScriptedTransport`] answers each command line with canned output,
//! keyed by command prefix, and records everything written to it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::{SessionLauncher, Transport};

#[derive(Debug, Clone)]
struct Reply {
    prefix: String,
    output: String,
    delay: Option<Duration>,
    eof: bool,
    used: bool,
}

/// Shared view of what a scripted session saw
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionLog {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl SessionLog {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedTransport {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    replies: Vec<Reply>,
    log: SessionLog,
    active: Option<Arc<AtomicUsize>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx,
            replies: Vec::new(),
            log: SessionLog::default(),
            active: None,
        }
    }

    /// Output available before any command is sent
    pub fn with_output(self, output: &str) -> Self {
        if let Some(tx) = &self.tx {
            let _ = tx.send(output.as_bytes().to_vec());
        }
        self
    }

    /// Close the output stream after whatever is already queued
    pub fn with_eof(mut self) -> Self {
        self.tx = None;
        self
    }

    /// Answer the next line starting with `prefix`
    ///
    /// Replies for the same prefix are used in order; the last one repeats.
    pub fn reply(self, prefix: &str, output: &str) -> Self {
        self.push_reply(prefix, output, None, false)
    }

    /// Answer after a delay
    pub fn reply_after(self, prefix: &str, delay: Duration, output: &str) -> Self {
        self.push_reply(prefix, output, Some(delay), false)
    }

    /// Answer, then close the output stream as if the process crashed
    pub fn reply_then_eof(self, prefix: &str, output: &str) -> Self {
        self.push_reply(prefix, output, None, true)
    }

    fn push_reply(mut self, prefix: &str, output: &str, delay: Option<Duration>, eof: bool) -> Self {
        self.replies.push(Reply {
            prefix: prefix.to_string(),
            output: output.to_string(),
            delay,
            eof,
            used: false,
        });
        self
    }

    pub fn log(&self) -> SessionLog {
        self.log.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.log.sent()
    }

    fn next_reply(&mut self, line: &str) -> Option<Reply> {
        if let Some(reply) = self
            .replies
            .iter_mut()
            .find(|r| !r.used && line.starts_with(&r.prefix))
        {
            reply.used = true;
            return Some(reply.clone());
        }
        self.replies
            .iter()
            .rev()
            .find(|r| line.starts_with(&r.prefix))
            .cloned()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.log.sent.lock().unwrap().push(line.to_string());

        let Some(reply) = self.next_reply(line) else {
            return Ok(());
        };
        let Some(tx) = self.tx.clone() else {
            return Ok(());
        };

        match reply.delay {
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(reply.output.into_bytes());
                });
            }
            None => {
                let _ = tx.send(reply.output.into_bytes());
            }
        }
        if reply.eof {
            self.tx = None;
        }
        Ok(())
    }

    async fn read_chunk(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    fn discard_pending(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    async fn shutdown(&mut self) {
        if !self.log.closed.swap(true, Ordering::SeqCst) {
            if let Some(active) = &self.active {
                active.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

/// Hands out scripted sessions in order and tracks how many are open
#[derive(Default)]
pub(crate) struct ScriptedLauncher {
    sessions: Mutex<VecDeque<ScriptedTransport>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    launches: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new(sessions: Vec<ScriptedTransport>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            ..Default::default()
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLauncher for ScriptedLauncher {
    type Session = ScriptedTransport;

    async fn launch(&self) -> Result<ScriptedTransport> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let mut session = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Launch("no scripted session left".to_string()))?;

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        session.active = Some(self.active.clone());
        Ok(session)
    }
}
