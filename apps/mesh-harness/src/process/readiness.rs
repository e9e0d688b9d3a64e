use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

/// How a peer was judged usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The probe observed its signal.
    Signalled { evidence: String },
    /// Nothing was observed, but the process outlived the wait.
    AssumedAfterTimeout { waited: Duration },
}

/// Stdout lines of a supervised process, in order.
///
/// Lines that arrive while nobody is reading are buffered up to a fixed
/// capacity; older ones are dropped first.
pub struct OutputLines {
    receiver: broadcast::Receiver<String>,
}

impl OutputLines {
    pub fn new(receiver: broadcast::Receiver<String>) -> Self {
        Self { receiver }
    }

    /// Next line, or `None` once the stream has closed.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(line) => return Some(line),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "output reader lagged; dropped lines");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Decides when a freshly launched process is usable.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Resolves with a description of the evidence once the process looks
    /// ready, or `None` when the probe can no longer observe anything.
    async fn wait_for_signal(&self, output: &mut OutputLines) -> Option<String>;
}

/// Treats any stdout line containing one of the configured substrings as ready.
#[derive(Debug, Clone)]
pub struct LogSignalProbe {
    needles: Vec<String>,
}

impl LogSignalProbe {
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            needles: needles
                .into_iter()
                .map(Into::into)
                .filter(|needle: &String| !needle.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, line: &str) -> bool {
        self.needles.iter().any(|needle| line.contains(needle.as_str()))
    }
}

#[async_trait]
impl ReadinessProbe for LogSignalProbe {
    async fn wait_for_signal(&self, output: &mut OutputLines) -> Option<String> {
        while let Some(line) = output.next_line().await {
            if self.matches(&line) {
                return Some(line);
            }
        }
        None
    }
}
