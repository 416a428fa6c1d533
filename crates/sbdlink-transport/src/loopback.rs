use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::block::Submission;
use crate::error::{Result, TransportError};

/// Scripted result for one loopback submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopbackOutcome {
    Accept,
    Reject { retryable: bool },
    /// Return a transport error.
    Fail,
    /// Never complete; the caller's timeout decides.
    Stall,
}

#[derive(Debug, Default)]
struct Inner {
    sent: Vec<Bytes>,
    script: VecDeque<LoopbackOutcome>,
}

/// In-memory uplink for dry runs and tests.
///
/// Accepted blocks are recorded and, when a sink is attached, forwarded to it
/// (e.g. straight into a simulated vehicle).
#[derive(Debug, Clone, Default)]
pub struct LoopbackUplink {
    inner: Arc<Mutex<Inner>>,
    sink: Option<mpsc::UnboundedSender<Bytes>>,
}

impl LoopbackUplink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            inner: Arc::default(),
            sink: Some(sink),
        }
    }

    /// Queue outcomes for the next submissions; afterwards every submission
    /// is accepted.
    pub fn script(&self, outcomes: impl IntoIterator<Item = LoopbackOutcome>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.script.extend(outcomes);
        }
    }

    /// Blocks accepted so far.
    pub fn sent(&self) -> Vec<Bytes> {
        self.inner
            .lock()
            .map(|inner| inner.sent.clone())
            .unwrap_or_default()
    }

    pub async fn submit(&self, block: &[u8]) -> Result<Submission> {
        let outcome = self
            .inner
            .lock()
            .ok()
            .and_then(|mut inner| inner.script.pop_front())
            .unwrap_or(LoopbackOutcome::Accept);

        match outcome {
            LoopbackOutcome::Accept => {
                let block = Bytes::copy_from_slice(block);
                let reference = match self.inner.lock() {
                    Ok(mut inner) => {
                        inner.sent.push(block.clone());
                        inner.sent.len().to_string()
                    }
                    Err(_) => String::new(),
                };
                if let Some(sink) = &self.sink {
                    sink.send(block).map_err(|_| TransportError::Closed("loopback"))?;
                }
                Ok(Submission::Accepted {
                    reference: Some(reference),
                })
            }
            LoopbackOutcome::Reject { retryable } => Ok(Submission::Rejected {
                reason: "scripted rejection".to_string(),
                retryable,
            }),
            LoopbackOutcome::Fail => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "scripted failure",
            ))),
            LoopbackOutcome::Stall => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let uplink = LoopbackUplink::with_sink(tx);
        let result = uplink.submit(b"abc").await.unwrap();
        assert_eq!(
            result,
            Submission::Accepted {
                reference: Some("1".into())
            }
        );
        assert_eq!(uplink.sent(), vec![Bytes::from_static(b"abc")]);
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"abc");
    }

    #[tokio::test]
    async fn follows_script_then_accepts() {
        let uplink = LoopbackUplink::new();
        uplink.script([
            LoopbackOutcome::Reject { retryable: false },
            LoopbackOutcome::Fail,
        ]);
        assert!(matches!(
            uplink.submit(b"x").await,
            Ok(Submission::Rejected {
                retryable: false,
                ..
            })
        ));
        assert!(uplink.submit(b"x").await.is_err());
        assert!(uplink.submit(b"x").await.unwrap().is_accepted());
        assert_eq!(uplink.sent().len(), 1);
    }
}
