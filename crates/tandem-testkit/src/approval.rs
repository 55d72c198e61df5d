//! Approval ports for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use tandem_core::Label;
use tandem_perms::{ApprovalPort, Requester};

/// Answers requests from a queue, then with a fallback, and records them.
#[derive(Debug)]
pub struct ScriptedApproval {
    answers: Mutex<VecDeque<bool>>,
    fallback: bool,
    seen: Mutex<Vec<(Label, Requester)>>,
}

impl ScriptedApproval {
    pub fn new(answers: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            fallback,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Approve everything.
    pub fn approve_all() -> Self {
        Self::new([], true)
    }

    /// Deny everything.
    pub fn deny_all() -> Self {
        Self::new([], false)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<(Label, Requester)> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ApprovalPort for ScriptedApproval {
    async fn request_approval(&self, label: &Label, requester: &Requester) -> bool {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((label.clone(), requester.clone()));
        }
        let next = self.answers.lock().ok().and_then(|mut answers| answers.pop_front());
        next.unwrap_or(self.fallback)
    }
}

/// One request waiting for a test to answer it.
#[derive(Debug)]
pub struct ApprovalRequest {
    pub label: Label,
    pub requester: Requester,
    reply: oneshot::Sender<bool>,
}

impl ApprovalRequest {
    pub fn approve(self) {
        let _ = self.reply.send(true);
    }

    pub fn deny(self) {
        let _ = self.reply.send(false);
    }
}

/// Forwards every request to the test and waits for its answer.
///
/// A request whose [`ApprovalRequest`] is dropped unanswered is denied.
#[derive(Debug, Clone)]
pub struct ManualApproval {
    requests: mpsc::UnboundedSender<ApprovalRequest>,
}

impl ManualApproval {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { requests: tx }, rx)
    }
}

#[async_trait]
impl ApprovalPort for ManualApproval {
    async fn request_approval(&self, label: &Label, requester: &Requester) -> bool {
        let (reply, answer) = oneshot::channel();
        let request = ApprovalRequest {
            label: label.clone(),
            requester: requester.clone(),
            reply,
        };
        if self.requests.send(request).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{Keypair, PeerId};

    fn requester() -> Requester {
        Requester {
            peer: PeerId::new("client"),
            verifying_key: Keypair::generate().verifying_key(),
        }
    }

    #[tokio::test]
    async fn test_scripted_answers_then_fallback() {
        let port = ScriptedApproval::new([false, true], false);
        let label = Label::new("L1");
        let who = requester();

        assert!(!port.request_approval(&label, &who).await);
        assert!(port.request_approval(&label, &who).await);
        assert!(!port.request_approval(&label, &who).await);
        assert_eq!(port.request_count(), 3);
    }

    #[tokio::test]
    async fn test_manual_approval_waits_for_answer() {
        let (port, mut requests) = ManualApproval::new();
        let who = requester();

        let pending = tokio::spawn(async move {
            port.request_approval(&Label::new("L1"), &who).await
        });

        let request = requests.recv().await.unwrap();
        assert_eq!(request.label, Label::new("L1"));
        request.approve();

        assert!(pending.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_manual_request_denies() {
        let (port, mut requests) = ManualApproval::new();
        let who = requester();

        let pending = tokio::spawn(async move {
            port.request_approval(&Label::new("L1"), &who).await
        });
        drop(requests.recv().await.unwrap());

        assert!(!pending.await.unwrap());
    }
}
