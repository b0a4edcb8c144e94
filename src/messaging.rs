//! Commands sent to the popup from outside it (CLI flag, number keys).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::models::ActionKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCommand {
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostResponse {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, error: Some(message.into()) }
    }
}

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("invalid command: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("action {0} cannot be triggered from outside the popup")]
    Unsupported(&'static str),
    #[error("receiving end is gone")]
    ReceiverGone,
    #[error("no response from the popup")]
    NoResponse,
}

impl MessagingError {
    /// Races with a torn-down receiver. These are swallowed, not shown.
    pub fn is_transient(&self) -> bool {
        matches!(self, MessagingError::ReceiverGone | MessagingError::NoResponse)
    }
}

pub fn parse_command(json: &str) -> Result<HostCommand, MessagingError> {
    let command: HostCommand = serde_json::from_str(json)?;
    if !ActionKind::STREAMING.contains(&command.action) {
        return Err(MessagingError::Unsupported(command.action.id()));
    }
    Ok(command)
}

pub type Envelope = (HostCommand, oneshot::Sender<HostResponse>);

/// Sending half held by whoever issues commands.
#[derive(Debug, Clone)]
pub struct HostChannel {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl HostChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a command and returns the receiver for its response.
    pub fn send(&self, command: HostCommand) -> Result<oneshot::Receiver<HostResponse>, MessagingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send((command, reply_tx)).map_err(|_| MessagingError::ReceiverGone)?;
        Ok(reply_rx)
    }
}

/// Replies to a command, ignoring a requester that stopped listening.
pub fn respond(reply: oneshot::Sender<HostResponse>, response: HostResponse) {
    if reply.send(response).is_err() {
        let err = MessagingError::NoResponse;
        debug!(transient = err.is_transient(), "dropped host response: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_command() {
        let cmd = parse_command(r#"{"action":"translate","selectedText":"Hallo"}"#).unwrap();
        assert_eq!(cmd.action, ActionKind::Translate);
        assert_eq!(cmd.selected_text.as_deref(), Some("Hallo"));
        let bare = parse_command(r#"{"action":"discuss"}"#).unwrap();
        assert_eq!(bare.selected_text, None);
    }

    #[test]
    fn rejects_unknown_and_unsupported_actions() {
        assert!(matches!(parse_command(r#"{"action":"explode"}"#), Err(MessagingError::Invalid(_))));
        assert!(matches!(
            parse_command(r#"{"action":"highlight"}"#),
            Err(MessagingError::Unsupported("highlight"))
        ));
    }

    #[test]
    fn response_serializes_without_empty_error() {
        assert_eq!(serde_json::to_string(&HostResponse::ok()).unwrap(), r#"{"success":true}"#);
        assert_eq!(
            serde_json::to_string(&HostResponse::err("busy")).unwrap(),
            r#"{"success":false,"error":"busy"}"#
        );
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_is_transient() {
        let (channel, rx) = HostChannel::new();
        drop(rx);
        let err = channel
            .send(HostCommand { action: ActionKind::Summarize, selected_text: None })
            .unwrap_err();
        assert!(err.is_transient());
        assert!(!MessagingError::Unsupported("highlight").is_transient());
    }

    #[tokio::test]
    async fn round_trips_through_channel() {
        let (channel, mut rx) = HostChannel::new();
        let reply = channel
            .send(HostCommand { action: ActionKind::Rephrase, selected_text: Some("x".into()) })
            .unwrap();
        let (command, reply_tx) = rx.recv().await.unwrap();
        assert_eq!(command.action, ActionKind::Rephrase);
        respond(reply_tx, HostResponse::ok());
        assert!(reply.await.unwrap().success);
    }
}
