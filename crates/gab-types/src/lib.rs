use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ──────────────────── Context Types ────────────────────

/// Scope under which a hook keeps its resumable task state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum ContextKey {
    /// One task per user identity (bare JID).
    User(String),
    /// A single task shared by every user.
    Global,
}

impl ContextKey {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    /// Resolve the key a hook should use for `user`.
    pub fn resolve(user: &str, use_global_state: bool) -> Self {
        if use_global_state {
            Self::Global
        } else {
            Self::User(user.to_string())
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => f.write_str(id),
            Self::Global => f.write_str("__global__"),
        }
    }
}

// ──────────────────── Resumable Task Types ────────────────────

/// What a hook task answers for one delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Let the driver keep processing the event.
    #[default]
    Pass,
    /// Stop further processing of the event.
    Consume,
}

impl Verdict {
    pub fn is_consume(self) -> bool {
        matches!(self, Self::Consume)
    }
}

impl From<bool> for Verdict {
    fn from(consume: bool) -> Self {
        if consume { Self::Consume } else { Self::Pass }
    }
}

/// Outcome of resuming a cooperative task once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// The task suspended, handing back a value.
    Yield(T),
    /// The task ran to completion and must not be resumed again.
    Complete,
}

impl<T> Step<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

// ──────────────────── User Ranks ────────────────────

/// Rank a user needs to run a command. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    #[default]
    User,
    Moderator,
    Admin,
}

impl Rank {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "moderator" | "mod" => Ok(Self::Moderator),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown rank: {other}")),
        }
    }
}

// ──────────────────── Event Types ────────────────────

/// Presence "show" states a contact can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceShow {
    Online,
    Away,
    Chat,
    Dnd,
    Xa,
    Unavailable,
}

/// Roster subscription notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
}

/// Event payload delivered to the hooks of a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookEvent {
    /// The bot finished starting up.
    Startup,
    /// A chat message was received.
    Message {
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource: Option<String>,
        body: String,
        /// Receive time (unix millis).
        timestamp: i64,
    },
    /// An iq stanza was received.
    Iq {
        from: String,
        kind: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// A contact changed presence.
    Presence {
        from: String,
        show: PresenceShow,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    /// A roster subscription notice.
    Subscription {
        from: String,
        kind: SubscriptionKind,
    },
    /// A message is about to be sent. `recipient` is `None` for broadcasts.
    Outgoing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource: Option<String>,
        text: String,
    },
}

impl HookEvent {
    /// The user the event originates from, if any.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Message { from, .. }
            | Self::Iq { from, .. }
            | Self::Presence { from, .. }
            | Self::Subscription { from, .. } => Some(from),
            Self::Startup | Self::Outgoing { .. } => None,
        }
    }
}

// ──────────────────── Outbound Types ────────────────────

/// Text the bot wants delivered to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient: String,
    pub text: String,
    /// Rendered as an error notice by transports that distinguish them.
    #[serde(default)]
    pub is_error: bool,
}

/// Cloneable handle hooks and commands use to queue outbound messages.
///
/// The transport owns the receiving end and drains it after each dispatch.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message. Returns `false` once the transport has gone away.
    pub fn send(&self, recipient: &str, text: impl Into<String>) -> bool {
        self.push(recipient, text.into(), false)
    }

    /// Queue an error notice.
    pub fn error(&self, recipient: &str, text: impl Into<String>) -> bool {
        self.push(recipient, text.into(), true)
    }

    fn push(&self, recipient: &str, text: String, is_error: bool) -> bool {
        self.tx
            .send(OutboundMessage {
                recipient: recipient.to_string(),
                text,
                is_error,
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_key_resolve() {
        assert_eq!(ContextKey::resolve("alice@x", false), ContextKey::user("alice@x"));
        assert_eq!(ContextKey::resolve("alice@x", true), ContextKey::Global);
        assert_eq!(ContextKey::Global.to_string(), "__global__");
        assert_eq!(ContextKey::user("bob@x").to_string(), "bob@x");
    }

    #[test]
    fn test_verdict_from_bool() {
        assert!(Verdict::from(true).is_consume());
        assert!(!Verdict::from(false).is_consume());
        assert_eq!(Verdict::default(), Verdict::Pass);
    }

    #[test]
    fn test_rank_ordering_and_parse() {
        assert!(Rank::User < Rank::Moderator);
        assert!(Rank::Moderator < Rank::Admin);
        assert_eq!("ADMIN".parse::<Rank>().unwrap(), Rank::Admin);
        assert_eq!("mod".parse::<Rank>().unwrap(), Rank::Moderator);
        assert!("root".parse::<Rank>().is_err());
    }

    #[test]
    fn test_hook_event_serde() {
        let event = HookEvent::Message {
            from: "alice@example.org".into(),
            resource: None,
            body: "hello".into(),
            timestamp: 1700000000000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"message\""));
        assert!(!json.contains("resource"));
        let parsed: HookEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.sender(), Some("alice@example.org"));
    }

    #[test]
    fn test_presence_event_serde() {
        let json = r#"{"type":"presence","from":"bob@x","show":"dnd"}"#;
        let parsed: HookEvent = serde_json::from_str(json).unwrap();
        match parsed {
            HookEvent::Presence { show, status, .. } => {
                assert_eq!(show, PresenceShow::Dnd);
                assert!(status.is_none());
            }
            _ => panic!("Expected Presence variant"),
        }
    }

    #[test]
    fn test_outbox_delivers_in_order() {
        let (outbox, mut rx) = Outbox::channel();
        assert!(outbox.send("alice@x", "one"));
        assert!(outbox.error("alice@x", "two"));
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.text, "one");
        assert!(!first.is_error);
        assert!(second.is_error);
    }

    #[test]
    fn test_outbox_reports_closed_receiver() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        assert!(!outbox.send("alice@x", "lost"));
    }
}
