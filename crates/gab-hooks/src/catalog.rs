//! Standard locations of the bot's event pipeline.
//!
//! Inbound events fire three locations in turn: `pre_*`, the plain one and
//! `post_*`. Outbound text fires one of the `send_*` locations.

use gab_types::{HookEvent, PresenceShow, SubscriptionKind};

use crate::registry::{LocationSpec, Locations};

pub const INITIALIZERS: &str = "initializers";
pub const SEND_TO: &str = "send_to";
pub const SEND_TO_ALL: &str = "send_to_all";
pub const SEND_MSG_PER_MSG: &str = "send_msg_per_msg";
pub const SEND_MSG_PER_USER: &str = "send_msg_per_user";
pub const SEND_MSG_PER_RESOURCE: &str = "send_msg_per_resource";

pub const EV_MSG: &str = "ev_msg";
pub const EV_IQ: &str = "ev_iq";
pub const EV_ONLINE: &str = "ev_online";
pub const EV_AWAY: &str = "ev_away";
pub const EV_CHAT: &str = "ev_chat";
pub const EV_DND: &str = "ev_dnd";
pub const EV_XA: &str = "ev_xa";
pub const EV_UNAVAILABLE: &str = "ev_unavailable";
pub const EV_SUBSCRIBE: &str = "ev_subscribe";
pub const EV_SUBSCRIBED: &str = "ev_subscribed";
pub const EV_UNSUBSCRIBE: &str = "ev_unsubscribe";
pub const EV_UNSUBSCRIBED: &str = "ev_unsubscribed";

const SEND_LOCATIONS: [(&str, &str); 6] = [
    (INITIALIZERS, "Fired once after start-up. Receives the startup event."),
    (
        SEND_TO,
        "Fired for messages sent to a single user. Receives the outgoing text. Consume: drop the message.",
    ),
    (
        SEND_TO_ALL,
        "Fired for messages broadcast to all users. Receives the outgoing text. Consume: drop the message.",
    ),
    (
        SEND_MSG_PER_MSG,
        "Fired once for every message sent. Consume: drop the message.",
    ),
    (
        SEND_MSG_PER_USER,
        "Fired once for every user a message is sent to. Receives the recipient and the message. \
         Consume: drop the message for that user.",
    ),
    (
        SEND_MSG_PER_RESOURCE,
        "Fired once for every resource a message is sent to. Receives recipient, resource and \
         message. Consume: drop the message for that resource.",
    ),
];

const EVENT_LOCATIONS: [(&str, &str); 12] = [
    (EV_MSG, "Fired for every message received. Receives the sender and the message. Consume: do not process the message further."),
    (EV_IQ, "Fired for every iq received. Receives the sender and the iq. Consume: do not process the iq further."),
    (EV_ONLINE, "Fired for every online presence notification. Consume: stop further processing."),
    (EV_AWAY, "Fired for every away presence notification. Consume: stop further processing."),
    (EV_CHAT, "Fired for every chat presence notification. Consume: stop further processing."),
    (EV_DND, "Fired for every do-not-disturb presence notification. Consume: stop further processing."),
    (EV_XA, "Fired for every extended-away presence notification. Consume: stop further processing."),
    (EV_UNAVAILABLE, "Fired for every unavailable notification. Consume: stop further processing."),
    (EV_SUBSCRIBE, "Fired for every subscription request. Consume: stop further processing."),
    (EV_SUBSCRIBED, "Fired for every subscription approval. Consume: stop further processing."),
    (EV_UNSUBSCRIBE, "Fired for every unsubscription request. Consume: stop further processing."),
    (EV_UNSUBSCRIBED, "Fired for every subscription revocation. Consume: stop further processing."),
];

/// Where in the pre/main/post triple a location sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pre,
    Main,
    Post,
}

/// Name of the location for `base` at `stage`, e.g. `pre_ev_msg`.
pub fn staged(base: &str, stage: Stage) -> String {
    match stage {
        Stage::Pre => format!("pre_{base}"),
        Stage::Main => base.to_string(),
        Stage::Post => format!("post_{base}"),
    }
}

/// Every standard location, in pipeline order.
pub fn standard_locations() -> Vec<LocationSpec> {
    let mut specs: Vec<LocationSpec> = SEND_LOCATIONS
        .iter()
        .map(|(name, doc)| LocationSpec::new(*name).doc(*doc))
        .collect();
    for (base, doc) in EVENT_LOCATIONS {
        specs.push(LocationSpec::new(staged(base, Stage::Pre)));
        specs.push(LocationSpec::new(base).doc(doc));
        specs.push(LocationSpec::new(staged(base, Stage::Post)));
    }
    specs
}

/// Base inbound location for an event, if it is an inbound event.
pub fn event_location(event: &HookEvent) -> Option<&'static str> {
    let name = match event {
        HookEvent::Message { .. } => EV_MSG,
        HookEvent::Iq { .. } => EV_IQ,
        HookEvent::Presence { show, .. } => match show {
            PresenceShow::Online => EV_ONLINE,
            PresenceShow::Away => EV_AWAY,
            PresenceShow::Chat => EV_CHAT,
            PresenceShow::Dnd => EV_DND,
            PresenceShow::Xa => EV_XA,
            PresenceShow::Unavailable => EV_UNAVAILABLE,
        },
        HookEvent::Subscription { kind, .. } => match kind {
            SubscriptionKind::Subscribe => EV_SUBSCRIBE,
            SubscriptionKind::Subscribed => EV_SUBSCRIBED,
            SubscriptionKind::Unsubscribe => EV_UNSUBSCRIBE,
            SubscriptionKind::Unsubscribed => EV_UNSUBSCRIBED,
        },
        HookEvent::Startup | HookEvent::Outgoing { .. } => return None,
    };
    Some(name)
}

/// The pre/main/post locations an inbound event fires, in order.
pub fn pipeline_for(event: &HookEvent) -> Option<[String; 3]> {
    let base = event_location(event)?;
    Some([
        staged(base, Stage::Pre),
        base.to_string(),
        staged(base, Stage::Post),
    ])
}

impl<E> Locations<E> {
    /// A registry with every standard location declared.
    pub fn with_standard_locations() -> Self {
        let locations = Self::new();
        for spec in standard_locations() {
            let registered = locations.register_location(spec);
            debug_assert!(registered.is_ok(), "catalog names are unique: {registered:?}");
        }
        locations
    }
}
