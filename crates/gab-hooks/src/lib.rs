//! gab-hooks: location registry and per-user resumable hook dispatch.
//!
//! A *location* is a named point in the event pipeline (message received,
//! presence changed, about to send...). Plugins register *hooks* under a
//! location. Each hook keeps one resumable task per context (a user, or one
//! shared global context) that lives across events until it completes.
//!
//! The driver calls [`Locations::evaluate`] once per incoming event. Every
//! hook of that location gets the event, and the call reports whether any of
//! them asked for the event to be consumed.

pub mod catalog;
pub mod registry;
pub mod task;

use gab_types::{ContextKey, Outbox};
use thiserror::Error;

pub use registry::{Dispatch, HookInfo, HookSpec, LocationSpec, Locations, TaskFactory, TaskRef};
pub use task::{FnTask, HookTask, ResumableTask, TaskState, task_fn};

/// What the registry needs from whoever is driving dispatch.
pub trait Driver {
    /// Stable identity of the user the current event belongs to.
    fn active_user(&self) -> &str;

    /// Where hooks can queue replies, if the driver has a transport.
    fn outbox(&self) -> Option<&Outbox> {
        None
    }
}

/// Minimal [`Driver`] carrying a user identity and an optional outbox.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user: String,
    pub outbox: Option<Outbox>,
}

impl UserContext {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            outbox: None,
        }
    }

    pub fn with_outbox(mut self, outbox: Outbox) -> Self {
        self.outbox = Some(outbox);
        self
    }
}

impl Driver for UserContext {
    fn active_user(&self) -> &str {
        &self.user
    }

    fn outbox(&self) -> Option<&Outbox> {
        self.outbox.as_ref()
    }
}

/// Misuse of the registry itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown location: {0}")]
    UnknownLocation(String),
    #[error("location already registered: {0}")]
    DuplicateLocation(String),
    #[error("location {location} still has {hooks} registered hook(s)")]
    LocationHasHooks { location: String, hooks: usize },
    #[error("hook {location}/{hook} still has {states} live context task(s)")]
    HookHasLiveState {
        location: String,
        hook: String,
        states: usize,
    },
}

/// A hook task failed while being created or driven.
#[derive(Debug, Error)]
#[error("hook {location}/{hook} failed for context {context}: {source}")]
pub struct HookError {
    pub location: String,
    pub hook: String,
    pub context: ContextKey,
    #[source]
    pub source: anyhow::Error,
}
