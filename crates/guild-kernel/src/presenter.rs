//! Presentation collaborator.
//!
//! The kernel never renders text. It emits a [`Notice`] carrying a stable
//! key and named arguments; the host's presenter maps keys to whatever its
//! players see. Presenters are only ever called on the global authority.

use std::sync::Mutex;

use crate::affinity::is_owning_thread;
use crate::error::GuildError;
use crate::ids::{ActorId, GuildId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub key: &'static str,
    pub args: Vec<(&'static str, String)>,
}

impl Notice {
    pub fn new(key: &'static str) -> Self {
        Self {
            key,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, name: &'static str, value: impl ToString) -> Self {
        self.args.push((name, value.to_string()));
        self
    }

    /// Notice for a failed operation, keyed by the error code.
    pub fn failure(error: &GuildError) -> Self {
        Self::new(error.code()).arg("detail", error)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub trait Presenter: Send + Sync {
    /// Message for one actor.
    fn notify(&self, actor: ActorId, notice: Notice);
    /// Message for every online member of a guild.
    fn broadcast(&self, guild: GuildId, notice: Notice);
    /// Guild state changed; reopen any views showing it.
    fn refresh(&self, guild: GuildId);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn notify(&self, _actor: ActorId, _notice: Notice) {}
    fn broadcast(&self, _guild: GuildId, _notice: Notice) {}
    fn refresh(&self, _guild: GuildId) {}
}

/// Who a recorded notice went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Actor(ActorId),
    Guild(GuildId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub audience: Audience,
    pub notice: Notice,
    /// Whether delivery happened on the owning thread
    pub on_owner: bool,
}

/// Presenter that keeps everything it is asked to show.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    delivered: Mutex<Vec<Delivered>>,
    refreshes: Mutex<Vec<(GuildId, bool)>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Keys sent to `actor`, oldest first.
    pub fn keys_for(&self, actor: ActorId) -> Vec<&'static str> {
        self.delivered()
            .into_iter()
            .filter(|d| d.audience == Audience::Actor(actor))
            .map(|d| d.notice.key)
            .collect()
    }

    pub fn count(&self, key: &str) -> usize {
        self.delivered().iter().filter(|d| d.notice.key == key).count()
    }

    /// True if every notice and refresh so far was delivered on the owner.
    pub fn all_on_owner(&self) -> bool {
        let refreshes = self
            .refreshes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.delivered().iter().all(|d| d.on_owner) && refreshes.iter().all(|(_, on)| *on)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn record(&self, audience: Audience, notice: Notice) {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Delivered {
                audience,
                notice,
                on_owner: is_owning_thread(),
            });
    }
}

impl Presenter for RecordingPresenter {
    fn notify(&self, actor: ActorId, notice: Notice) {
        self.record(Audience::Actor(actor), notice);
    }

    fn broadcast(&self, guild: GuildId, notice: Notice) {
        self.record(Audience::Guild(guild), notice);
    }

    fn refresh(&self, guild: GuildId) {
        self.refreshes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((guild, is_owning_thread()));
    }
}
