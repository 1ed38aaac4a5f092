//! Presentation side of the harness: notice codes to readable text.

use std::collections::BTreeMap;
use std::sync::Mutex;

use guild_kernel::{is_owning_thread, ActorId, GuildId, Notice, Presenter};
use tracing::{debug, info, warn};

/// English text for a notice code. `{name}` is replaced by the notice
/// argument of that name.
pub fn template(key: &str) -> &'static str {
    match key {
        "guild.created" => "Guild {guild} founded for {cost}",
        "guild.disbanded" => "Guild {guild} has been disbanded",
        "guild.invited" => "You were invited to join {guild}",
        "guild.invite_sent" => "Invite sent on behalf of {guild}",
        "guild.invite_expired" => "Your guild invite expired",
        "guild.member_joined" => "{member} joined the guild",
        "guild.member_left" => "{member} left the guild",
        "guild.member_kicked" => "{member} was removed from the guild",
        "guild.left" => "You left your guild",
        "guild.kicked" => "You were removed from your guild",
        "guild.role_changed" => "Your guild role is now {role}",
        "guild.level_up" => "The guild reached level {level}",
        "guild.home_set" => "The guild home was moved",
        "guild.frozen" => "The guild has been frozen",
        "guild.unfrozen" => "The guild is no longer frozen",
        "bank.deposited" => "Deposited {amount}",
        "bank.withdrew" => "Withdrew {amount}",
        "relation.proposed" => "Proposed {kind} to {guild}",
        "relation.received" => "{guild} proposes {kind}",
        "relation.accepted" => "{kind} is now active",
        "relation.rejected" => "{kind} proposal was rejected",
        "relation.cancelled" => "{kind} proposal was withdrawn",
        "relation.truce_proposed" => "A truce has been proposed",
        "relation.truce_ended" => "The truce ended; relations are neutral",
        "relation.deleted" => "{kind} relation removed",
        "relation.expired" => "{kind} relation expired",
        "confirm.armed" => "Repeat the action within {ticks} ticks to confirm",
        "confirm.replaced" => "Now confirming {target} instead of {previous}",
        "confirm.cancelled" => "Confirmation cancelled",
        "confirm.expired" => "Confirmation timed out",
        "error.not_found" => "That no longer exists",
        "error.invalid_transition" => "That action is not possible right now",
        "error.already_exists" => "That already exists",
        "error.permission_denied" => "You are not allowed to do that",
        "error.concurrency_conflict" => "Someone else changed this first; try again",
        "error.self_relation" => "A guild cannot relate to itself",
        "error.already_in_guild" => "Already in a guild",
        "error.not_in_guild" => "You are not in a guild",
        "error.guild_full" => "The guild is full",
        "error.guild_frozen" => "The guild is frozen",
        "error.insufficient_funds" => "Not enough money",
        "error.max_level" => "The guild is at its maximum level",
        "error.invalid_name" => "That name is not allowed",
        "error.internal" => "Something went wrong; the action was not applied",
        _ => "{key}",
    }
}

pub fn render(notice: &Notice) -> String {
    let mut text = template(notice.key).replace("{key}", notice.key);
    for (name, value) in &notice.args {
        text = text.replace(&format!("{{{}}}", name), value);
    }
    text
}

/// Presenter that writes every notice to the log and tallies keys.
#[derive(Debug, Default)]
pub struct LogPresenter {
    tally: Mutex<BTreeMap<&'static str, usize>>,
    off_owner: Mutex<usize>,
}

impl LogPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self) -> BTreeMap<String, usize> {
        self.tally
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(key, count)| (key.to_string(), *count))
            .collect()
    }

    /// Deliveries that arrived off the global authority. Should stay zero.
    pub fn off_owner(&self) -> usize {
        *self
            .off_owner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, key: &'static str) {
        if !is_owning_thread() {
            warn!(key, "Notice delivered off the global authority");
            *self
                .off_owner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
        }
        *self
            .tally
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key)
            .or_default() += 1;
    }
}

impl Presenter for LogPresenter {
    fn notify(&self, actor: ActorId, notice: Notice) {
        self.record(notice.key);
        info!(actor = %actor, key = notice.key, "{}", render(&notice));
    }

    fn broadcast(&self, guild: GuildId, notice: Notice) {
        self.record(notice.key);
        info!(guild = %guild, key = notice.key, "{}", render(&notice));
    }

    fn refresh(&self, guild: GuildId) {
        debug!(guild = %guild, "Guild view refreshed");
    }
}
