//! Confirmation windows guarding destructive actions.

mod common;

use common::Harness;
use guild_kernel::{
    ConfirmOutcome, ConfirmTarget, GuildError, GuildRelation, HostLayout, RelationType,
};

/// Two active alliances for `alpha`, one with each of two other guilds.
async fn two_alliances(h: &Harness) -> (guild_kernel::ActorId, GuildRelation, GuildRelation) {
    let (alpha_leader, _alpha) = h.guild("Alpha").await;
    let (beta_leader, beta) = h.guild("Beta").await;
    let (gamma_leader, gamma) = h.guild("Gamma").await;
    let relations = h.kernel.relations();

    let with_beta = relations
        .propose(alpha_leader, beta.id, RelationType::Ally)
        .await
        .unwrap();
    relations.accept(beta_leader, with_beta.id).await.unwrap();
    let with_gamma = relations
        .propose(alpha_leader, gamma.id, RelationType::Ally)
        .await
        .unwrap();
    relations.accept(gamma_leader, with_gamma.id).await.unwrap();
    (alpha_leader, with_beta, with_gamma)
}

#[tokio::test]
async fn test_double_request_deletes_exactly_once() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let (leader, with_beta, with_gamma) = two_alliances(&h).await;
    let relations = h.kernel.relations();

    assert_eq!(
        relations.request_delete(leader, with_beta.id).await.unwrap(),
        ConfirmOutcome::Armed
    );
    assert_eq!(h.store.relation_snapshot().len(), 2);
    assert_eq!(
        relations.request_delete(leader, with_beta.id).await.unwrap(),
        ConfirmOutcome::Confirmed
    );

    let remaining = h.store.relation_snapshot();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, with_gamma.id);
    assert_eq!(h.presenter.count("relation.deleted"), 2);

    // A third request opens a new window against a relation that no longer exists
    assert!(matches!(
        relations.request_delete(leader, with_beta.id).await,
        Err(GuildError::NotFound(_))
    ));
    h.stop().await;
}

#[tokio::test]
async fn test_admin_switching_targets_keeps_only_the_second() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let (_leader, with_beta, with_gamma) = two_alliances(&h).await;
    let admin = h.player("admin");
    let relations = h.kernel.relations();

    assert_eq!(
        relations.request_admin_delete(admin, with_beta.id).await.unwrap(),
        ConfirmOutcome::Armed
    );
    assert_eq!(
        relations.request_admin_delete(admin, with_gamma.id).await.unwrap(),
        ConfirmOutcome::Replaced {
            previous: ConfirmTarget::DeleteRelation(with_beta.id)
        }
    );
    assert_eq!(
        h.kernel.pending_confirmation(admin).await.unwrap(),
        Some(ConfirmTarget::DeleteRelation(with_gamma.id))
    );

    let confirmed = h.kernel.confirm(admin).await.unwrap();
    assert_eq!(confirmed, Some(ConfirmTarget::DeleteRelation(with_gamma.id)));

    let remaining = h.store.relation_snapshot();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, with_beta.id);
    h.stop().await;
}

#[tokio::test]
async fn test_timeout_clears_window_and_next_request_starts_fresh() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let (leader, with_beta, _with_gamma) = two_alliances(&h).await;
    let relations = h.kernel.relations();

    relations.request_delete(leader, with_beta.id).await.unwrap();
    h.ticks(20).await;

    assert_eq!(h.kernel.pending_confirmation(leader).await.unwrap(), None);
    assert_eq!(h.presenter.count("confirm.expired"), 1);
    assert!(h.presenter.keys_for(leader).contains(&"confirm.expired"));

    // The next request arms instead of confirming the stale window
    assert_eq!(
        relations.request_delete(leader, with_beta.id).await.unwrap(),
        ConfirmOutcome::Armed
    );
    assert_eq!(h.store.relation_snapshot().len(), 2);
    h.stop().await;
}

#[tokio::test]
async fn test_cancel_and_disconnect_drop_the_window() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let (leader, with_beta, with_gamma) = two_alliances(&h).await;
    let relations = h.kernel.relations();

    relations.request_delete(leader, with_beta.id).await.unwrap();
    assert_eq!(
        h.kernel.cancel_confirmation(leader).await.unwrap(),
        Some(ConfirmTarget::DeleteRelation(with_beta.id))
    );
    assert_eq!(h.kernel.confirm(leader).await.unwrap(), None);

    relations.request_delete(leader, with_gamma.id).await.unwrap();
    h.kernel.disconnect_actor(leader).await.unwrap();
    assert_eq!(h.kernel.pending_confirmation(leader).await.unwrap(), None);
    assert_eq!(h.store.relation_snapshot().len(), 2);
    h.stop().await;
}

#[tokio::test]
async fn test_disband_requires_confirmation() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let (leader, alpha) = h.guild("Alpha").await;
    let member = h.recruit(leader, &alpha, "member").await;
    let guilds = h.kernel.guilds();

    assert!(matches!(
        guilds.disband_guild(member).await,
        Err(GuildError::PermissionDenied(_))
    ));

    assert_eq!(guilds.disband_guild(leader).await.unwrap(), ConfirmOutcome::Armed);
    assert_eq!(h.store.guild_count(), 1);

    let confirmed = h.kernel.confirm(leader).await.unwrap();
    assert_eq!(confirmed, Some(ConfirmTarget::DisbandGuild(alpha.id)));
    assert_eq!(h.store.guild_count(), 0);
    assert_eq!(guilds.membership(member).await.unwrap(), None);
    assert!(h.presenter.keys_for(member).contains(&"guild.disbanded"));
    h.stop().await;
}
