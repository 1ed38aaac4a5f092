//! Guild creation, membership, bank and home anchor.

mod common;

use std::time::Duration;

use common::{Harness, OPENING_BALANCE};
use guild_kernel::{
    Entity, GuildError, GuildRole, HostLayout, Location, MemoryStore, Money,
};

#[tokio::test]
async fn test_create_guild_charges_and_enforces_uniqueness() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let cost = h.kernel.config().guilds.creation_cost;
    let (leader, alpha) = h.guild("Alpha").await;

    assert_eq!(alpha.leader, leader);
    assert_eq!(alpha.level, 1);
    assert_eq!(h.economy.peek(leader), Money(OPENING_BALANCE.0 - cost.0));
    assert!(h.presenter.keys_for(leader).contains(&"guild.created"));

    let rival = h.player("rival");
    assert_eq!(
        h.kernel
            .guilds()
            .create_guild(rival, "alpha", None)
            .await
            .unwrap_err(),
        GuildError::AlreadyExists(Entity::Guild)
    );
    assert_eq!(h.economy.peek(rival), OPENING_BALANCE);

    assert_eq!(
        h.kernel
            .guilds()
            .create_guild(leader, "Second", None)
            .await
            .unwrap_err(),
        GuildError::AlreadyInGuild
    );
    assert!(matches!(
        h.kernel.guilds().create_guild(rival, "x!", None).await,
        Err(GuildError::InvalidName(_))
    ));
    h.stop().await;
}

#[tokio::test]
async fn test_failed_persistence_refunds_creation_cost() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let founder = h.player("founder");

    h.store.set_available(false);
    assert!(matches!(
        h.kernel.guilds().create_guild(founder, "Doomed", None).await,
        Err(GuildError::Internal(_))
    ));
    assert_eq!(h.economy.peek(founder), OPENING_BALANCE);
    assert_eq!(h.kernel.guilds().membership(founder).await.unwrap(), None);
    h.stop().await;
}

#[tokio::test]
async fn test_invite_join_leave_and_kick() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let (leader, alpha) = h.guild("Alpha").await;
    let guilds = h.kernel.guilds();

    let stranger = h.player("stranger");
    assert_eq!(
        guilds.join(stranger, alpha.id).await.unwrap_err(),
        GuildError::NotFound(Entity::Invite)
    );

    guilds.invite(leader, stranger).await.unwrap();
    assert_eq!(
        guilds.invite(leader, stranger).await.unwrap_err(),
        GuildError::AlreadyExists(Entity::Invite)
    );
    let joined = guilds.join(stranger, alpha.id).await.unwrap();
    assert_eq!(joined.role, GuildRole::Member);

    // Members cannot invite, kick, or outrank
    let other = h.player("other");
    assert!(matches!(
        guilds.invite(stranger, other).await,
        Err(GuildError::PermissionDenied(_))
    ));
    assert!(matches!(
        guilds.kick(stranger, leader).await,
        Err(GuildError::PermissionDenied(_))
    ));
    assert!(matches!(
        guilds.leave(leader).await,
        Err(GuildError::PermissionDenied(_))
    ));

    guilds.leave(stranger).await.unwrap();
    assert_eq!(guilds.membership(stranger).await.unwrap(), None);

    let victim = h.recruit(leader, &alpha, "victim").await;
    guilds.kick(leader, victim).await.unwrap();
    assert!(h.presenter.keys_for(victim).contains(&"guild.kicked"));
    assert_eq!(guilds.members(alpha.id).await.unwrap().len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn test_invite_expires_after_timeout() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let (leader, alpha) = h.guild("Alpha").await;
    let guest = h.player("guest");

    h.kernel.guilds().invite(leader, guest).await.unwrap();
    h.ticks(40).await;

    assert!(h.presenter.keys_for(guest).contains(&"guild.invite_expired"));
    assert_eq!(
        h.kernel.guilds().join(guest, alpha.id).await.unwrap_err(),
        GuildError::NotFound(Entity::Invite)
    );
    h.stop().await;
}

#[tokio::test]
async fn test_full_guild_refuses_invites() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let (leader, alpha) = h.guild("Alpha").await;
    let capacity = h.kernel.config().guilds.base_member_capacity;

    for n in 1..capacity {
        h.recruit(leader, &alpha, &format!("member-{}", n)).await;
    }
    let late = h.player("late");
    assert_eq!(
        h.kernel.guilds().invite(leader, late).await.unwrap_err(),
        GuildError::GuildFull { capacity }
    );
    h.stop().await;
}

#[tokio::test]
async fn test_promote_and_demote_follow_role_ladder() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let (leader, alpha) = h.guild("Alpha").await;
    let member = h.recruit(leader, &alpha, "member").await;
    let guilds = h.kernel.guilds();

    let promoted = guilds.promote(leader, member).await.unwrap();
    assert_eq!(promoted.role, GuildRole::Officer);
    assert!(matches!(
        guilds.promote(leader, member).await,
        Err(GuildError::InvalidTransition { .. })
    ));
    assert!(matches!(
        guilds.demote(member, leader).await,
        Err(GuildError::PermissionDenied(_))
    ));

    let demoted = guilds.demote(leader, member).await.unwrap();
    assert_eq!(demoted.role, GuildRole::Member);
    h.stop().await;
}

#[tokio::test]
async fn test_bank_and_level_up() {
    let h = Harness::start(HostLayout::SingleAuthority).await;
    let (leader, alpha) = h.guild("Alpha").await;
    let member = h.recruit(leader, &alpha, "member").await;
    let guilds = h.kernel.guilds();

    let banked = guilds.deposit(member, Money(60_000)).await.unwrap();
    assert_eq!(banked.balance, Money(60_000));
    assert_eq!(h.economy.peek(member), Money(OPENING_BALANCE.0 - 60_000));

    assert!(matches!(
        guilds.withdraw(member, Money(1)).await,
        Err(GuildError::PermissionDenied(_))
    ));

    let levelled = guilds.level_up(leader).await.unwrap();
    assert_eq!(levelled.level, 2);
    assert_eq!(levelled.balance, Money(10_000));

    assert_eq!(
        guilds.level_up(leader).await.unwrap_err(),
        GuildError::InsufficientFunds {
            needed: Money(100_000),
            available: Money(10_000),
        }
    );

    let drained = guilds.withdraw(leader, Money(10_000)).await.unwrap();
    assert_eq!(drained.balance, Money::ZERO);

    guilds.set_frozen(alpha.id, true).await.unwrap();
    assert_eq!(
        guilds.deposit(member, Money(1)).await.unwrap_err(),
        GuildError::GuildFrozen
    );
    h.stop().await;
}

#[tokio::test]
async fn test_racing_deposits_conflict_and_compensate() {
    let store = MemoryStore::new().with_latency(Duration::from_millis(40));
    let h = Harness::with_store(HostLayout::SingleAuthority, store).await;
    let (leader, _alpha) = h.guild("Alpha").await;
    let after_creation = h.economy.peek(leader);
    let guilds = h.kernel.guilds();

    let (first, second) = tokio::join!(
        guilds.deposit(leader, Money(500)),
        guilds.deposit(leader, Money(700)),
    );

    let outcomes = [first, second];
    let landed: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(landed.len(), 1);
    assert!(outcomes
        .iter()
        .any(|r| r.as_ref().err() == Some(&GuildError::ConcurrencyConflict)));

    // Only the landed deposit left the actor's account
    let moved = landed[0].balance;
    assert_eq!(h.economy.peek(leader), Money(after_creation.0 - moved.0));
    h.stop().await;
}

#[tokio::test]
async fn test_set_home_reads_location_or_gives_up() {
    let h = Harness::start(HostLayout::Partitioned {
        region_threads: 2,
        region_shift: 5,
    })
    .await;
    let (leader, alpha) = h.guild("Alpha").await;
    let officer = h.recruit(leader, &alpha, "officer").await;
    h.kernel.guilds().promote(leader, officer).await.unwrap();

    let spot = Location::new("world", 1_250.0, 70.0, -480.0);
    h.kernel.relocate_actor(leader, spot.clone());
    let homed = h.kernel.guilds().set_home(leader).await.unwrap();
    assert_eq!(homed.home, Some(spot));

    h.kernel.disconnect_actor(officer).await.unwrap();
    assert_eq!(
        h.kernel.guilds().set_home(officer).await.unwrap_err(),
        GuildError::NotFound(Entity::Actor)
    );
    assert!(h.presenter.all_on_owner());
    h.stop().await;
}
