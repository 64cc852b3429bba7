use std::sync::Arc;

use savepool_core::clock::ManualClock;
use savepool_core::config::EngineConfig;
use savepool_core::events::SavingsEvent;
use savepool_core::invariants::audit;
use savepool_core::pools::{JoinRequest, NewPool};
use savepool_core::token::{MemoryTokenLedger, TokenLedger};
use savepool_core::types::{tokens, SECONDS_PER_DAY};
use savepool_core::{Address, ErrorKind, Registry, SavingsError, UNIT};

fn setup() -> (Registry, Arc<MemoryTokenLedger>) {
    let config = EngineConfig::default();
    let token = Arc::new(MemoryTokenLedger::new(config.custody_account.clone()));
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let registry = Registry::new(config, token.clone(), clock).expect("registry");
    (registry, token)
}

fn funded(token: &MemoryTokenLedger, name: &str) -> Address {
    let address = Address::from(name);
    token.mint(&address, tokens(500)).unwrap();
    token.approve(&address, u128::MAX);
    address
}

fn register(registry: &Registry, token: &MemoryTokenLedger, name: &str) -> Address {
    let address = funded(token, name);
    registry
        .register_user(&address, name, registry.registration_fee())
        .unwrap();
    address
}

#[test]
fn scenario_a_register_with_exact_fee() {
    let (registry, token) = setup();
    let alice = funded(&token, "alice");
    registry
        .register_user(&alice, "alice", registry.registration_fee())
        .unwrap();

    let profile = registry.get_user_profile(&alice).unwrap();
    assert!(profile.is_registered);
    assert_eq!(profile.username, "alice");

    let err = registry
        .register_user(&alice, "alice", registry.registration_fee())
        .unwrap_err();
    assert!(matches!(err, SavingsError::AlreadyRegistered(_)));
    assert!(audit(&registry).is_empty());
}

#[test]
fn scenario_b_goal_deposit_then_rejected_overshoot() {
    let (registry, token) = setup();
    let alice = register(&registry, &token, "alice");
    registry
        .create_savings_goal(&alice, tokens(10), 30 * SECONDS_PER_DAY)
        .unwrap();

    registry.deposit_to_goal(&alice, tokens(5), false).unwrap();
    let goal = registry.get_goal(&alice).unwrap();
    assert_eq!(goal.current_amount, tokens(5));
    assert!(goal.is_active);

    let err = registry
        .deposit_to_goal(&alice, tokens(15), false)
        .unwrap_err();
    assert!(matches!(err, SavingsError::ExceedsTarget { .. }));
    assert_eq!(err.kind(), ErrorKind::OverTarget);
    assert_eq!(registry.get_goal(&alice).unwrap().current_amount, tokens(5));
    assert!(audit(&registry).is_empty());
}

#[test]
fn scenario_c_pool_join_and_referral_bonus() {
    let (registry, token) = setup();
    let creator = register(&registry, &token, "creator");
    let user1 = register(&registry, &token, "user1");
    let user2 = register(&registry, &token, "user2");
    let user3 = register(&registry, &token, "user3");

    let pool_id = registry
        .create_group_pool(
            &creator,
            NewPool {
                name: "Trip".into(),
                description: "Shared trip savings".into(),
                target_amount: tokens(100),
                max_members: 5,
                lock_duration: 30 * SECONDS_PER_DAY,
            },
        )
        .unwrap();

    let plain = JoinRequest {
        contribution_amount: tokens(20),
        allow_partial: false,
        referrer: None,
    };
    registry
        .join_group_pool(&user1, pool_id, plain.clone())
        .unwrap();
    registry.join_group_pool(&user2, pool_id, plain).unwrap();
    let pool = registry.get_pool(pool_id).unwrap();
    assert_eq!(pool.current_amount, tokens(40));
    assert_eq!(pool.current_members, 2);

    // A second join by user2 is a duplicate; the referral leg runs through user3.
    let referred = JoinRequest {
        contribution_amount: tokens(20),
        allow_partial: false,
        referrer: Some(user1.clone()),
    };
    let err = registry
        .join_group_pool(&user2, pool_id, referred.clone())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);

    let before = token.balance_of(&user1);
    let since = registry.events().len() as u64;
    registry.join_group_pool(&user3, pool_id, referred).unwrap();

    let bonus = tokens(20) / 100;
    assert_eq!(bonus, UNIT / 5);
    assert!(token.balance_of(&user1) > before);
    assert_eq!(token.balance_of(&user1) - before, bonus);

    let new_events: Vec<SavingsEvent> = registry
        .events_since(since)
        .into_iter()
        .map(|r| r.event)
        .collect();
    assert!(new_events.contains(&SavingsEvent::ReferralBonusPaid {
        pool_id,
        referrer: user1.clone(),
        bonus_amount: bonus,
    }));
    assert!(matches!(
        new_events[0],
        SavingsEvent::MemberJoined { ref member, .. } if member == &user3
    ));
    assert!(audit(&registry).is_empty());
}

#[test]
fn conservation_holds_across_mixed_activity() {
    let (registry, token) = setup();
    let names = ["ada", "ben", "cy", "dee"];
    let users: Vec<Address> = names
        .iter()
        .map(|n| register(&registry, &token, n))
        .collect();
    for (i, user) in users.iter().enumerate() {
        registry
            .create_savings_goal(user, tokens(10 + i as u64), 0)
            .unwrap();
        registry
            .deposit_to_goal(user, tokens(3 + i as u64), false)
            .unwrap();
    }
    let pool_id = registry
        .create_group_pool(
            &users[0],
            NewPool {
                name: "Co-op".into(),
                description: String::new(),
                target_amount: tokens(50),
                max_members: 3,
                lock_duration: 0,
            },
        )
        .unwrap();
    for (i, user) in users.iter().enumerate().skip(1) {
        registry
            .join_group_pool(
                user,
                pool_id,
                JoinRequest {
                    contribution_amount: tokens(7),
                    allow_partial: false,
                    referrer: Some(users[i - 1].clone()),
                },
            )
            .unwrap();
    }
    let err = registry
        .join_group_pool(
            &users[0],
            pool_id,
            JoinRequest {
                contribution_amount: tokens(1),
                ..JoinRequest::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capacity);

    let stats = registry.get_stats();
    assert_eq!(stats.total_users, 4);
    assert_eq!(stats.total_goals, 4);
    assert_eq!(stats.total_pools, 1);
    assert_eq!(stats.referral_payouts, 3 * (tokens(7) / 100));
    assert!(audit(&registry).is_empty(), "{:?}", audit(&registry));
}
