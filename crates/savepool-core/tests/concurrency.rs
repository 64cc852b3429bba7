use std::sync::Arc;
use std::thread;

use savepool_core::clock::SystemClock;
use savepool_core::config::EngineConfig;
use savepool_core::events::SavingsEvent;
use savepool_core::invariants::audit;
use savepool_core::pools::{JoinRequest, NewPool};
use savepool_core::token::MemoryTokenLedger;
use savepool_core::types::tokens;
use savepool_core::{Address, ErrorKind, Registry};

fn registry_with_users(count: usize) -> (Arc<Registry>, Vec<Address>) {
    let config = EngineConfig::default();
    let token = Arc::new(MemoryTokenLedger::new(config.custody_account.clone()));
    let registry = Arc::new(Registry::new(config, token.clone(), Arc::new(SystemClock)).unwrap());
    let users = (0..count)
        .map(|i| {
            let address = Address::new(format!("u{i}"));
            token.mint(&address, tokens(100)).unwrap();
            token.approve(&address, u128::MAX);
            address
        })
        .collect();
    (registry, users)
}

#[test]
fn concurrent_joins_never_exceed_capacity() {
    let (registry, users) = registry_with_users(16);
    for user in &users {
        registry
            .register_user(user, user.as_str(), registry.registration_fee())
            .unwrap();
    }
    let pool_id = registry
        .create_group_pool(
            &users[0],
            NewPool {
                name: "race".into(),
                description: String::new(),
                target_amount: tokens(1_000),
                max_members: 5,
                lock_duration: 0,
            },
        )
        .unwrap();

    let handles: Vec<_> = users
        .iter()
        .cloned()
        .map(|user| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                registry.join_group_pool(
                    &user,
                    pool_id,
                    JoinRequest {
                        contribution_amount: tokens(10),
                        ..JoinRequest::default()
                    },
                )
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let joined = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(joined, 5);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.kind() == ErrorKind::Capacity));
    let pool = registry.get_pool(pool_id).unwrap();
    assert_eq!(pool.current_members, 5);
    assert_eq!(pool.current_amount, tokens(50));
    assert!(audit(&registry).is_empty());
}

#[test]
fn concurrent_registration_of_one_address_succeeds_once() {
    let (registry, users) = registry_with_users(1);
    let user = users[0].clone();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let user = user.clone();
            thread::spawn(move || {
                registry.register_user(&user, "racer", registry.registration_fee())
            })
        })
        .collect();
    let ok = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(ok, 1);
    assert_eq!(registry.get_stats().total_users, 1);
    assert_eq!(registry.treasury_balance(), registry.registration_fee());
    assert!(audit(&registry).is_empty());
}

#[test]
fn event_log_orders_joins_after_pool_creation() {
    let (registry, users) = registry_with_users(4);
    for user in &users {
        registry
            .register_user(user, user.as_str(), registry.registration_fee())
            .unwrap();
    }
    let pool_id = registry
        .create_group_pool(
            &users[0],
            NewPool {
                name: "order".into(),
                description: String::new(),
                target_amount: tokens(100),
                max_members: 4,
                lock_duration: 0,
            },
        )
        .unwrap();
    thread::scope(|scope| {
        for user in &users {
            let registry = &registry;
            scope.spawn(move || {
                registry
                    .join_group_pool(
                        user,
                        pool_id,
                        JoinRequest {
                            contribution_amount: tokens(5),
                            ..JoinRequest::default()
                        },
                    )
                    .unwrap();
            });
        }
    });

    let records = registry.events().snapshot();
    let created = records
        .iter()
        .position(|r| matches!(r.event, SavingsEvent::PoolCreated { .. }))
        .unwrap();
    let joins: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r.event, SavingsEvent::MemberJoined { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(joins.len(), 4);
    assert!(joins.iter().all(|&i| i > created));
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.seq, i as u64 + 1);
    }
}
