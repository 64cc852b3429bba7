use std::collections::BTreeMap;

use savepool_core::goals::SavingsGoal;
use savepool_core::pools::GroupPool;
use savepool_core::stats::Stats;
use savepool_core::token::MemoryTokenLedger;
use savepool_core::{Address, Amount, Registry, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    /// Number of events committed when the snapshot was taken.
    pub height: u64,
    pub timestamp: Timestamp,
}

/// Everything a run leaves behind, plus one hash over all of it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub balances: BTreeMap<Address, Amount>,
    pub treasury: Amount,
    pub stats: Stats,
    pub goals: Vec<SavingsGoal>,
    pub pools: Vec<GroupPool>,
    #[serde(with = "hex_root")]
    pub state_root: [u8; 32],
}

impl LedgerSnapshot {
    pub fn capture(registry: &Registry, token: &MemoryTokenLedger, timestamp: Timestamp) -> Self {
        let balances = token.balances();
        let treasury = registry.treasury_balance();
        let stats = registry.get_stats();
        let goals = registry.goals().all_goals();
        let pools = registry.pools().pools();
        let state_root = compute_state_root(&balances, treasury, &stats, &goals, &pools);
        Self {
            meta: SnapshotMetadata {
                height: registry.events().len() as u64,
                timestamp,
            },
            balances,
            treasury,
            stats,
            goals,
            pools,
            state_root,
        }
    }

    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }
}

fn compute_state_root(
    balances: &BTreeMap<Address, Amount>,
    treasury: Amount,
    stats: &Stats,
    goals: &[SavingsGoal],
    pools: &[GroupPool],
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for (account, amount) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_str().as_bytes());
        hasher.update(amount.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for goal in goals {
        let mut hasher = Sha256::new();
        hasher.update(b"goal");
        hasher.update(goal.id.0.to_le_bytes());
        hasher.update(goal.owner.as_str().as_bytes());
        hasher.update(goal.target_amount.to_le_bytes());
        hasher.update(goal.current_amount.to_le_bytes());
        hasher.update(goal.unlocks_at.to_le_bytes());
        hasher.update([goal.is_active as u8]);
        leaves.push(hasher.finalize().into());
    }
    for pool in pools {
        let mut hasher = Sha256::new();
        hasher.update(b"pool");
        hasher.update(pool.id.0.to_le_bytes());
        hasher.update(pool.creator.as_str().as_bytes());
        hasher.update(pool.target_amount.to_le_bytes());
        hasher.update(pool.current_amount.to_le_bytes());
        hasher.update(pool.max_members.to_le_bytes());
        hasher.update([pool.is_active as u8]);
        for membership in &pool.members {
            hasher.update(membership.member.as_str().as_bytes());
            hasher.update(membership.contribution_amount.to_le_bytes());
            hasher.update(membership.paid_amount.to_le_bytes());
        }
        leaves.push(hasher.finalize().into());
    }

    let mut hasher = Sha256::new();
    hasher.update(b"treasury");
    hasher.update(treasury.to_le_bytes());
    leaves.push(hasher.finalize().into());

    let mut hasher = Sha256::new();
    hasher.update(b"stats");
    hasher.update(stats.total_users.to_le_bytes());
    hasher.update(stats.total_volume.to_le_bytes());
    hasher.update(stats.total_yield.to_le_bytes());
    hasher.update(stats.total_goals.to_le_bytes());
    hasher.update(stats.total_pools.to_le_bytes());
    hasher.update(stats.referral_payouts.to_le_bytes());
    leaves.push(hasher.finalize().into());

    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"savepool-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            // odd leaf pairs with itself
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}
