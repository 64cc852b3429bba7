use std::sync::Arc;

use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::registry::Registry;
use crate::token::MemoryTokenLedger;
use crate::types::{tokens, Address};

pub(crate) const START: u64 = 1_700_000_000;

pub(crate) struct Harness {
    pub registry: Registry,
    pub token: Arc<MemoryTokenLedger>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub(crate) fn with_config(config: EngineConfig) -> Self {
        let token = Arc::new(MemoryTokenLedger::new(config.custody_account.clone()));
        let clock = Arc::new(ManualClock::new(START));
        let registry = Registry::new(config, token.clone(), clock.clone()).unwrap();
        Self {
            registry,
            token,
            clock,
        }
    }

    /// Mint 1000 tokens, approve the engine and register `name`.
    pub(crate) fn user(&self, name: &str) -> Address {
        let address = Address::from(name);
        self.token.mint(&address, tokens(1_000)).unwrap();
        self.token.approve(&address, u128::MAX);
        self.registry
            .register_user(&address, name, self.registry.registration_fee())
            .unwrap();
        address
    }
}
