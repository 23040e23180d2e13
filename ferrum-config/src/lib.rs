use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub public_host: String,
    pub private_host: String,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl NodeConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub accounts_path: String,
    pub data_path: String,
    pub beneficiary: String,
    pub origin_peers: String,
}

impl StateConfig {
    pub fn origin_peers(&self) -> Vec<String> {
        self.origin_peers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FerrumConfig {
    pub node: NodeConfig,
    pub state: StateConfig,
}

/// Maps each spec-mandated env var (spec.md §6) to the nested config key it
/// overrides. A generic `Environment::with_prefix(..).separator(..)` source
/// can't express this table: several leaf field names (`public_host`,
/// `read_timeout_secs`, `accounts_path`, ...) contain underscores themselves,
/// so splitting the var name on `_` can't tell a section boundary from a
/// field-name boundary. Binding each var explicitly sidesteps that ambiguity
/// entirely.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("NODE_NODE_PUBLIC_HOST", "node.public_host"),
    ("NODE_NODE_PRIVATE_HOST", "node.private_host"),
    ("NODE_NODE_READ_TIMEOUT", "node.read_timeout_secs"),
    ("NODE_NODE_WRITE_TIMEOUT", "node.write_timeout_secs"),
    ("NODE_NODE_IDLE_TIMEOUT", "node.idle_timeout_secs"),
    ("NODE_NODE_SHUTDOWN_TIMEOUT", "node.shutdown_timeout_secs"),
    ("NODE_STATE_ACCOUNTS_PATH", "state.accounts_path"),
    ("NODE_STATE_DATA_PATH", "state.data_path"),
    ("NODE_STATE_BENEFICIARY", "state.beneficiary"),
    ("NODE_STATE_ORIGIN_PEERS", "state.origin_peers"),
];

impl FerrumConfig {
    /// Builds config from [`Self::default`], then overrides it with whichever
    /// of the spec's named environment variables are set (spec.md §6:
    /// `NODE_NODE_PUBLIC_HOST`, `NODE_STATE_ACCOUNTS_PATH`, etc).
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&defaults)?);

        for (env_name, key) in ENV_OVERRIDES {
            if let Ok(value) = std::env::var(env_name) {
                builder = builder.set_override(*key, value)?;
            }
        }

        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn example() -> Self {
        Self::default()
    }
}

impl Default for FerrumConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                public_host: "0.0.0.0:3000".into(),
                private_host: "0.0.0.0:4000".into(),
                read_timeout_secs: 5,
                write_timeout_secs: 5,
                idle_timeout_secs: 5,
                shutdown_timeout_secs: 5,
            },
            state: StateConfig {
                accounts_path: "data/accounts".into(),
                data_path: "data/miner".into(),
                beneficiary: "test".into(),
                origin_peers: "0.0.0.0:4000".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = FerrumConfig::default();
        assert_eq!(cfg.node.public_host, "0.0.0.0:3000");
        assert_eq!(cfg.node.private_host, "0.0.0.0:4000");
        assert_eq!(cfg.node.read_timeout_secs, 5);
        assert_eq!(cfg.state.accounts_path, "data/accounts");
        assert_eq!(cfg.state.data_path, "data/miner");
        assert_eq!(cfg.state.beneficiary, "test");
    }

    #[test]
    fn origin_peers_splits_on_comma_and_trims() {
        let state = StateConfig {
            accounts_path: "x".into(),
            data_path: "y".into(),
            beneficiary: "test".into(),
            origin_peers: "0.0.0.0:4000, 10.0.0.2:4000 ,".into(),
        };
        assert_eq!(state.origin_peers(), vec!["0.0.0.0:4000", "10.0.0.2:4000"]);
    }

    #[test]
    fn single_default_origin_peer() {
        let cfg = FerrumConfig::default();
        assert_eq!(cfg.state.origin_peers(), vec!["0.0.0.0:4000"]);
    }

    /// Regression test for the env-var binding: every var here has a
    /// multi-word leaf field name (`public_host`, `read_timeout_secs`,
    /// `accounts_path`, `origin_peers`), which is exactly the shape that
    /// broke a naive separator-split env source.
    #[test]
    fn load_applies_multi_word_env_overrides() {
        std::env::set_var("NODE_NODE_PUBLIC_HOST", "127.0.0.1:9000");
        std::env::set_var("NODE_NODE_READ_TIMEOUT", "42");
        std::env::set_var("NODE_STATE_ACCOUNTS_PATH", "/tmp/ferrum-accounts");
        std::env::set_var("NODE_STATE_ORIGIN_PEERS", "1.2.3.4:4000,5.6.7.8:4000");

        let cfg = FerrumConfig::load().unwrap();

        std::env::remove_var("NODE_NODE_PUBLIC_HOST");
        std::env::remove_var("NODE_NODE_READ_TIMEOUT");
        std::env::remove_var("NODE_STATE_ACCOUNTS_PATH");
        std::env::remove_var("NODE_STATE_ORIGIN_PEERS");

        assert_eq!(cfg.node.public_host, "127.0.0.1:9000");
        assert_eq!(cfg.node.read_timeout_secs, 42);
        assert_eq!(cfg.state.accounts_path, "/tmp/ferrum-accounts");
        assert_eq!(cfg.state.origin_peers(), vec!["1.2.3.4:4000", "5.6.7.8:4000"]);
        // untouched vars keep their defaults
        assert_eq!(cfg.node.private_host, "0.0.0.0:4000");
        assert_eq!(cfg.state.beneficiary, "test");
    }
}
