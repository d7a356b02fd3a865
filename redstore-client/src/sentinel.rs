//! Node discovery through Redis Sentinel.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::{ClientError, ClientResult, NodeAddress, SentinelConfig, SentinelRole};

const UNHEALTHY_FLAGS: [&str; 3] = ["s_down", "o_down", "disconnected"];

/// Ask the sentinels, in order, for the node matching the configured role and
/// return its connection URL (with `nodeClientOptions` credentials applied).
pub(crate) async fn resolve_node(config: &SentinelConfig) -> ClientResult<String> {
    if config.master_name.is_empty() {
        return Err(ClientError::Config("sentinel requires a master name".to_string()));
    }
    if config.root_nodes.is_empty() {
        return Err(ClientError::Config(
            "sentinel requires at least one root node".to_string(),
        ));
    }

    for node in &config.root_nodes {
        let url = node.connection_url(&config.sentinel_client, None)?;
        match query_sentinel(&url, config).await {
            Ok(Some((host, port))) => {
                debug!(
                    sentinel = %node.label(),
                    master = %config.master_name,
                    node = %format!("{}:{}", host, port),
                    "sentinel resolved node"
                );
                return NodeAddress::new(host, port)
                    .connection_url(&config.node_client, config.database);
            }
            Ok(None) => {
                debug!(
                    sentinel = %node.label(),
                    master = %config.master_name,
                    "sentinel has no matching node"
                );
            }
            Err(err) => {
                warn!(sentinel = %node.label(), error = %err, "sentinel query failed");
            }
        }
    }

    Err(ClientError::Sentinel(format!(
        "no sentinel could resolve a {:?} node for '{}'",
        config.role, config.master_name
    )))
}

async fn query_sentinel(
    url: &str,
    config: &SentinelConfig,
) -> ClientResult<Option<(String, u16)>> {
    let client = redis::Client::open(url)?;
    let mut conn = tokio::time::timeout(
        config.settings.connect_timeout,
        client.get_multiplexed_async_connection(),
    )
    .await
    .map_err(|_| ClientError::Timeout)??;

    match config.role {
        SentinelRole::Master => {
            let addr: Option<(String, u16)> = redis::cmd("SENTINEL")
                .arg("get-master-addr-by-name")
                .arg(&config.master_name)
                .query_async(&mut conn)
                .await?;
            Ok(addr)
        }
        SentinelRole::Replica => {
            let replicas: Vec<HashMap<String, String>> = redis::cmd("SENTINEL")
                .arg("replicas")
                .arg(&config.master_name)
                .query_async(&mut conn)
                .await?;
            Ok(pick_replica(&replicas))
        }
    }
}

/// First replica not flagged as down or disconnected.
fn pick_replica(replicas: &[HashMap<String, String>]) -> Option<(String, u16)> {
    replicas
        .iter()
        .filter(|replica| {
            replica.get("flags").is_none_or(|flags| {
                !flags.split(',').any(|flag| UNHEALTHY_FLAGS.contains(&flag))
            })
        })
        .find_map(|replica| {
            let ip = replica.get("ip")?;
            let port = replica.get("port")?.parse().ok()?;
            Some((ip.clone(), port))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(ip: &str, port: &str, flags: &str) -> HashMap<String, String> {
        HashMap::from([
            ("ip".to_string(), ip.to_string()),
            ("port".to_string(), port.to_string()),
            ("flags".to_string(), flags.to_string()),
        ])
    }

    #[test]
    fn test_pick_replica_skips_unhealthy() {
        let replicas = vec![
            replica("10.0.0.2", "6379", "slave,s_down"),
            replica("10.0.0.3", "6379", "slave,disconnected"),
            replica("10.0.0.4", "6380", "slave"),
        ];
        assert_eq!(pick_replica(&replicas), Some(("10.0.0.4".to_string(), 6380)));
    }

    #[test]
    fn test_pick_replica_none_healthy() {
        let replicas = vec![replica("10.0.0.2", "6379", "slave,o_down")];
        assert_eq!(pick_replica(&replicas), None);
    }

    #[tokio::test]
    async fn test_resolve_requires_master_name() {
        let config = SentinelConfig {
            root_nodes: vec![NodeAddress::new("localhost", 26379)],
            ..Default::default()
        };
        assert!(matches!(resolve_node(&config).await, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_resolve_requires_root_nodes() {
        let config = SentinelConfig {
            master_name: "mymaster".to_string(),
            ..Default::default()
        };
        assert!(matches!(resolve_node(&config).await, Err(ClientError::Config(_))));
    }
}
