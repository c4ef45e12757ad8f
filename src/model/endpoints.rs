//! Config-server endpoint sets and their relation wire format.
//!
//! The config-server side publishes its replica set as a single string,
//! `<replset>/<host:port>,<host:port>,...`. We parse that into an explicit
//! endpoint set with a canonical ordering so that equality of endpoint sets,
//! and therefore the decision to restart the router, never depends on the
//! order the counterpart happened to list its hosts in.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::event::RelationName;

/// One routable config-server member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigServerEndpoint {
    /// Ordering weight, lower first. The wire format today carries no
    /// priorities so parsed endpoints all get the default of zero.
    #[serde(default)]
    pub priority: u8,
    /// Stable identifier, `host:port`.
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl ConfigServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            priority: 0,
            id: format!("{}:{}", host, port),
            host,
            port,
        }
    }
}

/// A named replica set plus its canonical endpoint set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetUri {
    pub replica_set: String,
    pub endpoints: Vec<ConfigServerEndpoint>,
}

impl ReplicaSetUri {
    pub fn new(replica_set: impl Into<String>, endpoints: Vec<ConfigServerEndpoint>) -> Self {
        let mut uri = Self {
            replica_set: replica_set.into(),
            endpoints,
        };
        uri.canonicalize();
        uri
    }

    /// Parse the wire form published by the config-server application.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::RelationDataInvalid {
            relation: RelationName::Cluster.as_str().to_string(),
            reason: reason.to_string(),
        };

        let (replica_set, host_list) = raw
            .split_once('/')
            .ok_or_else(|| invalid("expected <replset>/<host:port,...>"))?;
        if replica_set.is_empty() {
            return Err(invalid("empty replica set name"));
        }

        let mut endpoints = Vec::new();
        for entry in host_list.split(',').filter(|e| !e.is_empty()) {
            // rsplit keeps bracketed IPv6 hosts intact, e.g. [::1]:27018
            let (host, port) = entry
                .rsplit_once(':')
                .ok_or_else(|| invalid("endpoint missing port"))?;
            if host.is_empty() {
                return Err(invalid("endpoint missing host"));
            }
            let port: u16 = port
                .parse()
                .map_err(|_| invalid("endpoint port is not a number"))?;
            if port == 0 {
                return Err(invalid("endpoint port out of range"));
            }
            endpoints.push(ConfigServerEndpoint::new(host, port));
        }

        Ok(Self::new(replica_set, endpoints))
    }

    /// Serialize back to the wire form, hosts in canonical order.
    pub fn connection_string(&self) -> String {
        let hosts: Vec<&str> = self.endpoints.iter().map(|e| e.id.as_str()).collect();
        format!("{}/{}", self.replica_set, hosts.join(","))
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn canonicalize(&mut self) {
        self.endpoints
            .sort_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)));
        let mut seen = std::collections::HashSet::new();
        self.endpoints.retain(|e| seen.insert(e.id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multi_host() {
        let uri = ReplicaSetUri::parse("config-server-db/cfg1:27017,cfg0:27017").unwrap();
        assert_eq!(uri.replica_set, "config-server-db");
        assert_eq!(uri.endpoints.len(), 2);
        // canonical order sorts by id
        assert_eq!(uri.endpoints[0].id, "cfg0:27017");
        assert_eq!(uri.endpoints[1].id, "cfg1:27017");
    }

    #[test]
    fn test_parse_single_host() {
        let uri = ReplicaSetUri::parse("config-server-db/cfg0:27017").unwrap();
        assert_eq!(uri.connection_string(), "config-server-db/cfg0:27017");
        assert!(!uri.is_empty());
    }

    #[test]
    fn test_duplicate_hosts_collapse() {
        let uri =
            ReplicaSetUri::parse("rs0/cfg0:27017,cfg0:27017,cfg1:27017").unwrap();
        assert_eq!(uri.endpoints.len(), 2);
    }

    #[test]
    fn test_connection_string_is_order_insensitive() {
        let a = ReplicaSetUri::parse("rs0/b:27017,a:27017").unwrap();
        let b = ReplicaSetUri::parse("rs0/a:27017,b:27017").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.connection_string(), "rs0/a:27017,b:27017");
    }

    #[test]
    fn test_bracketed_ipv6_host() {
        let uri = ReplicaSetUri::parse("rs0/[::1]:27018").unwrap();
        assert_eq!(uri.endpoints[0].host, "[::1]");
        assert_eq!(uri.endpoints[0].port, 27018);
    }

    #[test]
    fn test_empty_host_list_parses_to_empty_set() {
        let uri = ReplicaSetUri::parse("rs0/").unwrap();
        assert!(uri.is_empty());
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        assert!(ReplicaSetUri::parse("no-separator").is_err());
        assert!(ReplicaSetUri::parse("/cfg0:27017").is_err());
        assert!(ReplicaSetUri::parse("rs0/cfg0").is_err());
        assert!(ReplicaSetUri::parse("rs0/cfg0:notaport").is_err());
        assert!(ReplicaSetUri::parse("rs0/cfg0:0").is_err());
        assert!(ReplicaSetUri::parse("rs0/:27017").is_err());
    }

    #[test]
    fn test_priority_orders_before_id() {
        let mut low = ConfigServerEndpoint::new("zzz", 27017);
        low.priority = 0;
        let mut high = ConfigServerEndpoint::new("aaa", 27017);
        high.priority = 1;
        let uri = ReplicaSetUri::new("rs0", vec![high, low]);
        assert_eq!(uri.endpoints[0].id, "zzz:27017");
    }
}
