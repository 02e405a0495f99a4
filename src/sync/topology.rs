//! Network topology tracking for ban propagation.
//!
//! Tracks the spanning tree of known servers so a ban addressed to a
//! server mask can be sent only down the links that lead to a matching
//! server.

use crate::security::wildcard_match;
use std::collections::{HashMap, HashSet};

/// Information about a server in the network.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Human-readable server name.
    pub name: String,
    /// Number of hops from this server.
    pub hopcount: u32,
    /// Name of the server that introduced this one (its uplink in the
    /// spanning tree). `None` is reserved for our own local server entry.
    pub via: Option<String>,
}

/// Tracks the network topology as a spanning tree, keyed by lowercased
/// server name.
#[derive(Debug, Clone)]
pub struct TopologyGraph {
    local: String,
    servers: HashMap<String, ServerInfo>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl TopologyGraph {
    /// Create a graph holding only the local server.
    pub fn new(local_name: &str) -> Self {
        let mut servers = HashMap::new();
        servers.insert(
            key(local_name),
            ServerInfo {
                name: local_name.to_string(),
                hopcount: 0,
                via: None,
            },
        );
        Self {
            local: key(local_name),
            servers,
        }
    }

    pub fn local_name(&self) -> &str {
        self.servers
            .get(&self.local)
            .map(|info| info.name.as_str())
            .unwrap_or(&self.local)
    }

    /// Register a server introduced by `via`.
    pub fn add_server(&mut self, name: &str, hopcount: u32, via: &str) {
        self.servers.insert(
            key(name),
            ServerInfo {
                name: name.to_string(),
                hopcount,
                via: Some(key(via)),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&ServerInfo> {
        self.servers.get(&key(name))
    }

    /// Get the uplink of a server.
    pub fn get_route(&self, name: &str) -> Option<&str> {
        self.servers.get(&key(name)).and_then(|info| info.via.as_deref())
    }

    /// The directly connected peer through which `name` is reached.
    pub fn link_of(&self, name: &str) -> Option<&str> {
        let mut current = key(name);
        // Bounded by the number of servers in case of a malformed tree
        for _ in 0..=self.servers.len() {
            let info = self.servers.get(&current)?;
            match &info.via {
                None => return None,
                Some(via) if *via == self.local => return Some(info.name.as_str()),
                Some(via) => current = via.clone(),
            }
        }
        None
    }

    /// All servers at or below `name` in the tree, `name` first.
    pub fn get_downstream(&self, name: &str) -> Vec<&ServerInfo> {
        let mut result = Vec::new();
        let mut to_process = vec![key(name)];
        let mut processed = HashSet::new();

        while let Some(current) = to_process.pop() {
            if !processed.insert(current.clone()) {
                continue;
            }
            if let Some(info) = self.servers.get(&current) {
                result.push(info);
            }

            // Find all servers that route through 'current'
            for (k, info) in &self.servers {
                if info.via.as_deref() == Some(current.as_str()) && !processed.contains(k) {
                    to_process.push(k.clone());
                }
            }
        }

        result
    }

    /// Does any server reached through `link` match the mask?
    pub fn subtree_matches(&self, link: &str, mask: &str) -> bool {
        self.get_downstream(link)
            .iter()
            .any(|info| wildcard_match(mask, &info.name))
    }

    /// Remove a server and everything behind it. Returns the names removed.
    pub fn remove_subtree(&mut self, name: &str) -> Vec<String> {
        if key(name) == self.local {
            return Vec::new();
        }
        let removed: Vec<String> = self
            .get_downstream(name)
            .iter()
            .filter(|info| info.via.is_some())
            .map(|info| info.name.clone())
            .collect();
        for name in &removed {
            self.servers.remove(&key(name));
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
