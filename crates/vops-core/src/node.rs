//! Node state as reported by the HTTPS `nodes` endpoints.

use serde::{Deserialize, Serialize};

/// Sandbox name of the main cluster.
pub const MAIN_CLUSTER_SANDBOX: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeState {
    Up,
    Down,
    Compute,
    Unknown,
    #[serde(other)]
    Other,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Compute => "COMPUTE",
            Self::Unknown => "UNKNOWN",
            Self::Other => "OTHER",
        }
    }
}

/// One entry of a `node_list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateInfo {
    pub name: String,
    pub address: String,
    pub state: NodeState,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub catalog_path: String,
    #[serde(default)]
    pub subcluster_name: String,
    #[serde(default)]
    pub is_primary: bool,
    /// Empty for the main cluster.
    #[serde(default, rename = "sandbox_name")]
    pub sandbox: String,
    #[serde(default, rename = "build_info")]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodesStateInfo {
    #[serde(default)]
    pub node_list: Vec<NodeStateInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_nodes_response() {
        let raw = r#"{"details":[],"node_list":[
            {"name":"v_db_node0001","node_id":"45035996273704982","address":"192.168.1.101",
             "state":"UP","database":"db","is_primary":true,"subcluster_name":"default_subcluster",
             "build_info":"v24.1.0-abc"},
            {"name":"v_db_node0002","address":"192.168.1.102","state":"RECOVERING","database":"db"}
        ]}"#;
        let info: NodesStateInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.node_list.len(), 2);
        assert_eq!(info.node_list[0].state, NodeState::Up);
        assert!(info.node_list[0].is_primary);
        assert_eq!(info.node_list[0].sandbox, MAIN_CLUSTER_SANDBOX);
        assert_eq!(info.node_list[1].state, NodeState::Other);
    }
}
