//! Graph node identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Retrieve,
    Route,
    Plan,
    GenerateSql,
    ExecuteSql,
    Synthesize,
    Repair,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::Retrieve => "retrieve",
            NodeId::Route => "route",
            NodeId::Plan => "plan",
            NodeId::GenerateSql => "generate_sql",
            NodeId::ExecuteSql => "execute_sql",
            NodeId::Synthesize => "synthesize",
            NodeId::Repair => "repair",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
