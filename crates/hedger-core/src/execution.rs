//! Execution-level request types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::MarketSlug;
use crate::order::OrderRequest;

/// How entry and hedge legs are submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Entry first, hedge once the entry fill is confirmed.
    #[default]
    Sequential,
    /// Entry and hedge submitted together as one multi-leg request.
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// Several legs submitted in one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiLegRequest {
    pub name: String,
    pub market: MarketSlug,
    pub legs: Vec<OrderRequest>,
}
