//! Portal query wire types.
//!
//! A query is `{type, fromBlock, toBlock?, fields, ...filters}`. The
//! streaming core only ever touches `fromBlock`/`toBlock`; the rest is
//! carried verbatim. Each dataset gets an explicit request struct instead of
//! a free-form object so that filter lists can be merged by a known rule:
//! lists concatenate, `includeAllBlocks` ORs, the receiver's field selection wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PortalError;

/// A complete finalized-stream request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_block: Option<u64>,
    #[serde(flatten)]
    pub dataset: DatasetQuery,
}

impl PortalQuery {
    pub fn new(dataset: DatasetQuery) -> Self {
        Self {
            from_block: None,
            to_block: None,
            dataset,
        }
    }

    pub fn evm(request: EvmRequest) -> Self {
        Self::new(DatasetQuery::Evm(request))
    }

    pub fn solana(request: SolanaRequest) -> Self {
        Self::new(DatasetQuery::Solana(request))
    }

    pub fn substrate(request: SubstrateRequest) -> Self {
        Self::new(DatasetQuery::Substrate(request))
    }

    pub fn from_block(mut self, from_block: u64) -> Self {
        self.from_block = Some(from_block);
        self
    }

    pub fn to_block(mut self, to_block: u64) -> Self {
        self.to_block = Some(to_block);
        self
    }

    /// Copy of this query starting at `from_block`; every other field is preserved.
    pub fn at(&self, from_block: u64) -> Self {
        Self {
            from_block: Some(from_block),
            ..self.clone()
        }
    }

    /// First block requested (`0` when unset).
    pub fn first_block(&self) -> u64 {
        self.from_block.unwrap_or(0)
    }

    /// Dataset type tag as sent on the wire.
    pub fn kind(&self) -> &'static str {
        self.dataset.kind()
    }
}

/// Dataset-specific part of a query, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatasetQuery {
    Evm(EvmRequest),
    Solana(SolanaRequest),
    Substrate(SubstrateRequest),
}

impl DatasetQuery {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Evm(_) => "evm",
            Self::Solana(_) => "solana",
            Self::Substrate(_) => "substrate",
        }
    }

    /// Merge the filters of `other` into `self`.
    ///
    /// Fails when the two requests target different dataset kinds.
    pub fn merge(&mut self, other: DatasetQuery) -> Result<(), PortalError> {
        match (self, other) {
            (Self::Evm(a), Self::Evm(b)) => a.merge(b),
            (Self::Solana(a), Self::Solana(b)) => a.merge(b),
            (Self::Substrate(a), Self::Substrate(b)) => a.merge(b),
            (a, b) => {
                return Err(PortalError::Other(format!(
                    "cannot merge {} request into {} request",
                    b.kind(),
                    a.kind()
                )))
            }
        }
        Ok(())
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// EVM data request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmRequest {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub fields: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub include_all_blocks: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_diffs: Vec<Value>,
}

impl EvmRequest {
    pub fn merge(&mut self, other: EvmRequest) {
        self.include_all_blocks |= other.include_all_blocks;
        self.logs.extend(other.logs);
        self.transactions.extend(other.transactions);
        self.traces.extend(other.traces);
        self.state_diffs.extend(other.state_diffs);
    }
}

/// Solana data request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaRequest {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub fields: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub include_all_blocks: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub balances: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub token_balances: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rewards: Vec<Value>,
}

impl SolanaRequest {
    pub fn merge(&mut self, other: SolanaRequest) {
        self.include_all_blocks |= other.include_all_blocks;
        self.transactions.extend(other.transactions);
        self.instructions.extend(other.instructions);
        self.logs.extend(other.logs);
        self.balances.extend(other.balances);
        self.token_balances.extend(other.token_balances);
        self.rewards.extend(other.rewards);
    }
}

/// Substrate data request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstrateRequest {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub fields: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub include_all_blocks: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evm_logs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ethereum_transactions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contracts_events: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gear_messages_queued: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gear_user_messages_sent: Vec<Value>,
}

impl SubstrateRequest {
    pub fn merge(&mut self, other: SubstrateRequest) {
        self.include_all_blocks |= other.include_all_blocks;
        self.events.extend(other.events);
        self.calls.extend(other.calls);
        self.evm_logs.extend(other.evm_logs);
        self.ethereum_transactions.extend(other.ethereum_transactions);
        self.contracts_events.extend(other.contracts_events);
        self.gear_messages_queued.extend(other.gear_messages_queued);
        self.gear_user_messages_sent.extend(other.gear_user_messages_sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn usdc_transfers() -> EvmRequest {
        EvmRequest {
            fields: json!({"block": {"number": true, "hash": true}}),
            logs: vec![json!({"address": ["0xa0b8"], "topic0": ["0xddf2"]})],
            ..Default::default()
        }
    }

    #[test]
    fn serializes_wire_shape() {
        let query = PortalQuery::evm(usdc_transfers()).from_block(100).to_block(200);
        let v = serde_json::to_value(&query).unwrap();
        assert_eq!(v["type"], "evm");
        assert_eq!(v["fromBlock"], 100);
        assert_eq!(v["toBlock"], 200);
        assert_eq!(v["fields"]["block"]["hash"], true);
        assert_eq!(v["logs"][0]["topic0"][0], "0xddf2");
        assert!(v.get("transactions").is_none());
        assert!(v.get("includeAllBlocks").is_none());
    }

    #[test]
    fn open_ended_query_omits_to_block() {
        let v = serde_json::to_value(PortalQuery::solana(SolanaRequest::default())).unwrap();
        assert_eq!(v, json!({"type": "solana"}));
    }

    #[test]
    fn parses_wire_shape() {
        let query: PortalQuery = serde_json::from_value(json!({
            "type": "substrate",
            "fromBlock": 5,
            "fields": {"event": {"name": true}},
            "events": [{"name": ["Balances.Transfer"]}],
        }))
        .unwrap();
        assert_eq!(query.first_block(), 5);
        assert_eq!(query.to_block, None);
        match query.dataset {
            DatasetQuery::Substrate(req) => assert_eq!(req.events.len(), 1),
            other => panic!("unexpected dataset {}", other.kind()),
        }
    }

    #[test]
    fn at_only_moves_from_block() {
        let query = PortalQuery::evm(usdc_transfers()).from_block(1).to_block(9);
        let moved = query.at(5);
        assert_eq!(moved.from_block, Some(5));
        assert_eq!(moved.to_block, Some(9));
        assert_eq!(moved.dataset, query.dataset);
    }

    #[test]
    fn merge_concatenates_filters() {
        let mut a = DatasetQuery::Evm(usdc_transfers());
        let b = DatasetQuery::Evm(EvmRequest {
            fields: json!({"log": {"data": true}}),
            include_all_blocks: true,
            logs: vec![json!({"address": ["0xdac1"]})],
            transactions: vec![json!({"to": ["0xdac1"]})],
            ..Default::default()
        });
        a.merge(b).unwrap();
        let DatasetQuery::Evm(merged) = a else {
            panic!("kind changed")
        };
        assert_eq!(merged.logs.len(), 2);
        assert_eq!(merged.transactions.len(), 1);
        assert!(merged.include_all_blocks);
        assert_eq!(merged.fields["block"]["number"], true);
    }

    #[test]
    fn merge_rejects_mixed_kinds() {
        let mut a = DatasetQuery::Evm(EvmRequest::default());
        let err = a.merge(DatasetQuery::Solana(SolanaRequest::default())).unwrap_err();
        assert!(err.to_string().contains("solana"));
    }
}
