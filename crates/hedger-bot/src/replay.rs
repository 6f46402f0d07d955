//! Replay file format.
//!
//! One JSON object per line, tagged by `type`:
//!
//! ```text
//! {"type":"book","up_bid":3900,"up_ask":4000,"down_bid":6100,"down_ask":6200}
//! {"type":"decision","direction":"up","entry_price":4000,"entry_size":10,
//!  "hedge_price":5900,"hedge_size":10}
//! {"type":"wait","ms":4000}
//! {"type":"cycle","slug":"btc-updown-30m","up_asset_id":"u2","down_asset_id":"d2"}
//! ```
//!
//! Prices are pips (1/100 of a cent). Blank lines and lines starting with
//! `#` are skipped.

use hedger_core::{Decision, Market, Pips, Size, TokenType, TopOfBook};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    /// New top of book for the current market.
    Book(TopOfBook),

    /// Strategy decision to execute on the current market.
    Decision {
        direction: TokenType,
        entry_price: Pips,
        entry_size: Size,
        hedge_price: Pips,
        hedge_size: Size,
        #[serde(default)]
        reason: String,
    },

    /// Rollover to a new market.
    Cycle(Market),

    /// Let simulated time pass.
    Wait { ms: u64 },
}

impl ReplayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Book(_) => "book",
            Self::Decision { .. } => "decision",
            Self::Cycle(_) => "cycle",
            Self::Wait { .. } => "wait",
        }
    }

    /// The trade decision carried by a `decision` event.
    pub fn to_decision(&self) -> Option<Decision> {
        match self {
            Self::Decision {
                direction,
                entry_price,
                entry_size,
                hedge_price,
                hedge_size,
                reason,
            } => Some(Decision {
                should_trade: true,
                direction: *direction,
                entry_price: *entry_price,
                entry_size: *entry_size,
                hedge_price: *hedge_price,
                hedge_size: *hedge_size,
                reason: if reason.is_empty() {
                    "replay".to_string()
                } else {
                    reason.clone()
                },
            }),
            _ => None,
        }
    }
}

/// Parse one replay line. `line_no` is 1-based and only used in errors.
pub fn parse_line(line: &str, line_no: usize) -> AppResult<Option<ReplayEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| AppError::Replay {
            line: line_no,
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_book() {
        let event = parse_line(
            r#"{"type":"book","up_bid":3900,"up_ask":4000,"down_bid":6100,"down_ask":6200}"#,
            1,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            ReplayEvent::Book(TopOfBook {
                up_bid: Pips::from_cents(39),
                up_ask: Pips::from_cents(40),
                down_bid: Pips::from_cents(61),
                down_ask: Pips::from_cents(62),
            })
        );
    }

    #[test]
    fn test_parse_decision() {
        let event = parse_line(
            r#"{"type":"decision","direction":"down","entry_price":4500,"entry_size":"12.5",
                "hedge_price":5300,"hedge_size":"12.5"}"#,
            3,
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.kind(), "decision");
        let decision = event.to_decision().unwrap();
        assert!(decision.should_trade);
        assert_eq!(decision.direction, TokenType::Down);
        assert_eq!(decision.hedge_token(), TokenType::Up);
        assert_eq!(decision.entry_size, Size::new(dec!(12.5)));
        assert_eq!(decision.total_cost_cents(), 98);
        assert_eq!(decision.reason, "replay");
    }

    #[test]
    fn test_parse_cycle_and_wait() {
        let cycle = parse_line(
            r#"{"type":"cycle","slug":"m2","up_asset_id":"u2","down_asset_id":"d2"}"#,
            1,
        )
        .unwrap()
        .unwrap();
        assert_eq!(cycle, ReplayEvent::Cycle(Market::new("m2", "u2", "d2")));
        assert!(cycle.to_decision().is_none());

        let wait = parse_line(r#"{"type":"wait","ms":1500}"#, 2).unwrap().unwrap();
        assert_eq!(wait, ReplayEvent::Wait { ms: 1500 });
    }

    #[test]
    fn test_blank_and_comment_lines_skipped() {
        assert!(parse_line("", 1).unwrap().is_none());
        assert!(parse_line("   ", 2).unwrap().is_none());
        assert!(parse_line("# warm-up", 3).unwrap().is_none());
    }

    #[test]
    fn test_demo_replay_parses() {
        let events: Vec<ReplayEvent> = include_str!("../../../demos/replay.jsonl")
            .lines()
            .enumerate()
            .filter_map(|(i, line)| parse_line(line, i + 1).unwrap())
            .collect();
        assert_eq!(events.len(), 11);
        assert_eq!(events.iter().filter(|e| e.kind() == "decision").count(), 2);
    }

    #[test]
    fn test_errors_carry_line_number() {
        let err = parse_line(r#"{"type":"teleport"}"#, 7).unwrap_err();
        match err {
            AppError::Replay { line, .. } => assert_eq!(line, 7),
            other => panic!("unexpected error: {other}"),
        }
    }
}
