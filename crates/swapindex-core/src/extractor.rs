//! Swap extraction: turns raw block results into ordered `SwapEvent`s.
//!
//! Extraction is pure: the same `BlockResults` always yields the same events
//! in the same order, which is what makes re-scans idempotent.

use crate::error::IndexerError;
use crate::types::{attr, AbciEvent, BlockResults, Coin, SwapEvent, TOKEN_SWAPPED};

/// Extract every `token_swapped` event of `block`, ordered by
/// `(tx_index, event_index)`.
///
/// Failed transactions (non-zero code) are skipped: their state changes were
/// reverted so no swap happened. A malformed required attribute fails the
/// whole block; an unreadable `tokens_out` is logged and stored as `None`.
pub fn extract(height: u64, block: &BlockResults) -> Result<Vec<SwapEvent>, IndexerError> {
    let mut swaps = Vec::new();
    for (tx_index, tx) in block.txs.iter().enumerate() {
        if tx.code != 0 {
            continue;
        }
        for (event_index, event) in tx.events.iter().enumerate() {
            if event.kind != TOKEN_SWAPPED {
                continue;
            }
            let pos = Position {
                height,
                tx_index: tx_index as u32,
                event_index: event_index as u32,
            };
            let mut swap = decode_swap(&pos, event)?;
            swap.block_time = block.timestamp;
            swaps.push(swap);
        }
    }
    Ok(swaps)
}

struct Position {
    height: u64,
    tx_index: u32,
    event_index: u32,
}

impl Position {
    fn malformed(&self, reason: impl Into<String>) -> IndexerError {
        IndexerError::MalformedEvent {
            height: self.height,
            tx_index: self.tx_index,
            event_index: self.event_index,
            reason: reason.into(),
        }
    }
}

fn decode_swap(pos: &Position, event: &AbciEvent) -> Result<SwapEvent, IndexerError> {
    let tokens_in = required(pos, event, attr::TOKENS_IN)?;
    let token_in = Coin::parse(tokens_in)
        .map_err(|e| pos.malformed(format!("attribute '{}': {e}", attr::TOKENS_IN)))?;

    let pool_id = required(pos, event, attr::POOL_ID)?;
    let pool_id = pool_id.trim().parse::<u64>().map_err(|e| {
        pos.malformed(format!(
            "attribute '{}' = '{pool_id}' is not a pool id: {e}",
            attr::POOL_ID
        ))
    })?;

    let sender = required(pos, event, attr::SENDER)?.trim();
    if sender.is_empty() {
        return Err(pos.malformed(format!("attribute '{}' is empty", attr::SENDER)));
    }

    let token_out = match optional(pos, event, attr::TOKENS_OUT) {
        Ok(None) => None,
        Ok(Some(raw)) => match Coin::parse(raw) {
            Ok(coin) => Some(coin),
            Err(e) => {
                tracing::warn!(
                    height = pos.height,
                    tx_index = pos.tx_index,
                    event_index = pos.event_index,
                    value = raw,
                    error = %e,
                    "unreadable tokens_out, storing none"
                );
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "ignoring tokens_out");
            None
        }
    };

    Ok(SwapEvent {
        height: pos.height,
        tx_index: pos.tx_index,
        event_index: pos.event_index,
        pool_id,
        sender: sender.to_string(),
        token_in,
        token_out,
        usd_value: None,
        block_time: None,
    })
}

fn required<'a>(pos: &Position, event: &'a AbciEvent, key: &str) -> Result<&'a str, IndexerError> {
    optional(pos, event, key)?
        .ok_or_else(|| pos.malformed(format!("missing attribute '{key}'")))
}

fn optional<'a>(
    pos: &Position,
    event: &'a AbciEvent,
    key: &str,
) -> Result<Option<&'a str>, IndexerError> {
    match event.values(key).as_slice() {
        [] => Ok(None),
        [value] => Ok(Some(*value)),
        _ => Err(pos.malformed(format!("duplicate attribute '{key}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxResult;
    use num_bigint::BigUint;

    fn swap_event(pool: &str, tokens_in: &str) -> AbciEvent {
        AbciEvent::new(TOKEN_SWAPPED)
            .with_attr("module", "gamm")
            .with_attr(attr::SENDER, "osmo1qyqszqgpqyqszqgpqyqszqgpqyqszqgp")
            .with_attr(attr::POOL_ID, pool)
            .with_attr(attr::TOKENS_IN, tokens_in)
            .with_attr(attr::TOKENS_OUT, "1230uion")
    }

    fn block(txs: Vec<TxResult>) -> BlockResults {
        BlockResults {
            height: 17777010,
            timestamp: None,
            txs,
        }
    }

    #[test]
    fn extracts_in_chain_order() {
        let b = block(vec![
            TxResult::ok(vec![
                AbciEvent::new("message").with_attr("action", "swap"),
                swap_event("1", "100uosmo"),
                AbciEvent::new("transfer"),
                swap_event("2", "200uion"),
            ]),
            TxResult::ok(vec![swap_event("1135", "1000000uosmo")]),
        ]);
        let swaps = extract(17777010, &b).unwrap();
        let keys: Vec<_> = swaps.iter().map(|s| (s.tx_index, s.event_index)).collect();
        assert_eq!(keys, vec![(0, 1), (0, 3), (1, 0)]);
        assert_eq!(swaps[2].pool_id, 1135);
        assert_eq!(swaps[2].token_in.amount, BigUint::from(1_000_000u32));
        assert_eq!(swaps[0].token_out.as_ref().unwrap().denom, "uion");
        assert!(swaps.iter().all(|s| s.usd_value.is_none()));
    }

    #[test]
    fn empty_block_has_no_swaps() {
        assert!(extract(5, &block(vec![])).unwrap().is_empty());
        let no_swaps = block(vec![TxResult::ok(vec![AbciEvent::new("transfer")])]);
        assert!(extract(5, &no_swaps).unwrap().is_empty());
    }

    #[test]
    fn failed_txs_are_skipped() {
        let b = block(vec![
            TxResult {
                code: 7,
                events: vec![swap_event("1", "5uosmo")],
            },
            TxResult::ok(vec![swap_event("2", "6uosmo")]),
        ]);
        let swaps = extract(1, &b).unwrap();
        assert_eq!(swaps.len(), 1);
        assert_eq!(swaps[0].tx_index, 1);
    }

    #[test]
    fn missing_tokens_out_is_fine() {
        let ev = AbciEvent::new(TOKEN_SWAPPED)
            .with_attr(attr::SENDER, "osmo1abc")
            .with_attr(attr::POOL_ID, "3")
            .with_attr(attr::TOKENS_IN, "9uosmo");
        let swaps = extract(1, &block(vec![TxResult::ok(vec![ev])])).unwrap();
        assert!(swaps[0].token_out.is_none());
    }

    #[test]
    fn unreadable_tokens_out_is_dropped() {
        let garbled = AbciEvent::new(TOKEN_SWAPPED)
            .with_attr(attr::SENDER, "osmo1abc")
            .with_attr(attr::POOL_ID, "3")
            .with_attr(attr::TOKENS_IN, "9uosmo")
            .with_attr(attr::TOKENS_OUT, "lots of uion");
        let doubled = swap_event("4", "10uosmo").with_attr(attr::TOKENS_OUT, "5uion");
        let b = block(vec![TxResult::ok(vec![garbled, doubled])]);

        let swaps = extract(1, &b).unwrap();
        assert_eq!(swaps.len(), 2);
        assert!(swaps.iter().all(|s| s.token_out.is_none()));
        assert_eq!(swaps[0].token_in.amount, BigUint::from(9u32));
    }

    #[test]
    fn missing_pool_id_is_malformed() {
        let ev = AbciEvent::new(TOKEN_SWAPPED)
            .with_attr(attr::SENDER, "osmo1abc")
            .with_attr(attr::TOKENS_IN, "9uosmo");
        let b = block(vec![TxResult::ok(vec![AbciEvent::new("message"), ev])]);
        match extract(42, &b) {
            Err(IndexerError::MalformedEvent {
                height,
                tx_index,
                event_index,
                reason,
            }) => {
                assert_eq!((height, tx_index, event_index), (42, 0, 1));
                assert!(reason.contains("pool_id"));
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn bad_coin_is_malformed() {
        let b = block(vec![TxResult::ok(vec![swap_event("1", "lots-of-osmo")])]);
        assert!(matches!(
            extract(1, &b),
            Err(IndexerError::MalformedEvent { .. })
        ));
    }

    #[test]
    fn duplicate_attribute_is_malformed() {
        let ev = swap_event("1", "5uosmo").with_attr(attr::POOL_ID, "2");
        let err = extract(1, &block(vec![TxResult::ok(vec![ev])])).unwrap_err();
        assert!(err.to_string().contains("duplicate attribute 'pool_id'"));
    }

    #[test]
    fn empty_sender_is_malformed() {
        let ev = AbciEvent::new(TOKEN_SWAPPED)
            .with_attr(attr::SENDER, "  ")
            .with_attr(attr::POOL_ID, "3")
            .with_attr(attr::TOKENS_IN, "9uosmo");
        assert!(extract(1, &block(vec![TxResult::ok(vec![ev])])).is_err());
    }
}
