use std::sync::Arc;

use solana_pubkey::Pubkey;
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainError, Commitment, SolanaAdapter};
use crate::db::{NeonBlockRecord, NeonDb};
use crate::indexer::decoder::decode_sol_tx;
use crate::indexer::neon_block::{IndexerArena, tx_record};

/// One historical slot window owned by one reindex worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexRange {
    pub start_slot: u64,
    pub stop_slot: u64,
    pub reindex_ident: String,
}

/// Plans the historical ranges to (re)index between `reindex_start_slot`
/// and `start_slot`.
///
/// Existing ranges are kept; uncovered stretches become new ranges of about
/// `range_len` slots. Ranges closer to each other than one `range_len` are
/// merged, and the total count is capped at `max_range_cnt`, oldest first.
pub fn plan_range_list(
    reindex_start_slot: u64,
    start_slot: u64,
    existing_list: &[(u64, u64, String)],
    range_len: u64,
    max_range_cnt: usize,
) -> Vec<ReindexRange> {
    let range_len = range_len.max(1);

    // merge historical ranges that sit closer than one range length
    let mut existing: Vec<(u64, u64)> = existing_list
        .iter()
        .map(|(start, stop, _)| (*start, *stop))
        .collect();
    existing.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(existing.len());
    for (start, stop) in existing {
        match merged.last_mut() {
            Some((_, last_stop)) if start <= *last_stop + range_len => {
                *last_stop = (*last_stop).max(stop);
            }
            _ => merged.push((start, stop)),
        }
    }

    // chop the uncovered stretch into fresh ranges, one worker each
    let mut span_list = merged.clone();
    let mut new_cnt = 0usize;
    let mut cursor = reindex_start_slot;
    while cursor < start_slot && new_cnt < max_range_cnt {
        let stop = (cursor + range_len).min(start_slot);
        if !merged
            .iter()
            .any(|(start, existing_stop)| cursor >= *start && stop <= *existing_stop)
        {
            span_list.push((cursor, stop));
            new_cnt += 1;
        }
        cursor = stop;
    }
    span_list.sort_unstable();
    span_list.dedup();
    span_list.truncate(max_range_cnt);

    span_list
        .into_iter()
        .map(|(start_slot, stop_slot)| ReindexRange {
            start_slot,
            stop_slot,
            reindex_ident: format!("reindex-{start_slot}-{stop_slot}"),
        })
        .collect()
}

/// Walks one finalized historical range and persists what it reconstructs.
/// Rows are keyed by the range's ident so concurrent workers stay disjoint.
pub async fn run_reindex_worker(
    adapter: SolanaAdapter,
    db: Arc<dyn NeonDb>,
    program_id: Pubkey,
    range: ReindexRange,
    cancel: CancellationToken,
) {
    tracing::info!(
        ident = %range.reindex_ident,
        start = range.start_slot,
        stop = range.stop_slot,
        "reindex worker started"
    );
    if let Err(e) = db
        .put_reindex_range(range.start_slot, range.stop_slot, &range.reindex_ident)
        .await
    {
        tracing::error!(ident = %range.reindex_ident, error = %e, "range registration failed");
        return;
    }

    let mut arena = IndexerArena::new();
    let mut block_slot = range.start_slot;
    while block_slot <= range.stop_slot {
        if cancel.is_cancelled() {
            tracing::info!(ident = %range.reindex_ident, "reindex worker cancelled");
            return;
        }
        match index_one_block(&adapter, &db, &program_id, &mut arena, block_slot).await {
            Ok(()) => block_slot += 1,
            Err(ChainError::HistoryNotFound {
                first_available_slot,
            }) => {
                // nothing to recover below the node's history floor
                block_slot = first_available_slot.max(block_slot + 1);
            }
            Err(e) => {
                tracing::warn!(ident = %range.reindex_ident, slot = block_slot, error = %e, "reindex block failed");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }

    if let Err(e) = db.drop_reindex_range(&range.reindex_ident).await {
        tracing::warn!(ident = %range.reindex_ident, error = %e, "range cleanup failed");
    }
    tracing::info!(ident = %range.reindex_ident, "reindex worker finished");
}

async fn index_one_block(
    adapter: &SolanaAdapter,
    db: &Arc<dyn NeonDb>,
    program_id: &Pubkey,
    arena: &mut IndexerArena,
    block_slot: u64,
) -> Result<(), ChainError> {
    let block = adapter.get_block_info(block_slot, Commitment::Finalized).await?;
    if block.is_empty() {
        return Ok(());
    }
    for encoded in &block.tx_list {
        decode_sol_tx(arena, program_id, block_slot, encoded);
    }
    let completed = arena.drain_completed();
    if completed.is_empty() {
        return Ok(());
    }
    let record = NeonBlockRecord {
        block_slot,
        block_hash: block.block_hash.clone(),
        parent_block_hash: block.parent_block_hash.clone(),
        parent_block_slot: block.parent_block_slot,
        block_time: block.block_time,
        is_finalized: true,
        tx_list: completed
            .iter()
            .enumerate()
            .map(|(tx_idx, indexed)| tx_record(indexed, block_slot, tx_idx as u32))
            .collect(),
    };
    db.append_block_batch(std::slice::from_ref(&record), block_slot)
        .await
        .map_err(|e| ChainError::Rpc(e.to_string()))?;
    db.finalize_block_list(block_slot, block_slot, &[block_slot])
        .await
        .map_err(|e| ChainError::Rpc(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_ranges_of_the_requested_length() {
        let ranges = plan_range_list(0, 2_500, &[], 1_000, 16);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].start_slot, 0);
        assert_eq!(ranges[0].stop_slot, 1_000);
        assert_eq!(ranges[2].stop_slot, 2_500);
    }

    #[test]
    fn close_existing_ranges_are_merged() {
        let existing = vec![
            (0u64, 4_000u64, "a".to_string()),
            (4_500u64, 6_000u64, "b".to_string()),
        ];
        let ranges = plan_range_list(0, 6_000, &existing, 5_000, 16);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start_slot, 0);
        assert_eq!(ranges[0].stop_slot, 6_000);
    }

    #[test]
    fn range_cnt_is_capped_oldest_first() {
        let ranges = plan_range_list(0, 1_000_000, &[], 10, 3);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].start_slot, 0);
    }

    #[test]
    fn covered_spans_are_not_replanned() {
        let existing = vec![(0u64, 500_000u64, "old".to_string())];
        let ranges = plan_range_list(0, 500_000, &existing, 100_000, 16);
        // everything is covered; the plan is the existing span alone
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start_slot, 0);
        assert_eq!(ranges[0].stop_slot, 500_000);
    }
}
