use std::collections::BTreeMap;

use tracing::debug;

use crate::fetch::EdgeBatch;
use crate::model::{BacklinkRow, LinkEdge, RelationFlags};

/// Merge edge batches keyed by page id.
///
/// Batches are applied in [`LinkEdge::ALL`] order whatever order they arrive
/// in. Relationship flags are OR-ed together, so a redirect seen on any edge
/// is never lost. Redirect fragment and origin are last-write-wins in that
/// same fixed order, and only rows that carry a value write them.
pub fn merge_edge_batches(mut batches: Vec<EdgeBatch>) -> Vec<BacklinkRow> {
    batches.sort_by_key(|batch| batch.edge);

    let mut merged: BTreeMap<i64, BacklinkRow> = BTreeMap::new();
    for batch in batches {
        for edge_row in batch.rows {
            let row = merged
                .entry(edge_row.page.id)
                .or_insert_with(|| BacklinkRow::new(edge_row.page.clone()));
            row.flags |= batch.edge.flag();

            let redirect_from = match batch.edge {
                LinkEdge::Redirect => edge_row.redirect_from.or(Some(edge_row.page.id)),
                _ => edge_row.redirect_from,
            };
            if let Some(redirect_from) = redirect_from {
                row.flags |= RelationFlags::REDIRECT;
                row.via_redirect_from = Some(redirect_from);
            }
            if let Some(fragment) = edge_row.redirect_fragment {
                if let Some(previous) = row.redirect_fragment.as_deref()
                    && previous != fragment
                {
                    debug!(
                        page_id = row.page.id,
                        previous,
                        latest = fragment.as_str(),
                        "conflicting redirect fragments"
                    );
                }
                row.redirect_fragment = Some(fragment);
            }
        }
    }

    merged.into_values().collect()
}
