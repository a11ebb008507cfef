use rayon::prelude::*;
use tracing::debug;

use crate::context::CancelToken;
use crate::error::BacklinkError;
use crate::model::{EdgeRow, LinkEdge};
use crate::planner::EdgePlan;
use crate::source::BacklinkSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeBatch {
    pub edge: LinkEdge,
    pub rows: Vec<EdgeRow>,
}

/// Run every plan against the source in parallel.
///
/// All scans must succeed; the first failure aborts the request. If the
/// token fired while scans were in flight the result is a single
/// [`BacklinkError::Cancelled`], whatever the individual scans reported.
pub fn fetch_edges<S>(
    source: &S,
    plans: &[EdgePlan],
    cancel: &CancelToken,
) -> Result<Vec<EdgeBatch>, BacklinkError>
where
    S: BacklinkSource + ?Sized,
{
    cancel.check()?;

    let result = plans
        .par_iter()
        .map(|plan| {
            cancel.check()?;
            let mut rows = source.scan(plan, cancel)?;
            if rows.len() > plan.fetch_limit {
                debug!(
                    edge = %plan.edge,
                    returned = rows.len(),
                    limit = plan.fetch_limit,
                    "source returned more rows than requested"
                );
                rows.truncate(plan.fetch_limit);
            }
            Ok(EdgeBatch {
                edge: plan.edge,
                rows,
            })
        })
        .collect::<Result<Vec<_>, BacklinkError>>();

    match result {
        Err(_) if cancel.is_cancelled() => Err(BacklinkError::Cancelled),
        Err(error) => Err(error),
        Ok(batches) => {
            cancel.check()?;
            Ok(batches)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fetch_edges;
    use crate::context::CancelToken;
    use crate::error::BacklinkError;
    use crate::filter::QueryFilterSet;
    use crate::model::{EdgeRow, LinkEdge, PageIdentity};
    use crate::namespace::{NS_FILE, NS_MAIN, NamespaceTable};
    use crate::planner::plan_queries;
    use crate::source::fixture::MemorySource;

    fn file_target_source() -> (MemorySource, PageIdentity) {
        let mut source = MemorySource::default();
        let target = source.page(NS_FILE, "Logo.png", 5);
        for id in [10, 11] {
            let page = source.page(NS_MAIN, &format!("Page {id}"), id);
            source.link(LinkEdge::PlainLink, &target, EdgeRow::plain(page.clone()));
            source.link(LinkEdge::FileUsage, &target, EdgeRow::plain(page));
        }
        (source, target)
    }

    #[test]
    fn batches_follow_plan_order() {
        let (source, target) = file_target_source();
        let filters = QueryFilterSet::builder(target).build().expect("build");
        let plans = plan_queries(&filters, &NamespaceTable::default(), &[]);

        let batches = fetch_edges(&source, &plans, &CancelToken::new()).expect("fetch");
        let edges: Vec<LinkEdge> = batches.iter().map(|batch| batch.edge).collect();
        assert_eq!(
            edges,
            vec![LinkEdge::PlainLink, LinkEdge::Transclusion, LinkEdge::FileUsage]
        );
        assert_eq!(batches[0].rows.len(), 2);
        assert!(batches[1].rows.is_empty());
    }

    #[test]
    fn failing_edge_aborts_whole_fetch() {
        let (mut source, target) = file_target_source();
        source.fail(LinkEdge::Transclusion);
        let filters = QueryFilterSet::builder(target).build().expect("build");
        let plans = plan_queries(&filters, &NamespaceTable::default(), &[]);

        let error = fetch_edges(&source, &plans, &CancelToken::new()).expect_err("must fail");
        assert!(matches!(
            error,
            BacklinkError::DataSourceUnavailable {
                edge: LinkEdge::Transclusion,
                ..
            }
        ));
    }

    #[test]
    fn cancelled_token_skips_all_scans() {
        let (source, target) = file_target_source();
        let filters = QueryFilterSet::builder(target).build().expect("build");
        let plans = plan_queries(&filters, &NamespaceTable::default(), &[]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let error = fetch_edges(&source, &plans, &cancel).expect_err("must cancel");
        assert!(error.is_cancelled());
        assert!(source.scans.lock().expect("scan log").is_empty());
    }
}
