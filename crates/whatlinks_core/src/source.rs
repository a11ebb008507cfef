use crate::context::CancelToken;
use crate::error::BacklinkError;
use crate::model::{EdgeRow, PageIdentity};
use crate::planner::EdgePlan;

/// Read-only access to the link tables.
///
/// Implementations must honor every predicate of the plan, return rows in the
/// plan's order, and return at most `plan.fetch_limit` rows. Scans may run
/// concurrently from several threads.
pub trait BacklinkSource: Sync {
    fn scan(&self, plan: &EdgePlan, cancel: &CancelToken) -> Result<Vec<EdgeRow>, BacklinkError>;

    fn page_by_id(&self, page_id: i64) -> Result<Option<PageIdentity>, BacklinkError>;

    fn page_namespaces(&self) -> Result<Vec<i32>, BacklinkError>;
}

impl<S: BacklinkSource + ?Sized> BacklinkSource for &S {
    fn scan(&self, plan: &EdgePlan, cancel: &CancelToken) -> Result<Vec<EdgeRow>, BacklinkError> {
        (**self).scan(plan, cancel)
    }

    fn page_by_id(&self, page_id: i64) -> Result<Option<PageIdentity>, BacklinkError> {
        (**self).page_by_id(page_id)
    }

    fn page_namespaces(&self) -> Result<Vec<i32>, BacklinkError> {
        (**self).page_namespaces()
    }
}
