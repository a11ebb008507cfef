//! Turns a [`QueryFilterSet`] into one scan plan per edge table.
//!
//! Paging boundaries are asymmetric: a NEXT cursor names the first row of the
//! page it opens (`>=`), a PREV cursor names the first row of the page it came
//! from (`<`). Both are derived by the pager so that paging forward and back
//! returns the same rows.

use crate::cursor::PageCursor;
use crate::filter::{Direction, NamespaceFilter, QueryFilterSet};
use crate::model::{LinkEdge, PageIdentity};
use crate::namespace::NamespaceTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceSelection {
    All,
    Only(i32),
    /// Inverted filter spelled out as an explicit list so the store can use
    /// its `(target, from_namespace, from)` index.
    AnyOf(Vec<i32>),
}

impl NamespaceSelection {
    pub fn admits(&self, namespace: i32) -> bool {
        match self {
            Self::All => true,
            Self::Only(only) => *only == namespace,
            Self::AnyOf(list) => list.contains(&namespace),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    AtOrAfter(PageCursor),
    Before(PageCursor),
}

impl Boundary {
    pub fn admits(self, key: (i32, i64)) -> bool {
        match self {
            Self::AtOrAfter(cursor) => key >= cursor.key(),
            Self::Before(cursor) => key < cursor.key(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Ascending,
    Descending,
}

impl ScanOrder {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgePlan {
    pub edge: LinkEdge,
    pub target: PageIdentity,
    pub namespaces: NamespaceSelection,
    pub boundary: Option<Boundary>,
    pub order: ScanOrder,
    pub fetch_limit: usize,
    /// Drop linking pages that are themselves redirects to the target. A
    /// redirect always records its target in the plain-link table.
    pub exclude_target_redirects: bool,
}

impl EdgePlan {
    pub fn admits(&self, page: &PageIdentity) -> bool {
        self.namespaces.admits(page.namespace)
            && self
                .boundary
                .is_none_or(|boundary| boundary.admits(page.sort_key()))
    }
}

/// `indexed_namespaces` lists the namespaces present in the store; an inverted
/// filter admits them even when the table no longer knows them.
pub fn plan_queries(
    filters: &QueryFilterSet,
    namespaces: &NamespaceTable,
    indexed_namespaces: &[i32],
) -> Vec<EdgePlan> {
    let selection = match filters.namespace() {
        NamespaceFilter::All => NamespaceSelection::All,
        NamespaceFilter::Only(namespace) if filters.invert_namespace() => {
            let mut others = namespaces.all_except(namespace);
            others.extend(indexed_namespaces.iter().copied().filter(|id| *id != namespace));
            others.sort_unstable();
            others.dedup();
            NamespaceSelection::AnyOf(others)
        }
        NamespaceFilter::Only(namespace) => NamespaceSelection::Only(namespace),
    };
    let (boundary, order) = match (filters.cursor(), filters.direction()) {
        (None, _) => (None, ScanOrder::Ascending),
        (Some(cursor), Direction::Next) => (Some(Boundary::AtOrAfter(cursor)), ScanOrder::Ascending),
        (Some(cursor), Direction::Prev) => (Some(Boundary::Before(cursor)), ScanOrder::Descending),
    };

    let plan = |edge: LinkEdge, exclude_target_redirects: bool| EdgePlan {
        edge,
        target: filters.target().clone(),
        namespaces: selection.clone(),
        boundary,
        order,
        fetch_limit: filters.limit() + 1,
        exclude_target_redirects,
    };

    let mut plans = Vec::with_capacity(LinkEdge::ALL.len());
    if filters.hide_links() {
        // Plain-link rows are suppressed, so redirects come from their own table.
        if !filters.hide_redirects() {
            plans.push(plan(LinkEdge::Redirect, false));
        }
    } else {
        plans.push(plan(LinkEdge::PlainLink, filters.hide_redirects()));
    }
    if !filters.hide_transclusions() {
        plans.push(plan(LinkEdge::Transclusion, false));
    }
    if !filters.hide_file_usages() {
        plans.push(plan(LinkEdge::FileUsage, false));
    }
    plans
}

/// Single-row forward scans from a PREV cursor. When all of them come back
/// empty nothing sorts at or after the cursor, so the page is the last one.
pub fn plan_look_ahead(plans: &[EdgePlan]) -> Vec<EdgePlan> {
    plans
        .iter()
        .filter_map(|plan| match plan.boundary {
            Some(Boundary::Before(cursor)) => Some(EdgePlan {
                boundary: Some(Boundary::AtOrAfter(cursor)),
                order: ScanOrder::Ascending,
                fetch_limit: 1,
                ..plan.clone()
            }),
            _ => None,
        })
        .collect()
}
