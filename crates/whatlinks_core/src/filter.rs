use serde::Serialize;

use crate::cursor::PageCursor;
use crate::error::BacklinkError;
use crate::model::PageIdentity;

pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 5000;
pub const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Next,
    Prev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceFilter {
    #[default]
    All,
    Only(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilterSet {
    target: PageIdentity,
    namespace: NamespaceFilter,
    invert_namespace: bool,
    hide_redirects: bool,
    hide_links: bool,
    hide_transclusions: bool,
    hide_file_usages: bool,
    cursor: Option<PageCursor>,
    direction: Direction,
    limit: usize,
}

impl QueryFilterSet {
    pub fn builder(target: PageIdentity) -> QueryFilterBuilder {
        QueryFilterBuilder {
            target,
            namespace: NamespaceFilter::All,
            invert_namespace: false,
            hide_redirects: false,
            hide_links: false,
            hide_transclusions: false,
            hide_file_usages: false,
            cursor: None,
            direction: Direction::Next,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn target(&self) -> &PageIdentity {
        &self.target
    }

    pub fn namespace(&self) -> NamespaceFilter {
        self.namespace
    }

    pub fn invert_namespace(&self) -> bool {
        self.invert_namespace
    }

    pub fn hide_redirects(&self) -> bool {
        self.hide_redirects
    }

    pub fn hide_links(&self) -> bool {
        self.hide_links
    }

    pub fn hide_transclusions(&self) -> bool {
        self.hide_transclusions
    }

    pub fn hide_file_usages(&self) -> bool {
        self.hide_file_usages
    }

    pub fn cursor(&self) -> Option<PageCursor> {
        self.cursor
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Filter set for listing the backlinks of a redirect found in this
    /// listing: same namespace and hide options, new target, first page.
    pub fn for_redirect(&self, redirect: PageIdentity, limit: usize) -> Result<Self, BacklinkError> {
        QueryFilterSet::builder(redirect)
            .namespace(self.namespace)
            .invert_namespace(self.invert_namespace)
            .hide_redirects(self.hide_redirects)
            .hide_links(self.hide_links)
            .hide_transclusions(self.hide_transclusions)
            .hide_file_usages(self.hide_file_usages)
            .limit(limit)
            .build()
    }
}

#[derive(Debug, Clone)]
pub struct QueryFilterBuilder {
    target: PageIdentity,
    namespace: NamespaceFilter,
    invert_namespace: bool,
    hide_redirects: bool,
    hide_links: bool,
    hide_transclusions: bool,
    hide_file_usages: bool,
    cursor: Option<PageCursor>,
    direction: Direction,
    limit: usize,
}

impl QueryFilterBuilder {
    pub fn namespace(mut self, namespace: NamespaceFilter) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn invert_namespace(mut self, invert: bool) -> Self {
        self.invert_namespace = invert;
        self
    }

    pub fn hide_redirects(mut self, hide: bool) -> Self {
        self.hide_redirects = hide;
        self
    }

    pub fn hide_links(mut self, hide: bool) -> Self {
        self.hide_links = hide;
        self
    }

    pub fn hide_transclusions(mut self, hide: bool) -> Self {
        self.hide_transclusions = hide;
        self
    }

    pub fn hide_file_usages(mut self, hide: bool) -> Self {
        self.hide_file_usages = hide;
        self
    }

    pub fn cursor(mut self, cursor: Option<PageCursor>, direction: Direction) -> Self {
        self.cursor = cursor;
        self.direction = direction;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn build(self) -> Result<QueryFilterSet, BacklinkError> {
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&self.limit) {
            return Err(BacklinkError::LimitOutOfRange {
                limit: self.limit,
                max: MAX_LIMIT,
            });
        }

        // File usage edges only exist for file targets.
        let hide_file_usages = self.hide_file_usages || !self.target.is_file();
        let invert_namespace =
            self.invert_namespace && matches!(self.namespace, NamespaceFilter::Only(_));
        // Without a cursor there is nothing to page back from.
        let direction = if self.cursor.is_some() {
            self.direction
        } else {
            Direction::Next
        };

        Ok(QueryFilterSet {
            target: self.target,
            namespace: self.namespace,
            invert_namespace,
            hide_redirects: self.hide_redirects,
            hide_links: self.hide_links,
            hide_transclusions: self.hide_transclusions,
            hide_file_usages,
            cursor: self.cursor,
            direction,
            limit: self.limit,
        })
    }
}

pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(MIN_LIMIT, MAX_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{NS_FILE, NS_MAIN, NS_TEMPLATE};

    fn target(namespace: i32) -> PageIdentity {
        PageIdentity::new(namespace, "Target", 5)
    }

    #[test]
    fn builder_rejects_out_of_range_limits() {
        for limit in [0, MAX_LIMIT + 1] {
            let error = QueryFilterSet::builder(target(NS_MAIN))
                .limit(limit)
                .build()
                .expect_err("limit must be rejected");
            assert!(matches!(error, BacklinkError::LimitOutOfRange { .. }));
        }
        assert!(
            QueryFilterSet::builder(target(NS_MAIN))
                .limit(MAX_LIMIT)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn file_usages_are_hidden_for_non_file_targets() {
        let filters = QueryFilterSet::builder(target(NS_TEMPLATE))
            .build()
            .expect("build");
        assert!(filters.hide_file_usages());

        let filters = QueryFilterSet::builder(target(NS_FILE))
            .build()
            .expect("build");
        assert!(!filters.hide_file_usages());
    }

    #[test]
    fn inversion_requires_a_namespace() {
        let filters = QueryFilterSet::builder(target(NS_MAIN))
            .invert_namespace(true)
            .build()
            .expect("build");
        assert!(!filters.invert_namespace());
    }

    #[test]
    fn prev_without_cursor_is_first_page() {
        let filters = QueryFilterSet::builder(target(NS_MAIN))
            .cursor(None, Direction::Prev)
            .build()
            .expect("build");
        assert_eq!(filters.direction(), Direction::Next);
    }

    #[test]
    fn redirect_filters_keep_options_and_reset_paging() {
        let filters = QueryFilterSet::builder(target(NS_MAIN))
            .namespace(NamespaceFilter::Only(NS_TEMPLATE))
            .invert_namespace(true)
            .hide_transclusions(true)
            .cursor(Some(PageCursor::new(0, 10)), Direction::Prev)
            .limit(20)
            .build()
            .expect("build");
        let nested = filters
            .for_redirect(PageIdentity::new(NS_MAIN, "Alias", 9), 500)
            .expect("nested");
        assert_eq!(nested.target().id, 9);
        assert_eq!(nested.limit(), 500);
        assert_eq!(nested.cursor(), None);
        assert_eq!(nested.direction(), Direction::Next);
        assert!(nested.invert_namespace());
        assert!(nested.hide_transclusions());
    }

    #[test]
    fn clamp_limit_bounds_values() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(20), 20);
        assert_eq!(clamp_limit(9000), MAX_LIMIT);
    }
}
