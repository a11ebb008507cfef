use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::annotate::RowAnnotator;
use crate::context::RequestContext;
use crate::cursor::{CursorToken, PageCursor};
use crate::error::BacklinkError;
use crate::fetch::fetch_edges;
use crate::filter::{Direction, QueryFilterSet, clamp_limit};
use crate::merge::merge_edge_batches;
use crate::model::{BacklinkRow, PageIdentity};
use crate::namespace::NamespaceTable;
use crate::pager::{PageInfo, paginate};
use crate::planner::{plan_look_ahead, plan_queries};
use crate::source::BacklinkSource;

pub const DEFAULT_REDIRECT_EXPANSION_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub namespaces: NamespaceTable,
    pub redirect_expansion_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            namespaces: NamespaceTable::default(),
            redirect_expansion_limit: DEFAULT_REDIRECT_EXPANSION_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionDepth {
    Direct,
    ViaRedirect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacklinkListing {
    pub target: PageIdentity,
    pub depth: ExpansionDepth,
    pub rows: Vec<ListedBacklink>,
    pub page: PageInfo,
}

impl BacklinkListing {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedBacklink {
    #[serde(flatten)]
    pub row: BacklinkRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_backlinks: Option<BacklinkListing>,
}

pub struct BacklinkEngine<S> {
    source: S,
    settings: EngineSettings,
    annotators: Vec<Box<dyn RowAnnotator>>,
}

impl<S: BacklinkSource> BacklinkEngine<S> {
    pub fn new(source: S, settings: EngineSettings) -> Self {
        Self {
            source,
            settings,
            annotators: Vec::new(),
        }
    }

    pub fn with_annotator(mut self, annotator: impl RowAnnotator + 'static) -> Self {
        self.annotators.push(Box::new(annotator));
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Turn a caller-supplied token into a cursor.
    ///
    /// Malformed tokens and legacy page ids that no longer resolve mean "first
    /// page". Only a failing page lookup is an error.
    pub fn resolve_cursor(&self, token: Option<&str>) -> Result<Option<PageCursor>, BacklinkError> {
        let Some(token) = token else {
            return Ok(None);
        };
        match CursorToken::parse(token) {
            Ok(CursorToken::Full(cursor)) => Ok(Some(cursor)),
            Ok(CursorToken::PageIdOnly(page_id)) => match self.source.page_by_id(page_id)? {
                Some(page) => Ok(Some(page.cursor())),
                None => {
                    warn!(page_id, "legacy cursor names a missing page; starting from the first page");
                    Ok(None)
                }
            },
            Err(error) => {
                warn!(%error, "ignoring cursor");
                Ok(None)
            }
        }
    }

    pub fn list(
        &self,
        context: &RequestContext,
        filters: &QueryFilterSet,
    ) -> Result<BacklinkListing, BacklinkError> {
        self.list_at(context, filters, ExpansionDepth::Direct)
    }

    fn list_at(
        &self,
        context: &RequestContext,
        filters: &QueryFilterSet,
        depth: ExpansionDepth,
    ) -> Result<BacklinkListing, BacklinkError> {
        let cancel = context.cancel_token();
        cancel.check()?;

        let indexed_namespaces = if filters.invert_namespace() {
            self.source.page_namespaces()?
        } else {
            Vec::new()
        };
        let plans = plan_queries(filters, &self.settings.namespaces, &indexed_namespaces);
        let batches = fetch_edges(&self.source, &plans, cancel)?;
        let fetched: usize = batches.iter().map(|batch| batch.rows.len()).sum();
        let merged = merge_edge_batches(batches);
        let mut window = paginate(merged, filters);

        if filters.cursor().is_some() && filters.direction() == Direction::Prev {
            let later = fetch_edges(&self.source, &plan_look_ahead(&plans), cancel)?;
            if later.iter().all(|batch| batch.rows.is_empty()) {
                window.info.mark_last_page();
            }
        }

        for row in &mut window.rows {
            for annotator in &self.annotators {
                annotator.annotate(context, filters.target(), row);
            }
        }

        debug!(
            target_id = filters.target().id,
            ?depth,
            scans = plans.len(),
            fetched,
            shown = window.rows.len(),
            is_last_page = window.info.is_last_page,
            "listed backlinks"
        );

        let rows = match depth {
            ExpansionDepth::Direct => window
                .rows
                .into_par_iter()
                .map(|row| self.expand_row(context, filters, row))
                .collect::<Result<Vec<_>, BacklinkError>>()?,
            ExpansionDepth::ViaRedirect => window
                .rows
                .into_iter()
                .map(|row| ListedBacklink {
                    row,
                    redirect_backlinks: None,
                })
                .collect(),
        };

        Ok(BacklinkListing {
            target: filters.target().clone(),
            depth,
            rows,
            page: window.info,
        })
    }

    fn expand_row(
        &self,
        context: &RequestContext,
        filters: &QueryFilterSet,
        row: BacklinkRow,
    ) -> Result<ListedBacklink, BacklinkError> {
        if !row.is_redirect() {
            return Ok(ListedBacklink {
                row,
                redirect_backlinks: None,
            });
        }

        let limit = clamp_limit(self.settings.redirect_expansion_limit);
        let nested = filters.for_redirect(row.page.clone(), limit)?;
        let listing = self.list_at(context, &nested, ExpansionDepth::ViaRedirect)?;
        Ok(ListedBacklink {
            row,
            redirect_backlinks: Some(listing),
        })
    }
}
