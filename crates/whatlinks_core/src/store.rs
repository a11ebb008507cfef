//! SQLite-backed link store.
//!
//! Every scan opens its own read-only connection so edge scans can run in
//! parallel against the same database file. The connection carries a progress
//! handler that interrupts the running statement once the request's cancel
//! token fires.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OpenFlags, params, params_from_iter};

use crate::context::CancelToken;
use crate::error::BacklinkError;
use crate::model::{EdgeRow, LinkEdge, PageIdentity};
use crate::namespace::{NS_FILE, NamespaceTable};
use crate::planner::{Boundary, EdgePlan, NamespaceSelection};
use crate::runtime::ResolvedPaths;
use crate::source::BacklinkSource;

pub(crate) const LINK_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS page (
    page_id INTEGER PRIMARY KEY,
    page_namespace INTEGER NOT NULL,
    page_title TEXT NOT NULL,
    page_is_redirect INTEGER NOT NULL,
    UNIQUE (page_namespace, page_title)
);

CREATE TABLE IF NOT EXISTS redirect (
    rd_from INTEGER PRIMARY KEY,
    rd_namespace INTEGER NOT NULL,
    rd_title TEXT NOT NULL,
    rd_fragment TEXT,
    FOREIGN KEY (rd_from) REFERENCES page(page_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_redirect_target ON redirect(rd_namespace, rd_title, rd_from);

CREATE TABLE IF NOT EXISTS pagelinks (
    pl_from INTEGER NOT NULL,
    pl_from_namespace INTEGER NOT NULL,
    pl_namespace INTEGER NOT NULL,
    pl_title TEXT NOT NULL,
    PRIMARY KEY (pl_from, pl_namespace, pl_title),
    FOREIGN KEY (pl_from) REFERENCES page(page_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_pagelinks_backlinks
    ON pagelinks(pl_namespace, pl_title, pl_from_namespace, pl_from);

CREATE TABLE IF NOT EXISTS templatelinks (
    tl_from INTEGER NOT NULL,
    tl_from_namespace INTEGER NOT NULL,
    tl_namespace INTEGER NOT NULL,
    tl_title TEXT NOT NULL,
    PRIMARY KEY (tl_from, tl_namespace, tl_title),
    FOREIGN KEY (tl_from) REFERENCES page(page_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_templatelinks_backlinks
    ON templatelinks(tl_namespace, tl_title, tl_from_namespace, tl_from);

CREATE TABLE IF NOT EXISTS imagelinks (
    il_from INTEGER NOT NULL,
    il_from_namespace INTEGER NOT NULL,
    il_to TEXT NOT NULL,
    PRIMARY KEY (il_from, il_to),
    FOREIGN KEY (il_from) REFERENCES page(page_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_imagelinks_backlinks
    ON imagelinks(il_to, il_from_namespace, il_from);
"#;

/// SQLite VM instructions between cancellation checks.
const CANCEL_CHECK_OPS: i32 = 1000;

const LINK_TABLES: &[&str] = &["page", "redirect", "pagelinks", "templatelinks", "imagelinks"];

#[derive(Debug, Clone)]
pub struct SqliteLinkStore {
    db_path: PathBuf,
}

impl SqliteLinkStore {
    pub fn open_existing(paths: &ResolvedPaths) -> Result<Option<Self>> {
        if !paths.db_path.exists() {
            return Ok(None);
        }
        let connection = open_read_connection(&paths.db_path)
            .with_context(|| format!("failed to open {}", paths.db_path.display()))?;
        for table in LINK_TABLES {
            if !table_exists(&connection, table)? {
                return Ok(None);
            }
        }
        Ok(Some(Self {
            db_path: paths.db_path.clone(),
        }))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn resolve_title(
        &self,
        namespaces: &NamespaceTable,
        title: &str,
    ) -> Result<Option<PageIdentity>> {
        let Some((namespace, local)) = namespaces.split_title(title) else {
            return Ok(None);
        };
        let connection = open_read_connection(&self.db_path)
            .with_context(|| format!("failed to open {}", self.db_path.display()))?;
        let mut statement = connection
            .prepare(
                "SELECT page_id, page_namespace, page_title
                 FROM page
                 WHERE page_namespace = ?1 AND page_title = ?2",
            )
            .context("failed to prepare title lookup")?;
        let mut rows = statement
            .query(params![namespace, local])
            .context("failed to run title lookup")?;
        match rows.next().context("failed to read title lookup row")? {
            Some(row) => Ok(Some(PageIdentity {
                id: row.get(0)?,
                namespace: row.get(1)?,
                title: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    fn scan_rows(
        &self,
        plan: &EdgePlan,
        cancel: &CancelToken,
    ) -> std::result::Result<Vec<EdgeRow>, ScanFailure> {
        let connection = open_scan_connection(&self.db_path, cancel)?;
        let query = build_scan_query(plan);
        let mut statement = connection.prepare(&query.sql)?;
        let mut rows = statement.query(params_from_iter(query.values.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            if cancel.is_cancelled() {
                return Err(ScanFailure::Cancelled);
            }
            let page = PageIdentity {
                id: row.get(0)?,
                namespace: row.get(1)?,
                title: row.get(2)?,
            };
            let redirect_from: Option<i64> = row.get(3)?;
            let redirect_fragment: Option<String> = row.get(4)?;
            out.push(EdgeRow {
                page,
                redirect_from,
                redirect_fragment: redirect_fragment.filter(|fragment| !fragment.is_empty()),
            });
        }
        Ok(out)
    }
}

impl BacklinkSource for SqliteLinkStore {
    fn scan(
        &self,
        plan: &EdgePlan,
        cancel: &CancelToken,
    ) -> std::result::Result<Vec<EdgeRow>, BacklinkError> {
        cancel.check()?;
        match self.scan_rows(plan, cancel) {
            Ok(rows) => Ok(rows),
            Err(ScanFailure::Cancelled) => Err(BacklinkError::Cancelled),
            Err(ScanFailure::Sqlite(error)) => Err(BacklinkError::data_source(plan.edge, error)),
        }
    }

    fn page_by_id(&self, page_id: i64) -> std::result::Result<Option<PageIdentity>, BacklinkError> {
        let lookup = || -> rusqlite::Result<Option<PageIdentity>> {
            let connection = open_read_connection(&self.db_path)?;
            let mut statement = connection.prepare(
                "SELECT page_namespace, page_title FROM page WHERE page_id = ?1",
            )?;
            let mut rows = statement.query([page_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(PageIdentity {
                    namespace: row.get(0)?,
                    title: row.get(1)?,
                    id: page_id,
                })),
                None => Ok(None),
            }
        };
        lookup().map_err(|error| BacklinkError::PageLookupFailed {
            page_id,
            source: Box::new(error),
        })
    }

    fn page_namespaces(&self) -> std::result::Result<Vec<i32>, BacklinkError> {
        let lookup = || -> rusqlite::Result<Vec<i32>> {
            let connection = open_read_connection(&self.db_path)?;
            let mut statement = connection
                .prepare("SELECT DISTINCT page_namespace FROM page ORDER BY page_namespace ASC")?;
            let rows = statement.query_map([], |row| row.get(0))?;
            rows.collect()
        };
        lookup().map_err(|error| BacklinkError::NamespaceLookupFailed {
            source: Box::new(error),
        })
    }
}

#[derive(Debug)]
enum ScanFailure {
    Cancelled,
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for ScanFailure {
    fn from(error: rusqlite::Error) -> Self {
        if error.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
            Self::Cancelled
        } else {
            Self::Sqlite(error)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ScanQuery {
    sql: String,
    values: Vec<Value>,
}

/// Build the SQL for one edge plan. Every edge returns
/// `(page_id, page_namespace, page_title, rd_from, rd_fragment)`, with the
/// redirect columns joined from the target's redirect entries.
fn build_scan_query(plan: &EdgePlan) -> ScanQuery {
    let target_namespace = Value::Integer(i64::from(plan.target.namespace));
    let target_title = Value::Text(plan.target.title.clone());
    let mut values = Vec::new();
    let namespace_field = plan.edge.source_namespace_field();
    let id_field = plan.edge.source_id_field();

    let mut sql = match plan.edge {
        LinkEdge::Redirect => {
            values.push(target_namespace);
            values.push(target_title);
            String::from(
                "SELECT page_id, page_namespace, page_title, rd_from, rd_fragment
                 FROM redirect
                 JOIN page ON page_id = rd_from
                 WHERE rd_namespace = ? AND rd_title = ?",
            )
        }
        LinkEdge::PlainLink | LinkEdge::Transclusion | LinkEdge::FileUsage => {
            let table = plan.edge.table();
            values.push(target_namespace.clone());
            values.push(target_title.clone());
            let target_predicate = match plan.edge {
                LinkEdge::PlainLink => {
                    values.push(target_namespace);
                    values.push(target_title);
                    "pl_namespace = ? AND pl_title = ?"
                }
                LinkEdge::Transclusion => {
                    values.push(target_namespace);
                    values.push(target_title);
                    "tl_namespace = ? AND tl_title = ?"
                }
                _ => {
                    if plan.target.namespace != NS_FILE {
                        // File usages only point at file pages.
                        "0"
                    } else {
                        values.push(target_title);
                        "il_to = ?"
                    }
                }
            };
            format!(
                "SELECT page_id, page_namespace, page_title, rd_from, rd_fragment
                 FROM {table}
                 JOIN page ON page_id = {id_field}
                 LEFT JOIN redirect ON rd_from = {id_field} AND rd_namespace = ? AND rd_title = ?
                 WHERE {target_predicate}"
            )
        }
    };

    match &plan.namespaces {
        NamespaceSelection::All => {}
        NamespaceSelection::Only(namespace) => {
            sql.push_str(&format!(" AND {namespace_field} = ?"));
            values.push(Value::Integer(i64::from(*namespace)));
        }
        NamespaceSelection::AnyOf(namespaces) if namespaces.is_empty() => {
            sql.push_str(" AND 0");
        }
        NamespaceSelection::AnyOf(namespaces) => {
            let placeholders = vec!["?"; namespaces.len()].join(", ");
            sql.push_str(&format!(" AND {namespace_field} IN ({placeholders})"));
            values.extend(
                namespaces
                    .iter()
                    .map(|namespace| Value::Integer(i64::from(*namespace))),
            );
        }
    }

    if let Some(boundary) = plan.boundary {
        let (operator, cursor) = match boundary {
            Boundary::AtOrAfter(cursor) => (">=", cursor),
            Boundary::Before(cursor) => ("<", cursor),
        };
        sql.push_str(&format!(
            " AND ({namespace_field}, {id_field}) {operator} (?, ?)"
        ));
        values.push(Value::Integer(i64::from(cursor.namespace)));
        values.push(Value::Integer(cursor.page_id));
    }

    if plan.exclude_target_redirects {
        sql.push_str(" AND rd_from IS NULL");
    }

    let order = plan.order.sql();
    sql.push_str(&format!(
        " ORDER BY {namespace_field} {order}, {id_field} {order} LIMIT ?"
    ));
    values.push(Value::Integer(
        i64::try_from(plan.fetch_limit).unwrap_or(i64::MAX),
    ));

    ScanQuery { sql, values }
}

pub(crate) fn open_read_connection(db_path: &Path) -> rusqlite::Result<Connection> {
    let connection = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    connection.busy_timeout(Duration::from_secs(5))?;
    Ok(connection)
}

fn open_scan_connection(db_path: &Path, cancel: &CancelToken) -> rusqlite::Result<Connection> {
    let connection = open_read_connection(db_path)?;
    let cancel = cancel.clone();
    connection.progress_handler(CANCEL_CHECK_OPS, Some(move || cancel.is_cancelled()))?;
    Ok(connection)
}

pub(crate) fn table_exists(connection: &Connection, table_name: &str) -> Result<bool> {
    let exists: i64 = connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table_name],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to check sqlite_master for table {table_name}"))?;
    Ok(exists == 1)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rusqlite::Connection;
    use tempfile::tempdir;

    use super::*;
    use crate::cursor::PageCursor;
    use crate::namespace::{NS_MAIN, NS_TEMPLATE};
    use crate::planner::ScanOrder;
    use crate::runtime::{ResolvedPaths, ValueSource};

    fn paths(root: &Path) -> ResolvedPaths {
        ResolvedPaths {
            project_root: root.to_path_buf(),
            wiki_content_dir: root.join("wiki_content"),
            state_dir: root.join(".whatlinks"),
            data_dir: root.join(".whatlinks").join("data"),
            db_path: root.join(".whatlinks").join("data").join("whatlinks.db"),
            config_path: root.join(".whatlinks").join("config.toml"),
            root_source: ValueSource::Flag,
            data_source: ValueSource::Default,
            config_source: ValueSource::Default,
        }
    }

    // Target "Target" (id 1). Pages 2 and 3 link it, page 4 is a redirect to
    // it (and so also links it), Template:Box (5) transcludes it.
    fn seeded_store(root: &Path) -> SqliteLinkStore {
        let paths = paths(root);
        fs::create_dir_all(&paths.data_dir).expect("create data dir");
        let connection = Connection::open(&paths.db_path).expect("open db");
        connection.execute_batch(LINK_SCHEMA_SQL).expect("schema");
        connection
            .execute_batch(
                "INSERT INTO page VALUES (1, 0, 'Target', 0);
                 INSERT INTO page VALUES (2, 0, 'Alpha', 0);
                 INSERT INTO page VALUES (3, 0, 'Beta', 0);
                 INSERT INTO page VALUES (4, 0, 'Alias', 1);
                 INSERT INTO page VALUES (5, 10, 'Box', 0);
                 INSERT INTO redirect VALUES (4, 0, 'Target', 'History');
                 INSERT INTO pagelinks VALUES (2, 0, 0, 'Target');
                 INSERT INTO pagelinks VALUES (3, 0, 0, 'Target');
                 INSERT INTO pagelinks VALUES (4, 0, 0, 'Target');
                 INSERT INTO templatelinks VALUES (5, 10, 0, 'Target');",
            )
            .expect("seed");
        drop(connection);
        SqliteLinkStore::open_existing(&paths)
            .expect("open store")
            .expect("store exists")
    }

    fn plan(edge: LinkEdge) -> EdgePlan {
        EdgePlan {
            edge,
            target: PageIdentity::new(NS_MAIN, "Target", 1),
            namespaces: NamespaceSelection::All,
            boundary: None,
            order: ScanOrder::Ascending,
            fetch_limit: 51,
            exclude_target_redirects: false,
        }
    }

    fn ids(rows: &[EdgeRow]) -> Vec<i64> {
        rows.iter().map(|row| row.page.id).collect()
    }

    #[test]
    fn open_existing_returns_none_without_database() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteLinkStore::open_existing(&paths(temp.path())).expect("open");
        assert!(store.is_none());
    }

    #[test]
    fn plain_link_scan_joins_redirect_markers() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let rows = store
            .scan(&plan(LinkEdge::PlainLink), &CancelToken::new())
            .expect("scan");
        assert_eq!(ids(&rows), vec![2, 3, 4]);
        assert_eq!(rows[2].redirect_from, Some(4));
        assert_eq!(rows[2].redirect_fragment.as_deref(), Some("History"));
        assert_eq!(rows[0].redirect_from, None);
    }

    #[test]
    fn hidden_redirects_drop_redirect_pagelinks() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let mut plan = plan(LinkEdge::PlainLink);
        plan.exclude_target_redirects = true;
        let rows = store.scan(&plan, &CancelToken::new()).expect("scan");
        assert_eq!(ids(&rows), vec![2, 3]);
    }

    #[test]
    fn redirect_and_transclusion_scans() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let redirects = store
            .scan(&plan(LinkEdge::Redirect), &CancelToken::new())
            .expect("redirect scan");
        assert_eq!(ids(&redirects), vec![4]);

        let transclusions = store
            .scan(&plan(LinkEdge::Transclusion), &CancelToken::new())
            .expect("transclusion scan");
        assert_eq!(ids(&transclusions), vec![5]);
        assert_eq!(transclusions[0].page.namespace, NS_TEMPLATE);

        let files = store
            .scan(&plan(LinkEdge::FileUsage), &CancelToken::new())
            .expect("file scan");
        assert!(files.is_empty());
    }

    #[test]
    fn boundaries_namespaces_and_limits_apply() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());

        let mut next = plan(LinkEdge::PlainLink);
        next.boundary = Some(Boundary::AtOrAfter(PageCursor::new(0, 3)));
        let rows = store.scan(&next, &CancelToken::new()).expect("scan");
        assert_eq!(ids(&rows), vec![3, 4]);

        let mut prev = plan(LinkEdge::PlainLink);
        prev.boundary = Some(Boundary::Before(PageCursor::new(0, 4)));
        prev.order = ScanOrder::Descending;
        prev.fetch_limit = 1;
        let rows = store.scan(&prev, &CancelToken::new()).expect("scan");
        assert_eq!(ids(&rows), vec![3]);

        let mut templates_only = plan(LinkEdge::Transclusion);
        templates_only.namespaces = NamespaceSelection::AnyOf(vec![NS_MAIN]);
        let rows = store.scan(&templates_only, &CancelToken::new()).expect("scan");
        assert!(rows.is_empty());
    }

    #[test]
    fn page_lookup_and_title_resolution() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        assert_eq!(
            store.page_by_id(5).expect("lookup"),
            Some(PageIdentity::new(NS_TEMPLATE, "Box", 5))
        );
        assert_eq!(store.page_by_id(99).expect("lookup"), None);

        let namespaces = NamespaceTable::default();
        assert_eq!(
            store
                .resolve_title(&namespaces, "template:box")
                .expect("resolve"),
            Some(PageIdentity::new(NS_TEMPLATE, "Box", 5))
        );
        assert_eq!(
            store.resolve_title(&namespaces, "Missing").expect("resolve"),
            None
        );
    }

    #[test]
    fn page_namespaces_lists_stored_namespaces() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        assert_eq!(
            store.page_namespaces().expect("namespaces"),
            vec![NS_MAIN, NS_TEMPLATE]
        );
    }

    #[test]
    fn cancelled_scan_reports_cancellation() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        let error = store
            .scan(&plan(LinkEdge::PlainLink), &cancel)
            .expect_err("must cancel");
        assert!(error.is_cancelled());
    }

    #[test]
    fn progress_handler_interrupts_running_statement() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        let connection = open_scan_connection(store.db_path(), &cancel).expect("open");
        // A single-row aggregate that needs far more than one check interval.
        let error = connection
            .query_row(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 200000)
                 SELECT COUNT(*) FROM n",
                [],
                |row| row.get::<_, i64>(0),
            )
            .expect_err("must be interrupted");
        assert_eq!(error.sqlite_error_code(), Some(ErrorCode::OperationInterrupted));
        assert!(matches!(ScanFailure::from(error), ScanFailure::Cancelled));

        let idle = CancelToken::new();
        let connection = open_scan_connection(store.db_path(), &idle).expect("open");
        let count: i64 = connection
            .query_row(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 200000)
                 SELECT COUNT(*) FROM n",
                [],
                |row| row.get(0),
            )
            .expect("uncancelled query");
        assert_eq!(count, 200000);
    }

    #[test]
    fn cancellation_before_the_first_row_stops_a_sorting_scan() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let connection = Connection::open(store.db_path()).expect("open db");
        // Many redirects to the target force a sort before any row is returned.
        connection
            .execute_batch(
                "WITH RECURSIVE n(x) AS (SELECT 100 UNION ALL SELECT x + 1 FROM n WHERE x < 20100)
                 INSERT INTO page SELECT x, 0, 'Redirect ' || x, 1 FROM n;
                 INSERT INTO redirect SELECT page_id, 0, 'Target', NULL FROM page WHERE page_id >= 100;",
            )
            .expect("seed redirects");
        drop(connection);

        let cancel = CancelToken::new();
        cancel.cancel();
        let failure = store
            .scan_rows(&plan(LinkEdge::Redirect), &cancel)
            .expect_err("must cancel");
        assert!(matches!(failure, ScanFailure::Cancelled));

        let rows = store
            .scan(&plan(LinkEdge::Redirect), &CancelToken::new())
            .expect("scan");
        assert_eq!(rows.len(), 51);
    }

    #[test]
    fn missing_tables_surface_as_data_source_errors() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(temp.path());
        let connection = Connection::open(store.db_path()).expect("open db");
        connection
            .execute_batch("DROP TABLE templatelinks")
            .expect("drop");
        drop(connection);
        let error = store
            .scan(&plan(LinkEdge::Transclusion), &CancelToken::new())
            .expect_err("must fail");
        assert!(matches!(
            error,
            BacklinkError::DataSourceUnavailable {
                edge: LinkEdge::Transclusion,
                ..
            }
        ));
    }
}
