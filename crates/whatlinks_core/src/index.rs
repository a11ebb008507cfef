use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::Serialize;
use walkdir::WalkDir;

use crate::namespace::{
    NS_CATEGORY, NS_FILE, NS_MAIN, NS_TEMPLATE, NamespaceTable, canonical_local_title,
    normalize_spaces,
};
use crate::runtime::{ResolvedPaths, normalize_for_display};
use crate::store::{LINK_SCHEMA_SQL, open_read_connection, table_exists};

const MAGIC_WORDS: &[&str] = &[
    "!",
    "=",
    "anchorencode",
    "basepagename",
    "currentday",
    "currentmonth",
    "currenttime",
    "currentyear",
    "defaultsort",
    "displaytitle",
    "filepath",
    "formatnum",
    "fullpagename",
    "fullurl",
    "int",
    "lc",
    "lcfirst",
    "localurl",
    "namespace",
    "ns",
    "numberofarticles",
    "padleft",
    "padright",
    "pagename",
    "plural",
    "safesubst",
    "sitename",
    "subpagename",
    "subst",
    "uc",
    "ucfirst",
    "urlencode",
];

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub db_path: String,
    pub pages: usize,
    pub redirects: usize,
    pub plain_links: usize,
    pub transclusions: usize,
    pub file_usages: usize,
    pub skipped_files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub pages: usize,
    pub redirects: usize,
    pub plain_links: usize,
    pub transclusions: usize,
    pub file_usages: usize,
    pub by_namespace: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScannedPage {
    relative_path: String,
    namespace: i32,
    title: String,
    content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedRedirect {
    namespace: i32,
    title: String,
    fragment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ParsedLinks {
    plain: BTreeSet<(i32, String)>,
    templates: BTreeSet<(i32, String)>,
    files: BTreeSet<String>,
}

pub fn rebuild_index(paths: &ResolvedPaths, namespaces: &NamespaceTable) -> Result<RebuildReport> {
    let (pages, skipped_files) = scan_pages(paths, namespaces)?;
    ensure_db_parent(paths)?;
    let mut connection = open_write_connection(&paths.db_path)?;
    connection
        .execute_batch(LINK_SCHEMA_SQL)
        .context("failed to initialize link schema")?;

    let transaction = connection
        .transaction()
        .context("failed to start index rebuild transaction")?;
    for table in ["redirect", "pagelinks", "templatelinks", "imagelinks", "page"] {
        transaction
            .execute(&format!("DELETE FROM {table}"), [])
            .with_context(|| format!("failed to clear {table} table"))?;
    }

    let mut page_statement = transaction
        .prepare(
            "INSERT INTO page (page_id, page_namespace, page_title, page_is_redirect)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .context("failed to prepare page insert")?;
    let mut redirect_statement = transaction
        .prepare(
            "INSERT INTO redirect (rd_from, rd_namespace, rd_title, rd_fragment)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .context("failed to prepare redirect insert")?;
    let mut pagelink_statement = transaction
        .prepare(
            "INSERT OR IGNORE INTO pagelinks (pl_from, pl_from_namespace, pl_namespace, pl_title)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .context("failed to prepare pagelinks insert")?;
    let mut templatelink_statement = transaction
        .prepare(
            "INSERT OR IGNORE INTO templatelinks (tl_from, tl_from_namespace, tl_namespace, tl_title)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .context("failed to prepare templatelinks insert")?;
    let mut imagelink_statement = transaction
        .prepare(
            "INSERT OR IGNORE INTO imagelinks (il_from, il_from_namespace, il_to)
             VALUES (?1, ?2, ?3)",
        )
        .context("failed to prepare imagelinks insert")?;

    let mut report = RebuildReport {
        db_path: normalize_for_display(&paths.db_path),
        pages: 0,
        redirects: 0,
        plain_links: 0,
        transclusions: 0,
        file_usages: 0,
        skipped_files,
    };
    let mut seen_titles = BTreeSet::new();
    let mut next_id = 1i64;
    for page in &pages {
        if !seen_titles.insert((page.namespace, page.title.clone())) {
            tracing::warn!(
                path = page.relative_path.as_str(),
                title = page.title.as_str(),
                "skipping file whose title is already indexed"
            );
            report.skipped_files += 1;
            continue;
        }
        let page_id = next_id;
        next_id += 1;

        let (redirect, body) = match parse_redirect(&page.content, namespaces) {
            Some((redirect, rest)) => (Some(redirect), rest),
            None => (None, page.content.as_str()),
        };
        let mut links = extract_links(body, namespaces);
        page_statement
            .execute(params![
                page_id,
                page.namespace,
                page.title,
                if redirect.is_some() { 1i64 } else { 0i64 }
            ])
            .with_context(|| format!("failed to insert {}", page.relative_path))?;
        report.pages += 1;

        if let Some(redirect) = redirect {
            // The redirect's own link is a plain link whatever its namespace.
            links.plain.insert((redirect.namespace, redirect.title.clone()));
            redirect_statement
                .execute(params![
                    page_id,
                    redirect.namespace,
                    redirect.title,
                    redirect.fragment
                ])
                .with_context(|| format!("failed to insert redirect for {}", page.relative_path))?;
            report.redirects += 1;
        }

        for (namespace, title) in &links.plain {
            report.plain_links += pagelink_statement
                .execute(params![page_id, page.namespace, namespace, title])
                .with_context(|| format!("failed to insert links for {}", page.relative_path))?;
        }
        for (namespace, title) in &links.templates {
            report.transclusions += templatelink_statement
                .execute(params![page_id, page.namespace, namespace, title])
                .with_context(|| {
                    format!("failed to insert transclusions for {}", page.relative_path)
                })?;
        }
        for title in &links.files {
            report.file_usages += imagelink_statement
                .execute(params![page_id, page.namespace, title])
                .with_context(|| format!("failed to insert file usages for {}", page.relative_path))?;
        }
    }
    drop(imagelink_statement);
    drop(templatelink_statement);
    drop(pagelink_statement);
    drop(redirect_statement);
    drop(page_statement);

    transaction
        .commit()
        .context("failed to commit index rebuild transaction")?;

    tracing::debug!(
        pages = report.pages,
        redirects = report.redirects,
        plain_links = report.plain_links,
        transclusions = report.transclusions,
        file_usages = report.file_usages,
        "rebuilt link index"
    );
    Ok(report)
}

pub fn load_index_stats(
    paths: &ResolvedPaths,
    namespaces: &NamespaceTable,
) -> Result<Option<IndexStats>> {
    if !paths.db_path.exists() {
        return Ok(None);
    }
    let connection = open_read_connection(&paths.db_path)
        .with_context(|| format!("failed to open {}", paths.db_path.display()))?;
    if !table_exists(&connection, "page")? {
        return Ok(None);
    }

    let mut by_namespace = BTreeMap::new();
    {
        let mut statement = connection
            .prepare(
                "SELECT page_namespace, COUNT(*) FROM page
                 GROUP BY page_namespace ORDER BY page_namespace ASC",
            )
            .context("failed to prepare namespace aggregation query")?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?)))
            .context("failed to run namespace aggregation query")?;
        for row in rows {
            let (namespace, count) = row.context("failed to read namespace aggregation row")?;
            let name = namespaces
                .name(namespace)
                .map(str::to_string)
                .unwrap_or_else(|| namespace.to_string());
            let count = usize::try_from(count).context("namespace count does not fit into usize")?;
            by_namespace.insert(name, count);
        }
    }

    Ok(Some(IndexStats {
        pages: count_query(&connection, "SELECT COUNT(*) FROM page")?,
        redirects: count_query(&connection, "SELECT COUNT(*) FROM redirect")?,
        plain_links: count_query(&connection, "SELECT COUNT(*) FROM pagelinks")?,
        transclusions: count_query(&connection, "SELECT COUNT(*) FROM templatelinks")?,
        file_usages: count_query(&connection, "SELECT COUNT(*) FROM imagelinks")?,
        by_namespace,
    }))
}

fn scan_pages(
    paths: &ResolvedPaths,
    namespaces: &NamespaceTable,
) -> Result<(Vec<ScannedPage>, usize)> {
    let mut pages = Vec::new();
    let mut skipped = 0usize;
    if !paths.wiki_content_dir.exists() {
        return Ok((pages, skipped));
    }

    for entry in WalkDir::new(&paths.wiki_content_dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry
            .with_context(|| format!("failed to walk {}", paths.wiki_content_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("wiki") {
            continue;
        }
        let relative = path
            .strip_prefix(&paths.wiki_content_dir)
            .with_context(|| format!("{} is outside wiki_content", path.display()))?;
        let Some((namespace, title)) = title_from_relative_path(relative, namespaces) else {
            tracing::debug!(path = %path.display(), "skipping file outside a namespace folder");
            skipped += 1;
            continue;
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        pages.push(ScannedPage {
            relative_path: normalize_for_display(relative),
            namespace,
            title,
            content,
        });
    }

    pages.sort_by(|left, right| left.relative_path.cmp(&right.relative_path));
    Ok((pages, skipped))
}

fn title_from_relative_path(relative: &Path, namespaces: &NamespaceTable) -> Option<(i32, String)> {
    let mut segments = Vec::new();
    for component in relative.with_extension("").components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?.to_string()),
            _ => return None,
        }
    }
    if segments.len() < 2 {
        return None;
    }
    let namespace = namespaces.namespace_for_folder(&segments[0])?;
    let title = canonical_local_title(&segments[1..].join("/").replace('_', " "));
    if title.is_empty() {
        return None;
    }
    Some((namespace, title))
}

fn parse_redirect<'a>(
    content: &'a str,
    namespaces: &NamespaceTable,
) -> Option<(ParsedRedirect, &'a str)> {
    let trimmed = content.trim_start();
    let keyword = trimmed.get(..9)?;
    if !keyword.eq_ignore_ascii_case("#redirect") {
        return None;
    }
    let rest = trimmed[9..].trim_start_matches(|ch: char| ch == ':' || ch.is_whitespace());
    let inner = rest.strip_prefix("[[")?;
    let end = inner.find("]]")?;
    let target = inner[..end].split('|').next().unwrap_or("");
    let (title_part, fragment) = match target.split_once('#') {
        Some((title, fragment)) => (title, Some(normalize_spaces(&fragment.replace('_', " ")))),
        None => (target, None),
    };
    let (namespace, title) = namespaces.split_title(title_part)?;
    let redirect = ParsedRedirect {
        namespace,
        title,
        fragment: fragment.filter(|fragment| !fragment.is_empty()),
    };
    Some((redirect, &inner[end + 2..]))
}

fn extract_links(content: &str, namespaces: &NamespaceTable) -> ParsedLinks {
    let mut out = ParsedLinks::default();
    for inner in bracketed(content, "[[", "]]") {
        add_wikilink(inner, namespaces, &mut out);
    }
    collect_transclusions(content, namespaces, &mut out);
    out
}

fn bracketed<'a>(content: &'a str, open: &str, close: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while let Some(offset) = content[cursor..].find(open) {
        let start = cursor + offset + open.len();
        let Some(length) = content[start..].find(close) else {
            break;
        };
        out.push(&content[start..start + length]);
        cursor = start + length + close.len();
    }
    out
}

fn add_wikilink(inner: &str, namespaces: &NamespaceTable, out: &mut ParsedLinks) {
    let target_part = inner.split('|').next().unwrap_or("").trim();
    let mut target = target_part;
    let mut leading_colon = false;
    while let Some(stripped) = target.strip_prefix(':') {
        leading_colon = true;
        target = stripped.trim_start();
    }
    if let Some((without_fragment, _)) = target.split_once('#') {
        target = without_fragment.trim_end();
    }
    if target.is_empty()
        || target.starts_with("http://")
        || target.starts_with("https://")
        || target.starts_with("//")
    {
        return;
    }

    let Some((namespace, title)) = namespaces.split_title(target) else {
        return;
    };
    match namespace {
        NS_FILE if !leading_colon => {
            out.files.insert(title);
        }
        // Category membership, not a link.
        NS_CATEGORY if !leading_colon => {}
        _ => {
            out.plain.insert((namespace, title));
        }
    }
}

fn collect_transclusions(content: &str, namespaces: &NamespaceTable, out: &mut ParsedLinks) {
    let mut cursor = 0usize;
    while let Some(offset) = content[cursor..].find("{{") {
        let start = cursor + offset + 2;
        if content[start..].starts_with('{') {
            // Template parameter.
            cursor = start + 1;
            continue;
        }
        cursor = start;
        let name_end = content[start..]
            .find(['|', '}', '{'])
            .map_or(content.len(), |index| start + index);
        if content[name_end..].starts_with('{') {
            // Computed template name.
            continue;
        }
        if let Some(target) = transclusion_target(&content[start..name_end], namespaces) {
            out.templates.insert(target);
        }
    }
}

fn transclusion_target(raw_name: &str, namespaces: &NamespaceTable) -> Option<(i32, String)> {
    let name = normalize_spaces(&raw_name.replace('_', " "));
    if name.is_empty() || name.starts_with('#') {
        return None;
    }
    if let Some(main_title) = name.strip_prefix(':') {
        let title = canonical_local_title(main_title);
        return (!title.is_empty()).then_some((NS_MAIN, title));
    }
    let name = name.strip_prefix("msgnw:").unwrap_or(&name);
    let head = name.split(':').next().unwrap_or(name).trim();
    if MAGIC_WORDS
        .iter()
        .any(|word| word.eq_ignore_ascii_case(head))
    {
        return None;
    }
    if let Some((prefix, rest)) = name.split_once(':')
        && let Some(namespace) = namespaces.lookup_prefix(prefix)
    {
        let title = canonical_local_title(rest);
        return (!title.is_empty()).then_some((namespace, title));
    }
    let title = canonical_local_title(name);
    (!title.is_empty()).then_some((NS_TEMPLATE, title))
}

fn open_write_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    // Readers open the file read-only, so stay on the rollback journal.
    Ok(connection)
}

fn ensure_db_parent(paths: &ResolvedPaths) -> Result<()> {
    let parent = paths
        .db_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("db path has no parent: {}", paths.db_path.display()))?;
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create database parent directory {}",
            parent.display()
        )
    })
}

fn count_query(connection: &Connection, sql: &str) -> Result<usize> {
    let count: i64 = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed query: {sql}"))?;
    usize::try_from(count).context("count does not fit into usize")
}
