use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use whatlinks_core::annotate::RelationshipLabels;
use whatlinks_core::config::{WhatlinksConfig, load_config};
use whatlinks_core::context::RequestContext;
use whatlinks_core::engine::{BacklinkEngine, BacklinkListing};
use whatlinks_core::filter::{Direction, MIN_LIMIT, NamespaceFilter, QueryFilterSet};
use whatlinks_core::index::{IndexStats, load_index_stats, rebuild_index};
use whatlinks_core::namespace::{NS_MAIN, NamespaceTable};
use whatlinks_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, normalize_for_display,
    resolve_paths,
};
use whatlinks_core::store::SqliteLinkStore;

#[derive(Debug, Parser)]
#[command(
    name = "whatlinks",
    version,
    about = "List the pages that link to, transclude, embed or redirect to a wiki page"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Index(IndexArgs),
    #[command(about = "List backlinks of a page")]
    Links(LinksArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .whatlinks/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct IndexArgs {
    #[command(subcommand)]
    command: IndexSubcommand,
}

#[derive(Debug, Subcommand)]
enum IndexSubcommand {
    Rebuild,
    Stats,
}

#[derive(Debug, Args)]
struct LinksArgs {
    title: String,
    #[arg(long, value_name = "NAMESPACE", help = "Namespace id or name of the linking pages")]
    namespace: Option<String>,
    #[arg(long, requires = "namespace", help = "Select every namespace except --namespace")]
    invert: bool,
    #[arg(long)]
    hide_redirects: bool,
    #[arg(long)]
    hide_links: bool,
    #[arg(long)]
    hide_transclusions: bool,
    #[arg(long)]
    hide_files: bool,
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
    #[arg(long, value_name = "TOKEN", conflicts_with = "back", help = "Continue after a `next` token")]
    from: Option<String>,
    #[arg(long, value_name = "TOKEN", help = "Go back from a `prev` token")]
    back: Option<String>,
    #[arg(long, help = "Print the listing as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Index(IndexArgs { command })) => match command {
            IndexSubcommand::Rebuild => run_index_rebuild(&runtime),
            IndexSubcommand::Stats => run_index_stats(&runtime),
        },
        Some(Commands::Links(args)) => run_links(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("WHATLINKS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;

    println!("Initialized whatlinks runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("wiki_content: {}", normalize_for_display(&paths.wiki_content_dir));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    Ok(())
}

fn run_index_rebuild(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    if !paths.wiki_content_dir.exists() {
        bail!(
            "wiki content directory is missing: {} (run `whatlinks init`)",
            normalize_for_display(&paths.wiki_content_dir)
        );
    }

    let report = rebuild_index(&paths, &config.namespaces())?;

    println!("index rebuild");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("db_path: {}", report.db_path);
    println!("pages: {}", report.pages);
    println!("redirects: {}", report.redirects);
    println!("plain_links: {}", report.plain_links);
    println!("transclusions: {}", report.transclusions);
    println!("file_usages: {}", report.file_usages);
    println!("skipped_files: {}", report.skipped_files);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    Ok(())
}

fn run_index_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let stored = load_index_stats(&paths, &config.namespaces())?;

    println!("index stats");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    match stored {
        Some(stored) => print_index_stats("index", &stored),
        None => println!("index.storage: <not built> (run `whatlinks index rebuild`)"),
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    Ok(())
}

fn run_links(runtime: &RuntimeOptions, args: LinksArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let settings = config.engine_settings();
    let Some(store) = SqliteLinkStore::open_existing(&paths)? else {
        bail!("link index is not built (run `whatlinks index rebuild`)");
    };

    let title = args.title.trim();
    let Some(target) = store.resolve_title(&settings.namespaces, title)? else {
        bail!("page not found: {title}");
    };
    let namespace = match args.namespace.as_deref() {
        Some(raw) => NamespaceFilter::Only(parse_namespace(&settings.namespaces, raw)?),
        None => NamespaceFilter::All,
    };
    let limit = effective_limit(&config, args.limit);
    let namespaces = settings.namespaces.clone();

    let engine = BacklinkEngine::new(store, settings).with_annotator(RelationshipLabels);
    let (token, direction) = match (args.from.as_deref(), args.back.as_deref()) {
        (_, Some(back)) => (Some(back), Direction::Prev),
        (from, None) => (from, Direction::Next),
    };
    let cursor = engine.resolve_cursor(token)?;
    let filters = QueryFilterSet::builder(target)
        .namespace(namespace)
        .invert_namespace(args.invert)
        .hide_redirects(args.hide_redirects)
        .hide_links(args.hide_links)
        .hide_transclusions(args.hide_transclusions)
        .hide_file_usages(args.hide_files)
        .cursor(cursor, direction)
        .limit(limit)
        .build()?;

    let listing = engine.list(&RequestContext::anonymous(), &filters)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("links");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!(
        "target: {}",
        namespaces.display_title(listing.target.namespace, &listing.target.title)
    );
    println!("limit: {limit}");
    print_listing(&namespaces, &listing, "");
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    Ok(())
}

fn print_listing(namespaces: &NamespaceTable, listing: &BacklinkListing, indent: &str) {
    println!("{indent}backlinks.count: {}", listing.rows.len());
    if listing.is_empty() {
        println!("{indent}backlinks: <none>");
    }
    for listed in &listing.rows {
        let row = &listed.row;
        let mut line = format!(
            "{indent}backlinks.source: {} [{}]",
            namespaces.display_title(row.page.namespace, &row.page.title),
            row.flags.labels().join(", ")
        );
        if !row.props.is_empty() {
            line.push_str(&format!(" ({})", row.props.join(", ")));
        }
        if let Some(fragment) = &row.redirect_fragment {
            line.push_str(&format!(" #{fragment}"));
        }
        println!("{line}");
        if let Some(nested) = &listed.redirect_backlinks {
            print_listing(namespaces, nested, &format!("{indent}  "));
        }
    }
    println!(
        "{indent}page.next: {}",
        listing.page.next.as_deref().unwrap_or("<none>")
    );
    println!(
        "{indent}page.prev: {}",
        listing.page.prev.as_deref().unwrap_or("<none>")
    );
    println!(
        "{indent}page.is_first_page: {}",
        format_flag(listing.page.is_first_page)
    );
    println!(
        "{indent}page.is_last_page: {}",
        format_flag(listing.page.is_last_page)
    );
}

fn print_index_stats(prefix: &str, stats: &IndexStats) {
    println!("{prefix}.pages: {}", stats.pages);
    println!("{prefix}.redirects: {}", stats.redirects);
    println!("{prefix}.plain_links: {}", stats.plain_links);
    println!("{prefix}.transclusions: {}", stats.transclusions);
    println!("{prefix}.file_usages: {}", stats.file_usages);
    if stats.by_namespace.is_empty() {
        println!("{prefix}.by_namespace: <empty>");
    } else {
        for (namespace, count) in &stats.by_namespace {
            println!("{prefix}.namespace.{namespace}: {count}");
        }
    }
}

/// Requested limits outside `1..=max_limit` are clamped rather than rejected.
fn effective_limit(config: &WhatlinksConfig, requested: Option<usize>) -> usize {
    let Some(requested) = requested else {
        return config.default_limit();
    };
    let max_limit = config.max_limit();
    let limit = requested.clamp(MIN_LIMIT, max_limit);
    if limit != requested {
        tracing::warn!(requested, limit, max_limit, "clamping out-of-range limit");
    }
    limit
}

fn parse_namespace(namespaces: &NamespaceTable, raw: &str) -> Result<i32> {
    let trimmed = raw.trim();
    if let Ok(id) = trimmed.parse::<i32>() {
        return Ok(id);
    }
    if trimmed.eq_ignore_ascii_case("main") || trimmed == "(main)" {
        return Ok(NS_MAIN);
    }
    namespaces
        .lookup_prefix(trimmed)
        .with_context(|| format!("unknown namespace: {trimmed}"))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
