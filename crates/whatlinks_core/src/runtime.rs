use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const STATE_DIR_NAME: &str = ".whatlinks";
pub const DB_FILENAME: &str = "whatlinks.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub wiki_content_dir: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\nwiki_content_dir={}\ndata_dir={} ({})\ndb_path={}\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.wiki_content_dir),
            normalize_for_display(&self.data_dir),
            self.data_source.as_str(),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

pub(crate) fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env)
        .context("failed to resolve project root")?;

    let state_dir = project_root.join(STATE_DIR_NAME);
    let wiki_content_dir = project_root.join("wiki_content");

    let (data_dir, data_source) = if let Some(path) = overrides.data_dir.as_deref() {
        (
            absolutize(path, &project_root),
            ValueSource::Flag,
        )
    } else if let Some(value) = non_empty(lookup_env("WHATLINKS_DATA_DIR")) {
        (
            absolutize(Path::new(&value), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("data"), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (
            absolutize(path, &project_root),
            ValueSource::Flag,
        )
    } else if let Some(value) = non_empty(lookup_env("WHATLINKS_CONFIG")) {
        (
            absolutize(Path::new(&value), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("config.toml"), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        project_root,
        wiki_content_dir,
        state_dir,
        data_dir,
        config_path,
        root_source,
        data_source,
        config_source,
    })
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();

    let required_dirs = [
        paths.wiki_content_dir.clone(),
        paths.wiki_content_dir.join("Main"),
        paths.state_dir.clone(),
        paths.data_dir.clone(),
    ];
    for dir in &required_dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(&paths.config_path, &render_materialized_config(), options.force)?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config() -> String {
    "# whatlinks configuration (materialized by `whatlinks init`)\n\n[backlinks]\n# default_limit = 50\n# max_limit = 5000\n# redirect_expansion_limit = 500\n\n[wiki]\n# [[wiki.custom_namespaces]]\n# name = \"Lore\"\n# id = 3000\n"
        .to_string()
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return Ok((absolutize(path, &context.cwd), ValueSource::Flag));
    }

    if let Some(value) = non_empty(lookup_env("WHATLINKS_PROJECT_ROOT")) {
        return Ok((
            absolutize(Path::new(&value), &context.cwd),
            ValueSource::Env,
        ));
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    Ok((root, ValueSource::Heuristic))
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    let mut candidates: Vec<&Path> = cwd.ancestors().collect();
    if let Some(exe_dir) = executable_dir {
        candidates.extend(exe_dir.ancestors());
    }
    for candidate in candidates {
        if !seen.insert(normalize_for_display(candidate)) {
            continue;
        }
        if candidate.join("wiki_content").exists() {
            return candidate.to_path_buf();
        }
    }
    cwd.to_path_buf()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    fn context(cwd: &Path) -> ResolutionContext {
        ResolutionContext {
            cwd: cwd.to_path_buf(),
            executable_dir: None,
        }
    }

    #[test]
    fn flags_win_over_env() {
        let temp = tempdir().expect("tempdir");
        let env = HashMap::from([
            ("WHATLINKS_PROJECT_ROOT", "/from-env"),
            ("WHATLINKS_DATA_DIR", "env-data"),
        ]);
        let overrides = PathOverrides {
            project_root: Some(PathBuf::from("project")),
            data_dir: None,
            config: Some(PathBuf::from("custom.toml")),
        };
        let paths = resolve_paths_with_lookup(&context(temp.path()), &overrides, |key| {
            env.get(key).map(|value| value.to_string())
        })
        .expect("resolve");

        assert_eq!(paths.project_root, temp.path().join("project"));
        assert_eq!(paths.root_source, ValueSource::Flag);
        assert_eq!(paths.data_dir, temp.path().join("project").join("env-data"));
        assert_eq!(paths.data_source, ValueSource::Env);
        assert_eq!(paths.config_path, temp.path().join("project").join("custom.toml"));
        assert_eq!(paths.config_source, ValueSource::Flag);
        assert_eq!(
            paths.db_path,
            temp.path().join("project").join("env-data").join(DB_FILENAME)
        );
    }

    #[test]
    fn heuristic_finds_ancestor_with_wiki_content() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("wiki");
        let nested = root.join("notes").join("drafts");
        fs::create_dir_all(root.join("wiki_content")).expect("create wiki_content");
        fs::create_dir_all(&nested).expect("create nested");

        let paths = resolve_paths_with_lookup(&context(&nested), &PathOverrides::default(), |_| {
            None
        })
        .expect("resolve");
        assert_eq!(paths.project_root, root);
        assert_eq!(paths.root_source, ValueSource::Heuristic);
        assert_eq!(paths.state_dir, root.join(STATE_DIR_NAME));
        assert_eq!(paths.data_source, ValueSource::Default);
        assert!(paths.diagnostics().contains("(heuristic)"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let temp = tempdir().expect("tempdir");
        let paths = resolve_paths_with_lookup(&context(temp.path()), &PathOverrides::default(), |key| {
            (key == "WHATLINKS_CONFIG").then(|| "   ".to_string())
        })
        .expect("resolve");
        assert_eq!(paths.config_source, ValueSource::Default);
    }

    #[test]
    fn init_layout_creates_dirs_and_respects_force() {
        let temp = tempdir().expect("tempdir");
        let paths = resolve_paths_with_lookup(
            &context(temp.path()),
            &PathOverrides {
                project_root: Some(temp.path().join("project")),
                ..PathOverrides::default()
            },
            |_| None,
        )
        .expect("resolve");

        let report = init_layout(&paths, &InitOptions::default()).expect("init");
        assert!(report.wrote_config);
        assert!(paths.wiki_content_dir.join("Main").exists());
        assert!(paths.data_dir.exists());
        assert_eq!(report.created_dirs.len(), 4);

        fs::write(&paths.config_path, "[backlinks]\ndefault_limit = 10\n").expect("edit config");
        let again = init_layout(&paths, &InitOptions::default()).expect("init again");
        assert!(!again.wrote_config);
        assert!(again.created_dirs.is_empty());

        let forced = init_layout(
            &paths,
            &InitOptions {
                materialize_config: true,
                force: true,
            },
        )
        .expect("init forced");
        assert!(forced.wrote_config);
        let content = fs::read_to_string(&paths.config_path).expect("read config");
        assert!(content.contains("[backlinks]"));
        assert!(!content.contains("default_limit = 10\n"));
    }
}
