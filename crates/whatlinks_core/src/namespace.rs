use serde::{Deserialize, Serialize};

pub const NS_MAIN: i32 = 0;
pub const NS_USER: i32 = 2;
pub const NS_PROJECT: i32 = 4;
pub const NS_FILE: i32 = 6;
pub const NS_MEDIAWIKI: i32 = 8;
pub const NS_TEMPLATE: i32 = 10;
pub const NS_HELP: i32 = 12;
pub const NS_CATEGORY: i32 = 14;
pub const NS_MODULE: i32 = 828;

const BUILTIN_NAMESPACES: &[(i32, &str)] = &[
    (NS_MAIN, "Main"),
    (1, "Talk"),
    (NS_USER, "User"),
    (3, "User talk"),
    (NS_PROJECT, "Project"),
    (5, "Project talk"),
    (NS_FILE, "File"),
    (7, "File talk"),
    (NS_MEDIAWIKI, "MediaWiki"),
    (9, "MediaWiki talk"),
    (NS_TEMPLATE, "Template"),
    (11, "Template talk"),
    (NS_HELP, "Help"),
    (13, "Help talk"),
    (NS_CATEGORY, "Category"),
    (15, "Category talk"),
    (NS_MODULE, "Module"),
    (829, "Module talk"),
];

const NAMESPACE_ALIASES: &[(&str, i32)] = &[("Image", NS_FILE), ("Image talk", 7)];

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CustomNamespace {
    pub name: String,
    pub id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NamespaceEntry {
    id: i32,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTable {
    entries: Vec<NamespaceEntry>,
}

impl Default for NamespaceTable {
    fn default() -> Self {
        Self::with_custom(&[])
    }
}

impl NamespaceTable {
    pub fn with_custom(custom: &[CustomNamespace]) -> Self {
        let mut entries: Vec<NamespaceEntry> = BUILTIN_NAMESPACES
            .iter()
            .map(|(id, name)| NamespaceEntry {
                id: *id,
                name: (*name).to_string(),
            })
            .collect();
        for namespace in custom {
            let name = normalize_spaces(&namespace.name.replace('_', " "));
            if name.is_empty() || entries.iter().any(|entry| entry.id == namespace.id) {
                continue;
            }
            entries.push(NamespaceEntry {
                id: namespace.id,
                name,
            });
        }
        entries.sort_by_key(|entry| entry.id);
        Self { entries }
    }

    pub fn ids(&self) -> Vec<i32> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    pub fn all_except(&self, excluded: i32) -> Vec<i32> {
        self.entries
            .iter()
            .map(|entry| entry.id)
            .filter(|id| *id != excluded)
            .collect()
    }

    pub fn name(&self, id: i32) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.name.as_str())
    }

    pub fn lookup_prefix(&self, prefix: &str) -> Option<i32> {
        let wanted = normalize_spaces(&prefix.replace('_', " "));
        if wanted.is_empty() {
            return None;
        }
        if let Some(entry) = self
            .entries
            .iter()
            .filter(|entry| entry.id != NS_MAIN)
            .find(|entry| entry.name.eq_ignore_ascii_case(&wanted))
        {
            return Some(entry.id);
        }
        NAMESPACE_ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(&wanted))
            .map(|(_, id)| *id)
    }

    pub fn split_title(&self, raw: &str) -> Option<(i32, String)> {
        let normalized = normalize_spaces(&raw.replace('_', " "));
        let normalized = normalized.trim_start_matches(':').trim_start();
        if normalized.is_empty() {
            return None;
        }

        if let Some((prefix, rest)) = normalized.split_once(':')
            && let Some(namespace) = self.lookup_prefix(prefix)
        {
            let local = canonical_local_title(rest);
            return if local.is_empty() {
                None
            } else {
                Some((namespace, local))
            };
        }

        Some((NS_MAIN, canonical_local_title(normalized)))
    }

    pub fn display_title(&self, namespace: i32, title: &str) -> String {
        if namespace == NS_MAIN {
            return title.to_string();
        }
        match self.name(namespace) {
            Some(name) => format!("{name}:{title}"),
            None => format!("{{ns:{namespace}}}:{title}"),
        }
    }

    pub fn folder(&self, namespace: i32) -> Option<String> {
        self.name(namespace).map(|name| name.replace(' ', "_"))
    }

    pub fn namespace_for_folder(&self, folder: &str) -> Option<i32> {
        let wanted = folder.replace('_', " ");
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(&wanted))
            .map(|entry| entry.id)
    }
}

pub fn canonical_local_title(value: &str) -> String {
    let trimmed = normalize_spaces(value);
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}
