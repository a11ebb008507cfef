use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Serialize, Serializer};

use crate::cursor::PageCursor;
use crate::namespace::NS_FILE;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PageIdentity {
    pub namespace: i32,
    pub title: String,
    pub id: i64,
}

impl PageIdentity {
    pub fn new(namespace: i32, title: impl Into<String>, id: i64) -> Self {
        Self {
            namespace,
            title: title.into(),
            id,
        }
    }

    pub fn sort_key(&self) -> (i32, i64) {
        (self.namespace, self.id)
    }

    pub fn cursor(&self) -> PageCursor {
        PageCursor {
            namespace: self.namespace,
            page_id: self.id,
        }
    }

    pub fn is_file(&self) -> bool {
        self.namespace == NS_FILE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkEdge {
    Redirect,
    PlainLink,
    Transclusion,
    FileUsage,
}

impl LinkEdge {
    pub const ALL: [LinkEdge; 4] = [
        LinkEdge::Redirect,
        LinkEdge::PlainLink,
        LinkEdge::Transclusion,
        LinkEdge::FileUsage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Redirect => "redirect",
            Self::PlainLink => "plain_link",
            Self::Transclusion => "transclusion",
            Self::FileUsage => "file_usage",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Redirect => "redirect",
            Self::PlainLink => "pagelinks",
            Self::Transclusion => "templatelinks",
            Self::FileUsage => "imagelinks",
        }
    }

    pub fn source_namespace_field(self) -> &'static str {
        match self {
            Self::Redirect => "page_namespace",
            Self::PlainLink => "pl_from_namespace",
            Self::Transclusion => "tl_from_namespace",
            Self::FileUsage => "il_from_namespace",
        }
    }

    pub fn source_id_field(self) -> &'static str {
        match self {
            Self::Redirect => "rd_from",
            Self::PlainLink => "pl_from",
            Self::Transclusion => "tl_from",
            Self::FileUsage => "il_from",
        }
    }

    pub fn flag(self) -> RelationFlags {
        match self {
            Self::Redirect => RelationFlags::REDIRECT,
            Self::PlainLink => RelationFlags::PLAIN_LINK,
            Self::Transclusion => RelationFlags::TRANSCLUSION,
            Self::FileUsage => RelationFlags::FILE_USAGE,
        }
    }
}

impl fmt::Display for LinkEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RelationFlags(u8);

impl RelationFlags {
    pub const NONE: RelationFlags = RelationFlags(0);
    pub const REDIRECT: RelationFlags = RelationFlags(1);
    pub const PLAIN_LINK: RelationFlags = RelationFlags(1 << 1);
    pub const TRANSCLUSION: RelationFlags = RelationFlags(1 << 2);
    pub const FILE_USAGE: RelationFlags = RelationFlags(1 << 3);

    pub fn contains(self, other: RelationFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn labels(self) -> Vec<&'static str> {
        LinkEdge::ALL
            .iter()
            .filter(|edge| self.contains(edge.flag()))
            .map(|edge| edge.as_str())
            .collect()
    }
}

impl BitOr for RelationFlags {
    type Output = RelationFlags;

    fn bitor(self, rhs: RelationFlags) -> RelationFlags {
        RelationFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for RelationFlags {
    fn bitor_assign(&mut self, rhs: RelationFlags) {
        self.0 |= rhs.0;
    }
}

impl Serialize for RelationFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.labels())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRow {
    pub page: PageIdentity,
    pub redirect_from: Option<i64>,
    pub redirect_fragment: Option<String>,
}

impl EdgeRow {
    pub fn plain(page: PageIdentity) -> Self {
        Self {
            page,
            redirect_from: None,
            redirect_fragment: None,
        }
    }

    pub fn via_redirect(page: PageIdentity, fragment: Option<String>) -> Self {
        let redirect_from = Some(page.id);
        Self {
            page,
            redirect_from,
            redirect_fragment: fragment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacklinkRow {
    pub page: PageIdentity,
    pub flags: RelationFlags,
    pub redirect_fragment: Option<String>,
    pub via_redirect_from: Option<i64>,
    pub props: Vec<String>,
}

impl BacklinkRow {
    pub fn new(page: PageIdentity) -> Self {
        Self {
            page,
            flags: RelationFlags::NONE,
            redirect_fragment: None,
            via_redirect_from: None,
            props: Vec::new(),
        }
    }

    pub fn is_redirect(&self) -> bool {
        self.flags.contains(RelationFlags::REDIRECT)
    }

    pub fn is_plain_link(&self) -> bool {
        self.flags.contains(RelationFlags::PLAIN_LINK)
    }

    pub fn is_template_usage(&self) -> bool {
        self.flags.contains(RelationFlags::TRANSCLUSION)
    }

    pub fn is_file_usage(&self) -> bool {
        self.flags.contains(RelationFlags::FILE_USAGE)
    }
}
