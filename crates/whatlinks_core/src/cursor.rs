//! Opaque pagination tokens.
//!
//! A token is `"{namespace}|{page_id}"`. Older links carry a bare page id;
//! those parse as [`CursorToken::PageIdOnly`] and the engine resolves the
//! namespace through a page lookup.

use std::fmt;

use crate::error::BacklinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageCursor {
    pub namespace: i32,
    pub page_id: i64,
}

impl PageCursor {
    pub fn new(namespace: i32, page_id: i64) -> Self {
        Self { namespace, page_id }
    }

    pub fn key(self) -> (i32, i64) {
        (self.namespace, self.page_id)
    }

    pub fn token(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.namespace, self.page_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorToken {
    Full(PageCursor),
    PageIdOnly(i64),
}

impl CursorToken {
    pub fn parse(token: &str) -> Result<Self, BacklinkError> {
        let trimmed = token.trim();
        let invalid = || BacklinkError::InvalidCursor(token.to_string());
        if trimmed.is_empty() {
            return Err(invalid());
        }

        match trimmed.split_once('|') {
            Some((namespace, page_id)) => {
                let namespace = namespace.trim().parse::<i32>().map_err(|_| invalid())?;
                let page_id = page_id.trim().parse::<i64>().map_err(|_| invalid())?;
                if page_id < 0 {
                    return Err(invalid());
                }
                Ok(Self::Full(PageCursor::new(namespace, page_id)))
            }
            None => {
                let page_id = trimmed.parse::<i64>().map_err(|_| invalid())?;
                if page_id < 0 {
                    return Err(invalid());
                }
                Ok(Self::PageIdOnly(page_id))
            }
        }
    }
}
