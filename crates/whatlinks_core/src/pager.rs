use serde::Serialize;

use crate::cursor::PageCursor;
use crate::filter::{Direction, QueryFilterSet};
use crate::model::BacklinkRow;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PageInfo {
    pub next: Option<String>,
    pub prev: Option<String>,
    pub is_first_page: bool,
    pub is_last_page: bool,
}

impl PageInfo {
    /// No row sorts at or after the PREV cursor, so there is nothing to page
    /// forward to.
    pub fn mark_last_page(&mut self) {
        self.next = None;
        self.is_last_page = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWindow {
    pub rows: Vec<BacklinkRow>,
    pub info: PageInfo,
}

pub fn paginate(mut rows: Vec<BacklinkRow>, filters: &QueryFilterSet) -> PageWindow {
    let limit = filters.limit();
    let cursor = filters.cursor();

    match (cursor, filters.direction()) {
        (Some(cursor), Direction::Prev) => paginate_backward(rows, cursor, limit),
        (cursor, _) => {
            rows.sort_by_key(|row| row.page.sort_key());
            if let Some(cursor) = cursor {
                rows.retain(|row| row.page.sort_key() >= cursor.key());
            }

            let next = rows.get(limit).map(|row| row.page.cursor().token());
            rows.truncate(limit);
            let prev = cursor.map(|cursor| {
                rows.first()
                    .map(|row| row.page.cursor())
                    .unwrap_or(cursor)
                    .token()
            });

            PageWindow {
                info: PageInfo {
                    is_first_page: cursor.is_none(),
                    is_last_page: next.is_none(),
                    next,
                    prev,
                },
                rows,
            }
        }
    }
}

fn paginate_backward(mut rows: Vec<BacklinkRow>, cursor: PageCursor, limit: usize) -> PageWindow {
    rows.sort_by_key(|row| std::cmp::Reverse(row.page.sort_key()));
    // The boundary row opens the page we came from; it is never shown here.
    rows.retain(|row| row.page.sort_key() < cursor.key());

    let has_earlier = rows.len() > limit;
    rows.truncate(limit);
    rows.reverse();

    let prev = if has_earlier {
        rows.first().map(|row| row.page.cursor().token())
    } else {
        None
    };

    PageWindow {
        info: PageInfo {
            next: Some(cursor.token()),
            prev,
            is_first_page: !has_earlier,
            is_last_page: false,
        },
        rows,
    }
}
