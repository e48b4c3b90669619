//! Pagination strategies.
//!
//! Two independent shapes are supported:
//!
//! 1. **Offset pages** (`PageRequest` / `PageMeta`) for conversation lists,
//!    conversation history and the direct-message folders.
//! 2. **Backward id cursors** (`CursorRequest` / `CursorPage`) for shipment
//!    thread history: the store returns the newest `limit` rows with
//!    `id < cursor`, and `resolve` turns that batch into a chronological page.

use serde::Serialize;

use crate::error::{Error, Result};

/// Largest page or batch any caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Clamp a requested size into `[1, MAX_PAGE_SIZE]`.
pub fn clamp_limit(requested: Option<i64>, default: u32) -> u32 {
    requested
        .unwrap_or(i64::from(default))
        .clamp(1, i64::from(MAX_PAGE_SIZE)) as u32
}

// ── Offset Pages ──────────────────────────────────────────────────────────────

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: Option<i64>, per_page: Option<i64>, default_per_page: u32) -> Self {
        let page = page.unwrap_or(1).clamp(1, i64::from(u32::MAX)) as u32;
        Self {
            page,
            per_page: clamp_limit(per_page, default_per_page),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }
}

/// Page metadata returned next to offset-paginated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub current_page: u32,
    pub per_page: u32,
    pub total: i64,
    pub last_page: i64,
}

impl PageMeta {
    pub fn new(request: &PageRequest, total: i64) -> Self {
        let per_page = i64::from(request.per_page);
        let last_page = ((total + per_page - 1) / per_page).max(1);
        Self {
            current_page: request.page,
            per_page: request.per_page,
            total,
            last_page,
        }
    }
}

/// Sort direction for offset listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Anything other than `desc` (case-insensitive) reads as ascending.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if s.trim().eq_ignore_ascii_case("desc") => SortOrder::Desc,
            _ => SortOrder::Asc,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

// ── Backward Cursors ──────────────────────────────────────────────────────────

/// Anything addressable by a monotonic id.
pub trait Cursored {
    fn cursor_id(&self) -> i64;
}

/// "Give me up to `limit` items strictly older than `cursor`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorRequest {
    pub cursor: Option<i64>,
    pub limit: u32,
}

/// A chronological (ascending) slice of history.
#[derive(Debug, Clone)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<i64>,
}

/// Cursor metadata as rendered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CursorMeta {
    pub has_more: bool,
    pub next_cursor: Option<i64>,
    pub limit: u32,
}

impl CursorRequest {
    pub fn new(cursor: Option<i64>, limit: Option<i64>, default_limit: u32) -> Result<Self> {
        if let Some(c) = cursor {
            if c < 1 {
                return Err(Error::validation("cursor", "must be at least 1"));
            }
        }
        Ok(Self {
            cursor,
            limit: clamp_limit(limit, default_limit),
        })
    }

    /// Turn a newest-first batch into an ascending page.
    ///
    /// `older_exists(min_id)` must answer whether the thread holds any item
    /// with id strictly below `min_id`.
    pub fn resolve<T, F>(&self, mut newest_first: Vec<T>, older_exists: F) -> Result<CursorPage<T>>
    where
        T: Cursored,
        F: FnOnce(i64) -> Result<bool>,
    {
        newest_first.truncate(self.limit as usize);
        newest_first.reverse();
        let items = newest_first;

        let (has_more, next_cursor) = match items.first() {
            None => (false, None),
            Some(oldest) => {
                let oldest_id = oldest.cursor_id();
                let more = older_exists(oldest_id)?;
                (more, more.then_some(oldest_id))
            }
        };

        Ok(CursorPage {
            items,
            has_more,
            next_cursor,
        })
    }

    pub fn meta<T>(&self, page: &CursorPage<T>) -> CursorMeta {
        CursorMeta {
            has_more: page.has_more,
            next_cursor: page.next_cursor,
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Cursored for i64 {
        fn cursor_id(&self) -> i64 {
            *self
        }
    }

    /// Simulates the store for a thread holding `ids`.
    fn fetch(ids: &[i64], req: &CursorRequest) -> Vec<i64> {
        let mut rows: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| req.cursor.map_or(true, |c| *id < c))
            .collect();
        rows.sort_unstable_by(|a, b| b.cmp(a));
        rows.truncate(req.limit as usize);
        rows
    }

    fn page(ids: &[i64], cursor: Option<i64>, limit: i64) -> CursorPage<i64> {
        let req = CursorRequest::new(cursor, Some(limit), 20).unwrap();
        let batch = fetch(ids, &req);
        req.resolve(batch, |min| Ok(ids.iter().any(|id| *id < min)))
            .unwrap()
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, 20), 20);
        assert_eq!(clamp_limit(Some(0), 20), 1);
        assert_eq!(clamp_limit(Some(-5), 20), 1);
        assert_eq!(clamp_limit(Some(1000), 20), 100);
        assert_eq!(clamp_limit(Some(42), 20), 42);
    }

    #[test]
    fn test_page_request_offset() {
        let req = PageRequest::new(Some(3), Some(10), 15);
        assert_eq!(req.offset(), 20);
        assert_eq!(req.limit(), 10);

        let first = PageRequest::new(Some(0), None, 15);
        assert_eq!(first.page, 1);
        assert_eq!(first.per_page, 15);
        assert_eq!(first.offset(), 0);
    }

    #[test]
    fn test_page_meta_last_page() {
        let req = PageRequest::new(Some(1), Some(10), 10);
        assert_eq!(PageMeta::new(&req, 0).last_page, 1);
        assert_eq!(PageMeta::new(&req, 10).last_page, 1);
        assert_eq!(PageMeta::new(&req, 11).last_page, 2);
        assert_eq!(PageMeta::new(&req, 11).total, 11);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(SortOrder::parse(Some("DESC")), SortOrder::Desc);
        assert_eq!(SortOrder::parse(Some("asc")), SortOrder::Asc);
        assert_eq!(SortOrder::parse(Some("sideways")), SortOrder::Asc);
        assert_eq!(SortOrder::parse(None), SortOrder::Asc);
    }

    #[test]
    fn test_empty_thread() {
        let p = page(&[], None, 20);
        assert!(p.items.is_empty());
        assert!(!p.has_more);
        assert_eq!(p.next_cursor, None);
    }

    #[test]
    fn test_latest_batch_is_ascending() {
        let ids: Vec<i64> = (1..=10).collect();
        let p = page(&ids, None, 3);
        assert_eq!(p.items, vec![8, 9, 10]);
        assert!(p.has_more);
        assert_eq!(p.next_cursor, Some(8));
    }

    #[test]
    fn test_cursor_is_exclusive() {
        let ids: Vec<i64> = (1..=10).collect();
        let p = page(&ids, Some(8), 3);
        assert_eq!(p.items, vec![5, 6, 7]);
        assert!(p.items.iter().all(|id| *id < 8));
        assert_eq!(p.next_cursor, Some(5));
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let ids: Vec<i64> = (1..=10).collect();
        let p = page(&ids, Some(3), 5);
        assert_eq!(p.items, vec![1, 2]);
        assert!(!p.has_more);
        assert_eq!(p.next_cursor, None);
    }

    #[test]
    fn test_exact_fit_has_no_more() {
        let ids = vec![4, 9, 15];
        let p = page(&ids, None, 3);
        assert_eq!(p.items, vec![4, 9, 15]);
        assert!(!p.has_more);
    }

    #[test]
    fn test_walking_cursor_visits_everything_once() {
        let ids: Vec<i64> = (1..=23).map(|i| i * 2).collect();
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let p = page(&ids, cursor, 5);
            assert!(p.items.len() <= 5);
            let mut chunk = p.items.clone();
            chunk.extend(seen);
            seen = chunk;
            if !p.has_more {
                break;
            }
            cursor = p.next_cursor;
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn test_cursor_must_be_positive() {
        assert!(CursorRequest::new(Some(0), None, 20).is_err());
        assert!(CursorRequest::new(Some(1), None, 20).is_ok());
    }
}
