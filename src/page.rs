//! Pagination: turning totals into `(skip, limit)` page descriptors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::{Error, Reader, Result};

/// One chunk of a bounded range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Page {
    /// Items to skip before this page
    pub skip: usize,
    /// Items on this page
    pub limit: usize,
}

/// Cursor over the pages of a single count
#[derive(Debug, Clone, Copy)]
struct PageCursor {
    total: usize,
    skip: usize,
}

impl PageCursor {
    fn new(total: usize) -> Self {
        Self { total, skip: 0 }
    }

    fn next_page(&mut self, limit: usize) -> Option<Page> {
        if self.skip >= self.total {
            return None;
        }
        let page = Page {
            skip: self.skip,
            limit: limit.min(self.total - self.skip),
        };
        self.skip += limit;
        Some(page)
    }
}

/// Reader that splits each upstream count into consecutive pages.
///
/// For a count `n` and a limit `l` it yields `(0, l)`, `(l, l)`, ... with the
/// last page truncated so that `skip + limit == n`. When a count's pages run
/// out, the next count is pulled. A count of zero contributes no pages.
///
/// ```rust
/// # tokio_test::block_on(async {
/// use seqio::prelude::*;
///
/// let token = CancellationToken::new();
/// let pages = VecReader::new(vec![7usize]).pages(3);
/// let pages = read_all(pages, &token).await.unwrap();
/// assert_eq!(
///     pages,
///     vec![
///         Page { skip: 0, limit: 3 },
///         Page { skip: 3, limit: 3 },
///         Page { skip: 6, limit: 1 },
///     ]
/// );
/// # });
/// ```
pub struct PageReader<R> {
    counts: R,
    limit: usize,
    cursor: Option<PageCursor>,
}

impl<R> PageReader<R> {
    /// Create a new page reader over a reader of counts
    pub fn new(counts: R, limit: usize) -> Self {
        Self {
            counts,
            limit,
            cursor: None,
        }
    }
}

#[async_trait]
impl<R> Reader for PageReader<R>
where
    R: Reader<Item = usize> + Send,
{
    type Item = Page;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        if self.limit == 0 {
            return Err(Error::config("page limit must be non-zero"));
        }

        loop {
            if let Some(page) = self.cursor.as_mut().and_then(|c| c.next_page(self.limit)) {
                return Ok(Some(page));
            }
            match self.counts.read(token).await? {
                Some(total) => self.cursor = Some(PageCursor::new(total)),
                None => {
                    self.cursor = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.counts.close().await
    }
}
