//! Remote source port (driven/secondary port)
//!
//! Provider-specific paginated listing of remote resources. One
//! implementation exists per cloud provider; the engine only sees pages.
//!
//! ## Contract
//!
//! - Ids must be stable across the pages of one cycle.
//! - `next_page_cursor = None` marks the last page. The engine never asks
//!   for another page after receiving one.
//! - Records that cannot be parsed are dropped by the source and reported
//!   in `malformed`; they never fail the page.
//! - Retry policy, if any, lives in the source. A returned error is fatal
//!   to the cycle.

use std::collections::BTreeMap;

use anyhow::Result;

/// One page of remote resources keyed by remote id
#[derive(Debug, Clone)]
pub struct RemotePage<D> {
    pub resources: BTreeMap<String, D>,
    /// Opaque provider cursor for the next page
    pub next_page_cursor: Option<String>,
    /// Records dropped because they could not be parsed
    pub malformed: u64,
}

impl<D> RemotePage<D> {
    /// Creates a page from `(id, descriptor)` pairs
    pub fn new(
        resources: impl IntoIterator<Item = (String, D)>,
        next_page_cursor: Option<String>,
    ) -> Self {
        Self {
            resources: resources.into_iter().collect(),
            next_page_cursor,
            malformed: 0,
        }
    }

    /// Creates the terminal empty page
    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    pub fn with_malformed(mut self, malformed: u64) -> Self {
        self.malformed = malformed;
        self
    }

    pub fn is_last(&self) -> bool {
        self.next_page_cursor.is_none()
    }
}

/// Port trait for paginated remote listing
#[async_trait::async_trait]
pub trait IRemoteSource: Send + Sync {
    /// Provider-specific resource descriptor
    type Remote: Send + Sync + 'static;

    /// Fetches the page at `cursor`, or the first page when `None`
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<RemotePage<Self::Remote>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_construction() {
        let page = RemotePage::new(
            vec![("b".to_string(), 2), ("a".to_string(), 1)],
            Some("p2".to_string()),
        );
        assert_eq!(page.resources.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert!(!page.is_last());
        assert_eq!(page.malformed, 0);

        let last: RemotePage<u32> = RemotePage::empty().with_malformed(3);
        assert!(last.is_last());
        assert!(last.resources.is_empty());
        assert_eq!(last.malformed, 3);
    }
}
