use serde::{Deserialize, Serialize};

/// One page of an ordered result set.
pub trait Paginate: Send + Sync {
    fn skip(&self) -> u64;
    fn limit(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    skip: u64,
    limit: u64,
}

impl Pagination {
    pub fn new(skip: u64, limit: u64) -> Self {
        Self { skip, limit }
    }

    /// 1-based page of `per_page` records; page 0 is treated as page 1.
    pub fn page(page: u64, per_page: u64) -> Self {
        Self {
            skip: page.saturating_sub(1).saturating_mul(per_page),
            limit: per_page,
        }
    }
}

impl Paginate for Pagination {
    fn skip(&self) -> u64 {
        self.skip
    }

    fn limit(&self) -> u64 {
        self.limit
    }
}
