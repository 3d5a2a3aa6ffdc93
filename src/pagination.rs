/// Pagination helpers shared by every listing endpoint
///
/// Listing queries take optional `page` / `page_size` parameters and return
/// a `meta` block alongside the data.

use serde::Serialize;

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    /// Clamp raw query parameters into a usable page window
    pub fn from_query(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page.unwrap_or(DEFAULT_PAGE).max(1);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }
}

#[derive(Debug, Serialize)]
pub struct PageMeta {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl PageMeta {
    pub fn new(pagination: Pagination, total: i64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + pagination.page_size - 1) / pagination.page_size
        };
        Self {
            page: pagination.page,
            page_size: pagination.page_size,
            total,
            total_pages,
        }
    }
}
