//! Built-in commands and the data-source seam they draw from.

pub mod items;

use async_trait::async_trait;

use streamgate_core::Result;

use crate::context::{Cursor, QueryParams};

pub use items::{list_command, MemoryDataSource};

/// Where a paginated command gets its rows. Opening yields a cursor scoped
/// to the given query parameters.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn open(&self, params: &QueryParams) -> Result<Box<dyn Cursor>>;
}
