//! Confirmation-safe header windows over the chain.

use std::sync::Arc;

use tracing::{debug, error, instrument, trace};

use crate::error::{ChainError, SyncError, SyncResult};
use crate::models::BlockHeader;
use crate::ports::ChainSource;

/// Owns the synchronization cursor.
///
/// Each call to [`HeaderWindow::next_headers`] returns the range right after
/// the previous one, never beyond `head - confirmations`. The cursor only
/// moves when a whole range was fetched.
pub struct HeaderWindow<C: ChainSource> {
    chain: Arc<C>,
    cursor: Option<BlockHeader>,
    confirmations: u64,
}

impl<C: ChainSource> HeaderWindow<C> {
    /// `cursor` is the last header already traversed, if any.
    pub fn new(chain: Arc<C>, confirmations: u64, cursor: Option<BlockHeader>) -> Self {
        Self {
            chain,
            cursor,
            confirmations,
        }
    }

    pub fn cursor(&self) -> Option<&BlockHeader> {
        self.cursor.as_ref()
    }

    /// Fetch up to `max_size` headers following the cursor.
    ///
    /// An empty result means there is nothing new to traverse yet.
    #[instrument(skip(self), fields(cursor = self.cursor.as_ref().map(|c| c.number)))]
    pub async fn next_headers(&mut self, max_size: u64) -> SyncResult<Vec<BlockHeader>> {
        let head = match self.chain.block_header(None).await {
            Ok(Some(head)) => head,
            Ok(None) => return Err(SyncError::ChainUnavailable("no chain head".into())),
            Err(e) => return Err(SyncError::ChainUnavailable(e.to_string())),
        };

        let Some(safe_height) = head.number.checked_sub(self.confirmations) else {
            trace!(head = head.number, "Chain shorter than confirmation depth");
            return Ok(Vec::new());
        };

        let next_height = match &self.cursor {
            Some(cursor) if cursor.number == safe_height => {
                trace!(safe_height, "Caught up with confirmed head");
                return Ok(Vec::new());
            }
            Some(cursor) if cursor.number > safe_height => {
                error!(
                    cursor = cursor.number,
                    safe_height, "❌ Cursor is ahead of the confirmed chain head"
                );
                return Err(SyncError::CursorAheadOfChain {
                    cursor: cursor.number,
                    safe_height,
                });
            }
            Some(cursor) => cursor.number + 1,
            None => 0,
        };

        let end_height = safe_height.min(next_height.saturating_add(max_size.max(1) - 1));
        let mut headers = Vec::with_capacity((end_height - next_height + 1) as usize);
        for height in next_height..=end_height {
            let header = self
                .chain
                .block_header(Some(height))
                .await?
                .ok_or_else(|| ChainError::BlockFetchError {
                    height,
                    message: "header not found".into(),
                })?;
            headers.push(header);
        }

        debug!(from = next_height, to = end_height, "Header window fetched");
        self.cursor = headers.last().cloned();
        Ok(headers)
    }
}
