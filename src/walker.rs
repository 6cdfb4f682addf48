//! Account listing: one page of an account's most recent post ids.

use tracing::info;

use crate::error::FetchError;
use crate::fetcher::{Fetcher, Sleeper};
use crate::service::MetadataService;

/// Returns up to `page_size` post ids for `account`, newest first.
///
/// Only the first page is read (cursor 0); the listing is never continued.
/// Rate limits are retried exactly like single-video lookups.
pub fn list_recent<S, Z>(
    fetcher: &Fetcher<S, Z>,
    account: &str,
    page_size: u32,
) -> Result<Vec<String>, FetchError>
where
    S: MetadataService,
    Z: Sleeper,
{
    let account = account.trim();
    let mut ids = fetcher.with_retry(account, |service| service.list_posts(account, page_size))?;
    ids.truncate(page_size as usize);
    info!(account, count = ids.len(), "listed recent posts");
    Ok(ids)
}
