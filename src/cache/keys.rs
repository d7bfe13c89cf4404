//! Cache key derivation for repository reads.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::events::RepositoryId;
use crate::query::Query;

/// `"{repository}@{method}-{sha256}"`, where the digest covers the call
/// arguments and the query after criteria and scope were applied.
pub fn read_key<A>(
    repository: &RepositoryId,
    method: &str,
    args: &A,
    query: &Query,
) -> Result<String, CacheError>
where
    A: Serialize + ?Sized,
{
    let fingerprint = serde_json::to_vec(&(args, query))?;
    let mut hasher = Sha256::new();
    hasher.update(&fingerprint);
    Ok(format!(
        "{repository}@{method}-{}",
        hex::encode(hasher.finalize())
    ))
}
