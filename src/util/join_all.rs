// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::future::Future;

use futures::stream::StreamExt;

/// Runs the given futures with at most `limit` of them in flight at any time.
/// Results are returned in the order of the input iterator.
pub async fn join_all_limited<I>(iter: I, limit: usize) -> Vec<<I::Item as Future>::Output>
where
    I: IntoIterator,
    I::Item: Future,
{
    futures::stream::iter(iter)
        .buffered(limit.max(1))
        .collect()
        .await
}
