//! Cascading finalization of dependent entities.

use super::{Entity, Probe};
use crate::blob::BlobClient;
use crate::db::Connection;
use crate::errors::Error;
use crate::ledger::RollbackLedger;
use tracing::debug;

/// Finalizes every `C` that shares a key with `parent`, then cascades into each.
///
/// Children are located by the parent's key columns that also appear on
/// the child table. Every direct child is finalized before any child's own
/// cascade runs; each child's cascade then completes before the next
/// child's begins. A parent with no key set forwards nothing. Returns the
/// number of direct children.
///
/// Child rows themselves are removed by the store when the parent row is
/// deleted; forwarding only releases what the store cannot reach.
pub async fn forward<P, C>(
    parent: &P,
    conn: &mut Connection,
    blobs: &BlobClient,
    ledger: &mut RollbackLedger,
) -> Result<usize, Error>
where
    P: Entity,
    C: Entity,
{
    let probe = P::DESCRIPTOR
        .keys
        .iter()
        .filter(|key| C::DESCRIPTOR.column(key).is_some())
        .map(|key| (*key, parent.column(key)))
        .filter(|(_, value)| !value.is_null())
        .fold(Probe::<C>::new(), |probe, (key, value)| probe.eq(key, value));

    if probe.is_unconstrained() {
        return Ok(0);
    }

    let children = probe.fetch_all(conn).await?;
    debug!(
        parent = P::DESCRIPTOR.table,
        child = C::DESCRIPTOR.table,
        count = children.len(),
        "forwarding"
    );

    for child in &children {
        child.finalize(conn, blobs, ledger).await?;
    }
    for child in &children {
        child.cascade(conn, blobs, ledger).await?;
    }
    Ok(children.len())
}
