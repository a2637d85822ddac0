//! Distribution fan-out
//!
//! Copies configured local paths out to lists of servers. Runs on each new
//! connection so freshly-attached runtimes start with their shared files in
//! place.

use crate::remote::RemoteLink;
use anyhow::Context;
use futures_util::future::join_all;
use shiplink_core::DistributeTarget;
use tracing::{debug, warn};

/// Fan out every configured entry to its servers.
///
/// All entries run concurrently and every copy settles before this returns;
/// siblings are not cancelled when one fails. Each failure is logged and
/// the first one is returned, so callers can treat the fan-out as a single
/// stage that either fully succeeded or didn't.
pub async fn distribute_all(
    link: &dyn RemoteLink,
    targets: &[DistributeTarget],
) -> anyhow::Result<()> {
    debug!("Distributing {} local path(s)", targets.len());

    let results = join_all(targets.iter().map(|target| async move {
        link.distribute(&target.local_path, &target.servers)
            .await
            .with_context(|| {
                format!(
                    "distributing {} to {:?}",
                    target.local_path.display(),
                    target.servers
                )
            })?;
        debug!(
            "Distributed {} to {} server(s)",
            target.local_path.display(),
            target.servers.len()
        );
        Ok::<_, anyhow::Error>(())
    }))
    .await;

    let mut first_err = None;
    for result in results {
        if let Err(e) = result {
            warn!("{e:#}");
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
