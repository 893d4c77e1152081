//! Metadata injection into the server's scripting environment.

use tokio_util::sync::CancellationToken;

use super::Supervisor;
use crate::config::MetadataConfig;

/// Commands that publish supervisor metadata as server convars, in order.
#[must_use]
pub fn metadata_commands(metadata: &MetadataConfig) -> Vec<String> {
    let MetadataConfig {
        prefix,
        version,
        port,
    } = metadata;
    vec![
        format!("sets {prefix}-version {version}"),
        format!("set {prefix}-version {version}"),
        format!("set {prefix}-port {port}"),
    ]
}

/// Send the metadata commands to the server spawned as `generation`.
///
/// Waits the configured delay first and spaces the commands out. Stops
/// as soon as that process exits or a newer one has been spawned.
pub(super) async fn inject_metadata(
    sup: &Supervisor,
    generation: u64,
    exited: &CancellationToken,
) {
    let timings = &sup.config.timings;
    let commands = metadata_commands(&sup.config.metadata);

    for (i, command) in commands.iter().enumerate() {
        let delay = if i == 0 {
            timings.metadata_delay()
        } else {
            timings.metadata_step()
        };
        tokio::select! {
            () = exited.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        if !sup.is_current(generation) {
            return;
        }
        if i == 0 {
            tracing::info!("Setting up server scripting environment variables");
        }
        if let Ok(false) = sup.send(command).await {
            tracing::debug!(command = %command, "Metadata command not delivered");
        }
    }
}
