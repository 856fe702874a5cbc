//! Bounded message delivery.

use sheetpilot_core_types::TabId;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::{BridgeConfig, BridgeError, TabBridge, TabCommand};

/// Sends `command` with a per-attempt timeout, retrying with exponential
/// backoff. Returns the last error once `send_retries` attempts failed.
/// A missing tab fails immediately.
pub async fn send_with_retry<B>(
    bridge: &B,
    tab: TabId,
    command: TabCommand,
    config: &BridgeConfig,
) -> Result<(), BridgeError>
where
    B: TabBridge + ?Sized,
{
    let attempts = config.send_retries.max(1);
    let mut attempt = 0;
    loop {
        let result = match timeout(config.send_timeout(), bridge.send(tab, command.clone())).await
        {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(config.send_timeout())),
        };
        let err = match result {
            Ok(()) => {
                debug!(tab = %tab, action = command.action(), attempt, "message delivered");
                return Ok(());
            }
            Err(err) => err,
        };
        warn!(
            "[Retry {}/{}] send {} to {} failed: {}",
            attempt + 1,
            attempts,
            command.action(),
            tab,
            err
        );
        if attempt + 1 >= attempts || matches!(err, BridgeError::TabNotFound(_)) {
            return Err(err);
        }
        sleep(config.backoff(attempt)).await;
        attempt += 1;
    }
}
