use anyhow::Result;

use crate::convert::{Converter, HostMessage};
use crate::settings::SettingsStore;

use super::controller::{ControllerHandle, MutationController};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Page-load hook: arm the controller when the stored flag is on.
pub fn restore_enabled<C: Converter>(
    controller: &mut MutationController<C>,
    store: &SettingsStore,
) -> Result<bool> {
    let is_enabled = store.is_enabled()?;
    if is_enabled {
        controller.enable();
    }
    log_info!("restored isEnabled={is_enabled}");
    Ok(is_enabled)
}

/// Popup toggle: persist first, then tell the open page, if any. A page
/// that cannot be reached is logged, not reported; the stored flag still
/// applies on reload. Returns the message meant for the page.
pub fn set_enabled(
    store: &SettingsStore,
    page: Option<&ControllerHandle>,
    is_enabled: bool,
) -> Result<HostMessage> {
    store.set_enabled(is_enabled)?;

    let message = HostMessage::ToggleEnabled { is_enabled };
    match page {
        Some(page) => {
            if let Err(err) = page.deliver(message.clone()) {
                log_error!("could not reach the page: {err:#}");
            }
        }
        None => log_info!("no open page; isEnabled={is_enabled} applies on next load"),
    }
    Ok(message)
}
