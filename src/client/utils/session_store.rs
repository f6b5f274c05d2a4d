use std::path::PathBuf;

use keyring::Entry;
use log::{debug, warn};

const SERVICE: &str = "artisan_market";
const USER: &str = "artisan_market_session";

fn file_fallback_enabled() -> bool {
    std::env::var("KEYRING_FALLBACK").unwrap_or_default() == "true"
}

fn fallback_path() -> PathBuf {
    PathBuf::from("data").join("session_token.txt")
}

/// Store the bearer token in the OS keyring.
///
/// With `KEYRING_FALLBACK=true` a plain file under `data/` is used when the
/// keyring is unavailable; otherwise the error goes back to the caller.
pub fn save_session_token(token: &str) -> anyhow::Result<()> {
    let entry = Entry::new(SERVICE, USER);
    match entry.set_password(token) {
        Ok(()) => {
            debug!("[SESSION_STORE] Token stored in keyring");
            Ok(())
        }
        Err(e) => {
            if !file_fallback_enabled() {
                return Err(anyhow::anyhow!("keyring unavailable ({}) and file fallback disabled", e));
            }
            let path = fallback_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, token)?;
            // never log the token itself
            warn!("[SESSION_STORE] Keyring unavailable, token persisted to {}", path.display());
            Ok(())
        }
    }
}

pub fn load_session_token() -> Option<String> {
    let entry = Entry::new(SERVICE, USER);
    match entry.get_password() {
        Ok(t) if !t.trim().is_empty() => Some(t),
        Ok(_) => None,
        Err(_) if file_fallback_enabled() => std::fs::read_to_string(fallback_path())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|t| !t.is_empty()),
        Err(_) => None,
    }
}

pub fn clear_session_token() -> anyhow::Result<()> {
    let entry = Entry::new(SERVICE, USER);
    let _ = entry.delete_password();
    if file_fallback_enabled() {
        let path = fallback_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
