use std::str::FromStr;

use crate::storage::Store;

/// Read a positive numeric setting from storage.
///
/// `None` when the key is absent, unparsable, not positive, or storage is
/// unavailable; the last three are logged so the caller's fallback is
/// visible.
pub async fn positive_setting<T>(store: &dyn Store, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = match store.get_setting(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key = key, error = %e, "Failed to read setting, using fallback");
            return None;
        }
    };

    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            tracing::warn!(key = key, value = %raw, "Ignoring invalid setting value");
            None
        }
    }
}
