//! Destination naming for uploaded exports.
//!
//! With overwrite enabled the requested filename is used as-is and replaces
//! any existing object. With overwrite disabled a millisecond timestamp is
//! inserted before the extension so each delivery lands in a new object.

use std::time::{SystemTime, UNIX_EPOCH};

/// Whether an upload may replace an existing object of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    #[default]
    Overwrite,
    Unique,
}

impl OverwritePolicy {
    /// Interpret the `overwrite` form parameter.
    ///
    /// Only the exact value `"no"` disables overwriting; anything else,
    /// including a missing parameter, keeps the default.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("no") => OverwritePolicy::Unique,
            _ => OverwritePolicy::Overwrite,
        }
    }
}

/// Compute the object key for `filename` under `policy`.
///
/// ```
/// use gcs_upload_action::transfer::{resolve_object_name, OverwritePolicy};
///
/// assert_eq!(
///     resolve_object_name("report.csv", OverwritePolicy::Unique, 1700000000000),
///     "report_1700000000000.csv"
/// );
/// assert_eq!(
///     resolve_object_name("report.csv", OverwritePolicy::Overwrite, 1700000000000),
///     "report.csv"
/// );
/// ```
pub fn resolve_object_name(filename: &str, policy: OverwritePolicy, timestamp_millis: u64) -> String {
    match policy {
        OverwritePolicy::Overwrite => filename.to_string(),
        OverwritePolicy::Unique => match filename.rsplit_once('.') {
            Some((stem, extension)) => format!("{}_{}.{}", stem, timestamp_millis, extension),
            None => format!("{}_{}", filename, timestamp_millis),
        },
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
