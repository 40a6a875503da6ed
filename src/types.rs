use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Relative prefix from a content context to the extension's packaged resources.
pub const PATH_PREFIX: &str = "../";

/// Browser family the extension is running in.
///
/// Resolved once by the owner when composing the [`crate::port::ConnectionManager`] and passed
/// in through [`crate::port::config::Config`], rather than being sniffed from globals at each use.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Browser {
    #[default]
    Chrome,
    Firefox,
}

impl Browser {
    /// Resolve the browser from which extension API namespaces are present.
    ///
    /// Firefox exposes `browser` without `chrome`; every other combination is treated as Chrome.
    #[must_use]
    pub const fn from_globals(has_browser: bool, has_chrome: bool) -> Self {
        if has_browser && !has_chrome {
            Self::Firefox
        } else {
            Self::Chrome
        }
    }

    #[must_use]
    pub const fn path_prefix() -> &'static str {
        PATH_PREFIX
    }
}

impl FromStr for Browser {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" => Ok(Self::Chrome),
            "firefox" => Ok(Self::Firefox),
            other => Err(Error::validation(format!("unknown browser {other:?}"))),
        }
    }
}
