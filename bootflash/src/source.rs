//! Firmware payload sources.
//!
//! The flash-job caller supplies locators (URLs or local paths); fetching is
//! a single best-effort attempt with no caching policy. Failures always name
//! the locator so the operator knows which image was unavailable.

use crate::error::Result;

/// Resolver turning a locator into firmware bytes.
pub trait FirmwareSource {
    /// Fetch the bytes behind `locator` (URL or local path).
    fn fetch(&mut self, locator: &str) -> Result<Vec<u8>>;
}

#[cfg(feature = "native")]
pub use native::NativeSource;

#[cfg(feature = "native")]
mod native {
    use std::time::Duration;

    use log::{debug, info};

    use super::FirmwareSource;
    use crate::error::{Error, Result};

    /// Timeout for a single firmware download.
    const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

    fn fetch_err(locator: &str, reason: impl ToString) -> Error {
        Error::Fetch {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Source for native platforms: HTTP(S) locators are downloaded with a
    /// bounded timeout, anything else is read from the filesystem.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NativeSource;

    impl NativeSource {
        /// Create a new source.
        pub fn new() -> Self {
            Self
        }
    }

    impl FirmwareSource for NativeSource {
        fn fetch(&mut self, locator: &str) -> Result<Vec<u8>> {
            let data = if locator.starts_with("http://") || locator.starts_with("https://") {
                debug!("Downloading {locator}");
                let client = reqwest::blocking::Client::builder()
                    .timeout(FETCH_TIMEOUT)
                    .build()
                    .map_err(|e| fetch_err(locator, e))?;
                let response = client
                    .get(locator)
                    .send()
                    .map_err(|e| fetch_err(locator, e))?;
                if !response.status().is_success() {
                    return Err(fetch_err(
                        locator,
                        format!("HTTP status {}", response.status()),
                    ));
                }
                response
                    .bytes()
                    .map_err(|e| fetch_err(locator, e))?
                    .to_vec()
            } else {
                debug!("Reading {locator}");
                std::fs::read(locator).map_err(|e| fetch_err(locator, e))?
            };

            info!("Fetched {locator} ({} bytes)", data.len());
            Ok(data)
        }
    }
}
