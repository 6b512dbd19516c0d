//! Locating application default credentials

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use super::{Credential, MetadataServer};
use crate::error::{self, CredentialError};

/// Environment variable naming an explicit credentials file
pub const APPLICATION_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Environment variable overriding the SDK configuration directory
pub const SDK_CONFIG_ENV: &str = "CLOUDSDK_CONFIG";

const SDK_CREDENTIALS_FILE: &str = "application_default_credentials.json";

/// Resolves credentials from an explicit path, the environment, or the SDK configuration
///
/// Resolution order:
///
/// 1. `explicit`, if provided
/// 2. the file named by `GOOGLE_APPLICATION_CREDENTIALS`
/// 3. `application_default_credentials.json` in `CLOUDSDK_CONFIG`
/// 4. `application_default_credentials.json` in the platform's default SDK
///    configuration directory
///
/// Failing to read or parse a file chosen by any of the first three is an
/// error. If the default SDK file is absent or unusable, the platform
/// metadata server is used instead.
pub fn discover(explicit: Option<&Path>) -> Result<Credential, CredentialError> {
    discover_with(explicit, |key| std::env::var_os(key), cfg!(windows))
}

/// Resolves credentials as [`discover`] does, using `lookup` to read the environment
pub fn discover_with<F>(
    explicit: Option<&Path>,
    lookup: F,
    windows: bool,
) -> Result<Credential, CredentialError>
where
    F: Fn(&str) -> Option<OsString>,
{
    let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

    let (path, set_explicitly) = if let Some(path) = explicit {
        (path.to_owned(), true)
    } else if let Some(path) = var(APPLICATION_CREDENTIALS_ENV) {
        (PathBuf::from(path), true)
    } else if let Some(dir) = var(SDK_CONFIG_ENV) {
        (PathBuf::from(dir).join(SDK_CREDENTIALS_FILE), true)
    } else if let Some(dir) = default_sdk_dir(&var, windows) {
        (dir.join(SDK_CREDENTIALS_FILE), false)
    } else {
        tracing::debug!("no SDK configuration directory, using the metadata server");
        return Ok(Credential::Metadata(MetadataServer::default()));
    };

    let result = std::fs::read(&path)
        .map_err(|e| error::unreadable(&path, e))
        .and_then(|json| Credential::from_json(&json));

    match result {
        Ok(credential) => {
            tracing::debug!(
                path = %path.display(),
                credential.kind = credential.kind(),
                "loaded credentials"
            );
            Ok(credential)
        }
        Err(error) if set_explicitly => Err(error),
        Err(error) => {
            tracing::debug!(
                path = %path.display(),
                %error,
                "no usable SDK credentials, using the metadata server"
            );
            Ok(Credential::Metadata(MetadataServer::default()))
        }
    }
}

fn default_sdk_dir(var: &impl Fn(&str) -> Option<OsString>, windows: bool) -> Option<PathBuf> {
    if windows {
        let dir = match var("APPDATA") {
            Some(app_data) => PathBuf::from(app_data),
            None => {
                let mut drive = var("SystemDrive").unwrap_or_else(|| OsString::from("C:"));
                drive.push("\\");
                PathBuf::from(drive)
            }
        };
        Some(dir.join("gcloud"))
    } else {
        var("HOME").map(|home| PathBuf::from(home).join(".config").join("gcloud"))
    }
}
