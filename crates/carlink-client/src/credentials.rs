//! Credential resolution
//!
//! Explicit config values win; anything missing is looked up in a
//! netrc-style secret store under a brand-specific machine name. The S-PIN
//! comes from the `account` field of the matched entry.

use std::fmt;
use std::path::{Path, PathBuf};

use carlink_core::{ConnectorError, ConnectorResult};

/// Resolved account credentials, immutable once built
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub spin: Option<String>,
    /// Where the credentials came from, for diagnostics ("config" or a path)
    pub source: Option<String>,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        spin: Option<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            spin,
            source: Some("config".to_string()),
        }
    }
}

// Secrets must never end up in logs, so Debug redacts everything but the
// username and source.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("spin", &self.spin.as_ref().map(|_| "***"))
            .field("source", &self.source)
            .finish()
    }
}

/// Credential-related configuration, as the host supplies it
#[derive(Debug, Clone, Default)]
pub struct CredentialConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub spin: Option<String>,
    /// Secret store path; defaults to `~/.netrc`
    pub netrc: Option<PathBuf>,
}

/// Resolve credentials from explicit config, falling back to the secret
/// store entry for `machine`.
pub fn resolve_credentials(
    config: &CredentialConfig,
    machine: &str,
) -> ConnectorResult<Credentials> {
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        return Ok(Credentials {
            username: username.clone(),
            password: password.clone(),
            spin: config.spin.clone(),
            source: Some("config".to_string()),
        });
    }

    let path = match &config.netrc {
        Some(path) => path.clone(),
        None => default_netrc_path().ok_or_else(|| {
            ConnectorError::Credential(
                "username/password not configured and no home directory for .netrc".to_string(),
            )
        })?,
    };

    let entry = lookup_machine(&path, machine)?.ok_or_else(|| {
        ConnectorError::Credential(format!(
            "machine '{}' not found in {}; create it or provide username and password in config",
            machine,
            path.display()
        ))
    })?;

    let username = config
        .username
        .clone()
        .or(entry.login)
        .ok_or_else(|| ConnectorError::Credential(format!("login missing for '{machine}'")))?;
    let password = config
        .password
        .clone()
        .or(entry.password)
        .ok_or_else(|| ConnectorError::Credential(format!("password missing for '{machine}'")))?;
    // Explicit spin wins; the netrc account field is the fallback.
    let spin = config.spin.clone().or(entry.account);

    Ok(Credentials {
        username,
        password,
        spin,
        source: Some(path.display().to_string()),
    })
}

fn default_netrc_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| Path::new(&home).join(".netrc"))
}

/// One parsed `machine` entry
#[derive(Debug, Default)]
struct NetrcEntry {
    login: Option<String>,
    password: Option<String>,
    account: Option<String>,
}

/// Minimal netrc parser: whitespace-separated `machine <name>` entries with
/// `login`, `password` and `account` fields.
fn lookup_machine(path: &Path, machine: &str) -> ConnectorResult<Option<NetrcEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConnectorError::Credential(format!("could not read {}: {}", path.display(), e))
    })?;

    let mut tokens = content.split_whitespace();
    let mut entry: Option<NetrcEntry> = None;
    while let Some(token) = tokens.next() {
        match token {
            "machine" => {
                let name = tokens.next();
                if entry.is_some() {
                    // Entry for the requested machine is complete.
                    break;
                }
                if name == Some(machine) {
                    entry = Some(NetrcEntry::default());
                }
            }
            "login" | "password" | "account" => {
                let value = tokens.next().map(|v| v.to_string());
                if let Some(current) = entry.as_mut() {
                    match token {
                        "login" => current.login = value,
                        "password" => current.password = value,
                        _ => current.account = value,
                    }
                }
            }
            "default" => {
                if entry.is_some() {
                    break;
                }
            }
            _ => {}
        }
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_netrc(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn explicit_config_wins() {
        let config = CredentialConfig {
            username: Some("explicit".into()),
            password: Some("pw".into()),
            spin: Some("1234".into()),
            netrc: None,
        };
        let creds = resolve_credentials(&config, "carlink-cupra").unwrap();
        assert_eq!(creds.username, "explicit");
        assert_eq!(creds.spin.as_deref(), Some("1234"));
        assert_eq!(creds.source.as_deref(), Some("config"));
    }

    #[test]
    fn netrc_fallback_with_account_spin() {
        let file = write_netrc(
            "machine other login x password y\n\
             machine carlink-cupra login user@example.com password hunter2 account 9876\n",
        );
        let config = CredentialConfig {
            netrc: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let creds = resolve_credentials(&config, "carlink-cupra").unwrap();
        assert_eq!(creds.username, "user@example.com");
        assert_eq!(creds.password, "hunter2");
        assert_eq!(creds.spin.as_deref(), Some("9876"));
    }

    #[test]
    fn explicit_spin_overrides_netrc_account() {
        let file = write_netrc("machine carlink-cupra login u password p account 1111\n");
        let config = CredentialConfig {
            spin: Some("2222".into()),
            netrc: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let creds = resolve_credentials(&config, "carlink-cupra").unwrap();
        assert_eq!(creds.spin.as_deref(), Some("2222"));
    }

    #[test]
    fn missing_machine_is_a_credential_error() {
        let file = write_netrc("machine unrelated login a password b\n");
        let config = CredentialConfig {
            netrc: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let err = resolve_credentials(&config, "carlink-cupra").unwrap_err();
        assert!(matches!(err, ConnectorError::Credential(_)));
    }

    #[test]
    fn missing_file_is_a_credential_error() {
        let config = CredentialConfig {
            netrc: Some(PathBuf::from("/nonexistent/.netrc")),
            ..Default::default()
        };
        let err = resolve_credentials(&config, "carlink-cupra").unwrap_err();
        assert!(matches!(err, ConnectorError::Credential(_)));
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials::new("user", "topsecret", Some("1234".into()));
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("topsecret"));
        assert!(!rendered.contains("1234"));
    }
}
