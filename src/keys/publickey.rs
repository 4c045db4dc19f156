//! SSH public keys and authorized_keys entries
//!
//! Only the single-line OpenSSH format is understood:
//! `<header> <key> [owner[@origin]]`, optionally prefixed with a
//! comma-separated list of options in authorized_keys.

use crate::error::{IoResultExt, MercurioError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Key types recognized in public keys and authorized_keys entries
pub const SUPPORTED_HEADERS: [&str; 6] = [
    "ssh-rsa",
    "ssh-dss",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
];

/// An SSH public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Key type, e.g. `ssh-ed25519`
    pub header: String,
    /// Base64 key material
    pub key: String,
    /// Owner, taken from the comment
    pub owner: Option<String>,
    /// Origin host, when the comment reads `owner@origin`
    pub origin: Option<String>,
}

impl PublicKey {
    /// Create a key without a comment
    pub fn new(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            key: key.into(),
            owner: None,
            origin: None,
        }
    }

    /// Load a key from the first line of a key file
    ///
    /// `.pub` is appended to `path` when it does not already end with it,
    /// so the private key's path can be given.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = public_key_path(path.as_ref());
        let content = std::fs::read_to_string(&path).with_path(&path)?;
        let line = content.lines().next().unwrap_or_default();
        line.trim().parse()
    }
}

/// Path of the public half of a key pair
fn public_key_path(path: &Path) -> PathBuf {
    if path.to_string_lossy().ends_with(".pub") {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(".pub");
        PathBuf::from(name)
    }
}

impl FromStr for PublicKey {
    type Err = MercurioError;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (header, rest) = match line.split_once(char::is_whitespace) {
            Some((header, rest)) if !rest.trim().is_empty() => (header, rest.trim_start()),
            _ => return Err(MercurioError::KeyFormat(format!("Unknown keyfile format '{line}'"))),
        };

        if !SUPPORTED_HEADERS.contains(&header) {
            return Err(MercurioError::KeyFormat(format!(
                "Unrecognized keyfile header '{header}'"
            )));
        }

        let (key, comment) = match rest.split_once(char::is_whitespace) {
            Some((key, comment)) => (key, comment.trim()),
            None => (rest, ""),
        };

        let (owner, origin) = match comment.split('@').collect::<Vec<_>>().as_slice() {
            [""] => (None, None),
            [owner, origin] => (Some(owner.to_string()), Some(origin.to_string())),
            _ => (Some(comment.to_string()), None),
        };

        Ok(Self {
            header: header.to_string(),
            key: key.to_string(),
            owner,
            origin,
        })
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.header, self.key)?;

        let owner = self.owner.as_deref().unwrap_or_default();
        match &self.origin {
            Some(origin) => write!(f, " {owner}@{origin}"),
            None if !owner.is_empty() => write!(f, " {owner}"),
            None => Ok(()),
        }
    }
}

/// One entry of an authorized_keys file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKeyEntry {
    /// Options restricting what the key may do; never contains empty items
    pub options: Vec<String>,
    /// The authorized key
    pub public_key: PublicKey,
}

impl AuthorizedKeyEntry {
    /// Create an entry, dropping empty options
    pub fn new<I, S>(public_key: PublicKey, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: options
                .into_iter()
                .map(Into::into)
                .filter(|opt: &String| !opt.is_empty())
                .collect(),
            public_key,
        }
    }

    /// Whether one of the options starts with `prefix`
    pub fn has_option_prefix(&self, prefix: &str) -> bool {
        self.options.iter().any(|opt| opt.starts_with(prefix))
    }
}

impl FromStr for AuthorizedKeyEntry {
    type Err = MercurioError;

    fn from_str(line: &str) -> Result<Self> {
        // Options may quote arbitrary text, so the key starts at the last
        // occurrence of its header.
        for header in SUPPORTED_HEADERS {
            if let Some(index) = line.rfind(header) {
                let (options, key) = line.split_at(index);
                let public_key = key.parse()?;
                return Ok(Self::new(public_key, options.trim().split(',')));
            }
        }

        Err(MercurioError::KeyFormat(format!("Unrecognized entry format '{line}'")))
    }
}

impl fmt::Display for AuthorizedKeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.options.is_empty() {
            write!(f, "{}", self.public_key)
        } else {
            write!(f, "{} {}", self.options.join(","), self.public_key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIDJm3Qm0y1L7hIuF2v1b0u6VxJm4CkqfZk2hT8Rkq1oM";

    #[test]
    fn test_bare_key() {
        let line = format!("ssh-ed25519 {KEY}");
        let key: PublicKey = line.parse().unwrap();

        assert_eq!(key.header, "ssh-ed25519");
        assert_eq!(key.key, KEY);
        assert!(key.owner.is_none());
        assert!(key.origin.is_none());
        assert_eq!(key.to_string(), line);
    }

    #[test]
    fn test_key_with_owner() {
        let line = format!("ssh-rsa {KEY} alice");
        let key: PublicKey = line.parse().unwrap();

        assert_eq!(key.owner.as_deref(), Some("alice"));
        assert!(key.origin.is_none());
        assert_eq!(key.to_string(), line);
    }

    #[test]
    fn test_key_with_owner_and_origin() {
        let line = format!("ecdsa-sha2-nistp384 {KEY} alice@lab-42");
        let key: PublicKey = line.parse().unwrap();

        assert_eq!(key.owner.as_deref(), Some("alice"));
        assert_eq!(key.origin.as_deref(), Some("lab-42"));
        assert_eq!(key.to_string(), line);
    }

    #[test]
    fn test_comment_with_several_at_signs_is_the_owner() {
        let key: PublicKey = format!("ssh-dss {KEY} a@b@c").parse().unwrap();
        assert_eq!(key.owner.as_deref(), Some("a@b@c"));
        assert!(key.origin.is_none());
    }

    #[test]
    fn test_every_supported_header() {
        for header in SUPPORTED_HEADERS {
            let key: PublicKey = format!("{header} {KEY}").parse().unwrap();
            assert_eq!(key.header, header);
        }
    }

    #[test]
    fn test_not_a_public_key() {
        assert!("".parse::<PublicKey>().is_err());
        assert!("ssh-ed25519".parse::<PublicKey>().is_err());
        assert!("just some words in a file".parse::<PublicKey>().is_err());
        assert!("ssh-blob blob blob@blob".parse::<PublicKey>().is_err());
    }

    #[test]
    fn test_load_from_file_appends_pub() {
        let dir = TempDir::new().unwrap();
        let private = dir.path().join("id_ed25519");
        std::fs::write(dir.path().join("id_ed25519.pub"), format!("ssh-ed25519 {KEY} bob@host\n")).unwrap();

        let from_private = PublicKey::from_file(&private).unwrap();
        let from_public = PublicKey::from_file(dir.path().join("id_ed25519.pub")).unwrap();

        assert_eq!(from_private, from_public);
        assert_eq!(from_private.owner.as_deref(), Some("bob"));
    }

    #[test]
    fn test_load_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.pub");
        std::fs::write(&path, "").unwrap();

        assert!(matches!(PublicKey::from_file(&path), Err(MercurioError::KeyFormat(_))));
        assert!(matches!(
            PublicKey::from_file(dir.path().join("absent")),
            Err(MercurioError::Io { .. })
        ));
    }

    #[test]
    fn test_entry_without_options() {
        let key: PublicKey = format!("ssh-ed25519 {KEY} carol").parse().unwrap();
        let entry = AuthorizedKeyEntry::new(key.clone(), Vec::<String>::new());

        assert!(entry.options.is_empty());
        assert_eq!(entry.to_string(), key.to_string());

        let parsed: AuthorizedKeyEntry = entry.to_string().parse().unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_entry_with_options() {
        let options = [
            "command=\"/bin/rrsync ~/mercurio/carol\"",
            "no-pty",
            "no-X11-forwarding",
            "no-port-forwarding",
        ];
        let line = format!("{} ssh-ed25519 {KEY} carol@desk", options.join(","));

        let entry: AuthorizedKeyEntry = line.parse().unwrap();
        assert_eq!(entry.options, options);
        assert_eq!(entry.public_key.owner.as_deref(), Some("carol"));
        assert!(entry.has_option_prefix("command=\"/bin/rrsync "));
        assert_eq!(entry.to_string(), line);
    }

    #[test]
    fn test_entry_drops_empty_options() {
        let entry: AuthorizedKeyEntry = format!("no-pty,,  ssh-rsa {KEY}").parse().unwrap();
        assert_eq!(entry.options, vec!["no-pty"]);
    }

    #[test]
    fn test_entry_from_empty_line() {
        assert!("".parse::<AuthorizedKeyEntry>().is_err());
        assert!("# a comment".parse::<AuthorizedKeyEntry>().is_err());
    }
}
