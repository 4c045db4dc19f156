//! authorized_keys management
//!
//! `authorize` appends an entry restricting a key to rrsync under one
//! directory. `revoke` removes such entries, leaving every line it did not
//! write untouched.

use crate::config::expand_home;
use crate::error::{IoResultExt, MercurioError, Result};
use crate::keys::{AuthorizedKeyEntry, PublicKey};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Option prefix identifying the entries written by [`AuthorizedKeys::authorize`]
pub const MANAGED_OPTION_PREFIX: &str = "command=\"/bin/rrsync ";

/// Options added after the forced command
const RESTRICTIONS: [&str; 3] = ["no-port-forwarding", "no-X11-forwarding", "no-pty"];

/// Template of the directory an authorized key may use
///
/// `$owner` and `${owner}` are replaced by the key's owner, `$$` by `$`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTemplate {
    template: String,
}

impl DestinationTemplate {
    /// Wrap a template string
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The template as given
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Whether substitution needs an owner
    pub fn needs_owner(&self) -> bool {
        let mut rest = self.template.as_str();
        while let Some(index) = rest.find('$') {
            rest = &rest[index + 1..];
            if rest.starts_with('$') {
                rest = &rest[1..];
            } else if rest.starts_with("owner") || rest.starts_with("{owner}") {
                return true;
            }
        }
        false
    }

    /// Substitute the owner into the template
    pub fn substitute(&self, owner: Option<&str>) -> Result<String> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(index) = rest.find('$') {
            out.push_str(&rest[..index]);
            rest = &rest[index + 1..];

            if let Some(after) = rest.strip_prefix('$') {
                out.push('$');
                rest = after;
                continue;
            }

            let after = if let Some(after) = rest.strip_prefix("{owner}") {
                after
            } else if let Some(after) = rest.strip_prefix("owner") {
                if after.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(self.invalid_placeholder());
                }
                after
            } else {
                return Err(self.invalid_placeholder());
            };

            let owner = owner.ok_or_else(|| MercurioError::OwnerUnknown {
                template: self.template.clone(),
            })?;
            out.push_str(owner);
            rest = after;
        }

        out.push_str(rest);
        Ok(out)
    }

    fn invalid_placeholder(&self) -> MercurioError {
        MercurioError::config(format!(
            "invalid placeholder in '{}': only $owner is supported",
            self.template
        ))
    }
}

/// Result of a successful authorization
#[derive(Debug, Clone)]
pub struct Authorization {
    /// Entry appended to the file
    pub entry: AuthorizedKeyEntry,
    /// Destination directory, as written in the forced command
    pub destdir: String,
    /// Whether the owner was taken from the key's comment
    pub owner_guessed: bool,
}

/// Which entries to revoke
#[derive(Debug, Clone)]
pub enum KeySelector {
    /// Entries carrying this key material
    Key(PublicKey),
    /// Entries whose key comment names this owner
    Owner(String),
}

impl KeySelector {
    fn matches(&self, entry: &AuthorizedKeyEntry) -> bool {
        match self {
            Self::Key(key) => key.key == entry.public_key.key,
            Self::Owner(owner) => match &entry.public_key.owner {
                Some(entry_owner) => entry_owner == owner,
                None => {
                    tracing::warn!("could not guess the owner of {}", entry);
                    false
                }
            },
        }
    }
}

/// Result of a revocation
#[derive(Debug, Clone, Default)]
pub struct Revocation {
    /// Entries removed from the file
    pub revoked: Vec<AuthorizedKeyEntry>,
    /// Lines that could not be parsed and were kept as is
    pub unparsable: usize,
    /// Where the previous file was saved, when anything was revoked
    pub backup: Option<PathBuf>,
}

/// An authorized_keys file
#[derive(Debug, Clone)]
pub struct AuthorizedKeys {
    path: PathBuf,
}

impl AuthorizedKeys {
    /// Manage the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the managed file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the file being written during a revocation
    pub fn temporary_path(&self) -> PathBuf {
        with_suffix(&self.path, "~")
    }

    /// Path of the backup kept by a revocation
    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, "-")
    }

    /// Authorize `public_key` to run rrsync under the directory computed
    /// from `template`
    ///
    /// `owner` overrides the owner found in the key's comment. The
    /// destination directory is created once the entry is written.
    pub fn authorize(
        &self,
        mut public_key: PublicKey,
        template: &DestinationTemplate,
        owner: Option<&str>,
    ) -> Result<Authorization> {
        let mut owner_guessed = false;
        if let Some(owner) = owner {
            public_key.owner = Some(owner.to_string());
        } else if template.needs_owner() {
            match &public_key.owner {
                Some(owner) => {
                    tracing::info!("guessed the owner of the key: {}", owner);
                    owner_guessed = true;
                }
                None => {
                    return Err(MercurioError::OwnerUnknown {
                        template: template.as_str().to_string(),
                    })
                }
            }
        }

        let destdir = template.substitute(public_key.owner.as_deref())?;

        let mut options = vec![format!("{MANAGED_OPTION_PREFIX}{destdir}\"")];
        options.extend(RESTRICTIONS.iter().map(|opt| opt.to_string()));
        let entry = AuthorizedKeyEntry::new(public_key, options);

        let mut file = open_private(OpenOptions::new().read(true).append(true).create(true), &self.path)?;
        let mut content = String::new();
        file.read_to_string(&mut content).with_path(&self.path)?;

        if content.lines().any(|line| line.contains(&entry.public_key.key)) {
            return Err(MercurioError::AlreadyAuthorized {
                key: entry.public_key.key.clone(),
            });
        }

        let mut line = String::new();
        if !content.is_empty() && !content.ends_with('\n') {
            line.push('\n');
        }
        line.push_str(&entry.to_string());
        line.push('\n');
        file.write_all(line.as_bytes()).with_path(&self.path)?;
        file.sync_all().with_path(&self.path)?;

        let directory = expand_home(&destdir);
        create_destination(&directory)?;
        tracing::debug!("authorized {} under {}", entry.public_key, directory.display());

        Ok(Authorization {
            entry,
            destdir,
            owner_guessed,
        })
    }

    /// Remove every managed entry matching `selector`
    ///
    /// The new content is written to a temporary file first. When anything
    /// matched, the previous file is kept as a backup and the temporary
    /// file replaces it atomically; otherwise the file is left untouched.
    pub fn revoke(&self, selector: &KeySelector) -> Result<Revocation> {
        let content = fs::read_to_string(&self.path).with_path(&self.path)?;
        let temporary = self.temporary_path();

        let mut revocation = Revocation::default();
        let mut kept = String::with_capacity(content.len());

        for line in content.split_inclusive('\n') {
            let entry: AuthorizedKeyEntry = match line.trim_end().parse() {
                Ok(entry) => entry,
                Err(err) => {
                    if !line.trim().is_empty() {
                        tracing::warn!("{}", err);
                        revocation.unparsable += 1;
                    }
                    kept.push_str(line);
                    continue;
                }
            };

            if entry.has_option_prefix(MANAGED_OPTION_PREFIX) && selector.matches(&entry) {
                revocation.revoked.push(entry);
            } else {
                kept.push_str(line);
            }
        }

        {
            let mut file = open_private(OpenOptions::new().write(true).create(true).truncate(true), &temporary)?;
            file.write_all(kept.as_bytes()).with_path(&temporary)?;
            file.sync_all().with_path(&temporary)?;
        }

        if revocation.revoked.is_empty() {
            fs::remove_file(&temporary).with_path(&temporary)?;
            return Ok(revocation);
        }

        let backup = self.backup_path();
        backup_file(&self.path, &backup)?;
        fs::rename(&temporary, &self.path).with_path(&self.path)?;

        tracing::debug!("revoked {} key(s) from {}", revocation.revoked.len(), self.path.display());
        revocation.backup = Some(backup);
        Ok(revocation)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Open a file that is created with mode 0600
fn open_private(options: &mut OpenOptions, path: &Path) -> Result<File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).with_path(path)
}

/// Create the destination directory and its parents with mode 0755
fn create_destination(directory: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(directory).with_path(directory)
}

/// Copy `source` to `backup`, keeping its permissions and timestamps
fn backup_file(source: &Path, backup: &Path) -> Result<()> {
    fs::copy(source, backup).with_path(backup)?;

    let metadata = fs::metadata(source).with_path(source)?;
    let atime = filetime::FileTime::from_last_access_time(&metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(backup, atime, mtime).with_path(backup)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ALICE: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIAlice0000000000000000000000000000000000000";
    const BOB: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIBob000000000000000000000000000000000000000";

    fn key(material: &str, comment: &str) -> PublicKey {
        format!("ssh-ed25519 {material} {comment}").parse().unwrap()
    }

    fn template_in(dir: &TempDir) -> DestinationTemplate {
        DestinationTemplate::new(format!("{}/mercurio/$owner", dir.path().display()))
    }

    #[test]
    fn test_template_substitution() {
        let plain = DestinationTemplate::new("/srv/inbox");
        assert!(!plain.needs_owner());
        assert_eq!(plain.substitute(None).unwrap(), "/srv/inbox");

        let braced = DestinationTemplate::new("/srv/${owner}_data/$$x");
        assert!(braced.needs_owner());
        assert_eq!(braced.substitute(Some("dana")).unwrap(), "/srv/dana_data/$x");

        let escaped = DestinationTemplate::new("/srv/$$owner");
        assert!(!escaped.needs_owner());
        assert_eq!(escaped.substitute(None).unwrap(), "/srv/$owner");

        let unknown = DestinationTemplate::new("/srv/$user");
        assert!(matches!(unknown.substitute(Some("x")), Err(MercurioError::ConfigError(_))));

        let missing = DestinationTemplate::new("~/mercurio/$owner");
        assert!(matches!(missing.substitute(None), Err(MercurioError::OwnerUnknown { .. })));
    }

    #[test]
    fn test_authorize_appends_restricted_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("authorized_keys");
        std::fs::write(&path, format!("ssh-rsa {BOB} bob@laptop")).unwrap();

        let keys = AuthorizedKeys::new(&path);
        let template = template_in(&dir);
        let outcome = keys.authorize(key(ALICE, "alice@desk"), &template, None).unwrap();

        let destdir = format!("{}/mercurio/alice", dir.path().display());
        assert!(outcome.owner_guessed);
        assert_eq!(outcome.destdir, destdir);
        assert!(Path::new(&destdir).is_dir());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("ssh-rsa {BOB} bob@laptop"));
        assert_eq!(
            lines[1],
            format!(
                "command=\"/bin/rrsync {destdir}\",no-port-forwarding,no-X11-forwarding,no-pty ssh-ed25519 {ALICE} alice@desk"
            )
        );
    }

    #[test]
    fn test_authorize_owner_override() {
        let dir = TempDir::new().unwrap();
        let keys = AuthorizedKeys::new(dir.path().join("authorized_keys"));

        let outcome = keys.authorize(key(ALICE, "alice@desk"), &template_in(&dir), Some("carol")).unwrap();

        assert!(!outcome.owner_guessed);
        assert_eq!(outcome.entry.public_key.owner.as_deref(), Some("carol"));
        assert!(dir.path().join("mercurio/carol").is_dir());
    }

    #[test]
    fn test_authorize_unknown_owner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("authorized_keys");
        std::fs::write(&path, "").unwrap();
        let keys = AuthorizedKeys::new(&path);

        let bare = PublicKey::new("ssh-ed25519", ALICE);
        let err = keys.authorize(bare.clone(), &template_in(&dir), None).unwrap_err();
        assert!(matches!(err, MercurioError::OwnerUnknown { .. }));
        assert_eq!(err.exit_code(), 22);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        // A template without $owner does not need one
        let fixed = DestinationTemplate::new(format!("{}/shared", dir.path().display()));
        keys.authorize(bare, &fixed, None).unwrap();
        assert!(dir.path().join("shared").is_dir());
    }

    #[test]
    fn test_authorize_twice() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("authorized_keys");
        let keys = AuthorizedKeys::new(&path);
        let template = template_in(&dir);

        keys.authorize(key(ALICE, "alice"), &template, None).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let err = keys.authorize(key(ALICE, "alice"), &template, None).unwrap_err();
        assert!(matches!(err, MercurioError::AlreadyAuthorized { .. }));
        assert_eq!(err.exit_code(), 17);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    fn populated(dir: &TempDir) -> AuthorizedKeys {
        let keys = AuthorizedKeys::new(dir.path().join("authorized_keys"));
        std::fs::write(keys.path(), format!("# managed by hand\nssh-ed25519 {ALICE} alice@unmanaged\n")).unwrap();
        let template = template_in(dir);
        keys.authorize(key(BOB, "bob@desk"), &template, None).unwrap();
        keys.authorize(PublicKey::new("ssh-rsa", "AAAAB3Nza"), &template, Some("erin")).unwrap();
        keys
    }

    #[test]
    fn test_revoke_by_owner() {
        let dir = TempDir::new().unwrap();
        let keys = populated(&dir);
        let before = std::fs::read_to_string(keys.path()).unwrap();

        let revocation = keys.revoke(&KeySelector::Owner("bob".to_string())).unwrap();
        assert_eq!(revocation.revoked.len(), 1);
        assert_eq!(revocation.revoked[0].public_key.key, BOB);
        assert_eq!(revocation.unparsable, 1);

        let after = std::fs::read_to_string(keys.path()).unwrap();
        assert!(!after.contains(BOB));
        assert!(after.contains("# managed by hand"));
        assert!(after.contains("alice@unmanaged"));
        assert!(after.contains("AAAAB3Nza erin"));

        assert_eq!(revocation.backup.as_deref(), Some(keys.backup_path().as_path()));
        assert_eq!(std::fs::read_to_string(keys.backup_path()).unwrap(), before);
        assert!(!keys.temporary_path().exists());
    }

    #[test]
    fn test_revoke_by_key_ignores_unmanaged_entries() {
        let dir = TempDir::new().unwrap();
        let keys = populated(&dir);
        let before = std::fs::read_to_string(keys.path()).unwrap();

        // Alice's only entry was not written by authorize
        let revocation = keys.revoke(&KeySelector::Key(key(ALICE, "alice"))).unwrap();
        assert!(revocation.revoked.is_empty());
        assert!(revocation.backup.is_none());
        assert_eq!(std::fs::read_to_string(keys.path()).unwrap(), before);
        assert!(!keys.temporary_path().exists());
        assert!(!keys.backup_path().exists());
    }

    #[test]
    fn test_revoke_by_key() {
        let dir = TempDir::new().unwrap();
        let keys = populated(&dir);

        let revocation = keys.revoke(&KeySelector::Key(PublicKey::new("ssh-rsa", "AAAAB3Nza"))).unwrap();
        assert_eq!(revocation.revoked.len(), 1);
        assert_eq!(revocation.revoked[0].public_key.owner.as_deref(), Some("erin"));
        assert!(!std::fs::read_to_string(keys.path()).unwrap().contains("AAAAB3Nza"));
    }

    #[cfg(unix)]
    #[test]
    fn test_revoke_file_modes_and_backup_times() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let keys = populated(&dir);
        std::fs::set_permissions(keys.path(), std::fs::Permissions::from_mode(0o640)).unwrap();
        let old = filetime::FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(keys.path(), old).unwrap();

        keys.revoke(&KeySelector::Owner("erin".to_string())).unwrap();

        let backup = std::fs::metadata(keys.backup_path()).unwrap();
        assert_eq!(backup.permissions().mode() & 0o777, 0o640);
        assert_eq!(filetime::FileTime::from_last_modification_time(&backup), old);

        let current = std::fs::metadata(keys.path()).unwrap();
        assert_eq!(current.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_revoke_missing_file() {
        let dir = TempDir::new().unwrap();
        let keys = AuthorizedKeys::new(dir.path().join("absent"));
        assert!(matches!(
            keys.revoke(&KeySelector::Owner("x".to_string())),
            Err(MercurioError::Io { .. })
        ));
    }
}
