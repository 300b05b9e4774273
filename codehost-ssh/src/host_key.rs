//! Persistent server host key

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;

/// Load the host key at `path`, generating and saving an Ed25519 key if
/// there is none yet
pub fn load_or_generate(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read host key {}", path.display()))?;
        let key = russh_keys::decode_secret_key(&pem, None)
            .with_context(|| format!("failed to decode host key {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded SSH host key");
        return Ok(key);
    }

    let key = KeyPair::generate_ed25519();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut pem = Vec::new();
    russh_keys::encode_pkcs8_pem(&key, &mut pem).context("failed to encode host key")?;
    write_private(path, &pem)
        .with_context(|| format!("failed to write host key {}", path.display()))?;

    tracing::info!(path = %path.display(), "generated SSH host key");
    Ok(key)
}

/// Create `path` readable by the owner only and write `contents`
///
/// The mode is set at creation, so the key is never readable by others.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh_keys::PublicKeyBase64;
    use tempfile::TempDir;

    #[test]
    fn test_generated_key_is_reloaded() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("keys/ssh_host_ed25519_key");

        let first = load_or_generate(&path).unwrap();
        assert!(path.exists());
        let second = load_or_generate(&path).unwrap();

        assert_eq!(
            first.clone_public_key().unwrap().public_key_base64(),
            second.clone_public_key().unwrap().public_key_base64()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_generated_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ssh_host_ed25519_key");
        load_or_generate(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_key_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ssh_host_ed25519_key");
        std::fs::write(&path, "not a key").unwrap();

        assert!(load_or_generate(&path).is_err());
    }
}
