//! Key generation command.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use stegchat::crypto::KeyPair;
use stegchat::exchange::directory::DirectoryEntry;

use super::{CliContext, CommandExecutor};

/// Generate a new X25519 key pair.
///
/// Writes `<output>.pub` (share this) and `<output>.key` (keep this).
/// With `--user`, the public key is also registered in the directory and
/// the private key copied into the local key store.
#[derive(Args, Debug)]
pub struct KeygenCommand {
    /// Output path for keys (creates .pub and .key files)
    #[arg(short, long, default_value = "stegchat")]
    pub output: PathBuf,

    /// Register the new keys under this user id
    #[arg(short, long)]
    pub user: Option<String>,
}

impl CommandExecutor for KeygenCommand {
    fn execute(&self, ctx: &CliContext) -> Result<()> {
        let keypair = KeyPair::generate();
        keypair
            .save_to_files(&self.output)
            .context("Failed to save key pair")?;

        let pub_path = self.output.with_extension("pub");
        let key_path = self.output.with_extension("key");

        println!("Generated key pair:");
        println!("  Public key:  {}", pub_path.display());
        println!("  Private key: {}", key_path.display());
        println!("  Fingerprint: {}", keypair.fingerprint());

        if let Some(ref user) = self.user {
            self.register(ctx, user, &pub_path, &key_path)?;
        }

        println!();
        println!("Share the .pub file. Never share the .key file.");
        Ok(())
    }
}

impl KeygenCommand {
    fn register(
        &self,
        ctx: &CliContext,
        user: &str,
        pub_path: &std::path::Path,
        key_path: &std::path::Path,
    ) -> Result<()> {
        let pub_path = fs::canonicalize(pub_path)
            .with_context(|| format!("Failed to resolve {}", pub_path.display()))?;

        let mut registry = ctx.registry()?;
        registry.upsert(user, DirectoryEntry::new(pub_path));
        registry
            .save(&ctx.paths.directory_file())
            .context("Failed to save directory")?;

        let keys_dir = ctx.paths.keys_dir();
        fs::create_dir_all(&keys_dir)
            .with_context(|| format!("Failed to create {}", keys_dir.display()))?;
        let installed = keys_dir.join(format!("{}.key", user));
        fs::copy(key_path, &installed)
            .with_context(|| format!("Failed to install key into {}", installed.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&installed, fs::Permissions::from_mode(0o600))?;
        }

        println!();
        println!("Registered '{}':", user);
        println!("  Directory: {}", ctx.paths.directory_file().display());
        println!("  Key store: {}", installed.display());
        Ok(())
    }
}
