//! Directory command - manage the user id -> public key registry.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use stegchat::crypto::{fingerprint, load_public_key};
use stegchat::exchange::directory::DirectoryEntry;

use super::{CliContext, CommandExecutor};

/// Manage known users and their public keys.
///
/// Users are stored in ~/.stegchat/directory.toml and can be used with
/// `hide --to <user>` instead of a key path.
#[derive(Args, Debug)]
pub struct DirectoryCommand {
    #[command(subcommand)]
    pub action: DirectoryAction,
}

#[derive(Subcommand, Debug)]
pub enum DirectoryAction {
    /// List all users
    List,

    /// Add a user
    Add(DirectoryAddArgs),

    /// Remove a user
    Remove(DirectoryUserArgs),

    /// Show a user's key and fingerprint
    Show(DirectoryUserArgs),
}

#[derive(Args, Debug)]
pub struct DirectoryAddArgs {
    /// User id
    pub user: String,

    /// Path to the user's public key (.pub)
    pub key_path: PathBuf,

    /// Replace an existing entry
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct DirectoryUserArgs {
    /// User id
    pub user: String,
}

impl CommandExecutor for DirectoryCommand {
    fn execute(&self, ctx: &CliContext) -> Result<()> {
        match &self.action {
            DirectoryAction::List => list_users(ctx),
            DirectoryAction::Add(args) => add_user(ctx, args),
            DirectoryAction::Remove(args) => remove_user(ctx, args),
            DirectoryAction::Show(args) => show_user(ctx, args),
        }
    }
}

fn list_users(ctx: &CliContext) -> Result<()> {
    let registry = ctx.registry()?;

    if registry.is_empty() {
        println!("No users registered.");
        println!();
        println!("Add one with:");
        println!("  stegchat directory add <user> <key-path>");
        return Ok(());
    }

    println!("Users ({}):", registry.len());
    println!();
    for (user, entry) in registry.list() {
        println!("  {}", user);
        println!("    Public key: {}", entry.public_key.display());
    }
    Ok(())
}

fn add_user(ctx: &CliContext, args: &DirectoryAddArgs) -> Result<()> {
    load_public_key(&args.key_path)
        .with_context(|| format!("Failed to load public key from {}", args.key_path.display()))?;

    let key_path = std::fs::canonicalize(&args.key_path)
        .with_context(|| format!("Failed to resolve {}", args.key_path.display()))?;
    let entry = DirectoryEntry::new(key_path);

    let mut registry = ctx.registry()?;
    if args.force {
        registry.upsert(&args.user, entry);
    } else {
        registry
            .add(&args.user, entry)
            .context("Use --force to replace the existing entry")?;
    }
    registry
        .save(&ctx.paths.directory_file())
        .context("Failed to save directory")?;

    println!("Added '{}'.", args.user);
    Ok(())
}

fn remove_user(ctx: &CliContext, args: &DirectoryUserArgs) -> Result<()> {
    let mut registry = ctx.registry()?;
    registry.remove(&args.user)?;
    registry
        .save(&ctx.paths.directory_file())
        .context("Failed to save directory")?;

    println!("Removed '{}'.", args.user);
    Ok(())
}

fn show_user(ctx: &CliContext, args: &DirectoryUserArgs) -> Result<()> {
    let registry = ctx.registry()?;
    let entry = registry
        .get(&args.user)
        .with_context(|| format!("User not found: {}", args.user))?;

    println!("User: {}", args.user);
    println!("  Public key:  {}", entry.public_key.display());
    match load_public_key(&entry.public_key) {
        Ok(key) => println!("  Fingerprint: {}", fingerprint(&key)),
        Err(e) => println!("  Fingerprint: unavailable ({})", e),
    }
    Ok(())
}
