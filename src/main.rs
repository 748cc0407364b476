//! keystash CLI application.
//!
//! This binary provides a command-line interface for creating, importing,
//! exporting and signing with passphrase-protected Ed25519 keys.

use clap::{Parser, Subcommand};
use ed25519_dalek::Signature;
use keystash::crypto::ed25519::{public_key_from_hex, verify};
use keystash::error::{KeyStashError, Result};
use keystash::{AccountId, KeyStash, RawKeyMaterial, SecretStorage, StoreConfig, StoreKind};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "keystash")]
#[command(about = "keystash: passphrase-protected Ed25519 key storage", long_about = None)]
struct Cli {
    /// Store lifecycle: durable, in-memory or volatile
    #[arg(long, global = true, env = "KEYSTASH_KIND", default_value = "durable")]
    kind: StoreKind,

    /// Backing file of the store
    #[arg(long, global = true, env = "KEYSTASH_PATH", default_value = "keystore.db")]
    path: PathBuf,

    /// Key passphrase (prompted for when not given)
    #[arg(long, global = true, env = "KEYSTASH_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and store a new key
    Create {
        /// Meta string stored with the key
        #[arg(long)]
        meta: Option<String>,
    },

    /// Import raw key material (hex seed || public key)
    ImportRaw {
        /// File containing the 64-byte key as hex
        #[arg(long)]
        file: PathBuf,

        /// Meta string stored with the key
        #[arg(long)]
        meta: Option<String>,
    },

    /// Import an encrypted key record
    Import {
        /// Record JSON file
        #[arg(long)]
        file: PathBuf,
    },

    /// Export the encrypted record of a key
    Export {
        account: AccountId,

        /// Optional output file (if not specified, prints to stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Export raw key material as hex
    ExportRaw {
        account: AccountId,

        /// Optional output file (if not specified, prints to stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the public key of a stored key
    PublicKey { account: AccountId },

    /// Print the meta string of a stored key
    Meta { account: AccountId },

    /// Delete a key
    Delete { account: AccountId },

    /// Sign a hex-encoded message
    Sign {
        account: AccountId,

        #[arg(long)]
        message: String,
    },

    /// Verify a hex-encoded signature against a public key
    Verify {
        #[arg(long)]
        public_key: String,

        #[arg(long)]
        message: String,

        #[arg(long)]
        signature: String,
    },

    /// List all stored account ids
    List,

    /// Write a backup of the whole store
    Backup {
        /// Optional output file (if not specified, prints to stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Replace the store contents with a backup
    Restore {
        #[arg(long)]
        file: PathBuf,
    },

    /// Remove all keys and store meta
    Clear,

    /// Report whether the store holds anything
    Exists,

    /// Get or set the store-level meta
    StoreMeta {
        /// New value; prints the current value when omitted
        value: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "keystash=debug"
    } else {
        "keystash=info"
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = StoreConfig {
        kind: cli.kind,
        path: cli.path,
    };

    match cli.command {
        Commands::Exists => {
            println!("{}", KeyStash::exists(&config)?);
            Ok(())
        }
        Commands::Verify {
            public_key,
            message,
            signature,
        } => handle_verify(&public_key, &message, &signature),
        command => {
            let mut stash = KeyStash::open(&config)?;
            handle_command(&mut stash, command, cli.passphrase.as_deref())?;
            stash.close()
        }
    }
}

fn handle_command(stash: &mut KeyStash, cmd: Commands, passphrase: Option<&str>) -> Result<()> {
    match cmd {
        Commands::Create { meta } => {
            let passphrase = read_passphrase(passphrase, "Enter passphrase to encrypt key: ")?;
            let account = stash
                .keystore()
                .create_key(Some(&passphrase), meta.as_deref())?;

            println!("Created key: {}", account);
            Ok(())
        }

        Commands::ImportRaw { file, meta } => {
            let raw = RawKeyMaterial::from_hex(fs::read_to_string(&file)?.trim())?;
            let passphrase = read_passphrase(passphrase, "Enter passphrase to encrypt key: ")?;
            let account = stash
                .keystore()
                .import_raw(&raw, Some(&passphrase), meta.as_deref())?;

            println!("Imported key: {}", account);
            Ok(())
        }

        Commands::Import { file } => {
            let record = SecretStorage::from_json(&fs::read_to_string(&file)?)?;
            let passphrase = read_passphrase(passphrase, "Enter passphrase of the record: ")?;
            let account = stash.keystore().import_key(&record, &passphrase)?;

            println!("Imported key: {}", account);
            Ok(())
        }

        Commands::Export { account, output } => {
            let passphrase = read_passphrase(passphrase, "Enter passphrase to decrypt key: ")?;
            let record = stash.keystore().export_key(&account, &passphrase)?;
            write_output(&record.to_json()?, output.as_deref())
        }

        Commands::ExportRaw { account, output } => {
            let passphrase = read_passphrase(passphrase, "Enter passphrase to decrypt key: ")?;
            let raw = stash.keystore().export_raw_key(&account, &passphrase)?;
            write_output(&raw.to_hex(), output.as_deref())
        }

        Commands::PublicKey { account } => {
            let passphrase = read_passphrase(passphrase, "Enter passphrase to decrypt key: ")?;
            match stash.keystore().get_public_key(&account, &passphrase)? {
                Some(public) => println!("{}", hex::encode(public.as_bytes())),
                None => println!("No key stored under {}", account),
            }
            Ok(())
        }

        Commands::Meta { account } => {
            println!("{}", stash.keystore().get_meta(&account)?);
            Ok(())
        }

        Commands::Delete { account } => {
            if stash.keystore().delete_key(&account)? {
                println!("Deleted key: {}", account);
            } else {
                println!("No key stored under {}", account);
            }
            Ok(())
        }

        Commands::Sign { account, message } => {
            let message = decode_hex_arg("message", &message)?;
            let passphrase = read_passphrase(passphrase, "Enter passphrase to decrypt key: ")?;
            let signature = stash.keystore().sign(&account, &message, &passphrase)?;

            println!("{}", hex::encode(signature.to_bytes()));
            Ok(())
        }

        Commands::List => {
            let keys = stash.keystore().get_keys();

            if keys.is_empty() {
                println!("No keys found in keystore.");
            } else {
                for key in keys {
                    println!("{}", key);
                }
            }
            Ok(())
        }

        Commands::Backup { output } => write_output(&stash.save()?, output.as_deref()),

        Commands::Restore { file } => {
            stash.load(&fs::read_to_string(&file)?)?;
            println!("Restored {} keys", stash.keystore().get_keys().len());
            Ok(())
        }

        Commands::Clear => {
            stash.clear()?;
            println!("Cleared key store");
            Ok(())
        }

        Commands::StoreMeta { value: Some(value) } => stash.set_meta(value),

        Commands::StoreMeta { value: None } => {
            println!("{}", stash.meta());
            Ok(())
        }

        Commands::Exists | Commands::Verify { .. } => Ok(()),
    }
}

fn handle_verify(public_key: &str, message: &str, signature: &str) -> Result<()> {
    let public = public_key_from_hex(public_key)?;
    let message = decode_hex_arg("message", message)?;
    let signature = Signature::from_slice(&decode_hex_arg("signature", signature)?)
        .map_err(|e| KeyStashError::Parse(format!("Invalid signature: {}", e)))?;

    verify(&public, &message, &signature)?;
    println!("Signature is valid");
    Ok(())
}

fn read_passphrase(given: Option<&str>, prompt: &str) -> Result<String> {
    match given {
        Some(passphrase) => Ok(passphrase.to_string()),
        None => Ok(rpassword::prompt_password(prompt)?),
    }
}

fn decode_hex_arg(name: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| KeyStashError::Parse(format!("Invalid {} hex: {}", name, e)))
}

fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, content)?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}
