use crate::core::models::RevokeReason;
use crate::core::types::{TokenHash, UserUuid};
use crate::db::{DbStore, DurableStore, StoreError};
use crate::util::clock::{Clock, SystemClock};
use crate::util::random::random_bytes;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use clap::Parser;

#[derive(Parser)]
#[clap(
    name = "kagi-util",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS")
)]
pub struct Options {
    #[clap(long, env = "DATABASE_URL")]
    database_url: Option<String>,
    #[clap(long, env = "KAGI_RETENTION_SECS", default_value = "2592000")]
    retention_secs: u64,
    #[clap(subcommand)]
    command: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    Migrate,
    Sweep,
    /// Revoke every refresh token of a user in the database. Cached access
    /// tokens stay valid until they expire, at most the access TTL
    RevokeUser(RevokeUser),
    /// Revoke one refresh token in the database. Access tokens minted from it
    /// stay valid until they expire, at most the access TTL
    RevokeToken(RevokeToken),
    GenerateKey(GenerateKey),
}

#[derive(Parser)]
struct RevokeUser {
    #[clap(short, long)]
    user: String,
    #[clap(short, long, default_value = "administrative")]
    reason: String,
}

#[derive(Parser)]
struct RevokeToken {
    /// Keyed hash of the refresh token, as it appears in logs and the database.
    #[clap(long)]
    hash: String,
    #[clap(short, long, default_value = "administrative")]
    reason: String,
}

#[derive(Parser)]
struct GenerateKey {
    /// Key length in bytes: 64 for the signing key, 32 for the encryption key.
    #[clap(short, long, default_value = "64")]
    bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("DATABASE_URL is required for this command")]
    MissingDatabase,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn get_database(opts: &Options) -> Result<DbStore, CliError> {
    let uri = opts.database_url.as_deref().ok_or(CliError::MissingDatabase)?;
    Ok(DbStore::acquire(uri)?)
}

fn migrate(opts: &Options) -> Result<(), CliError> {
    get_database(opts)?.migrate()?;
    Ok(())
}

async fn sweep(opts: &Options) -> Result<(), CliError> {
    let db = get_database(opts)?;
    let stats = db.sweep(SystemClock.now(), opts.retention_secs).await?;
    println!(
        "terminated {} codes, deleted {} codes and {} refresh tokens",
        stats.codes_terminated, stats.codes_deleted, stats.refresh_tokens_deleted
    );
    Ok(())
}

async fn revoke_user(c: &RevokeUser, opts: &Options) -> Result<(), CliError> {
    let db = get_database(opts)?;
    let reason = RevokeReason::from(c.reason.as_str());
    let revoked = db
        .revoke_all_for_user(&UserUuid(c.user.to_string()), reason.as_str(), SystemClock.now())
        .await?;
    println!("revoked {} refresh tokens", revoked.len());
    println!("cached access tokens expire on their own");
    Ok(())
}

async fn revoke_token(c: &RevokeToken, opts: &Options) -> Result<(), CliError> {
    let db = get_database(opts)?;
    let reason = RevokeReason::from(c.reason.as_str());
    let revoked = db
        .revoke_refresh_token(&TokenHash(c.hash.to_string()), reason.as_str(), SystemClock.now())
        .await?;
    match revoked {
        Some(record) => {
            println!("revoked refresh token of {}", record.user_uuid);
            println!("cached access tokens expire on their own");
        }
        None => println!("no active refresh token with that hash"),
    }
    Ok(())
}

fn generate_key(c: &GenerateKey) {
    println!("{}", URL_SAFE_NO_PAD.encode(random_bytes(c.bytes)));
}

pub async fn run_cli_action(opts: Options) -> Result<(), CliError> {
    use SubCommand::*;

    match &opts.command {
        Migrate => migrate(&opts),
        Sweep => sweep(&opts).await,
        RevokeUser(c) => revoke_user(c, &opts).await,
        RevokeToken(c) => revoke_token(c, &opts).await,
        GenerateKey(c) => {
            generate_key(c);
            Ok(())
        }
    }
}
