//! The on-disk account store.
//!
//! A single Deflate-compressed binary file: `u16` account count, then
//! per account a `u16`-length-framed record. The framing lets a corrupt
//! record be skipped without losing the rest of the file; truncation
//! that makes further records unlocatable ends the load with whatever
//! was read. Entries are deduplicated by account identity, first
//! occurrence wins, insertion order preserved.
//!
//! Saves go through a temp file in the same directory plus an atomic
//! rename, so a crash mid-save leaves the previous store intact.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use relog_core::{err, info, IntoIoError, RELOG_DIR};
use thiserror::Error;
use uuid::Uuid;

use crate::account::{offline_uuid, Account, MicrosoftAccount, OfflineAccount};
use crate::crypt::EncryptedBlob;

const STORE_FILE: &str = "accounts_v1.bin";
const README_FILE: &str = "README.txt";
const README_TEXT: &str = "\
This directory holds your saved accounts, including encrypted login
credentials. NEVER send these files to anyone and NEVER upload them
anywhere. Anyone with this file and your password (or your machine)
can log into your accounts.\n";

const TAG_MICROSOFT: &str = "microsoft_v1";
const TAG_OFFLINE: &str = "offline_v1";
/// Legacy offline records stored only the name; the id is re-derived.
const TAG_OFFLINE_V0: &str = "offline_v0";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] relog_core::IoError),
    /// Only produced on save; a single account record never exceeds
    /// the `u16` framing.
    #[error("account record too large to store")]
    RecordTooLarge,
}

pub struct AccountStore {
    accounts: Vec<Account>,
    path: PathBuf,
}

impl AccountStore {
    /// Loads the store from the default location
    /// (`RELOG_DIR/accounts/accounts_v1.bin`).
    pub async fn load_default() -> Result<Self, StoreError> {
        Self::load(RELOG_DIR.join("accounts").join(STORE_FILE)).await
    }

    /// Loads the store at `path`. A missing file is an empty store;
    /// corrupt entries are skipped and logged, they never fail a load.
    pub async fn load(path: PathBuf) -> Result<Self, StoreError> {
        let compressed = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    accounts: Vec::new(),
                    path,
                });
            }
            Err(error) => {
                return Err(relog_core::IoError { error, path }.into());
            }
        };

        let mut raw = Vec::new();
        if let Err(error) = DeflateDecoder::new(compressed.as_slice()).read_to_end(&mut raw) {
            err!("Account store is not readable ({error}), starting empty");
            return Ok(Self {
                accounts: Vec::new(),
                path,
            });
        }

        let accounts = decode_store(&raw);
        info!("Loaded {} account(s)", accounts.len());
        Ok(Self { accounts, path })
    }

    /// Serializes, compresses and atomically replaces the store file.
    pub async fn save(&self) -> Result<(), StoreError> {
        let raw = encode_store(&self.accounts)?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(dir).await.path(dir)?;
        write_readme(dir).await?;

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).path(&self.path)?;
        let compressed = encoder.finish().path(&self.path)?;

        let temp = tempfile::NamedTempFile::new_in(dir).path(dir)?;
        let mut file = temp.as_file();
        file.write_all(&compressed).path(temp.path())?;
        file.sync_all().path(temp.path())?;
        temp.persist(&self.path)
            .map_err(|error| relog_core::IoError {
                error: error.error,
                path: self.path.clone(),
            })?;
        Ok(())
    }

    #[must_use]
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Adds an account unless one with the same identity exists.
    /// Returns whether the store changed.
    pub fn add(&mut self, account: Account) -> bool {
        if self.accounts.contains(&account) {
            return false;
        }
        self.accounts.push(account);
        true
    }

    /// Replaces the entry with the same identity, keeping its position.
    /// Returns whether an entry was replaced.
    pub fn update(&mut self, account: Account) -> bool {
        match self.accounts.iter_mut().find(|a| **a == account) {
            Some(slot) => {
                *slot = account;
                true
            }
            None => false,
        }
    }

    /// Removes the entry with the same identity. Returns whether an
    /// entry was removed.
    pub fn remove(&mut self, account: &Account) -> bool {
        let before = self.accounts.len();
        self.accounts.retain(|a| a != account);
        self.accounts.len() != before
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id() == id)
    }
}

async fn write_readme(dir: &Path) -> Result<(), StoreError> {
    let readme = dir.join(README_FILE);
    if tokio::fs::try_exists(&readme).await.path(&readme)? {
        return Ok(());
    }
    tokio::fs::write(&readme, README_TEXT).await.path(&readme)?;
    Ok(())
}

fn encode_store(accounts: &[Account]) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::new();
    let count = u16::try_from(accounts.len()).map_err(|_| StoreError::RecordTooLarge)?;
    out.extend_from_slice(&count.to_le_bytes());
    for account in accounts {
        let record = encode_account(account)?;
        let len = u16::try_from(record.len()).map_err(|_| StoreError::RecordTooLarge)?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&record);
    }
    Ok(out)
}

fn encode_account(account: &Account) -> Result<Vec<u8>, StoreError> {
    let mut record = Vec::new();
    match account {
        Account::Offline(offline) => {
            put_str(&mut record, TAG_OFFLINE)?;
            record.extend_from_slice(offline.id.as_bytes());
            put_str(&mut record, &offline.name)?;
        }
        Account::Microsoft(ms) => {
            put_str(&mut record, TAG_MICROSOFT)?;
            record.extend_from_slice(ms.id.as_bytes());
            put_str(&mut record, &ms.name)?;
            put_str(&mut record, &ms.data.crypt_type)?;
            put_bytes(&mut record, &ms.data.payload)?;
        }
    }
    Ok(record)
}

fn decode_store(raw: &[u8]) -> Vec<Account> {
    let mut reader = Reader::new(raw);
    let Some(count) = reader.u16() else {
        err!("Account store has no header, starting empty");
        return Vec::new();
    };

    let mut accounts: Vec<Account> = Vec::with_capacity(usize::from(count));
    for index in 0..count {
        let Some(len) = reader.u16() else {
            err!(
                "Account store truncated at entry {index}, keeping {} account(s)",
                accounts.len()
            );
            break;
        };
        let Some(record) = reader.bytes(usize::from(len)) else {
            err!(
                "Account store truncated at entry {index}, keeping {} account(s)",
                accounts.len()
            );
            break;
        };
        let Some(account) = decode_account(record) else {
            err!("Skipping corrupt account entry {index}");
            continue;
        };
        // First occurrence wins.
        if accounts.contains(&account) {
            continue;
        }
        accounts.push(account);
    }
    accounts
}

fn decode_account(record: &[u8]) -> Option<Account> {
    let mut reader = Reader::new(record);
    let tag = reader.string()?;
    let account = match tag.as_str() {
        TAG_OFFLINE => {
            let id = reader.uuid()?;
            let name = reader.string()?;
            Account::Offline(OfflineAccount { id, name })
        }
        TAG_OFFLINE_V0 => {
            let name = reader.string()?;
            Account::Offline(OfflineAccount {
                id: offline_uuid(&name),
                name,
            })
        }
        TAG_MICROSOFT => {
            let id = reader.uuid()?;
            let name = reader.string()?;
            let crypt_type = reader.string()?;
            let payload = reader.blob()?.to_vec();
            Account::Microsoft(MicrosoftAccount::new(
                id,
                name,
                EncryptedBlob::new(crypt_type, payload),
            ))
        }
        _ => return None,
    };
    // Trailing garbage means the record is not what it claims to be.
    if !reader.done() {
        return None;
    }
    Some(account)
}

fn put_str(out: &mut Vec<u8>, value: &str) -> Result<(), StoreError> {
    put_bytes(out, value.as_bytes())
}

fn put_bytes(out: &mut Vec<u8>, value: &[u8]) -> Result<(), StoreError> {
    let len = u16::try_from(value.len()).map_err(|_| StoreError::RecordTooLarge)?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value);
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.bytes(2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.data.len() < len {
            return None;
        }
        let (taken, rest) = self.data.split_at(len);
        self.data = rest;
        Some(taken)
    }

    fn blob(&mut self) -> Option<&'a [u8]> {
        let len = self.u16()?;
        self.bytes(usize::from(len))
    }

    fn string(&mut self) -> Option<String> {
        let bytes = self.blob()?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn uuid(&mut self) -> Option<Uuid> {
        let bytes = self.bytes(16)?;
        Uuid::from_slice(bytes).ok()
    }

    fn done(&self) -> bool {
        self.data.is_empty()
    }
}
