//! # BridgeDB: Authority State Store
//!
//! The persistence layer of one authority, built on sled's embedded
//! key-value store.
//!
//! ## Tree Layout
//!
//! | Tree                     | Key                                   | Value                              |
//! |--------------------------|---------------------------------------|------------------------------------|
//! | `mint_deposit_addresses` | mint address (lowercase UTF-8)        | `bincode(MintDepositAddressRecord)`|
//! | `deposit_index`          | deposit address (UTF-8)               | mint address key                   |
//! | `used_deposit_addresses` | individual deposit address (UTF-8)    | empty                              |
//! | `withdrawals`            | burn address ‖ 0x00 ‖ index (8B BE)   | `bincode(WithdrawalRecord)`        |
//!
//! Burn indexes are big-endian so a prefix scan over one burn address
//! returns its withdrawals in index order.
//!
//! The store itself enforces nothing about idempotency; the accounting
//! layer checks and writes under its write lock.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use std::path::Path;

use super::records::{MintDepositAddressRecord, StateDump, WithdrawalRecord};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

fn mint_key(mint_address: &str) -> Vec<u8> {
    mint_address.to_ascii_lowercase().into_bytes()
}

fn withdrawal_key(burn_address: &str, burn_index: u64) -> Vec<u8> {
    let mut key = burn_address.to_ascii_lowercase().into_bytes();
    key.push(0);
    key.extend_from_slice(&burn_index.to_be_bytes());
    key
}

// ---------------------------------------------------------------------------
// BridgeDB
// ---------------------------------------------------------------------------

/// sled handle plus the four named trees. Cheap to clone; all clones share
/// the same database.
#[derive(Debug, Clone)]
pub struct BridgeDB {
    db: Db,
    mint_deposit_addresses: Tree,
    deposit_index: Tree,
    used_deposit_addresses: Tree,
    withdrawals: Tree,
}

impl BridgeDB {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database dropped with the handle. For tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        Ok(Self {
            mint_deposit_addresses: db.open_tree("mint_deposit_addresses")?,
            deposit_index: db.open_tree("deposit_index")?,
            used_deposit_addresses: db.open_tree("used_deposit_addresses")?,
            withdrawals: db.open_tree("withdrawals")?,
            db,
        })
    }

    // -- Used deposit addresses ---------------------------------------------

    /// Whether any of `addresses` was part of an earlier registration.
    pub fn has_used_deposit_addresses(&self, addresses: &[String]) -> DbResult<bool> {
        for address in addresses {
            if self.used_deposit_addresses.contains_key(address.as_bytes())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn register_used_deposit_addresses(&self, addresses: &[String]) -> DbResult<()> {
        let mut batch = Batch::default();
        for address in addresses {
            batch.insert(address.as_bytes(), &[] as &[u8]);
        }
        self.used_deposit_addresses.apply_batch(batch)?;
        Ok(())
    }

    // -- Mint deposit addresses ---------------------------------------------

    /// Bind `mint_address` to `deposit_address` and mark `used` as spent
    /// candidates. All three trees change in one sled transaction.
    pub fn register_mint_deposit_address(
        &self,
        mint_address: &str,
        used: &[String],
        deposit_address: &str,
        redeem_script: &str,
    ) -> DbResult<MintDepositAddressRecord> {
        let record = MintDepositAddressRecord {
            mint_address: mint_address.to_string(),
            deposit_address: deposit_address.to_string(),
            redeem_script: redeem_script.to_string(),
            approved_tax: 0,
        };
        let key = mint_key(mint_address);
        let value = encode(&record)?;

        (
            &self.used_deposit_addresses,
            &self.mint_deposit_addresses,
            &self.deposit_index,
        )
            .transaction(|(used_tree, mints, index)| -> ConflictableTransactionResult<(), ()> {
                for address in used {
                    used_tree.insert(address.as_bytes(), &[] as &[u8])?;
                }
                mints.insert(key.as_slice(), value.as_slice())?;
                index.insert(deposit_address.as_bytes(), key.as_slice())?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => DbError::Sled(e),
                TransactionError::Abort(()) => {
                    DbError::Serialization("deposit address registration aborted".into())
                }
            })?;
        self.db.flush()?;
        Ok(record)
    }

    pub fn get_mint_deposit_record(
        &self,
        mint_address: &str,
    ) -> DbResult<Option<MintDepositAddressRecord>> {
        match self.mint_deposit_addresses.get(mint_key(mint_address))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_mint_deposit_address(&self, mint_address: &str) -> DbResult<Option<String>> {
        Ok(self
            .get_mint_deposit_record(mint_address)?
            .map(|r| r.deposit_address))
    }

    /// Every registered record.
    pub fn mint_deposit_records(&self) -> DbResult<Vec<MintDepositAddressRecord>> {
        self.mint_deposit_addresses
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    /// Records whose deposit address is among `deposit_addresses`. Unknown
    /// addresses are skipped.
    pub fn mint_deposit_records_for(
        &self,
        deposit_addresses: &[String],
    ) -> DbResult<Vec<MintDepositAddressRecord>> {
        let mut records = Vec::new();
        for address in deposit_addresses {
            let Some(mint) = self.deposit_index.get(address.as_bytes())? else {
                continue;
            };
            let bytes = self
                .mint_deposit_addresses
                .get(&mint)?
                .ok_or_else(|| DbError::NotFound(String::from_utf8_lossy(&mint).into_owned()))?;
            records.push(decode(&bytes)?);
        }
        Ok(records)
    }

    pub fn update_mint_deposit_records(&self, records: &[MintDepositAddressRecord]) -> DbResult<()> {
        let mut batch = Batch::default();
        for record in records {
            batch.insert(mint_key(&record.mint_address), encode(record)?);
        }
        self.mint_deposit_addresses.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    // -- Withdrawals ----------------------------------------------------------

    pub fn register_withdrawal(&self, burn_address: &str, burn_index: u64) -> DbResult<WithdrawalRecord> {
        let record = WithdrawalRecord::new(burn_address, burn_index);
        self.withdrawals
            .insert(withdrawal_key(burn_address, burn_index), encode(&record)?)?;
        self.db.flush()?;
        Ok(record)
    }

    pub fn get_withdrawal(&self, burn_address: &str, burn_index: u64) -> DbResult<Option<WithdrawalRecord>> {
        match self.withdrawals.get(withdrawal_key(burn_address, burn_index))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn withdrawals(&self) -> DbResult<Vec<WithdrawalRecord>> {
        self.withdrawals.iter().values().map(|v| decode(&v?)).collect()
    }

    /// Withdrawals that have not been paid out at all.
    pub fn unapproved_withdrawals(&self) -> DbResult<Vec<WithdrawalRecord>> {
        Ok(self
            .withdrawals()?
            .into_iter()
            .filter(WithdrawalRecord::is_unapproved)
            .collect())
    }

    pub fn update_withdrawals(&self, records: &[WithdrawalRecord]) -> DbResult<()> {
        let mut batch = Batch::default();
        for record in records {
            batch.insert(
                withdrawal_key(&record.burn_address, record.burn_index),
                encode(record)?,
            );
        }
        self.withdrawals.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    // -- Dump / reset ---------------------------------------------------------

    pub fn dump(&self) -> DbResult<StateDump> {
        let used_deposit_addresses = self
            .used_deposit_addresses
            .iter()
            .keys()
            .map(|k| Ok(String::from_utf8_lossy(&k?).into_owned()))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(StateDump {
            mint_deposit_addresses: self.mint_deposit_records()?,
            used_deposit_addresses,
            withdrawals: self.withdrawals()?,
        })
    }

    /// Replace all state with `dump`.
    pub fn reset(&self, dump: &StateDump) -> DbResult<()> {
        self.mint_deposit_addresses.clear()?;
        self.deposit_index.clear()?;
        self.used_deposit_addresses.clear()?;
        self.withdrawals.clear()?;

        let mut mints = Batch::default();
        let mut index = Batch::default();
        for record in &dump.mint_deposit_addresses {
            let key = mint_key(&record.mint_address);
            index.insert(record.deposit_address.as_bytes(), key.clone());
            mints.insert(key, encode(record)?);
        }
        self.mint_deposit_addresses.apply_batch(mints)?;
        self.deposit_index.apply_batch(index)?;
        self.register_used_deposit_addresses(&dump.used_deposit_addresses)?;
        self.update_withdrawals(&dump.withdrawals)?;
        self.db.flush()?;
        Ok(())
    }

    // -- Utility --------------------------------------------------------------

    pub fn mint_deposit_address_count(&self) -> usize {
        self.mint_deposit_addresses.len()
    }

    pub fn withdrawal_count(&self) -> usize {
        self.withdrawals.len()
    }

    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINT: &str = "0x00000000000000000000000000000000000A11CE";

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn open_temporary_database() {
        let db = BridgeDB::open_temporary().expect("should create temp db");
        assert_eq!(db.mint_deposit_address_count(), 0);
        assert_eq!(db.withdrawal_count(), 0);
    }

    #[test]
    fn persistent_database_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = BridgeDB::open(dir.path()).expect("should open db");
            db.register_mint_deposit_address(MINT, &[], "gM1", "52ae").unwrap();
            db.register_withdrawal("0xb0b", 0).unwrap();
        }
        let db = BridgeDB::open(dir.path()).expect("should reopen db");
        assert_eq!(db.get_mint_deposit_address(MINT).unwrap().as_deref(), Some("gM1"));
        assert!(db.get_withdrawal("0xb0b", 0).unwrap().is_some());
    }

    #[test]
    fn used_address_tracking() {
        let db = BridgeDB::open_temporary().unwrap();
        assert!(!db.has_used_deposit_addresses(&addrs(&["a", "b"])).unwrap());
        db.register_used_deposit_addresses(&addrs(&["a", "b"])).unwrap();
        assert!(db.has_used_deposit_addresses(&addrs(&["b", "c"])).unwrap());
        assert!(!db.has_used_deposit_addresses(&addrs(&["c"])).unwrap());
    }

    #[test]
    fn registration_marks_candidates_and_binds_together() {
        let db = BridgeDB::open_temporary().unwrap();
        let candidates = addrs(&["k1", "k2"]);
        let rec = db
            .register_mint_deposit_address(MINT, &candidates, "gM1", "52ae")
            .unwrap();
        assert!(db.has_used_deposit_addresses(&addrs(&["k2"])).unwrap());
        assert_eq!(db.get_mint_deposit_record(MINT).unwrap(), Some(rec));
        assert_eq!(db.mint_deposit_records_for(&addrs(&["gM1"])).unwrap().len(), 1);

        let dump = db.dump().unwrap();
        assert_eq!(dump.used_deposit_addresses, candidates);
        assert_eq!(dump.mint_deposit_addresses.len(), 1);
    }

    #[test]
    fn mint_lookup_is_case_insensitive() {
        let db = BridgeDB::open_temporary().unwrap();
        db.register_mint_deposit_address(MINT, &[], "gM1", "52ae").unwrap();
        let rec = db
            .get_mint_deposit_record(&MINT.to_ascii_lowercase())
            .unwrap()
            .unwrap();
        assert_eq!(rec.mint_address, MINT);
        assert_eq!(rec.approved_tax, 0);
    }

    #[test]
    fn records_by_deposit_address_skip_unknown() {
        let db = BridgeDB::open_temporary().unwrap();
        db.register_mint_deposit_address("0x01", &[], "gM1", "s1").unwrap();
        db.register_mint_deposit_address("0x02", &[], "gM2", "s2").unwrap();
        let found = db
            .mint_deposit_records_for(&addrs(&["gM2", "gUnknown"]))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].mint_address, "0x02");
        assert_eq!(db.mint_deposit_records().unwrap().len(), 2);
    }

    #[test]
    fn approved_tax_updates_persist() {
        let db = BridgeDB::open_temporary().unwrap();
        let mut rec = db.register_mint_deposit_address("0x01", &[], "gM1", "s1").unwrap();
        rec.approved_tax = 10_000_000;
        db.update_mint_deposit_records(&[rec.clone()]).unwrap();
        assert_eq!(db.get_mint_deposit_record("0x01").unwrap(), Some(rec));
    }

    #[test]
    fn withdrawals_and_unapproved_filter() {
        let db = BridgeDB::open_temporary().unwrap();
        db.register_withdrawal("0xb0b", 0).unwrap();
        let mut paid = db.register_withdrawal("0xb0b", 1).unwrap();
        db.register_withdrawal("0xca7", 0).unwrap();

        paid.approved_amount = 99;
        paid.approved_tax = 1;
        db.update_withdrawals(&[paid]).unwrap();

        assert_eq!(db.withdrawals().unwrap().len(), 3);
        let pending = db.unapproved_withdrawals().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|w| w.approved_amount == 0));
        assert!(db.get_withdrawal("0xB0B", 1).unwrap().unwrap().approved_tax == 1);
    }

    #[test]
    fn withdrawal_keys_order_by_index() {
        let db = BridgeDB::open_temporary().unwrap();
        for i in [300u64, 2, 17] {
            db.register_withdrawal("0xb0b", i).unwrap();
        }
        let indexes: Vec<u64> = db.withdrawals().unwrap().iter().map(|w| w.burn_index).collect();
        assert_eq!(indexes, vec![2, 17, 300]);
    }

    #[test]
    fn dump_and_reset_replace_everything() {
        let source = BridgeDB::open_temporary().unwrap();
        source.register_used_deposit_addresses(&addrs(&["k1", "k2"])).unwrap();
        source.register_mint_deposit_address("0x01", &[], "gM1", "s1").unwrap();
        source.register_withdrawal("0xb0b", 4).unwrap();
        let dump = source.dump().unwrap();

        let target = BridgeDB::open_temporary().unwrap();
        target.register_mint_deposit_address("0x99", &[], "gStale", "s").unwrap();
        target.reset(&dump).unwrap();

        assert_eq!(target.dump().unwrap(), dump);
        assert!(target.get_mint_deposit_record("0x99").unwrap().is_none());
        assert_eq!(
            target.mint_deposit_records_for(&addrs(&["gM1"])).unwrap().len(),
            1
        );
        assert!(target.has_used_deposit_addresses(&addrs(&["k2"])).unwrap());
    }

    #[test]
    fn dump_serializes_amounts_as_strings() {
        let db = BridgeDB::open_temporary().unwrap();
        let mut rec = db.register_mint_deposit_address("0x01", &[], "gM1", "s1").unwrap();
        rec.approved_tax = 12;
        db.update_mint_deposit_records(&[rec]).unwrap();
        let json = serde_json::to_value(db.dump().unwrap()).unwrap();
        assert_eq!(json["mintDepositAddresses"][0]["approvedTax"], "12");
    }
}
