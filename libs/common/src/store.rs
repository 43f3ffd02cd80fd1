//! Embedded record store backed by redb
//!
//! One table maps username to a JSON-encoded [`UserRecord`]. Every operation
//! runs in its own transaction; redb serializes writers and never exposes a
//! partial write. There is no secondary index on uid, so by-uid lookup is a
//! full scan of the table.

use redb::{Database, ReadableTable, TableDefinition, TableError};
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::models::UserRecord;

const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Handle to the embedded user record store
pub struct UserStore {
    db: Database,
    path: String,
    read_only: bool,
}

fn table_err(err: TableError) -> StoreError {
    match err {
        TableError::TableDoesNotExist(_) => StoreError::NotFound,
        other => StoreError::Table(other),
    }
}

impl UserStore {
    /// Open the store read-write, creating the backing file and the user
    /// table when missing
    pub fn open(path: &str) -> StoreResult<Self> {
        let db = Database::create(path).map_err(|source| StoreError::Open {
            path: path.to_string(),
            source,
        })?;

        // Create the table up front so read transactions always find it
        let txn = db.begin_write()?;
        txn.open_table(USERS_TABLE).map_err(table_err)?;
        txn.commit()?;

        info!("opened user store at {}", path);

        Ok(UserStore {
            db,
            path: path.to_string(),
            read_only: false,
        })
    }

    /// Open the store read-only; never creates the backing file or table
    pub fn open_read_only(path: &str) -> StoreResult<Self> {
        let db = Database::open(path).map_err(|source| StoreError::Open {
            path: path.to_string(),
            source,
        })?;

        info!("opened user store read-only at {}", path);

        Ok(UserStore {
            db,
            path: path.to_string(),
            read_only: true,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Write a record under its username key in a single transaction
    ///
    /// Overwrites any existing record for the same username. On failure the
    /// transaction is rolled back and nothing is observable.
    pub fn put(&self, username: &str, record: &UserRecord) -> StoreResult<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }

        let value = serde_json::to_vec(record)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USERS_TABLE).map_err(table_err)?;
            table.insert(username, value.as_slice())?;
        }
        txn.commit()?;

        Ok(())
    }

    /// Look up a record by username
    pub fn get(&self, username: &str) -> StoreResult<UserRecord> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USERS_TABLE).map_err(table_err)?;

        match table.get(username)? {
            Some(value) => Ok(serde_json::from_slice(value.value())?),
            None => Err(StoreError::NotFound),
        }
    }

    /// Look up a record by uid with a full scan of the table
    ///
    /// The scan walks every record in key order without stopping at the
    /// first hit; when several records share a uid the last match in key
    /// order is returned.
    pub fn get_by_uid(&self, uid: u32) -> StoreResult<UserRecord> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USERS_TABLE).map_err(table_err)?;

        let mut found: Option<UserRecord> = None;
        for entry in table.iter()? {
            let (_key, value) = entry?;
            let record: UserRecord = serde_json::from_slice(value.value())?;
            if record.uid == uid {
                found = Some(record);
            }
        }

        found.ok_or(StoreError::NotFound)
    }
}
