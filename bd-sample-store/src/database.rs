// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./database_test.rs"]
mod tests;

use crate::record::StorageRecord;
use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags, Transaction};
use std::path::{Path, PathBuf};

// SQLite limits the number of placeholders a single compiled statement may carry, so bulk
// deletions are chunked.
const MAX_SQL_PLACEHOLDERS: i64 = 200;

const SCHEMA: &str = "
  create table if not exists samples (
    id integer primary key autoincrement,
    sensor_id text not null,
    ts integer not null,
    prio integer not null,
    synced integer default null,
    loc text,
    data text not null,
    data_class text not null
  );
  create index if not exists samples_prio_asc_ts on samples ( prio asc, ts asc );
  create index if not exists samples_prio_desc_ts on samples ( prio desc, ts asc );
";

//
// RemovalOrder
//

/// Victim selection order for bulk removal. Priority ordinals are ordered lower = more
/// important; ascending timestamp is always the tie break, so the oldest record of the selected
/// priority class goes first.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RemovalOrder {
  OldestFirst,
  LowestPriorityFirst,
  HighestPriorityFirst,
}

impl RemovalOrder {
  const fn order_by(self) -> &'static str {
    match self {
      Self::OldestFirst => "ts asc",
      Self::LowestPriorityFirst => "prio desc, ts asc",
      Self::HighestPriorityFirst => "prio asc, ts asc",
    }
  }
}

//
// Database
//

// Owns the open/closed lifecycle of the backing SQLite file and enforces the byte size cap.
//
// The cap is applied through SQLite's max_page_count pragma, which is connection state rather
// than file state, so every open re-applies the remembered target. Inserts pushing the file past
// the page limit fail with SQLITE_FULL, surfaced as `Error::StoreFull`.
#[derive(Debug)]
pub struct Database {
  path: PathBuf,
  max_size_bytes: i64,
  connection: Option<Connection>,
  read_only: bool,
}

impl Database {
  /// Creates a closed handle. `max_size_bytes` of zero leaves the engine default cap in place
  /// until `set_maximum_size` is called.
  pub fn new(path: impl AsRef<Path>, max_size_bytes: i64) -> Result<Self> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
      return Err(Error::InvalidArgument("database path is empty".to_string()));
    }
    if max_size_bytes < 0 {
      return Err(Error::InvalidArgument(
        "maximum database size is negative".to_string(),
      ));
    }
    Ok(Self {
      path: path.to_path_buf(),
      max_size_bytes,
      connection: None,
      read_only: false,
    })
  }

  /// Opens the handle read-write, creating the file and schema as needed. Idempotent; an open
  /// read-only handle is reopened read-write.
  pub fn open(&mut self) -> Result<()> {
    if self.connection.is_some() && !self.read_only {
      return Ok(());
    }
    self.close();

    let connection = Connection::open(&self.path)?;
    connection.execute_batch(SCHEMA)?;
    if self.max_size_bytes > 0 {
      apply_max_size(&connection, self.max_size_bytes)?;
    }
    self.connection = Some(connection);
    self.read_only = false;
    Ok(())
  }

  /// Opens the handle read-only. Falls back to a read-write open when the file does not exist
  /// yet, mirroring how a readable handle degrades to the writable one.
  pub fn open_read_only(&mut self) -> Result<()> {
    if self.connection.is_some() && self.read_only {
      return Ok(());
    }
    self.close();

    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    match Connection::open_with_flags(&self.path, flags) {
      Ok(connection) => {
        if self.max_size_bytes > 0 {
          apply_max_size(&connection, self.max_size_bytes)?;
        }
        self.connection = Some(connection);
        self.read_only = true;
        Ok(())
      },
      Err(_) => self.open(),
    }
  }

  /// Closes the handle. A no-op when already closed.
  pub fn close(&mut self) {
    self.connection = None;
  }

  #[must_use]
  pub const fn is_open(&self) -> bool {
    self.connection.is_some()
  }

  fn conn(&self) -> Result<&Connection> {
    self.connection.as_ref().ok_or(Error::NotOpen)
  }

  fn conn_mut(&mut self) -> Result<&mut Connection> {
    self.connection.as_mut().ok_or(Error::NotOpen)
  }

  pub fn record_count(&self) -> Result<i64> {
    Ok(
      self
        .conn()?
        .query_row("select count(*) from samples", [], |row| row.get(0))?,
    )
  }

  pub fn page_size(&self) -> Result<i64> {
    Ok(self.conn()?.query_row("PRAGMA page_size", [], |row| row.get(0))?)
  }

  /// Returns the currently effective maximum size in bytes.
  pub fn maximum_size(&self) -> Result<i64> {
    let conn = self.conn()?;
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    let page_count: i64 = conn.query_row("PRAGMA max_page_count", [], |row| row.get(0))?;
    Ok(page_size.saturating_mul(page_count))
  }

  /// Applies a new maximum size and returns the value actually in effect, rounded up to whole
  /// pages and never below the pages the file already occupies. Shrinking below current usage
  /// does not evict data.
  pub fn set_maximum_size(&mut self, bytes: i64) -> Result<i64> {
    if bytes <= 0 {
      return Err(Error::InvalidArgument(
        "maximum database size must be positive".to_string(),
      ));
    }
    let applied = apply_max_size(self.conn()?, bytes)?;
    self.max_size_bytes = applied;
    Ok(applied)
  }

  /// Inserts the batch in a single transaction. On any failure the transaction rolls back, so
  /// either the whole batch is committed or the store is unchanged.
  pub fn insert_records(&mut self, records: &[StorageRecord]) -> Result<()> {
    let tx = self.conn_mut()?.transaction()?;
    {
      let mut statement = tx.prepare_cached(
        "insert into samples (sensor_id, ts, prio, synced, loc, data, data_class) \
         values (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      )?;
      for record in records {
        statement.execute(rusqlite::params![
          record.sensor,
          record.timestamp_ms,
          record.priority,
          i64::from(record.synced),
          record.location,
          record.payload,
          record.payload_tag,
        ])?;
      }
    }
    tx.commit()?;
    Ok(())
  }

  /// Removes up to `limit` records in the given order and returns them. Returns all remaining
  /// records when the store holds fewer than `limit`.
  pub fn remove_ordered(&mut self, limit: i64, order: RemovalOrder) -> Result<Vec<StorageRecord>> {
    let tx = self.conn_mut()?.transaction()?;
    let mut removed = Vec::new();
    let mut remaining = limit.max(0);
    while remaining > 0 {
      let chunk = remaining.min(MAX_SQL_PLACEHOLDERS);
      let batch = query_records_ordered(&tx, chunk, order.order_by())?;
      if batch.is_empty() {
        break;
      }
      let ids: Vec<i64> = batch.iter().map(|(id, _)| *id).collect();
      delete_by_ids(&tx, &ids)?;

      let fetched = i64::try_from(batch.len()).unwrap_or(chunk);
      removed.extend(batch.into_iter().map(|(_, record)| record));
      if fetched < chunk {
        break;
      }
      remaining -= fetched;
    }
    tx.commit()?;
    Ok(removed)
  }

  /// Deletes up to `limit` records for pure space reclamation, oldest timestamp first within the
  /// selected priority class. Returns the number actually deleted.
  pub fn delete_ordered(&mut self, limit: i64, lowest_priority_first: bool) -> Result<i64> {
    let order = if lowest_priority_first {
      RemovalOrder::LowestPriorityFirst
    } else {
      RemovalOrder::OldestFirst
    };

    let tx = self.conn_mut()?.transaction()?;
    let mut deleted: i64 = 0;
    let mut remaining = limit.max(0);
    while remaining > 0 {
      let chunk = remaining.min(MAX_SQL_PLACEHOLDERS);
      let ids = query_ids_ordered(&tx, chunk, order.order_by())?;
      if ids.is_empty() {
        break;
      }
      deleted += i64::try_from(delete_by_ids(&tx, &ids)?).unwrap_or(0);

      let fetched = i64::try_from(ids.len()).unwrap_or(chunk);
      if fetched < chunk {
        break;
      }
      remaining -= fetched;
    }
    tx.commit()?;
    Ok(deleted)
  }

  /// Drops every stored record. Returns true when the table is verified empty afterwards.
  pub fn delete_all(&mut self) -> Result<bool> {
    let tx = self.conn_mut()?.transaction()?;
    tx.execute("delete from samples", [])?;
    tx.commit()?;
    Ok(self.record_count()? == 0)
  }
}

fn apply_max_size(connection: &Connection, bytes: i64) -> Result<i64> {
  let page_size: i64 = connection.query_row("PRAGMA page_size", [], |row| row.get(0))?;
  let mut pages = bytes / page_size;
  if bytes % page_size != 0 {
    pages += 1;
  }
  pages = pages.max(1);
  // The pragma reports the count actually applied; SQLite will not go below the pages the file
  // already occupies.
  let applied: i64 =
    connection.query_row(&format!("PRAGMA max_page_count = {pages}"), [], |row| {
      row.get(0)
    })?;
  Ok(applied.saturating_mul(page_size))
}

fn query_records_ordered(
  tx: &Transaction<'_>,
  limit: i64,
  order_by: &str,
) -> Result<Vec<(i64, StorageRecord)>> {
  let sql = format!(
    "select id, sensor_id, ts, prio, synced, loc, data, data_class from samples \
     order by {order_by} limit ?1"
  );
  let mut statement = tx.prepare(&sql)?;
  let rows = statement.query_map([limit], |row| {
    Ok((
      row.get::<_, i64>(0)?,
      StorageRecord {
        sensor: row.get(1)?,
        timestamp_ms: row.get(2)?,
        priority: row.get(3)?,
        synced: row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
        location: row.get(5)?,
        payload: row.get(6)?,
        payload_tag: row.get(7)?,
      },
    ))
  })?;
  rows
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(Error::from)
}

fn query_ids_ordered(tx: &Transaction<'_>, limit: i64, order_by: &str) -> Result<Vec<i64>> {
  let sql = format!("select id from samples order by {order_by} limit ?1");
  let mut statement = tx.prepare(&sql)?;
  let rows = statement.query_map([limit], |row| row.get(0))?;
  rows
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(Error::from)
}

fn delete_by_ids(tx: &Transaction<'_>, ids: &[i64]) -> Result<usize> {
  let mut deleted = 0;
  for chunk in ids.chunks(MAX_SQL_PLACEHOLDERS as usize) {
    let placeholders = vec!["?"; chunk.len()].join(", ");
    let sql = format!("delete from samples where id in ( {placeholders} )");
    deleted += tx.execute(&sql, rusqlite::params_from_iter(chunk.iter()))?;
  }
  Ok(deleted)
}
