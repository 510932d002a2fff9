use rusqlite::params;

use super::{now_millis, SqliteStore};
use crate::app::{Result, SyncError};
use crate::domain::{ActionRecord, ReadingAction};

impl SqliteStore {
    /// Append an action to the durable queue and return its row id.
    pub fn enqueue_action(&self, action: &ReadingAction) -> Result<i64> {
        let encoded = action
            .encode()
            .map_err(|e| SyncError::Other(format!("cannot encode action: {}", e)))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO actions (time, tried, params) VALUES (?1, 0, ?2)",
            params![now_millis(), encoded],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All queued actions, oldest first.
    pub fn actions(&self) -> Result<Vec<ActionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, time, tried, params FROM actions ORDER BY time, id")?;
        let records = stmt
            .query_map([], |row| {
                Ok(ActionRecord {
                    id: row.get(0)?,
                    time: row.get(1)?,
                    tried: row.get(2)?,
                    params: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn clear_action(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM actions WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn increment_action_tried(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE actions SET tried = tried + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn untried_action_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM actions WHERE tried = 0", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }
}
