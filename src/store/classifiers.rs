use rusqlite::{params, Transaction};

use super::SqliteStore;
use crate::app::Result;
use crate::domain::{Classifier, ClassifierKind};

pub(crate) fn replace_classifier_tx(
    tx: &Transaction<'_>,
    feed_id: &str,
    classifier: &Classifier,
) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM classifiers WHERE feed_id = ?1", params![feed_id])?;
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO classifiers (feed_id, kind, key, score) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (kind, key, score) in classifier.entries() {
        stmt.execute(params![feed_id, kind.as_str(), key, score])?;
    }
    Ok(())
}

impl SqliteStore {
    pub fn classifier_for_feed(&self, feed_id: &str) -> Result<Classifier> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT kind, key, score FROM classifiers WHERE feed_id = ?1")?;
        let rows = stmt.query_map(params![feed_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i32>(2)?,
            ))
        })?;

        let mut classifier = Classifier::new(feed_id);
        for row in rows {
            let (kind, key, score) = row?;
            if let Some(kind) = ClassifierKind::parse(&kind) {
                classifier.set(kind, key, score);
            }
        }
        Ok(classifier)
    }

    pub fn clear_classifiers_for_feed(&self, feed_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM classifiers WHERE feed_id = ?1", params![feed_id])?;
        Ok(())
    }

    pub fn insert_classifier(&self, classifier: &Classifier) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        replace_classifier_tx(&tx, &classifier.feed_id, classifier)?;
        tx.commit()?;
        Ok(())
    }

    pub fn feed_tags(&self, feed_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT tag FROM feed_tags WHERE feed_id = ?1 ORDER BY tag")?;
        let tags = stmt
            .query_map(params![feed_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    pub fn feed_authors(&self, feed_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT author FROM feed_authors WHERE feed_id = ?1 ORDER BY author")?;
        let authors = stmt
            .query_map(params![feed_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(authors)
    }
}
