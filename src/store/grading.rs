use std::collections::BTreeSet;

use anyhow::Result;

use super::Store;
use crate::model::TopicPerformance;

// Both tables are owned by the grading subsystem; this crate only reads them.
impl Store {
    pub fn topic_performance(&self, user_id: &str) -> Result<Vec<TopicPerformance>> {
        let mut statement = self.connection.prepare(
            "
            SELECT user_id, topic, accuracy
            FROM topic_performance
            WHERE user_id = ?1
            ORDER BY accuracy ASC, topic ASC
            ",
        )?;

        let mut rows = statement.query([user_id])?;
        let mut out = Vec::<TopicPerformance>::new();
        while let Some(row) = rows.next()? {
            out.push(TopicPerformance {
                user_id: row.get(0)?,
                topic: row.get(1)?,
                accuracy: row.get(2)?,
            });
        }
        Ok(out)
    }

    pub fn seen_question_ids(&self, user_id: &str) -> Result<BTreeSet<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT question_id FROM seen_questions WHERE user_id = ?1")?;

        let mut rows = statement.query([user_id])?;
        let mut out = BTreeSet::<String>::new();
        while let Some(row) = rows.next()? {
            out.insert(row.get(0)?);
        }
        Ok(out)
    }
}
