//! SQLite segment store

use super::SegmentStore;
use crate::fabricator::Fabrication;
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use segcraft_common::models::{
    Segment, SegmentChoice, SegmentChord, SegmentMeme, SegmentMessage, SegmentState,
};
use segcraft_common::{time, uuid_utils, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

const SEGMENT_COLUMNS: &str = "id, chain_id, offset, state, type, begin_at, end_at, key, total, density, tempo, output_key, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteSegmentStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteSegmentStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self { pool, max_lock_wait_ms }
    }

    async fn fetch_one_segment(&self, sql: &str, binds: &[String]) -> Result<Option<Segment>> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(value.as_str());
        }
        query
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(segment_from_row)
            .transpose()
    }

    async fn try_commit(&self, fabrication: &Fabrication) -> Result<bool> {
        let segment = &fabrication.segment;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE segments
            SET state = ?, type = ?, end_at = ?, key = ?, total = ?, density = ?, tempo = ?, updated_at = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(SegmentState::Crafted.as_str())
        .bind(segment.segment_type.map(|t| t.as_str()))
        .bind(segment.end_at.as_ref().map(time::format_ts))
        .bind(&segment.key)
        .bind(segment.total)
        .bind(segment.density)
        .bind(segment.tempo)
        .bind(time::format_ts(&time::now()))
        .bind(segment.id.to_string())
        .bind(SegmentState::Crafting.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for choice in &fabrication.choices {
            sqlx::query(
                r#"
                INSERT INTO segment_choices (id, segment_id, program_id, program_type, program_sequence_binding_id, transpose)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(choice.id.to_string())
            .bind(choice.segment_id.to_string())
            .bind(choice.program_id.to_string())
            .bind(choice.program_type.as_str())
            .bind(choice.program_sequence_binding_id.to_string())
            .bind(choice.transpose)
            .execute(&mut *tx)
            .await?;
        }

        for meme in &fabrication.memes {
            sqlx::query("INSERT INTO segment_memes (id, segment_id, name) VALUES (?, ?, ?)")
                .bind(meme.id.to_string())
                .bind(meme.segment_id.to_string())
                .bind(&meme.name)
                .execute(&mut *tx)
                .await?;
        }

        for chord in &fabrication.chords {
            sqlx::query("INSERT INTO segment_chords (id, segment_id, position, name) VALUES (?, ?, ?, ?)")
                .bind(chord.id.to_string())
                .bind(chord.segment_id.to_string())
                .bind(chord.position)
                .bind(&chord.name)
                .execute(&mut *tx)
                .await?;
        }

        for message in &fabrication.messages {
            insert_message(&mut tx, message).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn try_revert(&self, segment_id: Uuid) -> Result<bool> {
        let id = segment_id.to_string();
        let mut tx = self.pool.begin().await?;

        let state: Option<String> = sqlx::query_scalar("SELECT state FROM segments WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;
        let state: SegmentState = match state {
            Some(s) => s.parse()?,
            None => return Err(Error::NotFound(format!("segment {}", segment_id))),
        };

        if state != SegmentState::Failed && !state.can_transition_to(SegmentState::Failed) {
            tx.rollback().await?;
            return Ok(false);
        }

        for table in ["segment_choices", "segment_memes", "segment_chords"] {
            sqlx::query(&format!("DELETE FROM {} WHERE segment_id = ?", table))
                .bind(&id)
                .execute(&mut *tx)
                .await?;
        }

        let now = time::format_ts(&time::now());
        if state != SegmentState::Failed {
            sqlx::query("UPDATE segments SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
                .bind(SegmentState::Failed.as_str())
                .bind(&now)
                .bind(&id)
                .bind(state.as_str())
                .execute(&mut *tx)
                .await?;
        }

        let requeued = sqlx::query(
            r#"
            UPDATE segments
            SET state = ?, type = NULL, end_at = NULL, key = NULL, total = NULL,
                density = NULL, tempo = NULL, updated_at = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(SegmentState::Planned.as_str())
        .bind(&now)
        .bind(&id)
        .bind(SegmentState::Failed.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if requeued == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl SegmentStore for SqliteSegmentStore {
    async fn read_segment(&self, segment_id: Uuid) -> Result<Segment> {
        let sql = format!("SELECT {} FROM segments WHERE id = ?", SEGMENT_COLUMNS);
        self.fetch_one_segment(&sql, &[segment_id.to_string()])
            .await?
            .ok_or_else(|| Error::NotFound(format!("segment {}", segment_id)))
    }

    async fn read_segment_at(&self, chain_id: Uuid, offset: i64) -> Result<Option<Segment>> {
        let sql = format!("SELECT {} FROM segments WHERE chain_id = ? AND offset = ?", SEGMENT_COLUMNS);
        sqlx::query(&sql)
            .bind(chain_id.to_string())
            .bind(offset)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(segment_from_row)
            .transpose()
    }

    async fn read_preceding_segment(&self, chain_id: Uuid, offset: i64) -> Result<Option<Segment>> {
        if offset <= 0 {
            return Ok(None);
        }
        self.read_segment_at(chain_id, offset - 1).await
    }

    async fn read_last_segment(&self, chain_id: Uuid) -> Result<Option<Segment>> {
        let sql = format!(
            "SELECT {} FROM segments WHERE chain_id = ? ORDER BY offset DESC LIMIT 1",
            SEGMENT_COLUMNS
        );
        self.fetch_one_segment(&sql, &[chain_id.to_string()]).await
    }

    async fn read_last_segment_in_state(&self, chain_id: Uuid, state: SegmentState) -> Result<Option<Segment>> {
        let sql = format!(
            "SELECT {} FROM segments WHERE chain_id = ? AND state = ? ORDER BY offset DESC LIMIT 1",
            SEGMENT_COLUMNS
        );
        self.fetch_one_segment(&sql, &[chain_id.to_string(), state.as_str().to_string()])
            .await
    }

    async fn read_segments(&self, chain_id: Uuid) -> Result<Vec<Segment>> {
        let sql = format!("SELECT {} FROM segments WHERE chain_id = ? ORDER BY offset", SEGMENT_COLUMNS);
        sqlx::query(&sql)
            .bind(chain_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(segment_from_row)
            .collect()
    }

    async fn read_choices_for_segment(&self, segment_id: Uuid) -> Result<Vec<SegmentChoice>> {
        sqlx::query(
            r#"
            SELECT id, segment_id, program_id, program_type, program_sequence_binding_id, transpose
            FROM segment_choices WHERE segment_id = ? ORDER BY program_type
            "#,
        )
        .bind(segment_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            let program_type: String = row.get("program_type");
            Ok(SegmentChoice {
                id: uuid_utils::parse(row.get("id"))?,
                segment_id: uuid_utils::parse(row.get("segment_id"))?,
                program_id: uuid_utils::parse(row.get("program_id"))?,
                program_type: program_type.parse()?,
                program_sequence_binding_id: uuid_utils::parse(row.get("program_sequence_binding_id"))?,
                transpose: row.get("transpose"),
            })
        })
        .collect()
    }

    async fn read_memes_for_segment(&self, segment_id: Uuid) -> Result<Vec<SegmentMeme>> {
        sqlx::query("SELECT id, segment_id, name FROM segment_memes WHERE segment_id = ? ORDER BY name")
            .bind(segment_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| {
                Ok(SegmentMeme {
                    id: uuid_utils::parse(row.get("id"))?,
                    segment_id: uuid_utils::parse(row.get("segment_id"))?,
                    name: row.get("name"),
                })
            })
            .collect()
    }

    async fn read_chords_for_segment(&self, segment_id: Uuid) -> Result<Vec<SegmentChord>> {
        sqlx::query("SELECT id, segment_id, position, name FROM segment_chords WHERE segment_id = ? ORDER BY position")
            .bind(segment_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| {
                Ok(SegmentChord {
                    id: uuid_utils::parse(row.get("id"))?,
                    segment_id: uuid_utils::parse(row.get("segment_id"))?,
                    position: row.get("position"),
                    name: row.get("name"),
                })
            })
            .collect()
    }

    async fn read_messages_for_segment(&self, segment_id: Uuid) -> Result<Vec<SegmentMessage>> {
        sqlx::query(
            "SELECT id, segment_id, type, body, created_at FROM segment_messages WHERE segment_id = ? ORDER BY created_at",
        )
        .bind(segment_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            let message_type: String = row.get("type");
            let created_at: String = row.get("created_at");
            Ok(SegmentMessage {
                id: uuid_utils::parse(row.get("id"))?,
                segment_id: uuid_utils::parse(row.get("segment_id"))?,
                message_type: message_type.parse()?,
                body: row.get("body"),
                created_at: time::parse_ts(&created_at)?,
            })
        })
        .collect()
    }

    async fn create_segment(&self, segment: &Segment) -> Result<()> {
        retry_on_lock("create_segment", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO segments (id, chain_id, offset, state, type, begin_at, end_at, key, total,
                                      density, tempo, output_key, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(segment.id.to_string())
            .bind(segment.chain_id.to_string())
            .bind(segment.offset)
            .bind(segment.state.as_str())
            .bind(segment.segment_type.map(|t| t.as_str()))
            .bind(time::format_ts(&segment.begin_at))
            .bind(segment.end_at.as_ref().map(time::format_ts))
            .bind(&segment.key)
            .bind(segment.total)
            .bind(segment.density)
            .bind(segment.tempo)
            .bind(&segment.output_key)
            .bind(time::format_ts(&segment.created_at))
            .bind(time::format_ts(&segment.updated_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;

        debug!(segment_id = %segment.id, chain_id = %segment.chain_id, offset = segment.offset, "Created segment");
        Ok(())
    }

    async fn cas_update_segment_state(&self, segment_id: Uuid, expected: SegmentState, new: SegmentState) -> Result<bool> {
        expected.require_transition(new)?;

        let updated = retry_on_lock("cas_update_segment_state", self.max_lock_wait_ms, || async {
            let result = sqlx::query("UPDATE segments SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
                .bind(new.as_str())
                .bind(time::format_ts(&time::now()))
                .bind(segment_id.to_string())
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;

        Ok(updated == 1)
    }

    async fn commit_fabrication(&self, fabrication: &Fabrication) -> Result<bool> {
        retry_on_lock("commit_fabrication", self.max_lock_wait_ms, || self.try_commit(fabrication)).await
    }

    async fn revert_segment(&self, segment_id: Uuid) -> Result<bool> {
        retry_on_lock("revert_segment", self.max_lock_wait_ms, || self.try_revert(segment_id)).await
    }

    async fn create_segment_message(&self, message: &SegmentMessage) -> Result<()> {
        retry_on_lock("create_segment_message", self.max_lock_wait_ms, || async {
            let mut tx = self.pool.begin().await?;
            insert_message(&mut tx, message).await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }
}

async fn insert_message(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, message: &SegmentMessage) -> Result<()> {
    sqlx::query("INSERT INTO segment_messages (id, segment_id, type, body, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(message.id.to_string())
        .bind(message.segment_id.to_string())
        .bind(message.message_type.as_str())
        .bind(&message.body)
        .bind(time::format_ts(&message.created_at))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub(crate) fn segment_from_row(row: &SqliteRow) -> Result<Segment> {
    let state: String = row.get("state");
    let segment_type: Option<String> = row.get("type");
    let begin_at: String = row.get("begin_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Segment {
        id: uuid_utils::parse(row.get("id"))?,
        chain_id: uuid_utils::parse(row.get("chain_id"))?,
        offset: row.get("offset"),
        state: state.parse()?,
        segment_type: segment_type.map(|t| t.parse()).transpose()?,
        begin_at: time::parse_ts(&begin_at)?,
        end_at: time::parse_opt_ts(row.get("end_at"))?,
        key: row.get("key"),
        total: row.get("total"),
        density: row.get("density"),
        tempo: row.get("tempo"),
        output_key: row.get("output_key"),
        created_at: time::parse_ts(&created_at)?,
        updated_at: time::parse_ts(&updated_at)?,
    })
}
