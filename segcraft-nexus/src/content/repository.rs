//! Library content persistence
//!
//! Writes whole libraries in one transaction and ingests the programs a
//! chain's bindings reach into a [`SourceMaterial`] snapshot.

use super::{ContentSet, ContentSource, SourceMaterial};
use async_trait::async_trait;
use segcraft_common::models::{
    ChainBinding, ChainBindingType, Library, Program, ProgramMeme, ProgramSequence,
    ProgramSequenceBinding, ProgramSequenceBindingMeme, ProgramSequenceChord,
};
use segcraft_common::{time, uuid_utils, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

/// Insert a library and all of its content atomically
pub async fn store_library(pool: &SqlitePool, library: &Library, content: &ContentSet) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO libraries (id, name, created_at) VALUES (?, ?, ?)")
        .bind(library.id.to_string())
        .bind(&library.name)
        .bind(time::format_ts(&library.created_at))
        .execute(&mut *tx)
        .await?;

    for program in &content.programs {
        sqlx::query(
            r#"
            INSERT INTO programs (id, library_id, type, name, key, tempo, density, do_transpose)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(program.id.to_string())
        .bind(program.library_id.to_string())
        .bind(program.program_type.as_str())
        .bind(&program.name)
        .bind(&program.key)
        .bind(program.tempo)
        .bind(program.density)
        .bind(program.do_transpose)
        .execute(&mut *tx)
        .await?;
    }

    for meme in &content.program_memes {
        sqlx::query("INSERT INTO program_memes (id, program_id, name) VALUES (?, ?, ?)")
            .bind(meme.id.to_string())
            .bind(meme.program_id.to_string())
            .bind(&meme.name)
            .execute(&mut *tx)
            .await?;
    }

    for sequence in &content.sequences {
        sqlx::query(
            r#"
            INSERT INTO program_sequences (id, program_id, name, key, total, tempo, density)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sequence.id.to_string())
        .bind(sequence.program_id.to_string())
        .bind(&sequence.name)
        .bind(&sequence.key)
        .bind(sequence.total)
        .bind(sequence.tempo)
        .bind(sequence.density)
        .execute(&mut *tx)
        .await?;
    }

    for binding in &content.bindings {
        sqlx::query(
            "INSERT INTO program_sequence_bindings (id, program_id, program_sequence_id, offset) VALUES (?, ?, ?, ?)",
        )
        .bind(binding.id.to_string())
        .bind(binding.program_id.to_string())
        .bind(binding.program_sequence_id.to_string())
        .bind(binding.offset)
        .execute(&mut *tx)
        .await?;
    }

    for meme in &content.binding_memes {
        sqlx::query(
            "INSERT INTO program_sequence_binding_memes (id, program_id, program_sequence_binding_id, name) VALUES (?, ?, ?, ?)",
        )
        .bind(meme.id.to_string())
        .bind(meme.program_id.to_string())
        .bind(meme.program_sequence_binding_id.to_string())
        .bind(&meme.name)
        .execute(&mut *tx)
        .await?;
    }

    for chord in &content.chords {
        sqlx::query(
            "INSERT INTO program_sequence_chords (id, program_id, program_sequence_id, position, name) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chord.id.to_string())
        .bind(chord.program_id.to_string())
        .bind(chord.program_sequence_id.to_string())
        .bind(chord.position)
        .bind(&chord.name)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        library_id = %library.id,
        programs = content.programs.len(),
        "Stored library '{}'",
        library.name
    );
    Ok(())
}

/// Read every program reachable from the given libraries and programs
pub async fn read_content(pool: &SqlitePool, library_ids: &[Uuid], program_ids: &[Uuid]) -> Result<ContentSet> {
    if library_ids.is_empty() && program_ids.is_empty() {
        return Ok(ContentSet::default());
    }

    let library_ph = placeholders(library_ids.len());
    let program_ph = placeholders(program_ids.len());
    let sql = format!(
        r#"
        SELECT id, library_id, type, name, key, tempo, density, do_transpose
        FROM programs
        WHERE library_id IN ({}) OR id IN ({})
        ORDER BY id
        "#,
        library_ph, program_ph
    );
    let mut query = sqlx::query(&sql);
    for id in library_ids.iter().chain(program_ids) {
        query = query.bind(id.to_string());
    }
    let programs = query
        .fetch_all(pool)
        .await?
        .iter()
        .map(program_from_row)
        .collect::<Result<Vec<_>>>()?;

    let ids: Vec<Uuid> = programs.iter().map(|p| p.id).collect();

    let program_memes = fetch_by_program(pool, "SELECT id, program_id, name FROM program_memes", &ids)
        .await?
        .iter()
        .map(|row| {
            Ok(ProgramMeme {
                id: uuid_utils::parse(row.get("id"))?,
                program_id: uuid_utils::parse(row.get("program_id"))?,
                name: row.get("name"),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let sequences = fetch_by_program(
        pool,
        "SELECT id, program_id, name, key, total, tempo, density FROM program_sequences",
        &ids,
    )
    .await?
    .iter()
    .map(|row| {
        Ok(ProgramSequence {
            id: uuid_utils::parse(row.get("id"))?,
            program_id: uuid_utils::parse(row.get("program_id"))?,
            name: row.get("name"),
            key: row.get("key"),
            total: row.get("total"),
            tempo: row.get("tempo"),
            density: row.get("density"),
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let bindings = fetch_by_program(
        pool,
        "SELECT id, program_id, program_sequence_id, offset FROM program_sequence_bindings",
        &ids,
    )
    .await?
    .iter()
    .map(|row| {
        Ok(ProgramSequenceBinding {
            id: uuid_utils::parse(row.get("id"))?,
            program_id: uuid_utils::parse(row.get("program_id"))?,
            program_sequence_id: uuid_utils::parse(row.get("program_sequence_id"))?,
            offset: row.get("offset"),
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let binding_memes = fetch_by_program(
        pool,
        "SELECT id, program_id, program_sequence_binding_id, name FROM program_sequence_binding_memes",
        &ids,
    )
    .await?
    .iter()
    .map(|row| {
        Ok(ProgramSequenceBindingMeme {
            id: uuid_utils::parse(row.get("id"))?,
            program_id: uuid_utils::parse(row.get("program_id"))?,
            program_sequence_binding_id: uuid_utils::parse(row.get("program_sequence_binding_id"))?,
            name: row.get("name"),
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let chords = fetch_by_program(
        pool,
        "SELECT id, program_id, program_sequence_id, position, name FROM program_sequence_chords",
        &ids,
    )
    .await?
    .iter()
    .map(|row| {
        Ok(ProgramSequenceChord {
            id: uuid_utils::parse(row.get("id"))?,
            program_id: uuid_utils::parse(row.get("program_id"))?,
            program_sequence_id: uuid_utils::parse(row.get("program_sequence_id"))?,
            position: row.get("position"),
            name: row.get("name"),
        })
    })
    .collect::<Result<Vec<_>>>()?;

    Ok(ContentSet {
        programs,
        program_memes,
        sequences,
        bindings,
        binding_memes,
        chords,
    })
}

/// [`ContentSource`] backed by the library tables
#[derive(Clone)]
pub struct SqliteContentSource {
    pool: SqlitePool,
}

impl SqliteContentSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentSource for SqliteContentSource {
    async fn ingest(&self, bindings: &[ChainBinding]) -> Result<SourceMaterial> {
        let ids_of = |binding_type: ChainBindingType| -> Vec<Uuid> {
            bindings
                .iter()
                .filter(|b| b.binding_type == binding_type)
                .map(|b| b.target_id)
                .collect()
        };
        let library_ids = ids_of(ChainBindingType::Library);
        let program_ids = ids_of(ChainBindingType::Program);

        let content = read_content(&self.pool, &library_ids, &program_ids).await?;
        debug!(
            libraries = library_ids.len(),
            direct_programs = program_ids.len(),
            programs = content.programs.len(),
            "Ingested source material"
        );

        Ok(SourceMaterial::new(content, program_ids))
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

async fn fetch_by_program(pool: &SqlitePool, select: &str, program_ids: &[Uuid]) -> Result<Vec<SqliteRow>> {
    if program_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!("{} WHERE program_id IN ({}) ORDER BY id", select, placeholders(program_ids.len()));
    let mut query = sqlx::query(&sql);
    for id in program_ids {
        query = query.bind(id.to_string());
    }

    Ok(query.fetch_all(pool).await?)
}

fn program_from_row(row: &SqliteRow) -> Result<Program> {
    let program_type: String = row.get("type");
    Ok(Program {
        id: uuid_utils::parse(row.get("id"))?,
        library_id: uuid_utils::parse(row.get("library_id"))?,
        program_type: program_type.parse()?,
        name: row.get("name"),
        key: row.get("key"),
        tempo: row.get("tempo"),
        density: row.get("density"),
        do_transpose: row.get("do_transpose"),
    })
}
