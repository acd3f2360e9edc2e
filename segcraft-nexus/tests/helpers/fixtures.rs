//! Library and chain fixtures
//!
//! `TWO_MAIN_LIBRARY` walks through every fabrication type:
//! offset 0 Initial (Arc@0 + Verse@0), 1 Continue (Verse@1),
//! 2 NextMain (Arc@1 + Bridge@0), 3 NextMacro (Arc@0 + Verse@0).

use chrono::{DateTime, Utc};
use segcraft_common::models::{Chain, ChainBinding, ChainBindingType, ChainState, ChainType, Library};
use segcraft_nexus::content::loader::parse_library;
use segcraft_nexus::content::repository::{store_library, SqliteContentSource};
use segcraft_nexus::content::{ContentSet, ContentSource, LibraryContent, SourceMaterial};
use segcraft_nexus::craft::CraftPipeline;
use segcraft_nexus::fabricator::memes::{ExclusiveMemePolicy, MemeCompatibility};
use segcraft_nexus::fabricator::Fabricator;
use segcraft_nexus::store::{ChainStore, SegmentStore};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Macro "Arc" in C major moving Wild -> Intermediate, with two main programs:
/// "Verse" (G major, two offsets, tagged Wild) and "Bridge" (D minor, one
/// offset, tagged Intermediate, never transposed).
pub const TWO_MAIN_LIBRARY: &str = r#"
name = "Fixture"

[[programs]]
name = "Arc"
type = "Macro"
key = "C major"
tempo = 120.0
density = 0.6

  [[programs.sequences]]
  name = "Wild"
  total = 16

  [[programs.sequences]]
  name = "Intermediate"
  total = 16

  [[programs.bindings]]
  sequence = "Wild"
  offset = 0
  memes = ["Wild"]

  [[programs.bindings]]
  sequence = "Intermediate"
  offset = 1
  memes = ["Intermediate"]

[[programs]]
name = "Verse"
type = "Main"
key = "G major"
tempo = 100.0
density = 0.4
memes = ["Wild", "Bright"]

  [[programs.sequences]]
  name = "Verse A"
  total = 4
  chords = [
    { position = 0.0, name = "G" },
    { position = 2.0, name = "D" },
    { position = 4.0, name = "C" },
    { position = 6.0, name = "Em" },
  ]

  [[programs.sequences]]
  name = "Verse B"
  total = 4
  chords = [{ position = 0.0, name = "Em" }]

  [[programs.bindings]]
  sequence = "Verse A"
  offset = 0
  memes = ["Wild"]

  [[programs.bindings]]
  sequence = "Verse B"
  offset = 1

[[programs]]
name = "Bridge"
type = "Main"
key = "D minor"
tempo = 80.0
density = 0.8
do_transpose = false
memes = ["Intermediate"]

  [[programs.sequences]]
  name = "Bridge A"
  total = 8
  chords = [{ position = 0.0, name = "Dm" }, { position = 4.0, name = "A7" }]

  [[programs.bindings]]
  sequence = "Bridge A"
  offset = 0
"#;

/// A macro program with no main program to pair it with
pub const MACRO_ONLY_LIBRARY: &str = r#"
name = "Lonely"

[[programs]]
name = "Solo Arc"
type = "Macro"
key = "E minor"
tempo = 90.0
density = 0.5

  [[programs.sequences]]
  name = "Only"
  total = 8

  [[programs.bindings]]
  sequence = "Only"
  offset = 0
"#;

/// A macro arc tagged Wild over two main programs: "Lullaby" (Calm) and
/// "Rumble" (Thunder). Neither main carries the Wild tag, so both are candidates.
pub const WILD_ARC_LIBRARY: &str = r#"
name = "Weather"

[[programs]]
name = "Storm Arc"
type = "Macro"
key = "C major"
tempo = 120.0
density = 0.5

  [[programs.sequences]]
  name = "Gale"
  total = 8

  [[programs.bindings]]
  sequence = "Gale"
  offset = 0
  memes = ["Wild"]

[[programs]]
name = "Lullaby"
type = "Main"
key = "C major"
tempo = 90.0
density = 0.3
memes = ["Calm"]

  [[programs.sequences]]
  name = "Hush"
  total = 4

  [[programs.bindings]]
  sequence = "Hush"
  offset = 0

[[programs]]
name = "Rumble"
type = "Main"
key = "C major"
tempo = 110.0
density = 0.7
memes = ["Thunder"]

  [[programs.sequences]]
  name = "Roll"
  total = 4

  [[programs.bindings]]
  sequence = "Roll"
  offset = 0
"#;

/// The Wild macro arc with only the Calm main program
pub const CALM_ONLY_LIBRARY: &str = r#"
name = "Still"

[[programs]]
name = "Storm Arc"
type = "Macro"
key = "C major"
tempo = 120.0
density = 0.5

  [[programs.sequences]]
  name = "Gale"
  total = 8

  [[programs.bindings]]
  sequence = "Gale"
  offset = 0
  memes = ["Wild"]

[[programs]]
name = "Lullaby"
type = "Main"
key = "C major"
tempo = 90.0
density = 0.3
memes = ["Calm"]

  [[programs.sequences]]
  name = "Hush"
  total = 4

  [[programs.bindings]]
  sequence = "Hush"
  offset = 0
"#;

/// Parse and store a library document
pub async fn load_library(pool: &SqlitePool, document: &str) -> (Library, ContentSet) {
    let (library, content) = parse_library(document).unwrap();
    store_library(pool, &library, &content).await.unwrap();
    (library, content)
}

pub fn program_id(content: &ContentSet, name: &str) -> Uuid {
    content
        .programs
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.id)
        .unwrap()
}

/// Create a chain bound to `library_id` and move it to Fabricate
pub async fn start_chain(
    chains: &dyn ChainStore,
    library_id: Uuid,
    start_at: DateTime<Utc>,
    stop_at: Option<DateTime<Utc>>,
) -> Chain {
    let chain = Chain::new("Test Chain", ChainType::Production, start_at, stop_at);
    let binding = ChainBinding::new(chain.id, ChainBindingType::Library, library_id);
    chains.create_chain(&chain, &[binding]).await.unwrap();
    chains.update_chain_state(chain.id, ChainState::Fabricate).await.unwrap()
}

/// Fresh snapshot of the chain's source material
pub async fn ingest_chain(pool: &SqlitePool, chains: &dyn ChainStore, chain_id: Uuid) -> SourceMaterial {
    let bindings = chains.read_bindings(chain_id).await.unwrap();
    SqliteContentSource::new(pool.clone()).ingest(&bindings).await.unwrap()
}

/// Craft pipeline over the given content and meme policy
pub fn pipeline_with(
    segments: Arc<dyn SegmentStore>,
    content: impl LibraryContent + 'static,
    memes: impl MemeCompatibility + 'static,
) -> CraftPipeline {
    let fabricator = Fabricator::new(segments.clone(), Arc::new(content), Arc::new(memes));
    CraftPipeline::new(segments, fabricator)
}

/// Craft pipeline over a fresh snapshot of the chain's source material
pub async fn pipeline_for(
    pool: &SqlitePool,
    chains: &dyn ChainStore,
    segments: Arc<dyn SegmentStore>,
    chain_id: Uuid,
) -> CraftPipeline {
    let material = ingest_chain(pool, chains, chain_id).await;
    pipeline_with(segments, material, ExclusiveMemePolicy::default())
}
