//! Craft pipeline integration tests
//!
//! Drives the fixture chain through every fabrication type against a real
//! SQLite database and checks the revert, ordering and concurrency rules.

mod helpers;

use chrono::Utc;
use helpers::*;
use async_trait::async_trait;
use segcraft_common::models::{
    Chain, ChainBinding, ChainBindingType, ChainState, ChainType, ProgramType, Segment, SegmentChoice,
    SegmentChord, SegmentMeme, SegmentMessage, SegmentMessageType, SegmentState, SegmentType,
};
use segcraft_common::time;
use segcraft_nexus::content::{ContentSet, SourceMaterial};
use segcraft_nexus::fabricator::memes::{ExclusiveMemePolicy, MemeCompatibility, PermissiveMemePolicy};
use segcraft_nexus::fabricator::Fabrication;
use segcraft_nexus::store::{ChainStore, SegmentStore, SqliteChainStore, SqliteSegmentStore};
use segcraft_nexus::{Access, CraftError};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    _dir: tempfile::TempDir,
    pool: SqlitePool,
    chains: Arc<SqliteChainStore>,
    segments: Arc<SqliteSegmentStore>,
    content: ContentSet,
    chain: Chain,
}

async fn harness(document: &str) -> Harness {
    let (dir, pool) = create_test_db().await;
    let (chains, segments) = stores(&pool);
    let (library, content) = load_library(&pool, document).await;
    let chain = start_chain(chains.as_ref(), library.id, Utc::now(), None).await;
    Harness {
        _dir: dir,
        pool,
        chains,
        segments,
        content,
        chain,
    }
}

impl Harness {
    /// Plan the segment after `previous` (or offset 0) and store it
    async fn plan_next(&self, previous: Option<&Segment>) -> Segment {
        let target = match previous {
            Some(p) => Segment::planned(self.chain.id, p.offset + 1, p.end_at.unwrap()),
            None => Segment::planned(self.chain.id, 0, self.chain.start_at),
        };
        self.segments.create_segment(&target).await.unwrap();
        target
    }

    async fn craft(&self, target: &Segment) -> Result<Segment, CraftError> {
        pipeline_for(&self.pool, self.chains.as_ref(), self.segments.clone(), self.chain.id)
            .await
            .craft(&Access::internal(), target)
            .await
    }

    async fn craft_next(&self, previous: Option<&Segment>) -> Segment {
        let target = self.plan_next(previous).await;
        self.craft(&target).await.unwrap()
    }

    async fn choice(&self, segment: &Segment, program_type: ProgramType) -> SegmentChoice {
        self.segments
            .read_choices_for_segment(segment.id)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.program_type == program_type)
            .unwrap()
    }

    fn binding_offset(&self, choice: &SegmentChoice) -> i64 {
        self.content
            .bindings
            .iter()
            .find(|b| b.id == choice.program_sequence_binding_id)
            .map(|b| b.offset)
            .unwrap()
    }
}

#[tokio::test]
async fn test_initial_segment_selects_first_offsets() {
    let h = harness(TWO_MAIN_LIBRARY).await;

    let segment = h.craft_next(None).await;

    assert_eq!(segment.state, SegmentState::Crafted);
    assert_eq!(segment.segment_type, Some(SegmentType::Initial));

    let macro_choice = h.choice(&segment, ProgramType::Macro).await;
    assert_eq!(macro_choice.program_id, program_id(&h.content, "Arc"));
    assert_eq!(h.binding_offset(&macro_choice), 0);
    assert_eq!(macro_choice.transpose, 0);

    // Verse is G major; the macro arc sits in C major
    let main_choice = h.choice(&segment, ProgramType::Main).await;
    assert_eq!(main_choice.program_id, program_id(&h.content, "Verse"));
    assert_eq!(h.binding_offset(&main_choice), 0);
    assert_eq!(main_choice.transpose, 5);

    assert_eq!(segment.key.as_deref(), Some("C Major"));
    assert_eq!(segment.total, Some(4));
    assert_eq!(segment.tempo, Some(110.0));
    assert_eq!(segment.density, Some(0.5));

    let length = time::seconds_between(&segment.begin_at, &segment.end_at.unwrap());
    assert!((length - 4.0 / 110.0 * 60.0).abs() < 0.01, "length was {}", length);
}

#[tokio::test]
async fn test_chords_truncated_at_sequence_total_and_transposed() {
    let h = harness(TWO_MAIN_LIBRARY).await;

    let segment = h.craft_next(None).await;
    let chords = h.segments.read_chords_for_segment(segment.id).await.unwrap();

    // Source has G@0, D@2, C@4, Em@6 over a 4-beat sequence
    let rendered: Vec<(f64, &str)> = chords.iter().map(|c| (c.position, c.name.as_str())).collect();
    assert_eq!(rendered, vec![(0.0, "C"), (2.0, "G")]);
    assert!(chords.iter().all(|c| c.position < 4.0));
}

#[tokio::test]
async fn test_memes_are_a_deduplicated_union() {
    let h = harness(TWO_MAIN_LIBRARY).await;

    let segment = h.craft_next(None).await;
    let mut names: Vec<String> = h
        .segments
        .read_memes_for_segment(segment.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    names.sort();

    // "Wild" arrives from the macro binding, the main binding and the main program
    assert_eq!(names, vec!["BRIGHT", "WILD"]);
}

#[tokio::test]
async fn test_fabrication_types_follow_program_structure() {
    let h = harness(TWO_MAIN_LIBRARY).await;

    let s0 = h.craft_next(None).await;
    let s1 = h.craft_next(Some(&s0)).await;
    let s2 = h.craft_next(Some(&s1)).await;
    let s3 = h.craft_next(Some(&s2)).await;

    let types: Vec<Option<SegmentType>> = [&s0, &s1, &s2, &s3].iter().map(|s| s.segment_type).collect();
    assert_eq!(
        types,
        vec![
            Some(SegmentType::Initial),
            Some(SegmentType::Continue),
            Some(SegmentType::NextMain),
            Some(SegmentType::NextMacro),
        ]
    );

    // Continue keeps both programs and advances main
    let (m0, m1) = (h.choice(&s0, ProgramType::Macro).await, h.choice(&s1, ProgramType::Macro).await);
    assert_eq!(m1.program_sequence_binding_id, m0.program_sequence_binding_id);
    let main1 = h.choice(&s1, ProgramType::Main).await;
    assert_eq!(main1.program_id, program_id(&h.content, "Verse"));
    assert_eq!(h.binding_offset(&main1), 1);
    assert_eq!(main1.transpose, 5);

    // NextMain advances macro and resets main on a new program
    let macro2 = h.choice(&s2, ProgramType::Macro).await;
    assert_eq!(h.binding_offset(&macro2), 1);
    assert_eq!(macro2.transpose, 0);
    let main2 = h.choice(&s2, ProgramType::Main).await;
    assert_eq!(main2.program_id, program_id(&h.content, "Bridge"));
    assert_eq!(h.binding_offset(&main2), 0);
    assert_eq!(main2.transpose, 0);
    assert_eq!(s2.key.as_deref(), Some("D Minor"));

    // NextMacro restarts the arc, moved onto the chain's D minor
    let macro3 = h.choice(&s3, ProgramType::Macro).await;
    assert_eq!(h.binding_offset(&macro3), 0);
    assert_eq!(macro3.transpose, 2);
    let main3 = h.choice(&s3, ProgramType::Main).await;
    assert_eq!(main3.program_id, program_id(&h.content, "Verse"));
    assert_eq!(h.binding_offset(&main3), 0);
    assert_eq!(main3.transpose, -5);
    assert_eq!(s3.key.as_deref(), Some("D Major"));

    let stored = h.segments.read_segments(h.chain.id).await.unwrap();
    let offsets: Vec<i64> = stored.iter().map(|s| s.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2, 3]);
    for pair in stored.windows(2) {
        assert_eq!(pair[0].end_at, Some(pair[1].begin_at));
    }
}

#[tokio::test]
async fn test_failed_craft_reverts_to_planned() {
    let h = harness(MACRO_ONLY_LIBRARY).await;
    let target = h.plan_next(None).await;

    let result = h.craft(&target).await;
    assert!(matches!(result, Err(CraftError::NoCompatibleCandidate(_))));

    let stored = h.segments.read_segment(target.id).await.unwrap();
    assert_eq!(stored.state, SegmentState::Planned);
    assert_eq!(stored.segment_type, None);
    assert_eq!(stored.end_at, None);

    for table in ["segment_choices", "segment_memes", "segment_chords"] {
        assert_eq!(count_rows(&h.pool, table, target.id).await, 0, "{} not empty", table);
    }

    let messages = h.segments.read_messages_for_segment(target.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_type, SegmentMessageType::Error);

    // Still eligible for another attempt
    assert!(matches!(h.craft(&target).await, Err(CraftError::NoCompatibleCandidate(_))));
    assert_eq!(h.segments.read_messages_for_segment(target.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_craft_out_of_order_is_rejected() {
    let h = harness(TWO_MAIN_LIBRARY).await;
    let first = h.plan_next(None).await;
    let second = Segment::planned(h.chain.id, 1, first.begin_at);
    h.segments.create_segment(&second).await.unwrap();

    let result = h.craft(&second).await;

    assert!(matches!(result, Err(CraftError::OutOfOrder(_))));
    let stored = h.segments.read_segment(second.id).await.unwrap();
    assert_eq!(stored.state, SegmentState::Planned);
    assert!(h.segments.read_messages_for_segment(second.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_crafts_have_one_winner() {
    let h = harness(TWO_MAIN_LIBRARY).await;
    let target = h.plan_next(None).await;

    let (a, b) = tokio::join!(h.craft(&target), h.craft(&target));

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(CraftError::OptimisticConflict(_))))
            .count(),
        1
    );

    assert_eq!(count_rows(&h.pool, "segment_choices", target.id).await, 2);
    let stored = h.segments.read_segment(target.id).await.unwrap();
    assert_eq!(stored.state, SegmentState::Crafted);
}

#[tokio::test]
async fn test_external_access_cannot_craft() {
    let h = harness(TWO_MAIN_LIBRARY).await;
    let target = h.plan_next(None).await;

    let pipeline = pipeline_for(&h.pool, h.chains.as_ref(), h.segments.clone(), h.chain.id).await;
    let result = pipeline.craft(&Access::external(), &target).await;

    assert!(matches!(result, Err(CraftError::Forbidden(_))));
    let stored = h.segments.read_segment(target.id).await.unwrap();
    assert_eq!(stored.state, SegmentState::Planned);
}

#[tokio::test]
async fn test_recraft_after_revert_makes_same_choices() {
    let h = harness(TWO_MAIN_LIBRARY).await;
    let target = h.plan_next(None).await;

    let first = h.craft(&target).await.unwrap();
    let first_main = h.choice(&first, ProgramType::Main).await;

    // Force the segment back through revert and craft it again
    assert!(h.segments.revert_segment(target.id).await.unwrap());
    let second = h.craft(&target).await.unwrap();
    let second_main = h.choice(&second, ProgramType::Main).await;

    assert_eq!(first_main.program_sequence_binding_id, second_main.program_sequence_binding_id);
    assert_eq!(first.key, second.key);
}

#[tokio::test]
async fn test_unusable_sequence_tempo_fails_and_reverts() {
    let h = harness(TWO_MAIN_LIBRARY).await;
    let target = h.plan_next(None).await;

    // Overrides the loader would refuse, injected straight into the snapshot
    let mut content = h.content.clone();
    for sequence in content.sequences.iter_mut().filter(|s| s.name == "Wild") {
        sequence.tempo = Some(-120.0);
        sequence.density = Some(4.0);
    }
    let pipeline = pipeline_with(h.segments.clone(), SourceMaterial::new(content, []), ExclusiveMemePolicy::default());

    let result = pipeline.craft(&Access::internal(), &target).await;
    assert!(matches!(result, Err(CraftError::MissingContent(_))), "{:?}", result);

    let stored = h.segments.read_segment(target.id).await.unwrap();
    assert_eq!(stored.state, SegmentState::Planned);
    assert_eq!(stored.tempo, None);
    assert_eq!(stored.end_at, None);
    assert_eq!(count_rows(&h.pool, "segment_choices", target.id).await, 0);
}

/// Where a [`FaultyStore`] breaks
#[derive(Debug, Clone, Copy, PartialEq)]
enum Fault {
    /// Commit fails before writing anything
    CommitRefused,
    /// Commit writes everything, then reports failure
    CommitLost,
    /// Every segment read fails
    ReadSegment,
}

/// Segment store that delegates to SQLite but fails at one chosen point
struct FaultyStore {
    inner: Arc<SqliteSegmentStore>,
    fault: Fault,
}

impl FaultyStore {
    fn injected(&self) -> segcraft_common::Error {
        segcraft_common::Error::Internal(format!("injected fault: {:?}", self.fault))
    }
}

#[async_trait]
impl SegmentStore for FaultyStore {
    async fn read_segment(&self, segment_id: Uuid) -> segcraft_common::Result<Segment> {
        if self.fault == Fault::ReadSegment {
            return Err(self.injected());
        }
        self.inner.read_segment(segment_id).await
    }

    async fn read_segment_at(&self, chain_id: Uuid, offset: i64) -> segcraft_common::Result<Option<Segment>> {
        self.inner.read_segment_at(chain_id, offset).await
    }

    async fn read_preceding_segment(&self, chain_id: Uuid, offset: i64) -> segcraft_common::Result<Option<Segment>> {
        self.inner.read_preceding_segment(chain_id, offset).await
    }

    async fn read_last_segment(&self, chain_id: Uuid) -> segcraft_common::Result<Option<Segment>> {
        self.inner.read_last_segment(chain_id).await
    }

    async fn read_last_segment_in_state(
        &self,
        chain_id: Uuid,
        state: SegmentState,
    ) -> segcraft_common::Result<Option<Segment>> {
        self.inner.read_last_segment_in_state(chain_id, state).await
    }

    async fn read_segments(&self, chain_id: Uuid) -> segcraft_common::Result<Vec<Segment>> {
        self.inner.read_segments(chain_id).await
    }

    async fn read_choices_for_segment(&self, segment_id: Uuid) -> segcraft_common::Result<Vec<SegmentChoice>> {
        self.inner.read_choices_for_segment(segment_id).await
    }

    async fn read_memes_for_segment(&self, segment_id: Uuid) -> segcraft_common::Result<Vec<SegmentMeme>> {
        self.inner.read_memes_for_segment(segment_id).await
    }

    async fn read_chords_for_segment(&self, segment_id: Uuid) -> segcraft_common::Result<Vec<SegmentChord>> {
        self.inner.read_chords_for_segment(segment_id).await
    }

    async fn read_messages_for_segment(&self, segment_id: Uuid) -> segcraft_common::Result<Vec<SegmentMessage>> {
        self.inner.read_messages_for_segment(segment_id).await
    }

    async fn create_segment(&self, segment: &Segment) -> segcraft_common::Result<()> {
        self.inner.create_segment(segment).await
    }

    async fn cas_update_segment_state(
        &self,
        segment_id: Uuid,
        expected: SegmentState,
        new: SegmentState,
    ) -> segcraft_common::Result<bool> {
        self.inner.cas_update_segment_state(segment_id, expected, new).await
    }

    async fn commit_fabrication(&self, fabrication: &Fabrication) -> segcraft_common::Result<bool> {
        match self.fault {
            Fault::CommitRefused => Err(self.injected()),
            Fault::CommitLost => {
                assert!(self.inner.commit_fabrication(fabrication).await?);
                Err(self.injected())
            }
            Fault::ReadSegment => self.inner.commit_fabrication(fabrication).await,
        }
    }

    async fn revert_segment(&self, segment_id: Uuid) -> segcraft_common::Result<bool> {
        self.inner.revert_segment(segment_id).await
    }

    async fn create_segment_message(&self, message: &SegmentMessage) -> segcraft_common::Result<()> {
        self.inner.create_segment_message(message).await
    }
}

impl Harness {
    async fn craft_with_fault(&self, target: &Segment, fault: Fault) -> Result<Segment, CraftError> {
        let faulty = Arc::new(FaultyStore {
            inner: self.segments.clone(),
            fault,
        });
        pipeline_for(&self.pool, self.chains.as_ref(), faulty, self.chain.id)
            .await
            .craft(&Access::internal(), target)
            .await
    }
}

#[tokio::test]
async fn test_commit_failure_reverts_without_child_rows() {
    for fault in [Fault::CommitRefused, Fault::CommitLost] {
        let h = harness(TWO_MAIN_LIBRARY).await;
        let target = h.plan_next(None).await;

        let result = h.craft_with_fault(&target, fault).await;
        assert!(matches!(result, Err(CraftError::Persistence(_))), "{:?}: {:?}", fault, result);

        let stored = h.segments.read_segment(target.id).await.unwrap();
        assert_eq!(stored.state, SegmentState::Planned, "{:?}", fault);
        assert_eq!(stored.segment_type, None);
        for table in ["segment_choices", "segment_memes", "segment_chords"] {
            assert_eq!(count_rows(&h.pool, table, target.id).await, 0, "{:?}: {} not empty", fault, table);
        }

        let messages = h.segments.read_messages_for_segment(target.id).await.unwrap();
        assert_eq!(messages.len(), 1, "{:?}", fault);
        assert_eq!(messages[0].message_type, SegmentMessageType::Error);

        // The store recovered; the segment crafts normally now
        assert_eq!(h.craft(&target).await.unwrap().state, SegmentState::Crafted);
    }
}

#[tokio::test]
async fn test_failed_reread_keeps_committed_craft() {
    let h = harness(TWO_MAIN_LIBRARY).await;
    let target = h.plan_next(None).await;

    let crafted = h.craft_with_fault(&target, Fault::ReadSegment).await.unwrap();
    assert_eq!(crafted.state, SegmentState::Crafted);
    assert_eq!(crafted.key.as_deref(), Some("C Major"));

    let stored = h.segments.read_segment(target.id).await.unwrap();
    assert_eq!(stored.state, SegmentState::Crafted);
    assert_eq!(count_rows(&h.pool, "segment_choices", target.id).await, 2);
    assert!(h.segments.read_messages_for_segment(target.id).await.unwrap().is_empty());
}

/// Chain bound to a library and, directly, to one of its programs
async fn start_chain_preferring(chains: &dyn ChainStore, library_id: Uuid, program_id: Uuid) -> Chain {
    let chain = Chain::new("Preferring", ChainType::Production, Utc::now(), None);
    let bindings = [
        ChainBinding::new(chain.id, ChainBindingType::Library, library_id),
        ChainBinding::new(chain.id, ChainBindingType::Program, program_id),
    ];
    chains.create_chain(&chain, &bindings).await.unwrap();
    chains.update_chain_state(chain.id, ChainState::Fabricate).await.unwrap()
}

fn wild_calm_policy() -> ExclusiveMemePolicy {
    ExclusiveMemePolicy::new(&[vec!["Wild".to_string(), "Calm".to_string()]])
}

/// Craft offset 0 of `chain` under `memes` and return the chosen main program
async fn main_program_under(
    pool: &SqlitePool,
    chains: &SqliteChainStore,
    segments: Arc<SqliteSegmentStore>,
    chain: &Chain,
    memes: impl MemeCompatibility + 'static,
) -> Uuid {
    let target = Segment::planned(chain.id, 0, chain.start_at);
    segments.create_segment(&target).await.unwrap();

    let material = ingest_chain(pool, chains, chain.id).await;
    let crafted = pipeline_with(segments.clone(), material, memes)
        .craft(&Access::internal(), &target)
        .await
        .unwrap();

    segments
        .read_choices_for_segment(crafted.id)
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.program_type == ProgramType::Main)
        .map(|c| c.program_id)
        .unwrap()
}

#[tokio::test]
async fn test_exclusive_memes_steer_main_choice() {
    let (_dir, pool) = create_test_db().await;
    let (chains, segments) = stores(&pool);
    let (library, content) = load_library(&pool, WILD_ARC_LIBRARY).await;
    let lullaby = program_id(&content, "Lullaby");
    let rumble = program_id(&content, "Rumble");

    // The direct binding makes Calm "Lullaby" the top-scoring main
    let open = start_chain_preferring(chains.as_ref(), library.id, lullaby).await;
    let strict = start_chain_preferring(chains.as_ref(), library.id, lullaby).await;

    let chosen = main_program_under(&pool, &chains, segments.clone(), &open, PermissiveMemePolicy).await;
    assert_eq!(chosen, lullaby);

    // Calm contradicts the arc's Wild, leaving Rumble
    let chosen = main_program_under(&pool, &chains, segments.clone(), &strict, wild_calm_policy()).await;
    assert_eq!(chosen, rumble);
}

#[tokio::test]
async fn test_no_compatible_main_when_every_candidate_contradicts() {
    let (_dir, pool) = create_test_db().await;
    let (chains, segments) = stores(&pool);
    let (library, _) = load_library(&pool, CALM_ONLY_LIBRARY).await;
    let chain = start_chain(chains.as_ref(), library.id, Utc::now(), None).await;
    let target = Segment::planned(chain.id, 0, chain.start_at);
    segments.create_segment(&target).await.unwrap();

    let material = ingest_chain(&pool, chains.as_ref(), chain.id).await;
    let pipeline = pipeline_with(segments.clone(), material, wild_calm_policy());
    let result = pipeline.craft(&Access::internal(), &target).await;

    assert!(matches!(result, Err(CraftError::NoCompatibleCandidate(_))), "{:?}", result);
    let stored = segments.read_segment(target.id).await.unwrap();
    assert_eq!(stored.state, SegmentState::Planned);
    assert_eq!(count_rows(&pool, "segment_choices", target.id).await, 0);
}
