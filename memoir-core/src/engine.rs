//! The memory engine facade.
//!
//! One explicitly instantiated [`MemoryEngine`] owns the transcript view,
//! the record store, the summarization queue, and the cross-session ledger;
//! collaborators (provider, scheduler, parser, archive, vector index,
//! indicator hook) are passed in at construction. All methods take
//! `&mut self`: engine work runs on one task, and the only suspension
//! points are provider calls, scheduler sleeps, and persistence writes.
//!
//! No error leaves the engine toward prompt assembly. Summarization
//! failures end units without records, and composition degrades to an
//! empty string.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::config::EngineConfig;
use crate::memory::annotate::{self, AnnotationParser, BracketAnnotationParser};
use crate::memory::compose;
use crate::memory::ledger::CharacterLedger;
use crate::memory::pairing::{plan_unit, SummaryUnit, UnitPlan};
use crate::memory::queue::{
    build_prompt, jittered, IndicatorHook, RetryState, SummaryEvent, SummaryQueue,
    BLOCKED_RECHECK, UNIT_THROTTLE,
};
use crate::memory::record::MemoryRecord;
use crate::memory::store::{LoadReport, MemoryStore};
use crate::memory::tiers::reclassify;
use crate::memory::vectors::{LocalVectorIndex, VectorDoc, VectorHit, VectorSearch};
use crate::memory::weight::{self, CurrentContext, ReinforcementKind};
use crate::persist::{MemoryArchive, PersistError};
use crate::provider::CompletionProvider;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::transcript::{Transcript, Turn};

/// Vector-index collection summaries are filed under.
const MEMORY_COLLECTION: &str = "memories";

/// Aggregate counters for host status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub records: usize,
    pub short_term: usize,
    pub medium_term: usize,
    pub long_term: usize,
    pub permanent: usize,
    pub unfiled: usize,
    pub core_memories: usize,
    pub average_base_importance: f64,
    pub queue_depth: usize,
    pub busy: bool,
    pub blocked: bool,
    pub ledger_facts: usize,
}

pub struct MemoryEngine {
    config: EngineConfig,
    provider: Box<dyn CompletionProvider>,
    scheduler: Box<dyn Scheduler>,
    parser: Box<dyn AnnotationParser>,
    archive: Option<MemoryArchive>,
    vectors: Box<dyn VectorSearch>,
    indicator: Option<IndicatorHook>,
    transcript: Transcript,
    store: MemoryStore,
    ledger: CharacterLedger,
    queue: SummaryQueue,
}

impl MemoryEngine {
    pub fn new(provider: impl CompletionProvider + 'static, config: EngineConfig) -> Self {
        Self {
            config,
            provider: Box::new(provider),
            scheduler: Box::new(TokioScheduler),
            parser: Box::new(BracketAnnotationParser),
            archive: None,
            vectors: Box::new(LocalVectorIndex::new()),
            indicator: None,
            transcript: Transcript::new(),
            store: MemoryStore::new(),
            ledger: CharacterLedger::new(),
            queue: SummaryQueue::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    pub fn with_parser(mut self, parser: impl AnnotationParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    pub fn with_archive(mut self, archive: MemoryArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_vector_search(mut self, vectors: impl VectorSearch + 'static) -> Self {
        self.vectors = Box::new(vectors);
        self
    }

    pub fn with_indicator(
        mut self,
        hook: impl Fn(&SummaryEvent) + Send + Sync + 'static,
    ) -> Self {
        self.indicator = Some(Box::new(hook));
        self
    }

    // ========================================================================
    // Turn intake
    // ========================================================================

    /// Record a newly arrived turn: run the mention sweep over existing
    /// records, then plan and enqueue its summary unit. Returns the turn's
    /// index. Call [`Self::drive`] afterwards to process the queue.
    pub fn push_turn(&mut self, turn: Turn) -> usize {
        let text = turn.text.clone();
        let index = self.transcript.push(turn);

        self.detect_reinforcements(&text);

        let now = self.scheduler.now();
        if self.queue.watchdog_due(now) {
            self.queue.watchdog_tick(now);
        }

        match plan_unit(index, &self.transcript, self.config.pairing) {
            UnitPlan::Ready(unit) => {
                if !self.store.is_summarized(unit.target_index, self.config.pairing) {
                    self.queue.enqueue(unit);
                }
            }
            UnitPlan::Defer | UnitPlan::Invalid => {}
        }

        index
    }

    /// Enqueue every complete, unsummarized unit in the transcript (oldest
    /// first) and process them. Catch-up path for imported conversations.
    pub async fn summarize_missing(&mut self) {
        let mut queued = 0;
        for index in 0..self.transcript.len() {
            if let UnitPlan::Ready(unit) = plan_unit(index, &self.transcript, self.config.pairing)
            {
                if !self.store.is_summarized(unit.target_index, self.config.pairing)
                    && self.queue.enqueue(unit)
                {
                    queued += 1;
                }
            }
        }
        if queued > 0 {
            info!("[memory:queue] backfill queued {queued} units");
            self.drive().await;
        }
    }

    // ========================================================================
    // Queue processing
    // ========================================================================

    /// Drain the queue, strictly FIFO, one unit at a time. Re-entrant calls
    /// are no-ops while a drain holds the busy flag. While the bulk
    /// operation gate is set, the drain waits once and re-checks; if still
    /// blocked it leaves the units queued for a later drive.
    pub async fn drive(&mut self) {
        let now = self.scheduler.now();
        if self.queue.watchdog_due(now) {
            self.queue.watchdog_tick(now);
        }
        if !self.queue.begin_drain(now) {
            debug!("[memory:queue] drain already in progress");
            return;
        }

        loop {
            if self.queue.is_blocked() {
                debug!("[memory:queue] blocked by bulk operation, waiting");
                self.scheduler.sleep(BLOCKED_RECHECK).await;
                if self.queue.is_blocked() {
                    debug!("[memory:queue] still blocked, leaving units queued");
                    break;
                }
            }

            let Some(unit) = self.queue.take_next() else {
                break;
            };
            self.process_unit(unit).await;

            if !self.queue.is_empty() {
                self.scheduler.sleep(UNIT_THROTTLE).await;
            }
        }

        self.queue.end_drain();
    }

    /// Run one unit through the retry machine. Exhaustion yields no record
    /// and no error; the drain moves on.
    async fn process_unit(&mut self, unit: SummaryUnit) -> Option<usize> {
        let target = unit.target_index;
        self.notify(SummaryEvent::Started { target_index: target });

        let mut state = RetryState::first();
        let mut attempts = 0u32;
        let raw = loop {
            if state == RetryState::Exhausted {
                break None;
            }
            if let Some(base) = state.backoff() {
                self.scheduler.sleep(jittered(base)).await;
            }

            attempts += 1;
            let prompt = build_prompt(
                &unit,
                &self.transcript,
                &self.config.summary,
                state.uses_brief_prompt(),
            );
            match self.provider.generate(&prompt).await {
                Ok(text) if !text.trim().is_empty() => break Some(text),
                Ok(_) => {
                    warn!("[memory:queue] empty summary for index {target} (attempt {attempts})");
                    state = state.next();
                }
                Err(err) => {
                    warn!(
                        "[memory:queue] provider error for index {target}: {err} (attempt {attempts})"
                    );
                    state = state.next();
                }
            }
        };

        match raw {
            Some(raw) => {
                let core_memory = self.install_summary(unit, &raw).await;
                info!("[memory:queue] summarized unit at index {target}");
                self.notify(SummaryEvent::Completed { target_index: target, core_memory });
                Some(target)
            }
            None => {
                warn!("[memory:queue] giving up on index {target} after {attempts} attempts");
                self.notify(SummaryEvent::Failed { target_index: target, attempts });
                None
            }
        }
    }

    /// Turn raw provider output into a stored record: detect and strip the
    /// core marker, parse annotations, hash the source turns, feed the
    /// ledger and the vector index. Returns whether the record is a core
    /// memory.
    async fn install_summary(&mut self, unit: SummaryUnit, raw: &str) -> bool {
        let now = self.scheduler.now();
        let is_core = annotate::is_core_memory(raw);
        let stripped = annotate::strip_core_marker(raw);
        let parsed = self.parser.parse(&stripped);

        let original_length: usize = unit
            .source_indices
            .iter()
            .filter_map(|&i| self.transcript.get(i))
            .map(|t| t.text.chars().count())
            .sum();
        let content_hashes: Vec<String> = unit
            .source_indices
            .iter()
            .filter_map(|&i| self.transcript.hash_of(i))
            .collect();

        let mut record = MemoryRecord::new(parsed.cleaned_text, original_length, content_hashes, now)
            .with_base_importance(parsed.base_importance)
            .with_core_memory(is_core);
        if unit.source_indices.len() > 1 {
            record = record.with_pair(unit.source_indices.clone());
        }
        record.topics = parsed.topics;
        record.characters = parsed.characters;
        record.emotional_tone = parsed.emotional_tone;
        record.context = parsed.context;
        record.memory_type = parsed.memory_type;
        record.character_development = parsed.character_development;
        record.plot_significance = parsed.plot_significance;
        record.emotional_impact = parsed.emotional_impact;
        record.confidence = parsed.confidence;
        record.relationships = parsed.relationships;
        record.world_facts = parsed.world_facts;

        if self.config.cross_session_facts {
            let origin = self.store.conversation_id().map(str::to_string);
            self.ledger.absorb_record(&record, origin.as_deref(), now);
        }
        if self.config.semantic_retrieval {
            let doc = VectorDoc::new(format!("unit-{}", unit.target_index), record.text.clone())
                .with_meta("index", unit.target_index.to_string());
            self.vectors.insert(MEMORY_COLLECTION, doc).await;
        }

        self.store.put(unit.target_index, record, self.config.pairing);
        is_core
    }

    // ========================================================================
    // Injection
    // ========================================================================

    /// Compose the memory block for the next generation request. Rescores
    /// and reclassifies every record against the current conversational
    /// window first. Returns an empty string when nothing qualifies.
    pub async fn compose_injection(&mut self, max_budget: usize) -> String {
        let now = self.scheduler.now();
        let context =
            CurrentContext::from_window(self.transcript.recent_window(self.config.running_window));

        weight::rescore_all(
            self.store.records_mut().map(|(_, r)| r),
            &context,
            now,
            &self.config.weights,
        );
        let partition = reclassify(
            self.store.records_mut(),
            self.transcript.len(),
            self.config.running_window,
        );

        let semantic_hits = if self.config.semantic_retrieval {
            self.query_vectors(self.config.semantic_top_k).await
        } else {
            Vec::new()
        };

        if self.config.legacy_composition {
            let cutoff = self.transcript.len().saturating_sub(self.config.running_window);
            return compose::compose_legacy(
                self.store.records(),
                cutoff,
                &semantic_hits,
                max_budget,
            );
        }

        let cross_session = if self.config.cross_session_facts {
            self.ledger.cross_session(
                self.store.conversation_id(),
                now,
                self.config.ledger_retention_days,
            )
        } else {
            Vec::new()
        };

        compose::compose_tiered(
            self.store.records(),
            &partition,
            &cross_session,
            &semantic_hits,
            max_budget,
        )
    }

    async fn query_vectors(&self, top_k: usize) -> Vec<VectorHit> {
        let window = self.transcript.recent_window(self.config.running_window);
        if window.is_empty() {
            return Vec::new();
        }
        let query: String = window
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.vectors.query(MEMORY_COLLECTION, &query, top_k).await
    }

    // ========================================================================
    // Record maintenance
    // ========================================================================

    /// Apply a reinforcement of the given kind to the record at `index` and
    /// rescore it immediately. Returns false when no record exists there.
    pub fn reinforce(&mut self, index: usize, kind: ReinforcementKind) -> bool {
        let now = self.scheduler.now();
        let context =
            CurrentContext::from_window(self.transcript.recent_window(self.config.running_window));

        match self.store.get_mut(index) {
            Some(record) => {
                record.reinforce(kind.amount());
                record.dynamic_importance = weight::score(record, &context, now, &self.config.weights);
                debug!(
                    "[memory:weight] reinforced record {index} ({}) to count {}",
                    kind.name(),
                    record.reinforcement_count
                );
                true
            }
            None => false,
        }
    }

    /// Scan newly arrived text for mentions of stored characters and topics
    /// and apply a mention reinforcement per hit. Returns the hit count.
    pub fn detect_reinforcements(&mut self, text: &str) -> usize {
        let hits = self.store.detect_mentions(text);
        for &index in &hits {
            self.reinforce(index, ReinforcementKind::Mention);
        }
        hits.len()
    }

    /// Replace a record's summary text by hand, marking it edited. The
    /// parsed metadata stays as it was.
    pub fn edit_record(&mut self, index: usize, new_text: impl Into<String>) -> bool {
        match self.store.get_mut(index) {
            Some(record) => {
                record.apply_edit(new_text);
                info!("[memory:store] record {index} edited");
                true
            }
            None => false,
        }
    }

    pub fn delete_record(&mut self, index: usize) -> bool {
        let removed = self.store.delete(index).is_some();
        if removed {
            info!("[memory:store] record {index} deleted");
        }
        removed
    }

    /// Delete the record at `index` and run its unit through the queue
    /// again. Returns false when there was nothing to regenerate.
    pub async fn regenerate(&mut self, index: usize) -> bool {
        let Some(record) = self.store.delete(index) else {
            return false;
        };
        let source_indices = if record.is_paired {
            record.paired_source_indices.clone()
        } else {
            vec![index]
        };

        info!("[memory:store] regenerating record {index}");
        self.queue.enqueue(SummaryUnit { source_indices, target_index: index });
        self.drive().await;
        true
    }

    // ========================================================================
    // Conversation lifecycle
    // ========================================================================

    /// Switch to a conversation: install its transcript, load and validate
    /// its saved records, and prune any that failed validation from the
    /// persisted copy. Reloading the active conversation revalidates the
    /// in-memory records against the new transcript instead of re-reading
    /// the archive, which is how a host reports edited turns.
    pub async fn load_conversation(
        &mut self,
        id: &str,
        turns: Vec<Turn>,
    ) -> Result<LoadReport, PersistError> {
        self.transcript = Transcript::from_turns(turns);

        let report = if self.store.conversation_id() == Some(id) && !self.store.is_empty() {
            self.store.load_for_conversation(id, HashMap::new(), &self.transcript)
        } else {
            let loaded = match &self.archive {
                Some(archive) => archive
                    .load_conversation(id)
                    .await?
                    .map(|saved| saved.records)
                    .unwrap_or_default(),
                None => HashMap::new(),
            };
            self.store.load_for_conversation(id, loaded, &self.transcript)
        };

        if report.dropped > 0 {
            if let Some(archive) = &self.archive {
                archive
                    .save_conversation(id, self.store.records(), self.scheduler.now())
                    .await?;
            }
        }

        // Restored records are re-indexed so semantic retrieval keeps
        // working across restarts.
        if self.config.semantic_retrieval && !report.already_loaded {
            let docs: Vec<VectorDoc> = self
                .store
                .records()
                .iter()
                .map(|(index, record)| {
                    VectorDoc::new(format!("unit-{index}"), record.text.clone())
                        .with_meta("index", index.to_string())
                })
                .collect();
            for doc in docs {
                self.vectors.insert(MEMORY_COLLECTION, doc).await;
            }
        }

        if self.ledger.is_empty() {
            if let Some(archive) = &self.archive {
                if let Some(ledger) = archive.load_ledger().await? {
                    self.ledger = ledger;
                }
            }
        }

        Ok(report)
    }

    /// Persist the active conversation's records and the ledger. A no-op
    /// without an archive or an active conversation.
    pub async fn save(&self) -> Result<(), PersistError> {
        let Some(archive) = &self.archive else {
            debug!("[memory:persist] no archive configured, skipping save");
            return Ok(());
        };
        let Some(id) = self.store.conversation_id() else {
            debug!("[memory:persist] no active conversation, skipping save");
            return Ok(());
        };

        let now = self.scheduler.now();
        archive.save_conversation(id, self.store.records(), now).await?;
        archive.save_ledger(&self.ledger, now).await?;
        Ok(())
    }

    /// Periodic upkeep: watchdog inspection, ledger retention, conversation
    /// retention pruning. Returns how many conversation saves were pruned.
    pub async fn run_maintenance(&mut self) -> Result<usize, PersistError> {
        let now = self.scheduler.now();
        self.queue.watchdog_tick(now);
        self.ledger.prune_stale(now, self.config.ledger_retention_days);

        let mut pruned = 0;
        if let Some(archive) = &self.archive {
            pruned = archive
                .prune_conversations(self.config.retained_conversations, self.store.conversation_id())
                .await?;
            archive.save_ledger(&self.ledger, now).await?;
        }
        Ok(pruned)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Clear the busy flag if it is stuck. Hosts with their own timers call
    /// this on an interval; engine entry points also run it opportunistically.
    pub fn watchdog_tick(&mut self) -> bool {
        let now = self.scheduler.now();
        self.queue.watchdog_tick(now)
    }

    /// Gate or ungate queue processing around bulk host operations.
    pub fn set_blocked(&mut self, blocked: bool) {
        info!("[memory:queue] bulk-operation gate {}", if blocked { "set" } else { "cleared" });
        self.queue.set_blocked(blocked);
    }

    pub fn is_summarized(&self, index: usize) -> bool {
        self.store.is_summarized(index, self.config.pairing)
    }

    pub fn record(&self, index: usize) -> Option<&MemoryRecord> {
        self.store.get(index)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn stats(&mut self) -> EngineStats {
        let partition = reclassify(
            self.store.records_mut(),
            self.transcript.len(),
            self.config.running_window,
        );

        let records = self.store.len();
        let core_memories = self.store.records().values().filter(|r| r.is_core_memory).count();
        let average_base_importance = if records == 0 {
            0.0
        } else {
            self.store
                .records()
                .values()
                .map(|r| r.base_importance as f64)
                .sum::<f64>()
                / records as f64
        };

        EngineStats {
            records,
            short_term: partition.short_term.len(),
            medium_term: partition.medium_term.len(),
            long_term: partition.long_term.len(),
            permanent: partition.permanent.len(),
            unfiled: partition.unfiled.len(),
            core_memories,
            average_base_importance,
            queue_depth: self.queue.len(),
            busy: self.queue.is_busy(),
            blocked: self.queue.is_blocked(),
            ledger_facts: self.ledger.len(),
        }
    }

    fn notify(&self, event: SummaryEvent) {
        if let Some(hook) = &self.indicator {
            hook(&event);
        }
    }
}
