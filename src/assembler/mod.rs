//! Ordered reasoning / prose blocks built from incremental deltas.
//!
//! Rendering is coalesced per block: the first unrendered delta arms a
//! deadline `debounce` in the future and later deltas ride along with it.
//! Callers drive time explicitly through [`BlockAssembler::flush_due`] and
//! must call [`BlockAssembler::flush`] at block close and turn end.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::render::Surface;
use crate::types::{BlockId, BlockKey, BlockKind, ContentBlock};

/// Indices at and above this value are synthetic (raw-text or reconciled
/// blocks that never had a wire index).
const SYNTHETIC_INDEX_BASE: u32 = 1 << 30;

/// Separator between prose blocks in the joined answer text.
const PROSE_SEPARATOR: &str = "\n\n";

#[derive(Debug)]
pub struct BlockAssembler {
    blocks: Vec<ContentBlock>,
    keys: HashMap<BlockKey, BlockId>,
    pending: HashMap<BlockId, Instant>,
    reconciled: HashSet<BlockId>,
    debounce: Duration,
    next_id: u32,
    next_synthetic: u32,
}

impl BlockAssembler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            blocks: Vec::new(),
            keys: HashMap::new(),
            pending: HashMap::new(),
            reconciled: HashSet::new(),
            debounce,
            next_id: 0,
            next_synthetic: SYNTHETIC_INDEX_BASE,
        }
    }

    /// Blocks in first-seen (display) order.
    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> Option<&ContentBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_at(&self, key: BlockKey) -> Option<&ContentBlock> {
        self.keys.get(&key).and_then(|id| self.block(*id))
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Earliest coalesced render deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Open the block at `key`. Re-opening an existing key returns it
    /// unchanged.
    pub fn open_block(&mut self, key: BlockKey, kind: BlockKind, surface: &mut Surface) -> BlockId {
        if let Some(id) = self.keys.get(&key) {
            return *id;
        }
        let id = BlockId(self.next_id);
        self.next_id += 1;
        self.blocks.push(ContentBlock {
            id,
            key,
            kind,
            text: String::new(),
            finalized: false,
            streamed: false,
        });
        self.keys.insert(key, id);
        surface.open_block(id, kind);
        id
    }

    /// Append a fragment. A delta for an unopened key creates the block.
    pub fn apply_delta(
        &mut self,
        key: BlockKey,
        kind: BlockKind,
        fragment: &str,
        now: Instant,
        surface: &mut Surface,
    ) {
        let id = match self.keys.get(&key) {
            Some(id) => *id,
            None => {
                debug!(segment = key.segment, index = key.index, "delta for unopened block");
                self.open_block(key, kind, surface)
            }
        };
        self.append(id, fragment, now, surface);
    }

    /// Flush and finalize the block at `key`.
    pub fn close_block(&mut self, key: BlockKey, surface: &mut Surface) {
        self.flush(surface);
        let Some(id) = self.keys.get(&key).copied() else {
            return;
        };
        if let Some(block) = self.blocks.iter_mut().find(|b| b.id == id) {
            if !block.finalized {
                block.finalized = true;
                surface.close_block(id);
            }
        }
    }

    /// Append a raw (non-JSON) line to the open prose block, creating one
    /// if none is open.
    pub fn append_raw(&mut self, segment: u32, line: &str, now: Instant, surface: &mut Surface) {
        let open = self
            .blocks
            .iter()
            .rev()
            .find(|b| b.kind == BlockKind::Prose && !b.finalized)
            .map(|b| b.id);
        let id = match open {
            Some(id) => id,
            None => {
                let key = self.synthetic_key(segment);
                self.open_block(key, BlockKind::Prose, surface)
            }
        };
        let mut text = line.to_string();
        text.push('\n');
        self.append(id, &text, now, surface);
    }

    /// Reconcile a full (non-incremental) block payload.
    ///
    /// A block that was already streamed only has its canonical text
    /// corrected; anything else becomes a new, finalized block. Streamed
    /// text that diverges from the payload (a lost delta) still matches by
    /// kind and position.
    pub fn reconcile(
        &mut self,
        segment: u32,
        position: u32,
        kind: BlockKind,
        text: &str,
        surface: &mut Surface,
    ) -> BlockId {
        let matched = self
            .unreconciled(segment, position, kind, |b| text.starts_with(b.text.as_str()))
            .or_else(|| {
                self.unreconciled(segment, position, kind, |b| {
                    b.streamed && b.key.index < SYNTHETIC_INDEX_BASE
                })
            });

        if let Some(id) = matched {
            if let Some(block) = self.block(id) {
                if !text.starts_with(block.text.as_str()) {
                    debug!(id = id.0, "streamed text diverged from full payload");
                }
            }
            if let Some(block) = self.blocks.iter_mut().find(|b| b.id == id) {
                block.text = text.to_string();
            }
            self.reconciled.insert(id);
            return id;
        }

        let candidate = BlockKey::new(segment, position);
        let key = if self.keys.contains_key(&candidate) {
            self.synthetic_key(segment)
        } else {
            candidate
        };
        let id = self.open_block(key, kind, surface);
        if let Some(block) = self.blocks.iter_mut().find(|b| b.id == id) {
            block.text = text.to_string();
            block.finalized = true;
        }
        self.reconciled.insert(id);
        surface.block_text(id, text);
        surface.close_block(id);
        id
    }

    /// Render every pending block now.
    pub fn flush(&mut self, surface: &mut Surface) {
        if self.pending.is_empty() {
            return;
        }
        self.pending.clear();
        self.render_where(surface, |_| true);
    }

    /// Render pending blocks whose deadline has passed.
    pub fn flush_due(&mut self, now: Instant, surface: &mut Surface) {
        let due: HashSet<BlockId> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        if due.is_empty() {
            return;
        }
        self.pending.retain(|id, _| !due.contains(id));
        self.render_where(surface, |id| due.contains(&id));
    }

    /// Flush, then close every block still open.
    pub fn finalize_all(&mut self, surface: &mut Surface) {
        self.flush(surface);
        for block in self.blocks.iter_mut().filter(|b| !b.finalized) {
            block.finalized = true;
            surface.close_block(block.id);
        }
    }

    /// Prose blocks joined in display order.
    pub fn prose_text(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Prose)
            .map(|b| b.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(PROSE_SEPARATOR)
    }

    /// Drop transient prose blocks once the final answer replaces them.
    /// Reasoning blocks stay.
    pub fn remove_prose(&mut self, surface: &mut Surface) {
        let prose: Vec<(BlockId, BlockKey)> = self
            .blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Prose)
            .map(|b| (b.id, b.key))
            .collect();
        for (id, key) in prose {
            self.pending.remove(&id);
            self.keys.remove(&key);
            surface.remove_block(id);
        }
        self.blocks.retain(|b| b.kind != BlockKind::Prose);
    }

    fn append(&mut self, id: BlockId, fragment: &str, now: Instant, surface: &mut Surface) {
        let Some(block) = self.blocks.iter_mut().find(|b| b.id == id) else {
            return;
        };
        block.text.push_str(fragment);
        block.streamed = true;
        if self.debounce.is_zero() {
            surface.block_text(id, &block.text);
            return;
        }
        self.pending.entry(id).or_insert(now + self.debounce);
    }

    fn render_where(&self, surface: &mut Surface, selected: impl Fn(BlockId) -> bool) {
        for block in self.blocks.iter().filter(|b| selected(b.id)) {
            surface.block_text(block.id, &block.text);
        }
    }

    /// First unreconciled block of `kind` in `segment` accepted by `accept`,
    /// preferring the one at `position`.
    fn unreconciled(
        &self,
        segment: u32,
        position: u32,
        kind: BlockKind,
        accept: impl Fn(&ContentBlock) -> bool,
    ) -> Option<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.key.segment == segment && b.kind == kind && !self.reconciled.contains(&b.id))
            .filter(|b| accept(*b))
            .min_by_key(|b| (b.key.index != position, b.id))
            .map(|b| b.id)
    }

    fn synthetic_key(&mut self, segment: u32) -> BlockKey {
        let key = BlockKey::new(segment, self.next_synthetic);
        self.next_synthetic += 1;
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{RecordingRenderer, RenderOp};
    use std::sync::Arc;

    fn setup(debounce_ms: u64) -> (BlockAssembler, Surface, Arc<RecordingRenderer>) {
        let recorder = Arc::new(RecordingRenderer::new());
        let surface = Surface::new(recorder.clone());
        (
            BlockAssembler::new(Duration::from_millis(debounce_ms)),
            surface,
            recorder,
        )
    }

    fn text_renders(recorder: &RecordingRenderer) -> usize {
        recorder
            .ops()
            .iter()
            .filter(|op| matches!(op, RenderOp::BlockText(..)))
            .count()
    }

    #[test]
    fn deltas_concatenate_regardless_of_flush_interleaving() {
        let (mut assembler, mut surface, recorder) = setup(50);
        let start = Instant::now();
        let key = BlockKey::new(0, 0);
        assembler.open_block(key, BlockKind::Prose, &mut surface);

        let fragments = ["Fix", "ed the ", "bug", " in ", "parser"];
        for (i, fragment) in fragments.iter().enumerate() {
            let now = start + Duration::from_millis(i as u64 * 30);
            assembler.flush_due(now, &mut surface);
            assembler.apply_delta(key, BlockKind::Prose, fragment, now, &mut surface);
        }
        assembler.close_block(key, &mut surface);

        let id = assembler.block_at(key).unwrap().id;
        assert_eq!(recorder.block_text(id).as_deref(), Some("Fixed the bug in parser"));
        assert!(assembler.block(id).unwrap().finalized);
        assert!(!assembler.has_pending());
    }

    #[test]
    fn rapid_deltas_render_once_per_window() {
        let (mut assembler, mut surface, recorder) = setup(50);
        let now = Instant::now();
        let key = BlockKey::new(0, 0);
        for _ in 0..10 {
            assembler.apply_delta(key, BlockKind::Prose, "x", now, &mut surface);
        }
        assert_eq!(text_renders(&recorder), 0);
        assert_eq!(assembler.next_deadline(), Some(now + Duration::from_millis(50)));

        assembler.flush_due(now + Duration::from_millis(49), &mut surface);
        assert_eq!(text_renders(&recorder), 0);
        assembler.flush_due(now + Duration::from_millis(50), &mut surface);
        assert_eq!(text_renders(&recorder), 1);
    }

    #[test]
    fn delta_for_unopened_index_creates_block() {
        let (mut assembler, mut surface, _) = setup(0);
        assembler.apply_delta(
            BlockKey::new(0, 3),
            BlockKind::Reasoning,
            "hmm",
            Instant::now(),
            &mut surface,
        );
        let block = assembler.block_at(BlockKey::new(0, 3)).unwrap();
        assert_eq!(block.kind, BlockKind::Reasoning);
        assert_eq!(block.text, "hmm");
    }

    #[test]
    fn reopening_an_index_keeps_one_block() {
        let (mut assembler, mut surface, _) = setup(0);
        let key = BlockKey::new(0, 0);
        let first = assembler.open_block(key, BlockKind::Prose, &mut surface);
        let second = assembler.open_block(key, BlockKind::Prose, &mut surface);
        assert_eq!(first, second);
        assert_eq!(assembler.blocks().len(), 1);
    }

    #[test]
    fn reconcile_streamed_block_corrects_text_without_rendering() {
        let (mut assembler, mut surface, recorder) = setup(0);
        let key = BlockKey::new(0, 0);
        assembler.open_block(key, BlockKind::Prose, &mut surface);
        assembler.apply_delta(key, BlockKind::Prose, "Hello wor", Instant::now(), &mut surface);
        assembler.close_block(key, &mut surface);
        let renders = recorder.ops().len();

        let id = assembler.reconcile(0, 0, BlockKind::Prose, "Hello world", &mut surface);

        assert_eq!(assembler.blocks().len(), 1);
        assert_eq!(assembler.block(id).unwrap().text, "Hello world");
        assert_eq!(recorder.ops().len(), renders);
    }

    #[test]
    fn reconcile_corrects_streamed_block_after_lost_delta() {
        let (mut assembler, mut surface, recorder) = setup(0);
        let key = BlockKey::new(0, 0);
        assembler.apply_delta(key, BlockKind::Prose, "Hello wrld", Instant::now(), &mut surface);
        assembler.close_block(key, &mut surface);
        let renders = recorder.ops().len();

        let id = assembler.reconcile(0, 0, BlockKind::Prose, "Hello world", &mut surface);

        assert_eq!(assembler.blocks().len(), 1);
        assert_eq!(assembler.block_at(key).unwrap().id, id);
        assert_eq!(assembler.prose_text(), "Hello world");
        assert_eq!(recorder.ops().len(), renders);
    }

    #[test]
    fn reconcile_leaves_raw_text_blocks_alone() {
        let (mut assembler, mut surface, _) = setup(0);
        assembler.append_raw(0, "npm WARN deprecated", Instant::now(), &mut surface);
        assembler.reconcile(0, 0, BlockKind::Prose, "Installed", &mut surface);
        assert_eq!(assembler.blocks().len(), 2);
        assert_eq!(assembler.prose_text(), "npm WARN deprecated\n\nInstalled");
    }

    #[test]
    fn reconcile_matches_by_text_when_message_holds_one_block() {
        let (mut assembler, mut surface, _) = setup(0);
        let now = Instant::now();
        assembler.apply_delta(BlockKey::new(0, 0), BlockKind::Reasoning, "think", now, &mut surface);
        assembler.apply_delta(BlockKey::new(0, 1), BlockKind::Prose, "answer", now, &mut surface);

        // Full message for block 1 arrives with the part at position 0.
        assembler.reconcile(0, 0, BlockKind::Prose, "answer", &mut surface);
        assert_eq!(assembler.blocks().len(), 2);
    }

    #[test]
    fn reconcile_unstreamed_creates_and_renders() {
        let (mut assembler, mut surface, recorder) = setup(50);
        let id = assembler.reconcile(0, 0, BlockKind::Prose, "full text", &mut surface);
        assert_eq!(recorder.block_text(id).as_deref(), Some("full text"));
        assert!(assembler.block(id).unwrap().finalized);
        assert!(!assembler.block(id).unwrap().streamed);
    }

    #[test]
    fn raw_lines_append_to_open_prose_block() {
        let (mut assembler, mut surface, _) = setup(0);
        let now = Instant::now();
        assembler.append_raw(0, "not json", now, &mut surface);
        assembler.append_raw(0, "still not", now, &mut surface);
        assert_eq!(assembler.blocks().len(), 1);
        assert_eq!(assembler.prose_text(), "not json\nstill not");

        let key = BlockKey::new(0, 0);
        assembler.apply_delta(key, BlockKind::Prose, "streamed", now, &mut surface);
        assembler.append_raw(0, "tail", now, &mut surface);
        assert_eq!(assembler.block_at(key).unwrap().text, "streamedtail\n");
    }

    #[test]
    fn remove_prose_keeps_reasoning() {
        let (mut assembler, mut surface, _) = setup(0);
        let now = Instant::now();
        assembler.apply_delta(BlockKey::new(0, 0), BlockKind::Reasoning, "plan", now, &mut surface);
        assembler.apply_delta(BlockKey::new(0, 1), BlockKind::Prose, "draft", now, &mut surface);
        assembler.finalize_all(&mut surface);
        assembler.remove_prose(&mut surface);
        assert_eq!(assembler.blocks().len(), 1);
        assert_eq!(assembler.blocks()[0].kind, BlockKind::Reasoning);
        assert_eq!(surface.layout().elements().len(), 1);
    }
}
