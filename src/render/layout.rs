use std::collections::BTreeMap;
use std::sync::Arc;

use super::{FinalAnswer, NoticeKind, Renderer, ToolGroup};
use crate::types::{
    ApprovalDecision, BlockId, BlockKind, PermissionRequest, ProgressItem, QuestionNegotiation,
    ToolInvocation,
};

/// One top-level element of a response, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// Status / compaction / inline error line. Meta: the progress widget
    /// is placed after these.
    Notice,
    Block(BlockId),
    Tool(String),
    Group(u32),
    Progress,
    Permission(String),
    Question(String),
    Final,
}

/// Display order of the current response.
#[derive(Debug, Clone, Default)]
pub struct ResponseLayout {
    elements: Vec<Element>,
}

impl ResponseLayout {
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn push(&mut self, element: Element) -> usize {
        self.elements.push(element);
        self.elements.len() - 1
    }

    pub fn position(&self, element: &Element) -> Option<usize> {
        self.elements.iter().position(|e| e == element)
    }

    pub fn remove(&mut self, element: &Element) -> bool {
        match self.position(element) {
            Some(pos) => {
                self.elements.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Index of the first element that is not a notice.
    pub fn first_content_position(&self) -> usize {
        self.elements
            .iter()
            .position(|e| *e != Element::Notice)
            .unwrap_or(self.elements.len())
    }

    /// Ids of the trailing contiguous run of tool cards accepted by `keep`.
    pub fn trailing_tools(&self, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let mut run: Vec<String> = self
            .elements
            .iter()
            .rev()
            .map_while(|e| match e {
                Element::Tool(id) if keep(id) => Some(id.clone()),
                _ => None,
            })
            .collect();
        run.reverse();
        run
    }

    /// Replace the given tool cards with a single group element at the
    /// position of the first one.
    fn collapse(&mut self, tool_ids: &[String], group: u32) {
        let Some(first) = tool_ids
            .first()
            .and_then(|id| self.position(&Element::Tool(id.clone())))
        else {
            return;
        };
        self.elements
            .retain(|e| !matches!(e, Element::Tool(id) if tool_ids.contains(id)));
        let at = first.min(self.elements.len());
        self.elements.insert(at, Element::Group(group));
    }
}

/// Layout bookkeeping plus the injected renderer for one turn.
///
/// Components mutate the response only through this type, so the layout
/// always mirrors what the renderer has been told.
pub struct Surface {
    layout: ResponseLayout,
    renderer: Arc<dyn Renderer>,
}

impl Surface {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            layout: ResponseLayout::default(),
            renderer,
        }
    }

    pub fn layout(&self) -> &ResponseLayout {
        &self.layout
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    pub fn notice(&mut self, kind: NoticeKind, message: &str) {
        self.layout.push(Element::Notice);
        self.renderer.notice(kind, message);
    }

    pub fn open_block(&mut self, id: BlockId, kind: BlockKind) {
        self.layout.push(Element::Block(id));
        self.renderer.block_opened(id, kind);
    }

    pub fn block_text(&self, id: BlockId, text: &str) {
        self.renderer.block_text(id, text);
    }

    pub fn close_block(&self, id: BlockId) {
        self.renderer.block_closed(id);
    }

    pub fn remove_block(&mut self, id: BlockId) {
        if self.layout.remove(&Element::Block(id)) {
            self.renderer.block_removed(id);
        }
    }

    pub fn open_tool(&mut self, tool: &ToolInvocation) {
        self.layout.push(Element::Tool(tool.id.clone()));
        self.renderer.tool_opened(tool);
    }

    pub fn update_tool(&self, tool: &ToolInvocation) {
        self.renderer.tool_updated(tool);
    }

    pub fn resolve_tool(&self, tool: &ToolInvocation) {
        self.renderer.tool_resolved(tool);
    }

    pub fn group_tools(&mut self, group: &ToolGroup) {
        self.layout.collapse(&group.tool_ids, group.id);
        self.renderer.tools_grouped(group);
    }

    pub fn open_progress(&mut self, items: &[ProgressItem]) {
        let position = self.layout.first_content_position();
        self.layout.elements.insert(position, Element::Progress);
        self.renderer.progress_opened(items, position);
    }

    pub fn update_progress(&self, items: &[ProgressItem]) {
        self.renderer.progress_updated(items);
    }

    pub fn open_permission(&mut self, request: &PermissionRequest) {
        self.layout
            .push(Element::Permission(request.request_id.clone()));
        self.renderer.permission_opened(request);
    }

    pub fn resolve_permission(&self, request_id: &str, decision: Option<ApprovalDecision>) {
        self.renderer.permission_resolved(request_id, decision);
    }

    pub fn open_question(&mut self, negotiation: &QuestionNegotiation) {
        self.layout
            .push(Element::Question(negotiation.request_id.clone()));
        self.renderer.question_opened(negotiation);
    }

    pub fn update_question(&self, negotiation: &QuestionNegotiation) {
        self.renderer.question_updated(negotiation);
    }

    pub fn resolve_question(&self, request_id: &str, answers: &BTreeMap<String, String>) {
        self.renderer.question_resolved(request_id, answers);
    }

    pub fn final_answer(&mut self, answer: &FinalAnswer) {
        self.layout.push(Element::Final);
        self.renderer.final_answer(answer);
    }
}
