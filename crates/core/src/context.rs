//! Context sections: the candidate pool a prompt is assembled from.
//!
//! Collaborators (history, memory, documents, system instructions) build a
//! plain `Vec<ContextSection>` each turn under ordinary control flow. The
//! assembler only ever sees the resulting sequence.

use crate::token::estimate_tokens;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a section may be compressed when the budget is tight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// Always included at full cost, even past the budget.
    Keep,
    /// Rendered at cheaper fidelity rungs until it fits, else dropped.
    Degrade,
    /// Included at full cost if it fits, else skipped. Never degraded.
    OmitIfOverBudget,
}

/// A rendering rung, from most to least expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fidelity {
    Full,
    Excerpt,
    Summary,
}

impl Fidelity {
    /// Degrade rungs in the order they are tried.
    pub const LADDER: [Fidelity; 3] = [Fidelity::Full, Fidelity::Excerpt, Fidelity::Summary];
}

/// Produces a section's text at a given fidelity. `None` means the section
/// has nothing to contribute at that rung.
pub trait SectionContent: Send + Sync {
    fn render(&self, fidelity: Fidelity) -> Option<String>;
}

/// Static text with optional cheaper forms.
#[derive(Debug, Clone, Default)]
pub struct TextContent {
    pub full: String,
    pub excerpt: Option<String>,
    pub summary: Option<String>,
}

impl TextContent {
    pub fn new(full: impl Into<String>) -> Self {
        Self {
            full: full.into(),
            excerpt: None,
            summary: None,
        }
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

impl SectionContent for TextContent {
    fn render(&self, fidelity: Fidelity) -> Option<String> {
        let text = match fidelity {
            Fidelity::Full => Some(&self.full),
            Fidelity::Excerpt => self.excerpt.as_ref(),
            Fidelity::Summary => self.summary.as_ref(),
        };
        text.filter(|t| !t.is_empty()).cloned()
    }
}

/// Adapter for closure-rendered sections.
struct FnContent<F>(F);

impl<F> SectionContent for FnContent<F>
where
    F: Fn(Fidelity) -> Option<String> + Send + Sync,
{
    fn render(&self, fidelity: Fidelity) -> Option<String> {
        (self.0)(fidelity)
    }
}

/// One candidate section for prompt assembly.
#[derive(Clone)]
pub struct ContextSection {
    /// Unique within an assembly pass.
    pub id: String,
    /// Higher is more important.
    pub priority: i64,
    pub strategy: CompressionStrategy,
    /// Token-equivalent cost of the full rendering.
    pub estimated_cost: usize,
    pub content: Arc<dyn SectionContent>,
}

impl ContextSection {
    pub fn new(
        id: impl Into<String>,
        priority: i64,
        strategy: CompressionStrategy,
        estimated_cost: usize,
        content: Arc<dyn SectionContent>,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            strategy,
            estimated_cost,
            content,
        }
    }

    /// A section over [`TextContent`], costed from its full text.
    pub fn text(
        id: impl Into<String>,
        priority: i64,
        strategy: CompressionStrategy,
        content: TextContent,
    ) -> Self {
        let cost = estimate_tokens(&content.full);
        Self::new(id, priority, strategy, cost, Arc::new(content))
    }

    /// A section rendered by a closure.
    pub fn from_fn<F>(
        id: impl Into<String>,
        priority: i64,
        strategy: CompressionStrategy,
        estimated_cost: usize,
        render: F,
    ) -> Self
    where
        F: Fn(Fidelity) -> Option<String> + Send + Sync + 'static,
    {
        Self::new(id, priority, strategy, estimated_cost, Arc::new(FnContent(render)))
    }

    pub fn render(&self, fidelity: Fidelity) -> Option<String> {
        self.content.render(fidelity)
    }
}

impl std::fmt::Debug for ContextSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextSection")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("strategy", &self.strategy)
            .field("estimated_cost", &self.estimated_cost)
            .finish_non_exhaustive()
    }
}

/// A section as it landed in the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedSection {
    pub id: String,
    pub fidelity: Fidelity,
    pub cost: usize,
    pub text: String,
}

/// Why a section is missing or cheaper than submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The render operation yielded nothing.
    Empty,
    /// Rendered at a cheaper rung to fit.
    Degraded { to: Fidelity },
    /// No rung fit the remaining budget.
    NoRungFits,
    /// An omit-if-over-budget section that did not fit.
    OverBudget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInfo {
    pub id: String,
    /// Full cost as submitted.
    pub cost: usize,
    pub reason: DropReason,
}

/// The budgeted prompt handed to the model client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledContext {
    /// Included sections in priority order.
    pub sections: Vec<RenderedSection>,
    pub total_cost: usize,
    pub budget: usize,
    /// Set when `keep` sections alone push the total past the budget.
    pub overrun: bool,
    pub drops: Vec<DropInfo>,
}

impl AssembledContext {
    /// The final prompt text.
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn section(&self, id: &str) -> Option<&RenderedSection> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.section(id).is_some()
    }
}

/// Anything that contributes sections to a turn's context: system
/// instructions, transcript history, memory notes, pinned documents.
#[async_trait]
pub trait SectionSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// The sections for this iteration. Called once per model round trip.
    async fn sections(&self) -> Vec<ContextSection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_rungs() {
        let content = TextContent::new("full text").with_summary("sum");
        assert_eq!(content.render(Fidelity::Full).as_deref(), Some("full text"));
        assert_eq!(content.render(Fidelity::Excerpt), None);
        assert_eq!(content.render(Fidelity::Summary).as_deref(), Some("sum"));
    }

    #[test]
    fn empty_full_text_renders_nothing() {
        assert_eq!(TextContent::new("").render(Fidelity::Full), None);
    }

    #[test]
    fn text_section_is_costed_from_full_text() {
        let section = ContextSection::text(
            "sys",
            100,
            CompressionStrategy::Keep,
            TextContent::new("a".repeat(40)),
        );
        assert_eq!(section.estimated_cost, 10);
    }

    #[test]
    fn closure_sections_can_decline() {
        let section = ContextSection::from_fn("cond", 1, CompressionStrategy::Degrade, 5, |_| None);
        assert_eq!(section.render(Fidelity::Full), None);
    }

    #[test]
    fn assembled_context_render_joins_sections() {
        let ctx = AssembledContext {
            sections: vec![
                RenderedSection { id: "a".into(), fidelity: Fidelity::Full, cost: 1, text: "one".into() },
                RenderedSection { id: "b".into(), fidelity: Fidelity::Summary, cost: 1, text: "two".into() },
            ],
            total_cost: 2,
            budget: 10,
            overrun: false,
            drops: vec![],
        };
        assert_eq!(ctx.render(), "one\n\ntwo");
        assert!(ctx.contains("b"));
        assert!(!ctx.contains("c"));
    }
}
