//! Budgeted prompt assembly.
//!
//! # Algorithm
//!
//! 1. Stable-sort sections by priority, highest first.
//! 2. Reserve the cost of every `Keep` section before anything else.
//! 3. Walk the sorted sections:
//!    - `Keep` is included at full cost unconditionally
//!    - `Degrade` takes the first rung (full, excerpt, summary) that fits the
//!      budget left after the reservation, or is dropped
//!    - `OmitIfOverBudget` is included at full cost if it fits, else skipped
//! 4. A section that renders nothing is excluded whatever its strategy.
//!
//! Assembly is deterministic: identical inputs always produce identical
//! outputs. Nothing here reads the clock or any shared state.

use skein_core::context::{
    AssembledContext, CompressionStrategy, ContextSection, DropInfo, DropReason, Fidelity,
    RenderedSection,
};
use skein_core::token::estimate_tokens;
use tracing::{debug, warn};

/// Default budget when none is configured, in estimated tokens.
pub const DEFAULT_CONTEXT_BUDGET: usize = 8192;

/// Assemble `sections` under `budget`.
///
/// `total_cost` stays within `budget` unless the `Keep` sections alone
/// exceed it, in which case `overrun` is set.
pub fn assemble(sections: &[ContextSection], budget: usize) -> AssembledContext {
    let mut order: Vec<&ContextSection> = sections.iter().collect();
    // `sort_by` is stable: equal priorities keep submission order.
    order.sort_by(|a, b| b.priority.cmp(&a.priority));

    // Keep sections are rendered up front so the reservation only counts
    // the ones that will actually be included.
    let keep_renders: Vec<Option<String>> = order
        .iter()
        .map(|s| match s.strategy {
            CompressionStrategy::Keep => render(s, Fidelity::Full),
            _ => None,
        })
        .collect();
    let mut reserved: usize = order
        .iter()
        .zip(&keep_renders)
        .filter(|(_, text)| text.is_some())
        .map(|(s, _)| s.estimated_cost)
        .sum();

    let mut used = 0usize;
    let mut included = Vec::new();
    let mut drops = Vec::new();

    for (section, keep_text) in order.into_iter().zip(keep_renders) {
        let available = budget.saturating_sub(used + reserved);
        match section.strategy {
            CompressionStrategy::Keep => match keep_text {
                Some(text) => {
                    reserved -= section.estimated_cost;
                    used += section.estimated_cost;
                    included.push(rendered(section, Fidelity::Full, section.estimated_cost, text));
                }
                None => drops.push(dropped(section, DropReason::Empty)),
            },
            CompressionStrategy::Degrade => {
                let Some(full) = render(section, Fidelity::Full) else {
                    drops.push(dropped(section, DropReason::Empty));
                    continue;
                };
                if section.estimated_cost <= available {
                    used += section.estimated_cost;
                    included.push(rendered(section, Fidelity::Full, section.estimated_cost, full));
                    continue;
                }
                match cheaper_rung(section, available) {
                    Some((fidelity, cost, text)) => {
                        used += cost;
                        drops.push(dropped(section, DropReason::Degraded { to: fidelity }));
                        included.push(rendered(section, fidelity, cost, text));
                    }
                    None => drops.push(dropped(section, DropReason::NoRungFits)),
                }
            }
            CompressionStrategy::OmitIfOverBudget => match render(section, Fidelity::Full) {
                None => drops.push(dropped(section, DropReason::Empty)),
                Some(_) if section.estimated_cost > available => {
                    drops.push(dropped(section, DropReason::OverBudget));
                }
                Some(text) => {
                    used += section.estimated_cost;
                    included.push(rendered(section, Fidelity::Full, section.estimated_cost, text));
                }
            },
        }
    }

    let overrun = used > budget;
    if overrun {
        warn!(total_cost = used, budget, "Keep sections exceed the context budget");
    }
    debug!(
        sections = included.len(),
        dropped = drops.len(),
        total_cost = used,
        budget,
        "Context assembled"
    );

    AssembledContext {
        sections: included,
        total_cost: used,
        budget,
        overrun,
        drops,
    }
}

/// The first rung below `Full` that renders and fits `available`.
fn cheaper_rung(section: &ContextSection, available: usize) -> Option<(Fidelity, usize, String)> {
    Fidelity::LADDER[1..].iter().find_map(|&fidelity| {
        let text = render(section, fidelity)?;
        let cost = estimate_tokens(&text);
        (cost <= available).then_some((fidelity, cost, text))
    })
}

fn render(section: &ContextSection, fidelity: Fidelity) -> Option<String> {
    section.render(fidelity).filter(|text| !text.is_empty())
}

fn rendered(section: &ContextSection, fidelity: Fidelity, cost: usize, text: String) -> RenderedSection {
    RenderedSection {
        id: section.id.clone(),
        fidelity,
        cost,
        text,
    }
}

fn dropped(section: &ContextSection, reason: DropReason) -> DropInfo {
    DropInfo {
        id: section.id.clone(),
        cost: section.estimated_cost,
        reason,
    }
}

/// The context assembler. Stateless apart from its budget; create one and
/// reuse it.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    budget: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_BUDGET)
    }
}

impl ContextAssembler {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn assemble(&self, sections: &[ContextSection]) -> AssembledContext {
        assemble(sections, self.budget)
    }
}
