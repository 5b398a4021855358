//! Per-round scores and capability rollups.
//!
//! Each item gets a per-capability pass rate. The item score is the mean of
//! those rates (0 for an item with no constraints); the strict score is 1
//! only when the item score is 1. Round scores average item scores. Tag
//! counts roll up a [`CapabilityTree`] so every parent reports the sum of its
//! children plus its own direct tags; nodes with no observations are left
//! out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Item, Verdict};

/// Tag assigned to constraints that declare no capabilities.
pub const UNTAGGED: &str = "Undefined";

/// A node in the capability hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CapabilityNode>,
}

impl CapabilityNode {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self { name: name.into(), children: Vec::new() }
    }

    pub fn branch(name: impl Into<String>, children: Vec<CapabilityNode>) -> Self {
        Self { name: name.into(), children }
    }
}

/// Capability hierarchy used for rollups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityTree {
    pub roots: Vec<CapabilityNode>,
}

impl Default for CapabilityTree {
    fn default() -> Self {
        use CapabilityNode as N;
        Self {
            roots: vec![
                N::branch(
                    "Intent Recognition",
                    vec![
                        N::leaf("Theme requirement"),
                        N::leaf("Generate in certain style"),
                        N::leaf("Generate by certain tone"),
                    ],
                ),
                N::branch(
                    "Granular Content Validation",
                    vec![
                        N::branch(
                            "Word-level requirement",
                            vec![N::leaf("Keyword requirement"), N::leaf("Rhyming requirement")],
                        ),
                        N::branch(
                            "Count limit",
                            vec![N::leaf("Word count"), N::leaf("Element count")],
                        ),
                        N::leaf("Language requirement"),
                    ],
                ),
                N::branch(
                    "Output Structure Validation",
                    vec![
                        N::branch(
                            "Output format requirement",
                            vec![N::leaf("JSON"), N::leaf("Markdown"), N::leaf("Table")],
                        ),
                        N::leaf("Template requirement"),
                    ],
                ),
            ],
        }
    }
}

impl CapabilityTree {
    pub fn empty() -> Self {
        Self { roots: Vec::new() }
    }
}

/// Pass/fail counts for one capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TagCounts {
    pub correct: usize,
    pub wrong: usize,
}

impl TagCounts {
    pub fn total(&self) -> usize {
        self.correct + self.wrong
    }

    pub fn pass_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.correct as f64 / total as f64,
        }
    }

    fn record(&mut self, passed: bool) {
        if passed {
            self.correct += 1;
        } else {
            self.wrong += 1;
        }
    }

    fn add(&mut self, other: TagCounts) {
        self.correct += other.correct;
        self.wrong += other.wrong;
    }
}

/// Rolled-up counts for a capability tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityStats {
    pub correct: usize,
    pub wrong: usize,
    pub total: usize,
    pub pass_rate: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, CapabilityStats>,
}

/// One item's scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemScore {
    pub original_question: String,
    pub score: f64,
    pub strict_score: f64,
}

/// Statistics for one round's snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStats {
    pub round: usize,
    pub total_items: usize,
    /// Mean of item scores
    pub score: f64,
    /// Mean of strict item scores
    pub strict_score: f64,
    pub items: Vec<ItemScore>,
    /// Flat counts per tag
    pub capabilities: BTreeMap<String, TagCounts>,
    /// Counts rolled up the capability tree
    pub hierarchy: BTreeMap<String, CapabilityStats>,
}

impl RoundStats {
    pub fn from_items(round: usize, items: &[Item], tree: &CapabilityTree) -> Self {
        let mut capabilities: BTreeMap<String, TagCounts> = BTreeMap::new();
        let mut scores = Vec::with_capacity(items.len());

        for item in items {
            let mut per_item: BTreeMap<&str, TagCounts> = BTreeMap::new();
            for constraint in &item.constraints {
                let passed = constraint.result == Verdict::Pass;
                if constraint.capabilities.is_empty() {
                    per_item.entry(UNTAGGED).or_default().record(passed);
                }
                for tag in &constraint.capabilities {
                    per_item.entry(tag.as_str()).or_default().record(passed);
                }
            }

            let score = if per_item.is_empty() {
                0.0
            } else {
                per_item.values().map(TagCounts::pass_rate).sum::<f64>() / per_item.len() as f64
            };
            let strict_score = if (score - 1.0).abs() < f64::EPSILON { 1.0 } else { 0.0 };

            for (tag, counts) in per_item {
                capabilities.entry(tag.to_string()).or_default().add(counts);
            }
            scores.push(ItemScore {
                original_question: item.original_question.clone(),
                score,
                strict_score,
            });
        }

        let n = scores.len();
        let mean = |f: fn(&ItemScore) -> f64| {
            if n == 0 {
                0.0
            } else {
                scores.iter().map(f).sum::<f64>() / n as f64
            }
        };
        let score = mean(|s| s.score);
        let strict_score = mean(|s| s.strict_score);

        let hierarchy = tree
            .roots
            .iter()
            .map(|node| (node.name.clone(), rollup(node, &capabilities)))
            .filter(|(_, stats)| stats.total > 0)
            .collect();

        Self {
            round,
            total_items: n,
            score,
            strict_score,
            items: scores,
            capabilities,
            hierarchy,
        }
    }
}

fn rollup(node: &CapabilityNode, counts: &BTreeMap<String, TagCounts>) -> CapabilityStats {
    let children: BTreeMap<String, CapabilityStats> = node
        .children
        .iter()
        .map(|child| (child.name.clone(), rollup(child, counts)))
        .filter(|(_, stats)| stats.total > 0)
        .collect();

    let mut total = counts.get(&node.name).copied().unwrap_or_default();
    for child in children.values() {
        total.add(TagCounts { correct: child.correct, wrong: child.wrong });
    }

    CapabilityStats {
        correct: total.correct,
        wrong: total.wrong,
        total: total.total(),
        pass_rate: total.pass_rate(),
        children,
    }
}
