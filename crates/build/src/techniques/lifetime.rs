//! Target lifetime and dependency analysis
//!
//! This module walks the passes of a technique in sequence order and records,
//! for every custom target, where it is first written and where it is last
//! read. The same walk produces diagnostics about suspicious data flow. The
//! analysis never reorders passes: the declared sequence stays authoritative.

use super::SymbolTable;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Target accesses of one pass, in sequence order
#[derive(Debug, Clone, Default)]
pub struct PassAccess {
    /// Pass name
    pub pass: String,
    /// Targets sampled by the pass
    pub reads: BTreeSet<String>,
    /// Targets written by the pass, with whether the pass clears them first
    pub writes: Vec<(String, bool)>,
    /// Symbols referenced by the pass
    pub symbols: BTreeSet<String>,
}

/// Lifetime of a custom target within one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetLifetime {
    /// Target name
    pub target: String,
    /// Sequence index of the first pass writing the target
    pub first_written: Option<usize>,
    /// Sequence index of the last pass reading the target
    pub last_read: Option<usize>,
}

/// Data flow findings that do not prevent a technique from compiling
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Diagnostic {
    /// A pass samples a custom target no pass has written yet this frame
    ReadBeforeWrite { pass: String, target: String },
    /// A pass samples a custom target that only a later pass writes
    OrderContradiction { reader: String, writer: String, target: String },
    /// A custom target is neither read nor written
    UnusedTarget { target: String },
    /// The contents a pass leaves in a custom target are never read
    UnreadOutput { pass: String, target: String },
    /// A pass clears a custom target whose previous contents nobody read
    DeadWrite { pass: String, previous: String, target: String },
    /// A symbol is referenced by no pass
    UnusedSymbol { symbol: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadBeforeWrite { pass, target } => write!(f, "pass '{pass}' reads '{target}' before any pass writes it"),
            Self::OrderContradiction { reader, writer, target } => {
                write!(f, "pass '{reader}' reads '{target}' which is only written later by '{writer}'")
            }
            Self::UnusedTarget { target } => write!(f, "target '{target}' is never used"),
            Self::UnreadOutput { pass, target } => write!(f, "output '{target}' of pass '{pass}' is never read"),
            Self::DeadWrite { pass, previous, target } => {
                write!(f, "pass '{pass}' clears '{target}' before anything reads what '{previous}' wrote")
            }
            Self::UnusedSymbol { symbol } => write!(f, "symbol '{symbol}' is never referenced"),
        }
    }
}

/// Result of the dependency walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyAnalysis {
    pub lifetimes: Vec<TargetLifetime>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Computes custom target lifetimes and data flow diagnostics
///
/// Within a pass, inputs are read before outputs are written, so a pass that
/// samples its own output sees the previous contents.
///
/// # Arguments
/// * `accesses` - Per-pass accesses in sequence order
/// * `custom_targets` - Names of the user-defined targets; default targets are not tracked
/// * `symbols` - Symbol table of the technique
///
/// # Returns
/// Lifetimes in `custom_targets` order and diagnostics grouped by target, then symbols
pub fn analyze_dependencies<'a>(accesses: &[PassAccess], custom_targets: impl IntoIterator<Item = &'a str>, symbols: &SymbolTable) -> DependencyAnalysis {
    let mut analysis = DependencyAnalysis::default();

    for target in custom_targets {
        let mut lifetime = TargetLifetime {
            target: target.to_string(),
            first_written: None,
            last_read: None,
        };
        // Pass that wrote the current contents, and whether they have been read
        let mut current_writer: Option<&str> = None;
        let mut contents_read = false;

        for (index, access) in accesses.iter().enumerate() {
            if access.reads.contains(target) {
                if current_writer.is_none() {
                    let later_writer = accesses[index + 1..].iter().find(|later| later.writes.iter().any(|(written, _)| written == target));
                    analysis.diagnostics.push(match later_writer {
                        Some(writer) => Diagnostic::OrderContradiction {
                            reader: access.pass.clone(),
                            writer: writer.pass.clone(),
                            target: target.to_string(),
                        },
                        None => Diagnostic::ReadBeforeWrite {
                            pass: access.pass.clone(),
                            target: target.to_string(),
                        },
                    });
                }
                contents_read = true;
                lifetime.last_read = Some(index);
            }

            if let Some((_, clears)) = access.writes.iter().find(|(written, _)| written == target) {
                if let Some(previous) = current_writer {
                    if *clears && !contents_read {
                        analysis.diagnostics.push(Diagnostic::DeadWrite {
                            pass: access.pass.clone(),
                            previous: previous.to_string(),
                            target: target.to_string(),
                        });
                    }
                }
                lifetime.first_written.get_or_insert(index);
                current_writer = Some(access.pass.as_str());
                contents_read = false;
            }
        }

        match current_writer {
            None if lifetime.last_read.is_none() => analysis.diagnostics.push(Diagnostic::UnusedTarget { target: target.to_string() }),
            Some(writer) if !contents_read => analysis.diagnostics.push(Diagnostic::UnreadOutput {
                pass: writer.to_string(),
                target: target.to_string(),
            }),
            _ => {}
        }

        analysis.lifetimes.push(lifetime);
    }

    for (symbol, _) in symbols.iter() {
        if !accesses.iter().any(|access| access.symbols.contains(symbol)) {
            analysis.diagnostics.push(Diagnostic::UnusedSymbol { symbol: symbol.to_string() });
        }
    }

    analysis
}
