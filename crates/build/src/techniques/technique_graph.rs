//! Technique graph assembly
//!
//! A technique graph aggregates named passes, the explicit execution sequence,
//! the symbol table and the target registry. The sequence is authoritative:
//! passes run in exactly the listed order.

use super::{PassDescriptor, SymbolTable, TargetRegistry};
use crate::TechniqueError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Complete declarative description of a technique
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechniqueGraph {
    passes: BTreeMap<String, PassDescriptor>,
    sequence: Vec<String>,
    symbols: SymbolTable,
    targets: TargetRegistry,
}

impl TechniqueGraph {
    /// Creates a graph with no passes over the given symbols and targets
    ///
    /// Fails with [`TechniqueError::AmbiguousName`] if a name is both a symbol
    /// and a target, since pass inputs could not be resolved unambiguously.
    pub fn new(symbols: SymbolTable, targets: TargetRegistry) -> Result<Self, TechniqueError> {
        if let Some((name, _)) = symbols.iter().find(|(name, _)| targets.contains(name)) {
            return Err(TechniqueError::AmbiguousName(name.to_string()));
        }

        Ok(Self {
            passes: BTreeMap::new(),
            sequence: Vec::new(),
            symbols,
            targets,
        })
    }

    /// Adds a named pass
    pub fn add_pass(&mut self, name: impl Into<String>, pass: PassDescriptor) -> Result<(), TechniqueError> {
        let name = name.into();
        if self.passes.contains_key(&name) {
            return Err(TechniqueError::DuplicatePass(name));
        }
        self.passes.insert(name, pass);
        Ok(())
    }

    /// Builder form of [`TechniqueGraph::add_pass`]
    pub fn with_pass(mut self, name: impl Into<String>, pass: PassDescriptor) -> Result<Self, TechniqueError> {
        self.add_pass(name, pass)?;
        Ok(self)
    }

    /// Sets the execution sequence
    pub fn with_sequence<I, S>(mut self, sequence: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sequence = sequence.into_iter().map(Into::into).collect();
        self
    }

    /// Declared passes, keyed by name
    pub fn passes(&self) -> &BTreeMap<String, PassDescriptor> {
        &self.passes
    }

    /// Declared execution order
    pub fn sequence(&self) -> &[String] {
        &self.sequence
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    /// Checks that the sequence is a complete, duplicate-free permutation of the passes
    ///
    /// Missing, duplicated and unknown names are each reported on their own;
    /// any of them makes the sequence invalid.
    pub fn validate_sequence(&self) -> Result<(), TechniqueError> {
        let mut seen = BTreeSet::new();
        let mut duplicated = Vec::new();
        let mut unknown = Vec::new();

        for name in &self.sequence {
            if !self.passes.contains_key(name) {
                if !unknown.contains(name) {
                    unknown.push(name.clone());
                }
            } else if !seen.insert(name.as_str()) && !duplicated.contains(name) {
                duplicated.push(name.clone());
            }
        }

        let missing: Vec<String> = self.passes.keys().filter(|name| !seen.contains(name.as_str())).cloned().collect();

        if missing.is_empty() && duplicated.is_empty() && unknown.is_empty() {
            Ok(())
        } else {
            Err(TechniqueError::SequenceMismatch { missing, duplicated, unknown })
        }
    }
}
