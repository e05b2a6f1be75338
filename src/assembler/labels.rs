//! Label management and deferred relocation.
//!
//! Labels may be referenced before they are defined. Instead of failing, the
//! assembler encodes what it can and queues a `(label, record handle)` fixup
//! here; [`LabelManager::relocate`] drains the queue once the whole source
//! has been seen, re-encoding each referencing record against the arena-held
//! record store. EQU lines whose value depends on other labels register a
//! dependency instead; dependencies are re-evaluated once per relocation
//! pass so derived constants settle before their dependents are patched.

use std::collections::HashMap;

use crate::assembler::{AsmError, AsmErrorKind, RecordHandle, RecordStore};

/// A queued operand fixup: patch `handle` once `label` resolves.
#[derive(Debug, Clone)]
struct PendingFixup {
    label: String,
    handle: RecordHandle,
}

/// An EQU whose value derives from other labels; re-evaluated each pass.
#[derive(Debug, Clone)]
struct Dependency {
    label: String,
    handle: RecordHandle,
}

/// Symbol table plus the deferred-relocation work queue.
#[derive(Debug)]
pub struct LabelManager {
    /// Declared labels. `None` means declared but not yet valued (an EQU
    /// waiting on its dependencies); such entries exist only transiently.
    symbols: HashMap<String, Option<u16>>,
    pending: Vec<PendingFixup>,
    dependencies: Vec<Dependency>,
    use_16bit: bool,
}

impl LabelManager {
    pub fn new(use_16bit: bool) -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            dependencies: Vec::new(),
            use_16bit,
        }
    }

    /// Address-space width the operand re-encoder should use.
    pub fn use_16bit(&self) -> bool {
        self.use_16bit
    }

    /// Defines a label with a known address. Redefinition fails.
    pub fn define(&mut self, name: &str, address: u16) -> Result<(), AsmErrorKind> {
        if self.symbols.contains_key(name) {
            return Err(AsmErrorKind::DuplicateLabel(name.to_string()));
        }
        self.symbols.insert(name.to_string(), Some(address));
        Ok(())
    }

    /// Declares a label whose value is not yet known (deferred EQU). The
    /// record handle is queued as a dependency for `relocate` to settle.
    pub fn declare_deferred(
        &mut self,
        name: &str,
        handle: RecordHandle,
    ) -> Result<(), AsmErrorKind> {
        if self.symbols.contains_key(name) {
            return Err(AsmErrorKind::DuplicateLabel(name.to_string()));
        }
        self.symbols.insert(name.to_string(), None);
        self.dependencies.push(Dependency {
            label: name.to_string(),
            handle,
        });
        Ok(())
    }

    /// The resolved address of a label, if it has one yet.
    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.symbols.get(name).copied().flatten()
    }

    /// Whether the name has been seen at all (resolved or not).
    pub fn is_declared(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Queues a fixup to apply to `handle` once `label` resolves.
    pub fn register_relocation(&mut self, label: &str, handle: RecordHandle) {
        self.pending.push(PendingFixup {
            label: label.to_string(),
            handle,
        });
    }

    /// Number of fixups still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Iterates over `(name, address)` for every resolved label.
    pub fn resolved(&self) -> impl Iterator<Item = (&str, u16)> {
        self.symbols
            .iter()
            .filter_map(|(name, value)| value.map(|v| (name.as_str(), v)))
    }

    /// Applies queued fixups until the queue drains.
    ///
    /// Each pass first re-evaluates EQU dependencies (resolving any whose
    /// expressions now have values), then applies every fixup whose label has
    /// resolved. A pass that makes no progress while work remains means the
    /// remaining labels form a cycle or are simply undefined; that fails with
    /// [`AsmErrorKind::RelocationRecursion`] naming them.
    pub fn relocate(&mut self, store: &mut RecordStore) -> Result<(), AsmError> {
        let mut pass = 0u32;
        loop {
            pass += 1;
            let mut progress = false;

            let dependencies = std::mem::take(&mut self.dependencies);
            let mut remaining_deps = Vec::new();
            for dep in dependencies {
                match store.equ_value(dep.handle, self) {
                    Some(value) => {
                        self.symbols.insert(dep.label.clone(), Some(value));
                        store.set_equ_value(dep.handle, value);
                        progress = true;
                    }
                    None => remaining_deps.push(dep),
                }
            }
            self.dependencies = remaining_deps;

            let pending = std::mem::take(&mut self.pending);
            let mut remaining = Vec::new();
            for fixup in pending {
                if self.lookup(&fixup.label).is_some() {
                    store.patch(fixup.handle, self)?;
                    progress = true;
                } else {
                    remaining.push(fixup);
                }
            }
            self.pending = remaining;

            if self.pending.is_empty() && self.dependencies.is_empty() {
                log::debug!("relocation complete after {pass} pass(es)");
                return Ok(());
            }
            if !progress {
                let mut unresolved: Vec<String> = self
                    .pending
                    .iter()
                    .map(|f| f.label.clone())
                    .chain(self.dependencies.iter().map(|d| d.label.clone()))
                    .collect();
                unresolved.sort();
                unresolved.dedup();
                let at = store.source_of_first(
                    self.pending
                        .iter()
                        .map(|f| f.handle)
                        .chain(self.dependencies.iter().map(|d| d.handle)),
                );
                return Err(AsmError {
                    kind: AsmErrorKind::RelocationRecursion(unresolved.join(", ")),
                    at,
                });
            }
        }
    }
}
