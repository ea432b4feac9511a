use smallvec::SmallVec;

use crate::error::{Error, Result, Section};
use crate::model::{ClassId, Metamodel, PropId};

/// Chain of non-collection properties rooted at a creatable class.
///
/// A path of length 1 denotes a direct attribute; longer paths chain
/// through intermediate domain objects that are synthesized on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    root: ClassId,
    steps: SmallVec<[PropId; 4]>,
}

impl PropertyPath {
    /// Resolves dotted attribute tokens against the metamodel.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown attribute, a
    /// collection property anywhere in the chain, or a non-reference
    /// intermediate.
    pub fn resolve(
        model: &Metamodel,
        root: ClassId,
        tokens: &[&str],
        expr: &str,
    ) -> Result<Self> {
        if tokens.is_empty() {
            return Err(Error::migration(
                Section::path(expr),
                "path must name at least one attribute",
            ));
        }
        let mut steps: SmallVec<[PropId; 4]> = SmallVec::new();
        let mut current = root;
        for (index, token) in tokens.iter().enumerate() {
            let prop = model.property(current, token).ok_or_else(|| {
                Error::migration(
                    Section::path(expr),
                    format!("class '{}' has no attribute '{token}'", model.name(current)),
                )
            })?;
            let meta = model.prop(prop);
            if meta.is_collection() {
                return Err(Error::migration(
                    Section::path(expr),
                    format!("collection attribute '{token}' cannot appear in a path"),
                ));
            }
            let is_last = index == tokens.len() - 1;
            if !is_last {
                let Some(next) = meta.declared_class() else {
                    return Err(Error::migration(
                        Section::path(expr),
                        format!("attribute '{token}' is not reference-typed"),
                    ));
                };
                current = next;
            }
            steps.push(prop);
        }
        Ok(Self { root, steps })
    }

    #[must_use]
    pub const fn root(&self) -> ClassId {
        self.root
    }

    #[must_use]
    pub fn steps(&self) -> &[PropId] {
        &self.steps
    }

    /// Every step except the terminal attribute.
    #[must_use]
    pub fn parents(&self) -> &[PropId] {
        &self.steps[..self.steps.len() - 1]
    }

    /// The terminal attribute.
    #[must_use]
    pub fn last(&self) -> PropId {
        *self.steps.last().expect("paths are non-empty")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Slot sequence identifying the path independent of its root class.
    ///
    /// Subclass slots extend superclass slots, so a path declared on a
    /// superclass and its re-rooted copy share a key.
    #[must_use]
    pub fn slot_key(&self) -> Vec<u32> {
        self.steps.iter().map(|step| step.slot() as u32).collect()
    }

    /// Re-roots a superclass path at one of its subclasses.
    #[must_use]
    pub(crate) fn rerooted(&self, new_root: ClassId) -> Self {
        let mut steps = self.steps.clone();
        if let Some(first) = steps.first_mut() {
            *first = PropId {
                class: new_root,
                slot: first.slot() as u32,
            };
        }
        Self {
            root: new_root,
            steps,
        }
    }

    /// Human-readable `Class.attr1.attr2` rendering for diagnostics.
    #[must_use]
    pub fn display(&self, model: &Metamodel) -> String {
        let mut out = model.name(self.root).to_owned();
        for step in &self.steps {
            out.push('.');
            out.push_str(model.prop(*step).name());
        }
        out
    }
}
