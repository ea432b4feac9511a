use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{ClassId, Metamodel, ObjRef, ObjectArena, PropId};
use crate::reader::Record;
use crate::sinks::ExtractSink;
use crate::value::Value;

/// Read-only context handed to per-attribute transforms.
pub struct ShimContext<'a> {
    /// The row's object graph so far.
    pub arena: &'a ObjectArena,
    /// The creatable instance the attribute belongs to.
    pub obj: ObjRef,
    /// The source record being migrated.
    pub record: &'a Record,
}

/// Per-attribute value transform, applied after the filter.
pub type AttrTransform =
    Box<dyn Fn(&ShimContext<'_>, Option<Value>) -> Result<Option<Value>> + Send + Sync>;

/// Per-attribute reference transform, consulted during reference
/// resolution; returning `None` leaves the reference unset.
pub type ReferenceTransform =
    Box<dyn Fn(&ShimContext<'_>, ObjRef) -> Result<Option<ObjRef>> + Send + Sync>;

/// Per-instance validity predicate.
pub type ValidityHook = Box<dyn Fn(&ObjectArena, ObjRef) -> bool + Send + Sync>;

/// Per-instance finalization hook. The slice is the migrated set
/// visible to the instance: empty when an intermediate object is
/// created mid-path, the full per-row set during finalization.
pub type FinalizerHook =
    Box<dyn FnMut(&mut ObjectArena, ObjRef, &Record, &[ObjRef]) -> Result<()> + Send + Sync>;

/// Per-target serializer feeding the extract sink.
pub type ExtractHook =
    Box<dyn FnMut(&ObjectArena, ObjRef, &mut ExtractSink) -> Result<()> + Send + Sync>;

/// Disambiguates among candidate owner properties; returns the chosen
/// property or `None` to leave the owner unset.
pub type PreferredOwnerHook =
    Box<dyn Fn(&ObjectArena, ObjRef, &[(PropId, ObjRef)]) -> Option<PropId> + Send + Sync>;

/// Secondary-key uniquifier applied when the engine runs in unique mode.
pub type UniquifierHook = Box<dyn FnMut(&mut ObjectArena, ObjRef) -> Result<()> + Send + Sync>;

/// Registry of user-supplied hooks keyed by class and attribute.
///
/// Hooks registered on a class also apply to its subclasses; the nearest
/// registration in the ancestor chain wins.
#[derive(Default)]
pub struct ShimRegistry {
    attr_transforms: HashMap<(ClassId, u32), AttrTransform>,
    reference_transforms: HashMap<(ClassId, u32), ReferenceTransform>,
    validity: HashMap<ClassId, ValidityHook>,
    finalizers: HashMap<ClassId, FinalizerHook>,
    extractors: HashMap<ClassId, ExtractHook>,
    preferred_owner: HashMap<ClassId, PreferredOwnerHook>,
    uniquifiers: HashMap<ClassId, UniquifierHook>,
}

impl ShimRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a post-filter transform for `class.attr`.
    ///
    /// An attribute that does not resolve to a property on the class is
    /// silently ignored, mirroring how unused hook methods are skipped.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the class is unknown.
    pub fn attr_transform<F>(
        &mut self,
        model: &Arc<Metamodel>,
        class: &str,
        attr: &str,
        transform: F,
    ) -> Result<()>
    where
        F: Fn(&ShimContext<'_>, Option<Value>) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        let class = model.require_class(class)?;
        if let Some(prop) = model.property(class, attr) {
            self.attr_transforms
                .insert((class, prop.slot() as u32), Box::new(transform));
        }
        Ok(())
    }

    /// Registers a reference transform for `class.attr`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the class is unknown.
    pub fn reference_transform<F>(
        &mut self,
        model: &Arc<Metamodel>,
        class: &str,
        attr: &str,
        transform: F,
    ) -> Result<()>
    where
        F: Fn(&ShimContext<'_>, ObjRef) -> Result<Option<ObjRef>> + Send + Sync + 'static,
    {
        let class = model.require_class(class)?;
        if let Some(prop) = model.property(class, attr) {
            self.reference_transforms
                .insert((class, prop.slot() as u32), Box::new(transform));
        }
        Ok(())
    }

    /// Registers the validity predicate of a class.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the class is unknown.
    pub fn validity<F>(&mut self, model: &Arc<Metamodel>, class: &str, hook: F) -> Result<()>
    where
        F: Fn(&ObjectArena, ObjRef) -> bool + Send + Sync + 'static,
    {
        let class = model.require_class(class)?;
        self.validity.insert(class, Box::new(hook));
        Ok(())
    }

    /// Registers the per-instance finalization hook of a class.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the class is unknown.
    pub fn finalizer<F>(&mut self, model: &Arc<Metamodel>, class: &str, hook: F) -> Result<()>
    where
        F: FnMut(&mut ObjectArena, ObjRef, &Record, &[ObjRef]) -> Result<()> + Send + Sync + 'static,
    {
        let class = model.require_class(class)?;
        self.finalizers.insert(class, Box::new(hook));
        Ok(())
    }

    /// Registers the extract serializer of a class.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the class is unknown.
    pub fn extractor<F>(&mut self, model: &Arc<Metamodel>, class: &str, hook: F) -> Result<()>
    where
        F: FnMut(&ObjectArena, ObjRef, &mut ExtractSink) -> Result<()> + Send + Sync + 'static,
    {
        let class = model.require_class(class)?;
        self.extractors.insert(class, Box::new(hook));
        Ok(())
    }

    /// Registers the preferred-owner hint of a class.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the class is unknown.
    pub fn preferred_owner<F>(&mut self, model: &Arc<Metamodel>, class: &str, hook: F) -> Result<()>
    where
        F: Fn(&ObjectArena, ObjRef, &[(PropId, ObjRef)]) -> Option<PropId> + Send + Sync + 'static,
    {
        let class = model.require_class(class)?;
        self.preferred_owner.insert(class, Box::new(hook));
        Ok(())
    }

    /// Registers the unique-mode secondary-key hook of a class.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the class is unknown.
    pub fn uniquifier<F>(&mut self, model: &Arc<Metamodel>, class: &str, hook: F) -> Result<()>
    where
        F: FnMut(&mut ObjectArena, ObjRef) -> Result<()> + Send + Sync + 'static,
    {
        let class = model.require_class(class)?;
        self.uniquifiers.insert(class, Box::new(hook));
        Ok(())
    }

    fn ancestor_chain(model: &Metamodel, class: ClassId) -> impl Iterator<Item = ClassId> + '_ {
        std::iter::successors(Some(class), |&current| model.parent(current))
    }

    pub(crate) fn lookup_attr_transform(
        &self,
        model: &Metamodel,
        class: ClassId,
        prop: PropId,
    ) -> Option<&AttrTransform> {
        // Slot indices only identify a property within one class chain.
        if !model.is_kind_of(class, prop.class()) {
            return None;
        }
        Self::ancestor_chain(model, class)
            .find_map(|ancestor| self.attr_transforms.get(&(ancestor, prop.slot() as u32)))
    }

    pub(crate) fn lookup_reference_transform(
        &self,
        model: &Metamodel,
        class: ClassId,
        prop: PropId,
    ) -> Option<&ReferenceTransform> {
        if !model.is_kind_of(class, prop.class()) {
            return None;
        }
        Self::ancestor_chain(model, class)
            .find_map(|ancestor| self.reference_transforms.get(&(ancestor, prop.slot() as u32)))
    }

    pub(crate) fn is_valid(&self, model: &Metamodel, arena: &ObjectArena, obj: ObjRef) -> bool {
        let class = arena.class_of(obj);
        match Self::ancestor_chain(model, class).find_map(|ancestor| self.validity.get(&ancestor)) {
            Some(hook) => hook(arena, obj),
            // Without a predicate, an object that never received a value
            // or reference is a leftover of partial construction.
            None => arena.has_any_binding(obj),
        }
    }

    pub(crate) fn run_finalizer(
        &mut self,
        model: &Metamodel,
        arena: &mut ObjectArena,
        obj: ObjRef,
        record: &Record,
        migrated: &[ObjRef],
    ) -> Result<()> {
        let class = arena.class_of(obj);
        let key = Self::ancestor_chain(model, class).find(|c| self.finalizers.contains_key(c));
        if let Some(key) = key
            && let Some(hook) = self.finalizers.get_mut(&key)
        {
            hook(arena, obj, record, migrated)?;
        }
        Ok(())
    }

    pub(crate) fn run_uniquifier(
        &mut self,
        model: &Metamodel,
        arena: &mut ObjectArena,
        obj: ObjRef,
    ) -> Result<()> {
        let class = arena.class_of(obj);
        let key = Self::ancestor_chain(model, class).find(|c| self.uniquifiers.contains_key(c));
        if let Some(key) = key
            && let Some(hook) = self.uniquifiers.get_mut(&key)
        {
            hook(arena, obj)?;
        }
        Ok(())
    }

    pub(crate) fn lookup_preferred_owner(
        &self,
        model: &Metamodel,
        class: ClassId,
    ) -> Option<&PreferredOwnerHook> {
        Self::ancestor_chain(model, class).find_map(|ancestor| self.preferred_owner.get(&ancestor))
    }

    pub(crate) fn has_extractor(&self, model: &Metamodel, class: ClassId) -> bool {
        Self::ancestor_chain(model, class).any(|ancestor| self.extractors.contains_key(&ancestor))
    }

    pub(crate) fn run_extractor(
        &mut self,
        model: &Metamodel,
        arena: &ObjectArena,
        obj: ObjRef,
        sink: &mut ExtractSink,
    ) -> Result<()> {
        let class = arena.class_of(obj);
        let key = Self::ancestor_chain(model, class).find(|c| self.extractors.contains_key(c));
        let Some(key) = key else {
            return Err(Error::config(format!(
                "class '{}' has no extract hook registered",
                model.name(class)
            )));
        };
        let hook = self.extractors.get_mut(&key).expect("key just found");
        hook(arena, obj, sink)
    }
}
