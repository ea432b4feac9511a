use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::Value;

use super::{ClassId, Metamodel, PropId, PropertyKind, Role, ScalarKind};

/// Index of an object within its row's [`ObjectArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) u32);

/// One property binding of an arena object.
#[derive(Debug, Clone, Default)]
pub enum Slot {
    #[default]
    Unset,
    Scalar(Value),
    Ref(ObjRef),
    Many(Vec<ObjRef>),
}

#[derive(Debug)]
struct Object {
    class: ClassId,
    slots: Vec<Slot>,
}

/// Arena holding every domain object instantiated for one input row.
///
/// References between objects are arena indices, so the whole graph is
/// released when the arena is dropped.
#[derive(Debug)]
pub struct ObjectArena {
    model: Arc<Metamodel>,
    objects: Vec<Object>,
}

impl ObjectArena {
    #[must_use]
    pub fn new(model: Arc<Metamodel>) -> Self {
        Self {
            model,
            objects: Vec::new(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &Arc<Metamodel> {
        &self.model
    }

    /// Instantiates an empty object of a class.
    pub fn alloc(&mut self, class: ClassId) -> ObjRef {
        let slots = vec![Slot::Unset; self.model.slot_count(class)];
        self.objects.push(Object { class, slots });
        ObjRef(self.objects.len() as u32 - 1)
    }

    #[must_use]
    pub fn class_of(&self, obj: ObjRef) -> ClassId {
        self.objects[obj.0 as usize].class
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Every object allocated so far, in allocation order.
    pub fn refs(&self) -> impl Iterator<Item = ObjRef> + '_ {
        (0..self.objects.len() as u32).map(ObjRef)
    }

    fn slot(&self, obj: ObjRef, prop: PropId) -> &Slot {
        debug_assert!(self.model.is_kind_of(self.class_of(obj), prop.class()));
        &self.objects[obj.0 as usize].slots[prop.slot()]
    }

    fn slot_mut(&mut self, obj: ObjRef, prop: PropId) -> &mut Slot {
        debug_assert!(self.model.is_kind_of(self.class_of(obj), prop.class()));
        &mut self.objects[obj.0 as usize].slots[prop.slot()]
    }

    /// Whether any property of the object carries a binding.
    #[must_use]
    pub fn has_any_binding(&self, obj: ObjRef) -> bool {
        self.objects[obj.0 as usize]
            .slots
            .iter()
            .any(|slot| match slot {
                Slot::Unset => false,
                Slot::Many(refs) => !refs.is_empty(),
                Slot::Scalar(_) | Slot::Ref(_) => true,
            })
    }

    /// Whether a property carries no binding yet (an empty collection
    /// counts as unset).
    #[must_use]
    pub fn is_unset(&self, obj: ObjRef, prop: PropId) -> bool {
        match self.slot(obj, prop) {
            Slot::Unset => true,
            Slot::Many(refs) => refs.is_empty(),
            Slot::Scalar(_) | Slot::Ref(_) => false,
        }
    }

    #[must_use]
    pub fn scalar(&self, obj: ObjRef, prop: PropId) -> Option<&Value> {
        match self.slot(obj, prop) {
            Slot::Scalar(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn reference(&self, obj: ObjRef, prop: PropId) -> Option<ObjRef> {
        match self.slot(obj, prop) {
            Slot::Ref(target) => Some(*target),
            _ => None,
        }
    }

    #[must_use]
    pub fn references(&self, obj: ObjRef, prop: PropId) -> &[ObjRef] {
        match self.slot(obj, prop) {
            Slot::Many(refs) => refs,
            _ => &[],
        }
    }

    /// Writes a scalar value, coercing where the declared type allows it.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is reference-typed or the value
    /// cannot be represented in the declared scalar type.
    pub fn set_scalar(&mut self, obj: ObjRef, prop: PropId, value: Value) -> Result<()> {
        let meta = self.model.prop(prop);
        let Some(kind) = meta.scalar_kind() else {
            return Err(Error::config(format!(
                "property '{}' of class '{}' is not scalar-valued",
                meta.name(),
                self.model.name(prop.class()),
            )));
        };
        let coerced = coerce_for_kind(kind, value).ok_or_else(|| {
            Error::config(format!(
                "value rejected by writer for '{}.{}'",
                self.model.name(prop.class()),
                meta.name(),
            ))
        })?;
        *self.slot_mut(obj, prop) = Slot::Scalar(coerced);
        Ok(())
    }

    /// Writes a single-valued reference.
    pub fn set_reference(&mut self, obj: ObjRef, prop: PropId, target: ObjRef) {
        *self.slot_mut(obj, prop) = Slot::Ref(target);
    }

    /// Appends to a collection-valued reference.
    pub fn push_reference(&mut self, obj: ObjRef, prop: PropId, target: ObjRef) {
        match self.slot_mut(obj, prop) {
            Slot::Many(refs) => refs.push(target),
            slot => *slot = Slot::Many(vec![target]),
        }
    }

    pub fn unset(&mut self, obj: ObjRef, prop: PropId) {
        *self.slot_mut(obj, prop) = Slot::Unset;
    }

    /// Clears the owner-typed references of an object.
    pub fn clear_owner_references(&mut self, obj: ObjRef) {
        let class = self.class_of(obj);
        let owner_props: Vec<PropId> = self.model.owner_properties(class).collect();
        for prop in owner_props {
            self.unset(obj, prop);
        }
    }

    /// Clears every reference slot of an object, leaving scalars intact.
    pub fn clear_references(&mut self, obj: ObjRef) {
        let class = self.class_of(obj);
        let reference_props: Vec<PropId> = self
            .model
            .prop_ids(class)
            .filter(|&id| self.model.prop(id).is_reference())
            .collect();
        for prop in reference_props {
            self.unset(obj, prop);
        }
    }

    /// Drops references to pruned objects so survivors only point at
    /// survivors.
    pub fn retain_references<F>(&mut self, obj: ObjRef, keep: F)
    where
        F: Fn(ObjRef) -> bool,
    {
        for slot in &mut self.objects[obj.0 as usize].slots {
            match slot {
                Slot::Ref(target) if !keep(*target) => *slot = Slot::Unset,
                Slot::Many(refs) => refs.retain(|&target| keep(target)),
                _ => {}
            }
        }
    }

    /// Objects other than `except` whose class is compatible with `class`.
    #[must_use]
    pub fn candidates_of(
        &self,
        class: ClassId,
        except: Option<ObjRef>,
        pool: &[ObjRef],
    ) -> Vec<ObjRef> {
        pool.iter()
            .copied()
            .filter(|&obj| Some(obj) != except)
            .filter(|&obj| self.model.assignable(self.class_of(obj), class))
            .collect()
    }

    /// Reference-role properties of an object's class matching a role.
    pub fn props_with_role(&self, obj: ObjRef, role: Role) -> Vec<PropId> {
        let class = self.class_of(obj);
        self.model
            .prop_ids(class)
            .filter(|&id| {
                let meta = self.model.prop(id);
                meta.is_reference() && meta.role() == role
            })
            .collect()
    }
}

/// Adapts a value to the declared scalar kind of the slot it is written
/// into. Booleans accept the conventional spellings; strings accept any
/// value's display form.
fn coerce_for_kind(kind: ScalarKind, value: Value) -> Option<Value> {
    match (kind, value) {
        (ScalarKind::Str, Value::Str(s)) => Some(Value::Str(s)),
        (ScalarKind::Str, other) => Some(Value::Str(other.to_string())),
        (ScalarKind::Int, Value::Int(v)) => Some(Value::Int(v)),
        (ScalarKind::Float, Value::Float(v)) => Some(Value::Float(v)),
        (ScalarKind::Float, Value::Int(v)) => Some(Value::Float(v as f64)),
        (ScalarKind::Date, Value::Date(d)) => Some(Value::Date(d)),
        (ScalarKind::Bool, value) => value.as_bool().map(Value::Bool),
        _ => None,
    }
}

/// Convenience mirror of [`PropertyKind`] checks used by callers that
/// only hold a `PropId`.
impl ObjectArena {
    #[must_use]
    pub fn declared_class(&self, prop: PropId) -> Option<ClassId> {
        match self.model.prop(prop).kind() {
            PropertyKind::Reference(class) => Some(class),
            PropertyKind::Scalar(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetamodelBuilder;

    fn model() -> Arc<Metamodel> {
        let mut builder = MetamodelBuilder::new();
        builder
            .class("Parent")
            .attr("name", ScalarKind::Str)
            .attr("married", ScalarKind::Bool)
            .dependent("household", "Household");
        builder.class("Household").owner("parent", "Parent");
        Arc::new(builder.finish().expect("model"))
    }

    #[test]
    fn scalar_assignment_coerces_booleans() {
        let model = model();
        let parent_class = model.class("Parent").expect("Parent");
        let married = model.property(parent_class, "married").expect("married");
        let mut arena = ObjectArena::new(Arc::clone(&model));
        let parent = arena.alloc(parent_class);

        arena
            .set_scalar(parent, married, Value::Str("yes".into()))
            .expect("boolean spelling should coerce");
        assert_eq!(arena.scalar(parent, married), Some(&Value::Bool(true)));

        let err = arena
            .set_scalar(parent, married, Value::Str("maybe".into()))
            .expect_err("non-boolean should be rejected");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn references_clear_and_retain() {
        let model = model();
        let parent_class = model.class("Parent").expect("Parent");
        let household_class = model.class("Household").expect("Household");
        let household_prop = model.property(parent_class, "household").expect("household");
        let owner_prop = model.property(household_class, "parent").expect("parent");

        let mut arena = ObjectArena::new(Arc::clone(&model));
        let parent = arena.alloc(parent_class);
        let household = arena.alloc(household_class);
        arena.set_reference(parent, household_prop, household);
        arena.set_reference(household, owner_prop, parent);

        assert_eq!(arena.reference(parent, household_prop), Some(household));
        arena.clear_owner_references(household);
        assert_eq!(arena.reference(household, owner_prop), None);

        arena.retain_references(parent, |r| r != household);
        assert_eq!(arena.reference(parent, household_prop), None);
    }
}
