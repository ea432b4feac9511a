use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Error, Result, Section};
use crate::mapping::{CompiledMapping, PropertyPath};
use crate::model::{ClassId, Metamodel, ObjRef, ObjectArena, PropId, Role};
use crate::reader::Record;
use crate::shims::{ShimContext, ShimRegistry};
use crate::value::Value;

/// Result of migrating one row: the row's object graph and the surviving
/// target instance, if any.
pub(crate) struct RowOutcome {
    pub arena: ObjectArena,
    pub target: Option<ObjRef>,
}

/// Executes the per-row migration phases against a compiled mapping.
pub(crate) struct RowMigrator<'a> {
    model: &'a Arc<Metamodel>,
    mapping: &'a CompiledMapping,
    shims: &'a mut ShimRegistry,
    unique: bool,
}

impl<'a> RowMigrator<'a> {
    pub(crate) fn new(
        model: &'a Arc<Metamodel>,
        mapping: &'a CompiledMapping,
        shims: &'a mut ShimRegistry,
        unique: bool,
    ) -> Self {
        Self {
            model,
            mapping,
            shims,
            unique,
        }
    }

    /// Migrates one record, attributing any failure to its record number
    /// so the driver can apply the reject-or-propagate policy.
    pub(crate) fn migrate(&mut self, record: &Record) -> Result<RowOutcome> {
        self.run(record).map_err(|err| match err {
            err @ (Error::Io(_) | Error::Csv(_)) => err,
            Error::Migration {
                section: Section::Record { .. },
                ..
            } => err,
            other => Error::record(record.number(), other.to_string()),
        })
    }

    fn run(&mut self, record: &Record) -> Result<RowOutcome> {
        let mut arena = ObjectArena::new(Arc::clone(self.model));
        let mut migrated: Vec<ObjRef> = Vec::new();

        // Phase A: one empty instance per creatable class, owners first.
        let creatable: Vec<(ClassId, ObjRef)> = self
            .mapping
            .creatable()
            .iter()
            .map(|&class| {
                let obj = arena.alloc(class);
                migrated.push(obj);
                (class, obj)
            })
            .collect();

        // Phase B: assign mapped values through their paths.
        for &(class, obj) in &creatable {
            for binding in self.mapping.bindings(class) {
                let Some(value) = record.get(&binding.field) else {
                    continue;
                };
                let value = value.clone();
                let parent =
                    self.materialize_parents(&mut arena, &mut migrated, obj, &binding.path, record)?;
                let effective =
                    self.transform_value(&arena, class, obj, &binding.path, value, record)?;
                if let Some(effective) = effective {
                    arena.set_scalar(parent, binding.path.last(), effective)?;
                }
            }
        }

        // Phase C: defaults merge in where nothing was assigned.
        for &(class, obj) in &creatable {
            for (path, default) in self.mapping.defaults_of(class) {
                let parent = self.materialize_parents(&mut arena, &mut migrated, obj, path, record)?;
                if arena.is_unset(parent, path.last()) {
                    arena.set_scalar(parent, path.last(), default.clone())?;
                }
            }
        }

        // Phase D: unique-mode secondary keys.
        if self.unique {
            for &(_, obj) in &creatable {
                self.shims.run_uniquifier(self.model, &mut arena, obj)?;
            }
        }

        // Phase E: per-instance finalizers, creatable order. Intermediate
        // objects ran theirs at creation with an empty migrated set.
        for &(_, obj) in &creatable {
            self.shims
                .run_finalizer(self.model, &mut arena, obj, record, &migrated)?;
        }

        // Phase F: validity, reference resolution, pruning.
        let survivors = self.resolve_and_prune(&mut arena, &migrated, record)?;

        // Phase G: the unique surviving creatable target.
        let target = Self::select_target(
            self.model,
            self.mapping.target(),
            &arena,
            &creatable,
            &survivors,
            record,
        )?;
        Ok(RowOutcome { arena, target })
    }

    /// Walks the non-terminal path steps from `root`, synthesizing any
    /// missing intermediate objects.
    fn materialize_parents(
        &mut self,
        arena: &mut ObjectArena,
        migrated: &mut Vec<ObjRef>,
        root: ObjRef,
        path: &PropertyPath,
        record: &Record,
    ) -> Result<ObjRef> {
        let mut current = root;
        for &prop in path.parents() {
            if let Some(next) = arena.reference(current, prop) {
                current = next;
                continue;
            }
            let class = self
                .model
                .prop(prop)
                .declared_class()
                .expect("non-terminal path steps are reference-typed");
            if self.model.is_abstract(class) {
                return Err(Error::record(
                    record.number(),
                    format!(
                        "cannot instantiate abstract intermediate class '{}'",
                        self.model.name(class)
                    ),
                ));
            }
            let created = arena.alloc(class);
            // A freshly created intermediate has no siblings yet.
            self.shims
                .run_finalizer(self.model, arena, created, record, &[])?;
            arena.set_reference(current, prop, created);
            migrated.push(created);
            current = created;
        }
        Ok(current)
    }

    /// Filter then shim transform, composed over the raw cell value.
    fn transform_value(
        &self,
        arena: &ObjectArena,
        class: ClassId,
        obj: ObjRef,
        path: &PropertyPath,
        value: Value,
        record: &Record,
    ) -> Result<Option<Value>> {
        let mut current = Some(value);
        if let Some(filter) = self.mapping.filter_for(class, path.last()) {
            current = current.and_then(|value| filter.apply(value));
        }
        if let Some(transform) = self
            .shims
            .lookup_attr_transform(self.model, class, path.last())
        {
            let context = ShimContext {
                arena,
                obj,
                record,
            };
            current = transform(&context, current)?;
        }
        Ok(current)
    }

    fn resolve_and_prune(
        &mut self,
        arena: &mut ObjectArena,
        migrated: &[ObjRef],
        record: &Record,
    ) -> Result<Vec<ObjRef>> {
        // F.1: owners-first instance order; reversed, dependents come first.
        let owners_first = self.dependency_order(arena, migrated);
        let mut dependents_first = owners_first.clone();
        dependents_first.reverse();

        // F.2: validity partition; invalid objects drop their back-links.
        let mut invalid: HashSet<ObjRef> = HashSet::new();
        for &obj in &dependents_first {
            if !self.shims.is_valid(self.model, arena, obj) {
                invalid.insert(obj);
                arena.clear_owner_references(obj);
            }
        }
        let valid: Vec<ObjRef> = dependents_first
            .iter()
            .copied()
            .filter(|obj| !invalid.contains(obj))
            .collect();

        // F.3: owner references. Candidate uniqueness is judged over the
        // whole migrated set; a reference that lands on an invalid
        // instance is handled by the F.5 cascade below.
        for &obj in &valid {
            self.resolve_owner(arena, migrated, obj);
        }

        // F.4: independent and unidirectional-dependent references.
        for &obj in &valid {
            self.resolve_references(arena, migrated, obj, record)?;
        }

        // F.5: objects whose owner types survive only as invalid
        // instances are invalidated too; iterate to a fixpoint so chains
        // collapse completely.
        loop {
            let mut changed = false;
            for &obj in &owners_first {
                if invalid.contains(&obj) {
                    continue;
                }
                let owner_types = self.model.owners(arena.class_of(obj));
                if owner_types.is_empty() {
                    continue;
                }
                let representatives: Vec<ObjRef> = migrated
                    .iter()
                    .copied()
                    .filter(|&other| other != obj)
                    .filter(|&other| {
                        owner_types
                            .iter()
                            .any(|&owner| self.model.assignable(arena.class_of(other), owner))
                    })
                    .collect();
                if !representatives.is_empty()
                    && representatives.iter().all(|other| invalid.contains(other))
                {
                    invalid.insert(obj);
                    arena.clear_owner_references(obj);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // F.6: closure-added owners live only to host dependents.
        for &obj in &dependents_first {
            if invalid.contains(&obj) {
                continue;
            }
            let class = arena.class_of(obj);
            if !self.mapping.owner_closure().contains(&class) {
                continue;
            }
            let dependent_classes = self.model.dependents(class);
            let has_valid_dependent = migrated.iter().any(|&other| {
                other != obj
                    && !invalid.contains(&other)
                    && dependent_classes
                        .iter()
                        .any(|&dep| self.model.assignable(arena.class_of(other), dep))
            });
            if !has_valid_dependent {
                arena.clear_references(obj);
                invalid.insert(obj);
            }
        }

        // Survivors must only reference survivors.
        let survivors: Vec<ObjRef> = owners_first
            .iter()
            .copied()
            .filter(|obj| !invalid.contains(obj))
            .collect();
        let keep: HashSet<ObjRef> = survivors.iter().copied().collect();
        for &obj in &survivors {
            arena.retain_references(obj, |reference| keep.contains(&reference));
        }
        Ok(survivors)
    }

    /// Stable instance order consistent with `depends_on`: owners first,
    /// ties broken by allocation order.
    fn dependency_order(&self, arena: &ObjectArena, migrated: &[ObjRef]) -> Vec<ObjRef> {
        let mut remaining: Vec<ObjRef> = migrated.to_vec();
        let mut ordered = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let position = remaining.iter().position(|&obj| {
                !remaining.iter().any(|&other| {
                    other != obj
                        && self
                            .model
                            .depends_on(arena.class_of(obj), arena.class_of(other))
                })
            });
            match position {
                Some(index) => ordered.push(remaining.remove(index)),
                None => {
                    ordered.append(&mut remaining);
                }
            }
        }
        ordered
    }

    /// F.3: pick the owner property with exactly one candidate in the
    /// migrated set, preferring the target class and then the
    /// preferred-owner hint.
    fn resolve_owner(&self, arena: &mut ObjectArena, migrated: &[ObjRef], obj: ObjRef) {
        let owner_props: Vec<PropId> = arena
            .props_with_role(obj, Role::Owner)
            .into_iter()
            .filter(|&prop| !self.model.prop(prop).is_collection())
            .filter(|&prop| arena.is_unset(obj, prop))
            .collect();
        let mut candidates: Vec<(PropId, ObjRef)> = Vec::new();
        for prop in owner_props {
            let declared = self
                .model
                .prop(prop)
                .declared_class()
                .expect("owner properties are reference-typed");
            let found = arena.candidates_of(declared, Some(obj), migrated);
            if let [single] = found.as_slice() {
                candidates.push((prop, *single));
            }
        }
        let chosen = match candidates.as_slice() {
            [] => None,
            [single] => Some(*single),
            several => {
                let target = self.mapping.target();
                let preferred: Vec<(PropId, ObjRef)> = several
                    .iter()
                    .copied()
                    .filter(|&(_, candidate)| {
                        self.model.is_kind_of(arena.class_of(candidate), target)
                    })
                    .collect();
                if let [single] = preferred.as_slice() {
                    Some(*single)
                } else if let Some(hook) = self
                    .shims
                    .lookup_preferred_owner(self.model, arena.class_of(obj))
                {
                    hook(arena, obj, several)
                        .and_then(|prop| several.iter().copied().find(|&(p, _)| p == prop))
                } else {
                    None
                }
            }
        };
        if let Some((prop, owner)) = chosen {
            arena.set_reference(obj, prop, owner);
        }
    }

    /// F.4: single-candidate resolution of independent references and
    /// unidirectional dependents, via the reference transform if any.
    /// The candidate count runs over the whole migrated set.
    fn resolve_references(
        &self,
        arena: &mut ObjectArena,
        migrated: &[ObjRef],
        obj: ObjRef,
        record: &Record,
    ) -> Result<()> {
        let class = arena.class_of(obj);
        let mut props: Vec<PropId> = arena.props_with_role(obj, Role::Independent);
        props.extend(
            arena
                .props_with_role(obj, Role::Dependent)
                .into_iter()
                .filter(|&prop| self.model.prop(prop).is_unidirectional()),
        );
        for prop in props {
            if !arena.is_unset(obj, prop) {
                continue;
            }
            let declared = self
                .model
                .prop(prop)
                .declared_class()
                .expect("reference-role properties are reference-typed");
            let found = arena.candidates_of(declared, Some(obj), migrated);
            let [candidate] = found.as_slice() else {
                continue;
            };
            let mut candidate = *candidate;
            if let Some(transform) = self
                .shims
                .lookup_reference_transform(self.model, class, prop)
            {
                let context = ShimContext {
                    arena: &*arena,
                    obj,
                    record,
                };
                match transform(&context, candidate)? {
                    Some(mapped) => candidate = mapped,
                    None => continue,
                }
            }
            if self.model.prop(prop).is_collection() {
                arena.push_reference(obj, prop, candidate);
            } else {
                arena.set_reference(obj, prop, candidate);
            }
        }
        Ok(())
    }

    /// G: among surviving creatable instances, exactly one target.
    fn select_target(
        model: &Metamodel,
        target_class: ClassId,
        arena: &ObjectArena,
        creatable: &[(ClassId, ObjRef)],
        survivors: &[ObjRef],
        record: &Record,
    ) -> Result<Option<ObjRef>> {
        let surviving: HashSet<ObjRef> = survivors.iter().copied().collect();
        let targets: Vec<ObjRef> = creatable
            .iter()
            .filter(|(class, _)| model.is_kind_of(*class, target_class))
            .map(|&(_, obj)| obj)
            .filter(|obj| surviving.contains(obj))
            .collect();
        match targets.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            several => Err(Error::record(
                record.number(),
                format!(
                    "{} target instances survived; expected exactly one",
                    several.len()
                ),
            )),
        }
    }
}
