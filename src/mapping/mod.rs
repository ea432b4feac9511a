mod path;

pub use path::PropertyPath;

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result, Section};
use crate::filter::{Filter, FilterSpec};
use crate::model::{ClassId, Metamodel, PropId, ScalarKind};
use crate::reader::{FieldKey, RecordLayout, coerce};
use crate::value::Value;

/// One compiled `(path, header)` binding of a creatable class.
#[derive(Debug, Clone)]
pub struct PathBinding {
    pub path: PropertyPath,
    pub field: FieldKey,
}

/// Declarative inputs to the mapping compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingInputs<'a> {
    /// `header -> comma-separated path list` entries.
    pub fields: &'a [(String, String)],
    /// `path -> literal` default entries.
    pub defaults: &'a [(String, String)],
    /// `path -> filter spec` entries.
    pub filters: &'a [(String, FilterSpec)],
}

/// Immutable result of mapping compilation.
#[derive(Debug)]
pub struct CompiledMapping {
    target: ClassId,
    field_paths: HashMap<ClassId, Vec<PathBinding>>,
    defaults: HashMap<ClassId, Vec<(PropertyPath, Value)>>,
    filters: HashMap<(ClassId, PropId), Filter>,
    creatable: Vec<ClassId>,
    owner_closure: HashSet<ClassId>,
}

impl CompiledMapping {
    /// Compiles field, default, and filter configs against the metamodel
    /// and the reader's accessor set.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown headers, malformed or
    /// collection-bearing paths, abstract creatable classes, or invalid
    /// filter specs.
    pub fn compile(
        inputs: MappingInputs<'_>,
        target: ClassId,
        layout: &RecordLayout,
        model: &Metamodel,
    ) -> Result<Self> {
        let mut compiler = Compiler {
            model,
            layout,
            target,
            field_paths: HashMap::new(),
            defaults: HashMap::new(),
            filters: HashMap::new(),
            creatable: Vec::new(),
            owner_closure: HashSet::new(),
        };
        compiler.collect_fields(inputs.fields)?;
        compiler.collect_defaults(inputs.defaults)?;
        compiler.collect_filters(inputs.filters)?;
        compiler.merge_superclasses();
        compiler.check_concrete()?;
        compiler.close_over_owners();
        compiler.add_implicit_boolean_filters()?;
        compiler.order_creatable();
        if compiler.field_paths.is_empty() {
            return Err(Error::config("field mapping resolved to no usable paths"));
        }
        Ok(Self {
            target: compiler.target,
            field_paths: compiler.field_paths,
            defaults: compiler.defaults,
            filters: compiler.filters,
            creatable: compiler.creatable,
            owner_closure: compiler.owner_closure,
        })
    }

    #[must_use]
    pub const fn target(&self) -> ClassId {
        self.target
    }

    /// Creatable classes in construction order (owners first).
    #[must_use]
    pub fn creatable(&self) -> &[ClassId] {
        &self.creatable
    }

    /// Classes added only to host otherwise orphan dependents.
    #[must_use]
    pub const fn owner_closure(&self) -> &HashSet<ClassId> {
        &self.owner_closure
    }

    #[must_use]
    pub fn bindings(&self, class: ClassId) -> &[PathBinding] {
        self.field_paths.get(&class).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn defaults_of(&self, class: ClassId) -> &[(PropertyPath, Value)] {
        self.defaults.get(&class).map_or(&[], Vec::as_slice)
    }

    /// The compiled filter feeding `(creatable class, terminal property)`.
    #[must_use]
    pub fn filter_for(&self, class: ClassId, prop: PropId) -> Option<&Filter> {
        self.filters.get(&(class, prop))
    }
}

struct Compiler<'a> {
    model: &'a Metamodel,
    layout: &'a RecordLayout,
    target: ClassId,
    field_paths: HashMap<ClassId, Vec<PathBinding>>,
    defaults: HashMap<ClassId, Vec<(PropertyPath, Value)>>,
    filters: HashMap<(ClassId, PropId), Filter>,
    creatable: Vec<ClassId>,
    owner_closure: HashSet<ClassId>,
}

impl Compiler<'_> {
    /// Splits `Class.a.b` into its root class and attribute tokens.
    fn parse_path(&self, expr: &str) -> Result<PropertyPath> {
        let expr = expr.trim();
        let tokens: Vec<&str> = expr.split('.').map(str::trim).collect();
        if tokens.iter().any(|token| token.is_empty()) {
            return Err(Error::migration(
                Section::path(expr),
                "path contains an empty segment",
            ));
        }
        let leading_capital = tokens[0]
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_uppercase());
        let (root, attrs) = if leading_capital {
            let class = self.model.class(tokens[0]).ok_or_else(|| {
                Error::migration(
                    Section::path(expr),
                    format!("unknown class '{}'", tokens[0]),
                )
            })?;
            (class, &tokens[1..])
        } else {
            (self.target, &tokens[..])
        };
        let path = PropertyPath::resolve(self.model, root, attrs, expr)?;
        let terminal = self.model.prop(path.last());
        if terminal.scalar_kind().is_none() {
            return Err(Error::migration(
                Section::path(expr),
                "path must terminate in a scalar attribute",
            ));
        }
        Ok(path)
    }

    fn note_creatable(&mut self, class: ClassId) {
        if !self.creatable.contains(&class) {
            self.creatable.push(class);
        }
    }

    fn collect_fields(&mut self, fields: &[(String, String)]) -> Result<()> {
        for (header, path_list) in fields {
            if path_list.trim().is_empty() {
                continue;
            }
            let field = self
                .layout
                .accessor(header)
                .ok_or_else(|| {
                    Error::config(format!("field mapping references unknown header '{header}'"))
                })?
                .clone();
            for expr in path_list.split(',') {
                if expr.trim().is_empty() {
                    continue;
                }
                let path = self.parse_path(expr)?;
                let root = path.root();
                self.note_creatable(root);
                self.field_paths.entry(root).or_default().push(PathBinding {
                    path,
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    fn collect_defaults(&mut self, defaults: &[(String, String)]) -> Result<()> {
        for (expr, literal) in defaults {
            let Some(value) = coerce(literal) else {
                continue;
            };
            let path = self.parse_path(expr)?;
            let root = path.root();
            self.note_creatable(root);
            self.defaults.entry(root).or_default().push((path, value));
        }
        Ok(())
    }

    fn collect_filters(&mut self, filters: &[(String, FilterSpec)]) -> Result<()> {
        for (expr, spec) in filters {
            let path = self.parse_path(expr)?;
            let terminal = self.model.prop(path.last());
            let filter = if terminal.scalar_kind() == Some(ScalarKind::Bool) {
                Filter::compile_boolean(spec, None)?
            } else {
                Filter::compile(spec, None)?
            };
            self.filters.insert((path.root(), path.last()), filter);
        }
        Ok(())
    }

    /// Folds a configured superclass into its configured strict
    /// subclasses; the superclass stops being creatable.
    fn merge_superclasses(&mut self) {
        let classes = self.creatable.clone();
        let mut removed: HashSet<ClassId> = HashSet::new();
        for &sup in &classes {
            let subclasses: Vec<ClassId> = classes
                .iter()
                .copied()
                .filter(|&sub| self.model.is_subclass_of(sub, sup))
                .collect();
            if subclasses.is_empty() {
                continue;
            }
            let sup_bindings = self.field_paths.remove(&sup).unwrap_or_default();
            let sup_defaults = self.defaults.remove(&sup).unwrap_or_default();
            let sup_filters: Vec<(PropId, Filter)> = {
                let keys: Vec<(ClassId, PropId)> = self
                    .filters
                    .keys()
                    .copied()
                    .filter(|(class, _)| *class == sup)
                    .collect();
                keys.into_iter()
                    .map(|key| {
                        let filter = self.filters.remove(&key).expect("key just collected");
                        (key.1, filter)
                    })
                    .collect()
            };
            for &sub in &subclasses {
                let existing: HashSet<Vec<u32>> = self
                    .field_paths
                    .get(&sub)
                    .map(|bindings| bindings.iter().map(|b| b.path.slot_key()).collect())
                    .unwrap_or_default();
                for binding in &sup_bindings {
                    if existing.contains(&binding.path.slot_key()) {
                        continue;
                    }
                    self.field_paths.entry(sub).or_default().push(PathBinding {
                        path: binding.path.rerooted(sub),
                        field: binding.field.clone(),
                    });
                }
                let existing_defaults: HashSet<Vec<u32>> = self
                    .defaults
                    .get(&sub)
                    .map(|entries| entries.iter().map(|(p, _)| p.slot_key()).collect())
                    .unwrap_or_default();
                for (sup_path, value) in &sup_defaults {
                    if existing_defaults.contains(&sup_path.slot_key()) {
                        continue;
                    }
                    self.defaults
                        .entry(sub)
                        .or_default()
                        .push((sup_path.rerooted(sub), value.clone()));
                }
            }
            // A compiled filter is not clonable; the superclass entry
            // moves to the first subclass still lacking one.
            for (prop, filter) in sup_filters {
                let slot = prop.slot() as u32;
                let reroot = |sub: ClassId| {
                    if prop.class() == sup {
                        PropId { class: sub, slot }
                    } else {
                        prop
                    }
                };
                if let Some(&sub) = subclasses
                    .iter()
                    .find(|&&sub| !self.filters.contains_key(&(sub, reroot(sub))))
                {
                    self.filters.insert((sub, reroot(sub)), filter);
                }
            }
            removed.insert(sup);
        }
        self.creatable.retain(|class| !removed.contains(class));
    }

    fn check_concrete(&self) -> Result<()> {
        for &class in &self.creatable {
            if self.model.is_abstract(class) {
                return Err(Error::migration(
                    Section::class(self.model.name(class)),
                    "abstract class cannot be creatable; map a concrete subclass",
                ));
            }
        }
        Ok(())
    }

    fn has_creatable_owner(&self, class: ClassId) -> bool {
        self.model.owners(class).iter().any(|&owner| {
            self.creatable
                .iter()
                .any(|&creatable| self.model.assignable(creatable, owner))
        })
    }

    /// Whether a class's transitive owner chain reaches a creatable class.
    fn owner_chain_touches_creatable(&self, class: ClassId) -> bool {
        let mut queue: VecDeque<ClassId> = VecDeque::from(self.model.owners(class));
        let mut seen: HashSet<ClassId> = HashSet::new();
        while let Some(owner) = queue.pop_front() {
            if !seen.insert(owner) {
                continue;
            }
            if self
                .creatable
                .iter()
                .any(|&creatable| self.model.assignable(creatable, owner))
            {
                return true;
            }
            queue.extend(self.model.owners(owner));
        }
        false
    }

    /// Adds host owners for creatable dependents until fixpoint.
    fn close_over_owners(&mut self) {
        loop {
            let mut added = false;
            for class in self.creatable.clone() {
                let owners = self.model.owners(class);
                if owners.is_empty() || self.has_creatable_owner(class) {
                    continue;
                }
                let host = owners.iter().copied().find(|&owner| {
                    !self.model.is_abstract(owner) && self.owner_chain_touches_creatable(owner)
                });
                if let Some(host) = host {
                    self.creatable.push(host);
                    self.owner_closure.insert(host);
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
    }

    /// Boolean-typed terminals always get the string-to-boolean filter.
    fn add_implicit_boolean_filters(&mut self) -> Result<()> {
        let mut wanted: Vec<(ClassId, PropId)> = Vec::new();
        for (&class, bindings) in &self.field_paths {
            for binding in bindings {
                let last = binding.path.last();
                if self.model.prop(last).scalar_kind() == Some(ScalarKind::Bool)
                    && !self.filters.contains_key(&(class, last))
                {
                    wanted.push((class, last));
                }
            }
        }
        for key in wanted {
            let filter = Filter::compile_boolean(&FilterSpec::new(), None)?;
            self.filters.insert(key, filter);
        }
        Ok(())
    }

    /// Stable topological order over `depends_on`: owners first, ties by
    /// insertion order.
    fn order_creatable(&mut self) {
        let mut remaining = std::mem::take(&mut self.creatable);
        let mut ordered = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let position = remaining.iter().position(|&class| {
                !remaining
                    .iter()
                    .any(|&other| other != class && self.model.depends_on(class, other))
            });
            match position {
                Some(index) => ordered.push(remaining.remove(index)),
                // An ownership cycle in the metamodel; preserve insertion
                // order for the rest.
                None => {
                    ordered.append(&mut remaining);
                }
            }
        }
        self.creatable = ordered;
    }
}
