mod instance;

pub use instance::{ObjRef, ObjectArena, Slot};

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};

/// Identifies a domain class within a [`Metamodel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) u32);

/// Identifies one property slot of a class.
///
/// Slots are flattened ancestor-first, so a property inherited from a
/// superclass keeps its slot index in every subclass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropId {
    pub(crate) class: ClassId,
    pub(crate) slot: u32,
}

impl PropId {
    #[must_use]
    pub const fn class(self) -> ClassId {
        self.class
    }

    #[must_use]
    pub const fn slot(self) -> usize {
        self.slot as usize
    }
}

/// Primitive attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Str,
    Int,
    Float,
    Date,
    Bool,
}

/// Declared type of a property: primitive or domain class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarKind),
    Reference(ClassId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Collection,
}

/// Relationship role of a property within the ownership graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Plain attribute with no ownership semantics.
    Attribute,
    /// Reference from a dependent up to its owner.
    Owner,
    /// Reference from an owner down to a dependent.
    Dependent,
    /// Reference between independently owned objects.
    Independent,
}

/// Metadata for one attribute of a domain class.
#[derive(Debug, Clone)]
pub struct PropertyMeta {
    name: String,
    kind: PropertyKind,
    cardinality: Cardinality,
    role: Role,
    unidirectional: bool,
}

impl PropertyMeta {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        self.kind
    }

    #[must_use]
    pub const fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self.cardinality, Cardinality::Collection)
    }

    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self.kind, PropertyKind::Reference(_))
    }

    /// Declared class for reference-typed properties.
    #[must_use]
    pub const fn declared_class(&self) -> Option<ClassId> {
        match self.kind {
            PropertyKind::Reference(class) => Some(class),
            PropertyKind::Scalar(_) => None,
        }
    }

    #[must_use]
    pub const fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.kind {
            PropertyKind::Scalar(kind) => Some(kind),
            PropertyKind::Reference(_) => None,
        }
    }

    /// Whether this is a dependent reference with no inverse.
    #[must_use]
    pub const fn is_unidirectional(&self) -> bool {
        self.unidirectional
    }
}

#[derive(Debug)]
struct ClassMeta {
    name: String,
    is_abstract: bool,
    parent: Option<ClassId>,
    /// Ancestor-first flattened property list.
    props: Vec<PropertyMeta>,
    by_name: HashMap<String, u32>,
}

/// The domain metamodel: class introspection, property lookup, and the
/// ownership/dependency relations consumed by the migration engine.
#[derive(Debug)]
pub struct Metamodel {
    classes: Vec<ClassMeta>,
    by_name: HashMap<String, ClassId>,
}

impl Metamodel {
    #[must_use]
    pub fn builder() -> MetamodelBuilder {
        MetamodelBuilder::new()
    }

    /// Namespace lookup: resolves a class name.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    /// Like [`Metamodel::class`] but failing with a configuration error.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the name is unknown.
    pub fn require_class(&self, name: &str) -> Result<ClassId> {
        self.class(name)
            .ok_or_else(|| Error::config(format!("unknown domain class '{name}'")))
    }

    #[must_use]
    pub fn name(&self, class: ClassId) -> &str {
        &self.classes[class.0 as usize].name
    }

    #[must_use]
    pub fn is_abstract(&self, class: ClassId) -> bool {
        self.classes[class.0 as usize].is_abstract
    }

    #[must_use]
    pub fn parent(&self, class: ClassId) -> Option<ClassId> {
        self.classes[class.0 as usize].parent
    }

    /// Strict subclass test.
    #[must_use]
    pub fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut current = self.parent(sub);
        while let Some(class) = current {
            if class == sup {
                return true;
            }
            current = self.parent(class);
        }
        false
    }

    /// Reflexive subclass test.
    #[must_use]
    pub fn is_kind_of(&self, sub: ClassId, sup: ClassId) -> bool {
        sub == sup || self.is_subclass_of(sub, sup)
    }

    /// Type compatibility in either direction of the subclass chain.
    #[must_use]
    pub fn assignable(&self, a: ClassId, b: ClassId) -> bool {
        self.is_kind_of(a, b) || self.is_kind_of(b, a)
    }

    /// Flattened properties, ancestors first.
    #[must_use]
    pub fn properties(&self, class: ClassId) -> &[PropertyMeta] {
        &self.classes[class.0 as usize].props
    }

    /// Resolves a property name on a class (including inherited ones).
    #[must_use]
    pub fn property(&self, class: ClassId, name: &str) -> Option<PropId> {
        self.classes[class.0 as usize]
            .by_name
            .get(name)
            .map(|&slot| PropId { class, slot })
    }

    #[must_use]
    pub fn prop(&self, id: PropId) -> &PropertyMeta {
        &self.classes[id.class.0 as usize].props[id.slot as usize]
    }

    #[must_use]
    pub fn slot_count(&self, class: ClassId) -> usize {
        self.classes[class.0 as usize].props.len()
    }

    /// Property ids of a class in slot order.
    pub fn prop_ids(&self, class: ClassId) -> impl Iterator<Item = PropId> + '_ {
        (0..self.slot_count(class)).map(move |slot| PropId {
            class,
            slot: slot as u32,
        })
    }

    /// Owner-role reference properties of a class.
    pub fn owner_properties(&self, class: ClassId) -> impl Iterator<Item = PropId> + '_ {
        self.prop_ids(class)
            .filter(|&id| self.prop(id).role() == Role::Owner && self.prop(id).is_reference())
    }

    /// Declared owner classes of a class.
    #[must_use]
    pub fn owners(&self, class: ClassId) -> Vec<ClassId> {
        self.owner_properties(class)
            .filter_map(|id| self.prop(id).declared_class())
            .collect()
    }

    /// Declared dependent classes of a class.
    #[must_use]
    pub fn dependents(&self, class: ClassId) -> Vec<ClassId> {
        self.prop_ids(class)
            .filter(|&id| self.prop(id).role() == Role::Dependent)
            .filter_map(|id| self.prop(id).declared_class())
            .collect()
    }

    /// Whether `a` transitively depends on (is owned through) `b`.
    #[must_use]
    pub fn depends_on(&self, a: ClassId, b: ClassId) -> bool {
        if a == b {
            return false;
        }
        let mut queue: VecDeque<ClassId> = VecDeque::from(self.owners(a));
        let mut seen: HashSet<ClassId> = HashSet::new();
        while let Some(owner) = queue.pop_front() {
            if !seen.insert(owner) {
                continue;
            }
            if self.assignable(owner, b) {
                return true;
            }
            queue.extend(self.owners(owner));
        }
        false
    }

    /// All concrete classes, in declaration order.
    pub fn concrete_classes(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..self.classes.len() as u32)
            .map(ClassId)
            .filter(|&id| !self.is_abstract(id))
    }
}

#[derive(Debug, Clone)]
struct PropDraft {
    name: String,
    kind: PropDraftKind,
    cardinality: Cardinality,
    role: Role,
    unidirectional: bool,
}

#[derive(Debug, Clone)]
enum PropDraftKind {
    Scalar(ScalarKind),
    Reference(String),
}

/// One class under construction.
#[derive(Debug)]
pub struct ClassDraft {
    name: String,
    is_abstract: bool,
    parent: Option<String>,
    props: Vec<PropDraft>,
}

impl ClassDraft {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            is_abstract: false,
            parent: None,
            props: Vec::new(),
        }
    }

    /// Marks the class abstract; abstract classes cannot be instantiated.
    pub fn abstract_class(&mut self) -> &mut Self {
        self.is_abstract = true;
        self
    }

    /// Declares the superclass by name.
    pub fn extends(&mut self, parent: &str) -> &mut Self {
        self.parent = Some(parent.to_owned());
        self
    }

    /// Declares a scalar attribute.
    pub fn attr(&mut self, name: &str, kind: ScalarKind) -> &mut Self {
        self.push(name, PropDraftKind::Scalar(kind), Cardinality::Single, Role::Attribute, false)
    }

    /// Declares a single-valued reference up to an owner class.
    pub fn owner(&mut self, name: &str, class: &str) -> &mut Self {
        self.push(name, PropDraftKind::Reference(class.to_owned()), Cardinality::Single, Role::Owner, false)
    }

    /// Declares a single-valued reference down to a dependent class.
    pub fn dependent(&mut self, name: &str, class: &str) -> &mut Self {
        self.push(name, PropDraftKind::Reference(class.to_owned()), Cardinality::Single, Role::Dependent, false)
    }

    /// Declares a dependent collection.
    pub fn dependent_collection(&mut self, name: &str, class: &str) -> &mut Self {
        self.push(name, PropDraftKind::Reference(class.to_owned()), Cardinality::Collection, Role::Dependent, false)
    }

    /// Declares a single-valued dependent reference with no inverse.
    pub fn unidirectional_dependent(&mut self, name: &str, class: &str) -> &mut Self {
        self.push(name, PropDraftKind::Reference(class.to_owned()), Cardinality::Single, Role::Dependent, true)
    }

    /// Declares a single-valued independent reference.
    pub fn independent(&mut self, name: &str, class: &str) -> &mut Self {
        self.push(name, PropDraftKind::Reference(class.to_owned()), Cardinality::Single, Role::Independent, false)
    }

    /// Declares an independent collection.
    pub fn independent_collection(&mut self, name: &str, class: &str) -> &mut Self {
        self.push(name, PropDraftKind::Reference(class.to_owned()), Cardinality::Collection, Role::Independent, false)
    }

    fn push(
        &mut self,
        name: &str,
        kind: PropDraftKind,
        cardinality: Cardinality,
        role: Role,
        unidirectional: bool,
    ) -> &mut Self {
        self.props.push(PropDraft {
            name: name.to_owned(),
            kind,
            cardinality,
            role,
            unidirectional,
        });
        self
    }
}

/// Incrementally declares classes and finalises them into a [`Metamodel`].
#[derive(Debug, Default)]
pub struct MetamodelBuilder {
    drafts: Vec<ClassDraft>,
    index: HashMap<String, usize>,
}

impl MetamodelBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares (or reopens) a class by name.
    pub fn class(&mut self, name: &str) -> &mut ClassDraft {
        let index = *self.index.entry(name.to_owned()).or_insert_with(|| {
            self.drafts.push(ClassDraft::new(name));
            self.drafts.len() - 1
        });
        &mut self.drafts[index]
    }

    /// Resolves names and flattens inheritance into an immutable model.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on unknown parent or reference class
    /// names, inheritance cycles, or duplicate property names.
    pub fn finish(self) -> Result<Metamodel> {
        let ids: HashMap<String, ClassId> = self
            .drafts
            .iter()
            .enumerate()
            .map(|(index, draft)| (draft.name.clone(), ClassId(index as u32)))
            .collect();

        let mut parents: Vec<Option<ClassId>> = Vec::with_capacity(self.drafts.len());
        for draft in &self.drafts {
            let parent = match &draft.parent {
                None => None,
                Some(name) => Some(*ids.get(name).ok_or_else(|| {
                    Error::config(format!(
                        "class '{}' extends unknown class '{name}'",
                        draft.name
                    ))
                })?),
            };
            parents.push(parent);
        }

        // Flatten properties ancestor-first, memoised per class.
        let mut flattened: Vec<Option<Vec<PropertyMeta>>> = vec![None; self.drafts.len()];
        for index in 0..self.drafts.len() {
            Self::flatten(index, &self.drafts, &parents, &ids, &mut flattened)?;
        }

        let mut classes = Vec::with_capacity(self.drafts.len());
        for (index, draft) in self.drafts.iter().enumerate() {
            let props = flattened[index].take().unwrap_or_default();
            let mut by_name = HashMap::with_capacity(props.len());
            for (slot, prop) in props.iter().enumerate() {
                if by_name.insert(prop.name.clone(), slot as u32).is_some() {
                    return Err(Error::config(format!(
                        "class '{}' declares property '{}' more than once",
                        draft.name, prop.name
                    )));
                }
            }
            classes.push(ClassMeta {
                name: draft.name.clone(),
                is_abstract: draft.is_abstract,
                parent: parents[index],
                props,
                by_name,
            });
        }

        Ok(Metamodel {
            classes,
            by_name: ids,
        })
    }

    fn flatten(
        index: usize,
        drafts: &[ClassDraft],
        parents: &[Option<ClassId>],
        ids: &HashMap<String, ClassId>,
        flattened: &mut Vec<Option<Vec<PropertyMeta>>>,
    ) -> Result<()> {
        if flattened[index].is_some() {
            return Ok(());
        }
        let mut props = Vec::new();
        if let Some(parent) = parents[index] {
            let parent_index = parent.0 as usize;
            if parent_index == index {
                return Err(Error::config(format!(
                    "class '{}' cannot extend itself",
                    drafts[index].name
                )));
            }
            // A deeper cycle shows up as a still-unflattened parent after
            // the recursive call below; guard with an explicit walk.
            let mut seen = HashSet::from([index]);
            let mut cursor = Some(parent_index);
            while let Some(current) = cursor {
                if !seen.insert(current) {
                    return Err(Error::config(format!(
                        "inheritance cycle involving class '{}'",
                        drafts[index].name
                    )));
                }
                cursor = parents[current].map(|p| p.0 as usize);
            }
            Self::flatten(parent_index, drafts, parents, ids, flattened)?;
            props.extend(
                flattened[parent_index]
                    .as_ref()
                    .expect("parent flattened by recursive call")
                    .iter()
                    .cloned(),
            );
        }
        for draft in &drafts[index].props {
            let kind = match &draft.kind {
                PropDraftKind::Scalar(kind) => PropertyKind::Scalar(*kind),
                PropDraftKind::Reference(name) => {
                    let class = *ids.get(name).ok_or_else(|| {
                        Error::config(format!(
                            "property '{}.{}' references unknown class '{name}'",
                            drafts[index].name, draft.name
                        ))
                    })?;
                    PropertyKind::Reference(class)
                }
            };
            props.push(PropertyMeta {
                name: draft.name.clone(),
                kind,
                cardinality: draft.cardinality,
                role: draft.role,
                unidirectional: draft.unidirectional,
            });
        }
        flattened[index] = Some(props);
        Ok(())
    }
}
