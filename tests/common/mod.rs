use std::sync::Arc;

use csv_migrator_rs::model::PropId;
use csv_migrator_rs::{Metamodel, MetamodelBuilder, ScalarKind};

/// Family domain shared by the end-to-end scenarios: an abstract person
/// with parent/child subclasses, and a household/address ownership chain.
pub fn family_model() -> Arc<Metamodel> {
    let mut builder = MetamodelBuilder::new();
    builder
        .class("Person")
        .abstract_class()
        .attr("name", ScalarKind::Str);
    builder
        .class("Parent")
        .extends("Person")
        .dependent("household", "Household")
        .independent("spouse", "Parent");
    builder
        .class("Household")
        .owner("parent", "Parent")
        .dependent("address", "Address");
    builder
        .class("Address")
        .owner("household", "Household")
        .attr("street1", ScalarKind::Str)
        .attr("city", ScalarKind::Str)
        .attr("state", ScalarKind::Str);
    builder
        .class("Child")
        .extends("Person")
        .independent_collection("parents", "Parent");
    Arc::new(builder.finish().expect("family metamodel should build"))
}

/// Looks up a property, panicking with a readable message.
pub fn prop(model: &Metamodel, class: &str, attr: &str) -> PropId {
    let class_id = model
        .class(class)
        .unwrap_or_else(|| panic!("class {class} should exist"));
    model
        .property(class_id, attr)
        .unwrap_or_else(|| panic!("property {class}.{attr} should exist"))
}
