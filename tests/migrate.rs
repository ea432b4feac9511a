mod common;

use std::sync::Arc;

use csv_migrator_rs::{
    Error, FilterSpec, MigratedTarget, MigrationBuilder, ShimRegistry, Value,
};

const PARENTS_CSV: &str = "First,Last,Street,City,Spouse\n\
                           Joe,Smith,123 Oak Street,Chicago,Jane\n\
                           Jane,Smith,123 Oak Street,Chicago,Joe\n";

#[test]
fn family_parents_happy_path() {
    let model = common::family_model();
    let household_prop = common::prop(&model, "Parent", "household");
    let spouse_prop = common::prop(&model, "Parent", "spouse");
    let address_prop = common::prop(&model, "Household", "address");
    let name_prop = common::prop(&model, "Parent", "name");
    let street_prop = common::prop(&model, "Address", "street1");
    let state_prop = common::prop(&model, "Address", "state");

    let mut shims = ShimRegistry::new();
    shims
        .finalizer(&model, "Parent", move |arena, obj, _record, _migrated| {
            // A spouse shares the household migrated for this parent.
            if let (Some(spouse), Some(household)) = (
                arena.reference(obj, spouse_prop),
                arena.reference(obj, household_prop),
            ) {
                arena.set_reference(spouse, household_prop, household);
            }
            Ok(())
        })
        .expect("finalizer should register");

    let engine = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .field("Street", "Parent.household.address.street1")
        .field("City", "household.address.city")
        .field("Spouse", "spouse.name")
        .default_value("Parent.household.address.state", "IL")
        .filter(
            "Parent.household.address.street1",
            FilterSpec::new().entry("/Street/", "St"),
        )
        .shims(shims)
        .from_reader(PARENTS_CSV.as_bytes())
        .expect("engine should build");

    let targets: Vec<MigratedTarget> = engine
        .collect::<csv_migrator_rs::Result<Vec<_>>>()
        .expect("migration should succeed");
    assert_eq!(targets.len(), 2);

    for (index, outcome) in targets.iter().enumerate() {
        let arena = &outcome.arena;
        let parent = outcome.target;

        let household = arena
            .reference(parent, household_prop)
            .expect("parent should have a household");
        let address = arena
            .reference(household, address_prop)
            .expect("household should have an address");
        assert_eq!(
            arena.scalar(address, street_prop),
            Some(&Value::Str("123 Oak St".into())),
            "street filter should rewrite the suffix"
        );
        assert_eq!(
            arena.scalar(address, state_prop),
            Some(&Value::Str("IL".into())),
            "state default should apply"
        );

        let spouse = arena
            .reference(parent, spouse_prop)
            .expect("spouse should be migrated");
        let expected_names = [("Joe", "Jane"), ("Jane", "Joe")][index];
        assert_eq!(
            arena.scalar(parent, name_prop),
            Some(&Value::Str(expected_names.0.into()))
        );
        assert_eq!(
            arena.scalar(spouse, name_prop),
            Some(&Value::Str(expected_names.1.into()))
        );
        assert_eq!(
            arena.reference(spouse, household_prop),
            Some(household),
            "spouse shares the household after the shim"
        );
    }
}

#[test]
fn children_resolve_their_parent_reference() {
    let model = common::family_model();
    let parents_prop = common::prop(&model, "Child", "parents");
    let parent_name = common::prop(&model, "Parent", "name");

    let input = "First,Parent\nAnna,Joe\nBen,Joe\nCara,Jane\n";
    let engine = MigrationBuilder::new(Arc::clone(&model), "Child")
        .field("First", "name")
        .field("Parent", "Parent.name")
        .from_reader(input.as_bytes())
        .expect("engine should build");

    let targets: Vec<MigratedTarget> = engine
        .collect::<csv_migrator_rs::Result<Vec<_>>>()
        .expect("migration should succeed");
    assert_eq!(targets.len(), 3);

    for (outcome, expected_parent) in targets.iter().zip(["Joe", "Joe", "Jane"]) {
        let parents = outcome.arena.references(outcome.target, parents_prop);
        assert_eq!(parents.len(), 1, "exactly one parent per child");
        assert_eq!(
            outcome.arena.scalar(parents[0], parent_name),
            Some(&Value::Str(expected_parent.into()))
        );
    }
}

fn reject_scenario_shims(model: &Arc<csv_migrator_rs::Metamodel>) -> ShimRegistry {
    let name_prop = common::prop(model, "Parent", "name");
    let mut shims = ShimRegistry::new();
    shims
        .attr_transform(model, "Parent", "name", |_context, value| {
            if value.as_ref().and_then(Value::as_str) == Some("Mark") {
                return Err(Error::Config {
                    details: "Mark cannot be migrated".into(),
                });
            }
            Ok(value)
        })
        .expect("transform should register");
    shims
        .validity(model, "Parent", move |arena, obj| {
            arena.scalar(obj, name_prop) == Some(&Value::Str("Tom".into()))
        })
        .expect("validity should register");
    shims
}

#[test]
fn failed_rows_land_in_the_rejects_file() {
    let model = common::family_model();
    let dir = tempfile::tempdir().expect("tempdir");
    let rejects = dir.path().join("rejects.csv");

    let input = "First\nTom\nMark\nHarry\n";
    let engine = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .shims(reject_scenario_shims(&model))
        .rejects_file(&rejects)
        .from_reader(input.as_bytes())
        .expect("engine should build");

    let mut names = Vec::new();
    let name_prop = common::prop(&model, "Parent", "name");
    let stats = engine
        .migrate_each(|outcome| {
            if let Some(Value::Str(name)) = outcome.arena.scalar(outcome.target, name_prop) {
                names.push(name.clone());
            }
            Ok(())
        })
        .expect("run should finish");

    assert_eq!(names, ["Tom"]);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.migrated, 1);
    assert_eq!(stats.rejected, 2);

    let contents = std::fs::read_to_string(&rejects).expect("rejects file");
    assert_eq!(
        contents, "First\nMark\nHarry\n",
        "raw rows appear in input order"
    );
}

#[test]
fn without_a_rejects_sink_the_first_bad_row_fails_fast() {
    let model = common::family_model();
    let input = "First\nTom\nMark\nHarry\n";
    let mut engine = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .shims(reject_scenario_shims(&model))
        .from_reader(input.as_bytes())
        .expect("engine should build");

    let first = engine.try_next().expect("first row migrates");
    assert!(first.is_some(), "Tom should migrate");
    let err = match engine.try_next() {
        Ok(_) => panic!("Mark should fail the run"),
        Err(err) => err,
    };
    assert!(err.is_row_error(), "failure should carry the record number");
    assert!(
        engine.try_next().expect("engine stays stopped").is_none(),
        "a failed run does not resume"
    );
}

#[test]
fn record_window_bounds_the_run() {
    let model = common::family_model();
    let name_prop = common::prop(&model, "Parent", "name");
    let input = "First\nJoe\nJane\n";

    let from_second = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .from(2)
        .from_reader(input.as_bytes())
        .expect("engine should build");
    let targets: Vec<MigratedTarget> = from_second
        .collect::<csv_migrator_rs::Result<Vec<_>>>()
        .expect("run should finish");
    assert_eq!(targets.len(), 1);
    assert_eq!(
        targets[0].arena.scalar(targets[0].target, name_prop),
        Some(&Value::Str("Jane".into()))
    );

    let up_to_second = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .to(2)
        .from_reader(input.as_bytes())
        .expect("engine should build");
    let targets: Vec<MigratedTarget> = up_to_second
        .collect::<csv_migrator_rs::Result<Vec<_>>>()
        .expect("run should finish");
    assert_eq!(targets.len(), 1);
    assert_eq!(
        targets[0].arena.scalar(targets[0].target, name_prop),
        Some(&Value::Str("Joe".into()))
    );
}

#[test]
fn extract_hook_appends_one_record_per_target() {
    let model = common::family_model();
    let name_prop = common::prop(&model, "Parent", "name");
    let dir = tempfile::tempdir().expect("tempdir");
    let extract = dir.path().join("extract.csv");

    let mut shims = ShimRegistry::new();
    let mut running_id = 0u64;
    shims
        .extractor(&model, "Parent", move |arena, obj, sink| {
            running_id += 1;
            let name = arena
                .scalar(obj, name_prop)
                .map(ToString::to_string)
                .unwrap_or_default();
            sink.append(&[name, running_id.to_string()])
        })
        .expect("extractor should register");

    let input = "First\nAmy\nBea\nCal\n";
    let engine = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .extract_file(&extract)
        .extract_headers(["Name", "Id"])
        .shims(shims)
        .from_reader(input.as_bytes())
        .expect("engine should build");

    let stats = engine.migrate_each(|_| Ok(())).expect("run should finish");
    assert_eq!(stats.migrated, 3);

    let contents = std::fs::read_to_string(&extract).expect("extract file");
    assert_eq!(contents, "Name,Id\nAmy,1\nBea,2\nCal,3\n");
}

#[test]
fn intermediate_finalizers_run_with_an_empty_migrated_set() {
    let model = common::family_model();

    let mut shims = ShimRegistry::new();
    shims
        .finalizer(&model, "Household", |_arena, _obj, _record, migrated| {
            assert!(
                migrated.is_empty(),
                "an intermediate is finalized before any siblings are visible"
            );
            Ok(())
        })
        .expect("household finalizer should register");
    shims
        .finalizer(&model, "Parent", |_arena, _obj, _record, migrated| {
            assert!(
                !migrated.is_empty(),
                "a creatable instance is finalized with the whole row set"
            );
            Ok(())
        })
        .expect("parent finalizer should register");

    let input = "First,Street\nJoe,123 Oak Street\n";
    let engine = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .field("Street", "household.address.street1")
        .shims(shims)
        .from_reader(input.as_bytes())
        .expect("engine should build");

    let targets: Vec<MigratedTarget> = engine
        .collect::<csv_migrator_rs::Result<Vec<_>>>()
        .expect("migration should succeed");
    assert_eq!(targets.len(), 1);
}

#[test]
fn unique_mode_runs_the_uniquifier() {
    let model = common::family_model();
    let name_prop = common::prop(&model, "Parent", "name");

    let mut shims = ShimRegistry::new();
    let mut counter = 0u64;
    shims
        .uniquifier(&model, "Parent", move |arena, obj| {
            counter += 1;
            if let Some(Value::Str(name)) = arena.scalar(obj, name_prop).cloned() {
                arena.set_scalar(obj, name_prop, Value::Str(format!("{name}_{counter}")))?;
            }
            Ok(())
        })
        .expect("uniquifier should register");

    let input = "First\nJoe\nJoe\n";
    let engine = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .shims(shims)
        .unique(true)
        .from_reader(input.as_bytes())
        .expect("engine should build");

    let names: Vec<String> = engine
        .map(|outcome| {
            let outcome = outcome.expect("row should migrate");
            outcome
                .arena
                .scalar(outcome.target, name_prop)
                .map(ToString::to_string)
                .expect("name should be set")
        })
        .collect();
    assert_eq!(names, ["Joe_1", "Joe_2"]);
}

#[test]
fn extract_file_without_hook_is_a_config_error() {
    let model = common::family_model();
    let dir = tempfile::tempdir().expect("tempdir");
    let err = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .extract_file(dir.path().join("extract.csv"))
        .from_reader("First\nJoe\n".as_bytes())
        .err()
        .expect("missing extract hook should fail the build");
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn empty_input_yields_no_targets_and_header_only_sinks() {
    let model = common::family_model();
    let dir = tempfile::tempdir().expect("tempdir");
    let rejects = dir.path().join("rejects.csv");

    let engine = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .rejects_file(&rejects)
        .from_reader("First,Last\n".as_bytes())
        .expect("engine should build");
    let stats = engine.migrate_each(|_| Ok(())).expect("run should finish");
    assert_eq!(stats.total, 0);
    assert_eq!(stats.migrated, 0);

    let contents = std::fs::read_to_string(&rejects).expect("rejects file");
    assert_eq!(contents, "First,Last\n", "header only");
}

#[test]
fn rows_left_empty_after_filtering_are_rejected() {
    let model = common::family_model();
    let dir = tempfile::tempdir().expect("tempdir");
    let rejects = dir.path().join("rejects.csv");

    let input = "First,Street\nJoe,Main St\n,\n";
    let engine = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .field("First", "name")
        .field("Street", "household.address.street1")
        .rejects_file(&rejects)
        .from_reader(input.as_bytes())
        .expect("engine should build");

    let stats = engine.migrate_each(|_| Ok(())).expect("run should finish");
    assert_eq!(stats.migrated, 1);
    assert_eq!(stats.rejected, 1);

    let contents = std::fs::read_to_string(&rejects).expect("rejects file");
    assert_eq!(contents, "First,Street\n,\n");
}

#[test]
fn unknown_target_class_fails_the_build() {
    let model = common::family_model();
    let err = MigrationBuilder::new(Arc::clone(&model), "Martian")
        .field("First", "name")
        .from_reader("First\nJoe\n".as_bytes())
        .err()
        .expect("unknown target should fail");
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn missing_field_mapping_fails_the_build() {
    let model = common::family_model();
    let err = MigrationBuilder::new(Arc::clone(&model), "Parent")
        .from_reader("First\nJoe\n".as_bytes())
        .err()
        .expect("missing mapping should fail");
    assert!(matches!(err, Error::Config { .. }));
}
