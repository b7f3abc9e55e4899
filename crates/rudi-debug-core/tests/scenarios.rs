//! End-to-end scenarios for the rule model core, driven through location
//! files on disk.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use rudi_debug_core::{
    CompilationOutcome, FileHierarchy, LoggingState, RuleId, RuleModel, RuleModelState,
    StateChange, SyncStatus,
};
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

const FRESH_COMPILE: &str = r#"
kind: import
label: main
line: 0
children:
  - { kind: rule, label: greet, line: 4, id: 1, expression: "true", baseTerms: [] }
  - kind: import
    label: sub
    line: 9
    children:
      - { kind: rule, label: bye, line: 2, id: 2 }
"#;

const WITH_ERROR: &str = r#"
kind: import
label: main
children:
  - { kind: rule, label: greet, id: 1 }
  - kind: import
    label: sub
    errors:
      - type: ERROR
        message: "undefined variable 'x'"
        location: { line: 3, column: 12 }
    children:
      - { kind: rule, label: bye, id: 2 }
"#;

struct Project {
    dir: TempDir,
}

impl Project {
    fn new(location: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.rudi"), "// main").unwrap();
        fs::write(dir.path().join("sub.rudi"), "// sub").unwrap();
        fs::write(dir.path().join("RuleLoc.yml"), location).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn location(&self) -> std::path::PathBuf {
        self.root().join("RuleLoc.yml")
    }

    fn load(&self) -> RuleModel {
        RuleModel::load(&self.location(), self.root())
            .unwrap()
            .expect("location file exists")
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn fresh_compile_aggregates_and_is_perfect() {
    let project = Project::new(FRESH_COMPILE);
    let mut model = project.load();

    model.set_rule_state(RuleId(1), LoggingState::Always).unwrap();
    model.set_rule_state(RuleId(2), LoggingState::Never).unwrap();

    let sub = model.find_by_labels(&["sub"]).unwrap();
    assert_eq!(model.state(model.root()), LoggingState::Mixed);
    assert_eq!(model.state(sub), LoggingState::Never);
    assert_eq!(model.compilation_outcome(), CompilationOutcome::Perfect);
    assert!(model.error_infos().is_empty());
    assert!(model.warn_infos().is_empty());
    assert!(model.parsing_failures().is_empty());

    let (file, line) = model.open_rule(RuleId(2)).unwrap();
    assert_eq!(file, project.root().join("sub.rudi").canonicalize().unwrap());
    assert_eq!(line, 2);
}

#[test]
fn diagnostics_are_routed_to_their_import() {
    let project = Project::new(WITH_ERROR);
    let model = project.load();

    let sub = model.find_by_labels(&["sub"]).unwrap();
    assert_eq!(model.compilation_outcome(), CompilationOutcome::WithErrors);
    assert_eq!(model.error_infos().len(), 1);
    let diagnostics = model.error_infos().get(&sub).unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!((diagnostics[0].line, diagnostics[0].column), (3, 12));
}

#[test]
fn missing_location_file_means_no_model() {
    let dir = TempDir::new().unwrap();
    let model = RuleModel::load(&dir.path().join("RuleLoc.yml"), dir.path()).unwrap();
    assert!(model.is_none());
}

#[test]
fn out_of_sync_detection() {
    let project = Project::new(FRESH_COMPILE);
    let location = project.location();
    fs::OpenOptions::new()
        .write(true)
        .open(&location)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(300))
        .unwrap();

    let mut hierarchy = FileHierarchy::scan(project.root(), &location);
    let main = project.root().join("main.rudi");
    assert!(hierarchy.get(&main).unwrap().modified);
    assert_eq!(hierarchy.status(), SyncStatus::OutOfSync);

    hierarchy.mark_all_up_to_date();
    assert!(!hierarchy.get(&main).unwrap().modified);
    assert_eq!(hierarchy.status(), SyncStatus::Synced);
}

#[test]
fn snapshot_survives_import_being_excluded() {
    let project = Project::new(FRESH_COMPILE);
    let mut model = project.load();
    model.set_rule_state(RuleId(2), LoggingState::IfTrue).unwrap();
    let mut snapshot = RuleModelState::capture(&model);

    // Recompile without `sub`.
    fs::write(
        project.location(),
        "label: main\nchildren:\n  - { label: greet, id: 1 }\n",
    )
    .unwrap();
    let mut without_sub = project.load();
    assert!(snapshot.apply(&mut without_sub));
    assert_eq!(snapshot.entry(&["sub", "bye"]).unwrap().state, LoggingState::IfTrue);

    // `sub` comes back with a new rule id; the choice is restored by label.
    fs::write(
        project.location(),
        FRESH_COMPILE.replace("id: 2", "id: 20"),
    )
    .unwrap();
    let mut with_sub = project.load();
    assert!(snapshot.apply(&mut with_sub));
    assert_eq!(
        with_sub.state(with_sub.rule(RuleId(20)).unwrap()),
        LoggingState::IfTrue
    );
}

#[test]
fn detached_observer_receives_nothing() {
    let project = Project::new(FRESH_COMPILE);
    let mut model = project.load();

    let seen: Arc<Mutex<Vec<StateChange>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let id = model.subscribe_rules(Box::new(move |c: &StateChange| {
        sink.lock().unwrap().push(*c)
    }));

    model.set_rule_state(RuleId(1), LoggingState::IfFalse).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);

    model.unsubscribe(id);
    model.set_rule_state(RuleId(1), LoggingState::Always).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(model.observer_subscription_count(), 0);
}
