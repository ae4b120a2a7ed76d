//! Integration tests that exercise the full `Loader::load` pipeline
//! against a real PE32+ DLL on disk. Gated behind a fixture file this
//! repository does not ship (no real Windows DLL is checked in), per
//! `pe-parser`'s own `tests/pe/...` fixture convention.

use linoodle::Loader;

const FIXTURE: &str = "tests/fixtures/sample.dll";

#[test]
#[ignore = "requires tests/fixtures/sample.dll, not checked into this repository"]
fn loads_and_resolves_exports_from_a_real_dll() {
    let loaded = Loader::load(FIXTURE).expect("fixture DLL should load");
    assert!(loaded.export_names().count() > 0);
}

#[test]
fn missing_file_reports_not_found() {
    let err = Loader::load("tests/fixtures/does_not_exist.dll");
    assert!(err.is_err());
}
