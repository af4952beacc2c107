use crate::fixtures::{goroot, read, v};
use goroot_patcher::bundle::{runtime, Bundle, BundleKind};
use goroot_patcher::{load_from_str, ApplicationError, EmbeddedAssets, PatchOutcome};

const EXTRA: &str = r#"
[meta]
name = "proc-tracing"
description = "count goroutine starts"
version_range = ">=1.20"

[[files]]
path = "src/runtime/proc.go"

[[files.patches]]
mark = "trace_goexit"
anchors = ["func goexit1() {", "mcall(goexit0)"]
position = "before"
content = "__xgo_trace_exit()"

[[files.patches]]
mark = "trace_new_api"
anchors = ["func goexit1() {", "\n"]
version = ">=1.23"
content = "\t// go1.23+"
"#;

fn merged(minor: u32) -> Bundle {
    let set = load_from_str(EXTRA).unwrap();
    Bundle::builtin(&[BundleKind::Runtime], &v(minor))
        .unwrap()
        .merge(Bundle::from_patch_set(&set).unwrap())
}

#[test]
fn test_user_set_folds_into_builtin_file() {
    let bundle = merged(21);
    let proc = bundle
        .files
        .iter()
        .filter(|f| f.relative == runtime::PROC_GO)
        .count();
    assert_eq!(proc, 1);
}

#[test]
fn test_user_set_applies_after_builtin_patches() {
    let temp_dir = goroot(21);
    let root = temp_dir.path();
    let report = merged(21).apply_all(root, &v(21), &EmbeddedAssets).unwrap();

    let proc = read(root, runtime::PROC_GO);
    let exit_hook = proc.find("__xgo_handle_goexit(getg())").unwrap();
    let trace = proc.find("__xgo_trace_exit()").unwrap();
    assert!(exit_hook < trace);
    assert!(trace < proc.find("mcall(goexit0)").unwrap());
    assert!(!proc.contains("// go1.23+"));
    assert_eq!(report.count(PatchOutcome::SkippedVersion), 1);
}

#[test]
fn test_patch_version_intersects_set_range() {
    let temp_dir = goroot(23);
    let root = temp_dir.path();
    merged(23).apply_all(root, &v(23), &EmbeddedAssets).unwrap();
    assert!(read(root, runtime::PROC_GO).contains("// go1.23+"));
}

#[test]
fn test_set_range_gates_whole_set() {
    let set = load_from_str(EXTRA).unwrap();
    assert!(!set.applies_to(&v(19)).unwrap());
    assert!(set.applies_to(&v(20)).unwrap());
}

#[test]
fn test_user_anchor_repeating_builtin_region_is_ambiguous() {
    let ambiguous = r#"
[[files]]
path = "src/runtime/proc.go"

[[files.patches]]
mark = "dup"
anchors = ["newg"]
content = "// dup"
"#;
    let set = load_from_str(ambiguous).unwrap();
    let temp_dir = goroot(21);
    let root = temp_dir.path();
    let before = read(root, runtime::PROC_GO);

    let err = Bundle::from_patch_set(&set)
        .unwrap()
        .apply_all(root, &v(21), &EmbeddedAssets)
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Anchor { .. }), "{err}");
    assert!(err.to_string().contains("ambiguous"), "{err}");
    assert_eq!(read(root, runtime::PROC_GO), before);
}
