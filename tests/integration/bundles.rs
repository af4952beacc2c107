use crate::fixtures::{goroot, read, v, write};
use goroot_patcher::bundle::{compiler, runtime, Bundle, BundleKind};
use goroot_patcher::{ApplicationError, EmbeddedAssets, PatchOutcome, VersionError};
use std::fs;

const SUPPORTED: [u32; 10] = [17, 18, 19, 20, 21, 22, 23, 24, 25, 26];

#[test]
fn test_apply_all_for_every_supported_release() {
    for minor in SUPPORTED {
        let temp_dir = goroot(minor);
        let bundle = Bundle::builtin(&BundleKind::ALL, &v(minor)).unwrap();

        let report = bundle
            .apply_all(temp_dir.path(), &v(minor), &EmbeddedAssets)
            .unwrap_or_else(|e| panic!("go1.{minor}: {e}"));
        assert_eq!(report.count(PatchOutcome::Replaced), 0, "go1.{minor}");
        assert!(report.count(PatchOutcome::Inserted) >= 12, "go1.{minor}");

        let status = bundle.check(temp_dir.path(), &v(minor), &EmbeddedAssets).unwrap();
        assert!(status.fully_applied(), "go1.{minor}");
    }
}

#[test]
fn test_reapply_is_byte_identical() {
    let temp_dir = goroot(21);
    let root = temp_dir.path();
    let bundle = Bundle::builtin(&BundleKind::ALL, &v(21)).unwrap();

    bundle.apply_all(root, &v(21), &EmbeddedAssets).unwrap();
    let first = read(root, runtime::PROC_GO);
    let main_first = read(root, compiler::GC_MAIN_GO);

    let again = bundle.apply_all(root, &v(21), &EmbeddedAssets).unwrap();
    assert_eq!(again.written(), 0);
    assert!(again.files.iter().all(|f| !f.changed));
    assert_eq!(read(root, runtime::PROC_GO), first);
    assert_eq!(read(root, compiler::GC_MAIN_GO), main_first);
}

#[test]
fn test_reapply_keeps_mtime() {
    let temp_dir = goroot(22);
    let root = temp_dir.path();
    let bundle = Bundle::builtin(&[BundleKind::Runtime], &v(22)).unwrap();
    bundle.apply_all(root, &v(22), &EmbeddedAssets).unwrap();

    let path = root.join(runtime::PROC_GO);
    let old = filetime::FileTime::from_unix_time(1_000_000, 0);
    filetime::set_file_mtime(&path, old).unwrap();

    bundle.apply_all(root, &v(22), &EmbeddedAssets).unwrap();
    let meta = fs::metadata(&path).unwrap();
    assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
}

#[test]
fn test_capture_precedes_system_stack_switch() {
    for minor in [17, 20, 23] {
        let temp_dir = goroot(minor);
        let root = temp_dir.path();
        runtime::apply_all(root, &v(minor)).unwrap();

        let proc = read(root, runtime::PROC_GO);
        let capture = proc.find("__xgo_parent := getg().m.curg").unwrap();
        let switch = proc.find("systemstack(func() {").unwrap();
        let record = proc.find("__xgo_newg = newg").unwrap();
        let callbacks = proc.find("range __xgo_on_gonewproc_callbacks").unwrap();
        assert!(capture < switch, "go1.{minor}");
        assert!(switch < record && record < callbacks, "go1.{minor}");
    }
}

#[test]
fn test_runtime_struct_field_and_hooks() {
    let temp_dir = goroot(20);
    let root = temp_dir.path();
    runtime::apply_all(root, &v(20)).unwrap();

    let runtime2 = read(root, runtime::RUNTIME2_GO);
    assert!(runtime2.contains("type g struct {\n/*<begin xgo_g_field>*/\n\t__xgo_g xgo_g\n/*<end xgo_g_field>*/\n"));

    let proc = read(root, runtime::PROC_GO);
    let init_done = proc.find("close(main_init_done)").unwrap();
    assert!(proc.find("__xgo_on_init_finished()").unwrap() > init_done);
    assert!(proc.contains("__xgo_handle_goexit(getg())"));

    let json = read(root, runtime::JSON_ENCODE_GO);
    assert!(json.contains("XgoLooseJSONMarshaling"));
    assert!(json.contains("e.WriteString(`\"<cycle>\"`)"));

    let trap = read(root, runtime::TRAP_GO);
    assert!(trap.starts_with("package runtime"));
    assert!(trap.contains("func __xgo_handle_goexit("));
}

#[test]
fn test_irgen_patched_only_in_generic_window() {
    for minor in [18, 19] {
        let temp_dir = goroot(minor);
        let root = temp_dir.path();
        compiler::apply_all(root, &v(minor)).unwrap();

        let irgen = read(root, compiler::IRGEN_GO);
        let trap = irgen.find("xgo_patch.TrapGenericsBeforeInstantiation()").unwrap();
        assert!(trap < irgen.find("g.stencil()").unwrap());
        assert!(root
            .join("src/cmd/compile/internal/xgo_rewrite_internal/patch/generic.go")
            .is_file());
    }

    // go1.20 and go1.21 still ship irgen.go, but it is left alone
    for minor in [20, 21] {
        let temp_dir = goroot(minor);
        let root = temp_dir.path();
        let before = read(root, compiler::IRGEN_GO);
        let report = compiler::apply_all(root, &v(minor)).unwrap();

        assert_eq!(read(root, compiler::IRGEN_GO), before);
        let irgen = report
            .files
            .iter()
            .find(|f| f.file.ends_with("irgen.go"))
            .unwrap();
        assert!(irgen.untouched());
        assert!(!root
            .join("src/cmd/compile/internal/xgo_rewrite_internal/patch/generic.go")
            .exists());
    }
}

#[test]
fn test_missing_irgen_is_fine_outside_window() {
    let temp_dir = goroot(24);
    let root = temp_dir.path();
    assert!(!root.join(compiler::IRGEN_GO).exists());
    compiler::apply_all(root, &v(24)).unwrap();
    assert!(!root.join(compiler::IRGEN_GO).exists());
}

#[test]
fn test_inliner_override_by_release() {
    for minor in [17, 21, 22, 26] {
        let temp_dir = goroot(minor);
        let root = temp_dir.path();
        compiler::apply_all(root, &v(minor)).unwrap();

        let main = read(root, compiler::GC_MAIN_GO);
        let inliner = if minor >= 22 {
            "interleaved.DevirtualizeAndInlinePackage("
        } else {
            "if base.Flag.LowerL != 0 {"
        };
        let override_at = main.find("base.Flag.LowerL = 0").unwrap();
        assert!(override_at < main.find(inliner).unwrap(), "go1.{minor}");
        assert!(main.find("xgo_patch.Patch()").unwrap() < override_at);
        assert!(main.find("xgo_patch.Link()").unwrap() < main.find("compileFunctions()").unwrap());
    }
}

#[test]
fn test_anchor_drift_leaves_tree_untouched() {
    let temp_dir = goroot(21);
    let root = temp_dir.path();
    // upstream renamed the callback site
    write(root, runtime::JSON_ENCODE_GO, "package json\n\nimport (\n)\n");
    let before = read(root, runtime::PROC_GO);

    let err = runtime::apply_all(root, &v(21)).unwrap_err();
    match &err {
        ApplicationError::Anchor { mark, .. } => assert_eq!(mark, "xgo_json_loose_unsupported"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("unsupportedTypeEncoder"), "{err}");
    assert_eq!(read(root, runtime::PROC_GO), before);
    assert!(!root.join(runtime::TRAP_GO).exists());
}

#[test]
fn test_wrong_release_tables_fail_loudly() {
    // go1.17 tables against go1.23 sources
    let temp_dir = goroot(23);
    let err = runtime::apply_all(temp_dir.path(), &v(17)).unwrap_err();
    assert!(matches!(err, ApplicationError::Anchor { .. }), "{err}");
}

#[test]
fn test_unsupported_release_touches_nothing() {
    let temp_dir = goroot(21);
    let root = temp_dir.path();
    let before = read(root, runtime::PROC_GO);

    for minor in [16, 27] {
        let err = runtime::apply_all(root, &v(minor)).unwrap_err();
        match err {
            ApplicationError::Version(VersionError::Unsupported { version }) => {
                assert_eq!(version, v(minor));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(read(root, runtime::PROC_GO), before);
}

#[test]
fn test_overlays_listed_in_gitignore_once() {
    let temp_dir = goroot(22);
    let root = temp_dir.path();
    write(root, ".gitignore", "*.log\n");

    let bundle = Bundle::builtin(&BundleKind::ALL, &v(22)).unwrap();
    bundle.apply_all(root, &v(22), &EmbeddedAssets).unwrap();
    bundle.apply_all(root, &v(22), &EmbeddedAssets).unwrap();

    let ignore = read(root, ".gitignore");
    assert!(ignore.starts_with("*.log\n"));
    assert_eq!(ignore.matches("/src/runtime/xgo_trap.go\n").count(), 1);
    assert_eq!(
        ignore
            .matches("/src/cmd/compile/internal/xgo_rewrite_internal/patch/target.go\n")
            .count(),
        1
    );
}

#[test]
fn test_no_gitignore_is_not_created() {
    let temp_dir = goroot(20);
    runtime::apply_all(temp_dir.path(), &v(20)).unwrap();
    assert!(!temp_dir.path().join(".gitignore").exists());
}
