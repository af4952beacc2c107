//! Runtime patches: goroutine side table, lifecycle callbacks, loose JSON.

use crate::bundle::{Bundle, BundleKind, BundleReport};
use crate::dispatch::{MinorRange, VersionTable};
use crate::overlay::{EmbeddedAssets, OverlayFile};
use crate::patch::{ApplicationError, FilePatch, Patch};
use crate::version::{GoVersion, VersionError};
use std::path::Path;

pub const RUNTIME2_GO: &str = "src/runtime/runtime2.go";
pub const PROC_GO: &str = "src/runtime/proc.go";
pub const JSON_ENCODE_GO: &str = "src/encoding/json/encode.go";
pub const TRAP_GO: &str = "src/runtime/xgo_trap.go";

/// `newproc` lost its argument-size parameter in go1.18.
fn newproc_decl() -> VersionTable<&'static str> {
    VersionTable::new("newproc declaration")
        .with(MinorRange::exactly(17), "func newproc(siz int32, fn *funcval) {")
        .with(MinorRange::from(18), "func newproc(fn *funcval) {")
}

/// The call that materializes the new g inside the system-stack closure.
/// From go1.23 it takes extra arguments, so only the stable prefix is used.
fn newproc1_call() -> VersionTable<&'static str> {
    VersionTable::new("newproc1 call")
        .with(MinorRange::exactly(17), "newg := newproc1(fn, argp, siz, gp, pc)")
        .with(MinorRange::from(18), "newg := newproc1(fn, gp, pc")
}

const G_FIELD: &str = "\t__xgo_g xgo_g";

const CAPTURE_PARENT: &str = "\t__xgo_parent := getg().m.curg
\tvar __xgo_newg *g";

const RECORD_NEWG: &str = "\t\t__xgo_newg = newg";

const ON_NEWPROC: &str = "\tif __xgo_newg != nil {
\t\tfor _, fn := range __xgo_on_gonewproc_callbacks {
\t\t\tfn(unsafe.Pointer(__xgo_parent), unsafe.Pointer(__xgo_newg))
\t\t}
\t}";

const ON_GOEXIT: &str = "\t__xgo_handle_goexit(getg())";

const INIT_FINISHED: &str = "\t__xgo_on_init_finished()";

const JSON_IMPORT: &str = "\t__xgo_runtime \"runtime\"";

const JSON_LOOSE_UNSUPPORTED: &str = "\tif __xgo_runtime.XgoLooseJSONMarshaling() {
\t\te.WriteString(`\"<unsupported: ` + v.Type().String() + `>\"`)
\t\treturn
\t}";

const JSON_LOOSE_CYCLE: &str = "\t\t\tif __xgo_runtime.XgoLooseJSONMarshaling() {
\t\t\t\te.WriteString(`\"<cycle>\"`)
\t\t\t\te.ptrLevel--
\t\t\t\treturn
\t\t\t}";

/// Build the runtime bundle for `version`.
pub fn bundle(version: &GoVersion) -> Result<Bundle, VersionError> {
    version.ensure_supported()?;
    let decl = *newproc_decl().select(version)?;
    let newproc1 = *newproc1_call().select(version)?;

    let runtime2 = FilePatch::new(RUNTIME2_GO)
        .with(Patch::after("xgo_g_field", ["type g struct {", "\n"]).content(G_FIELD));

    let proc = FilePatch::new(PROC_GO)
        // must run before systemstack switches to g0
        .with(Patch::before("xgo_capture_parent", [decl, "systemstack(func() {"]).content(CAPTURE_PARENT))
        .with(Patch::after("xgo_record_newg", [decl, newproc1, "\n"]).content(RECORD_NEWG))
        .with(Patch::after("xgo_on_newproc", [decl, newproc1, "})", "\n"]).content(ON_NEWPROC))
        .with(Patch::after("xgo_on_goexit", ["func goexit1() {", "\n"]).content(ON_GOEXIT))
        .with(
            Patch::after("xgo_init_finished", ["func main() {", "close(main_init_done)", "\n"])
                .content(INIT_FINISHED),
        );

    let json = FilePatch::new(JSON_ENCODE_GO)
        .with(Patch::after("xgo_json_import", ["package json", "import (", "\n"]).content(JSON_IMPORT))
        .with(
            Patch::after(
                "xgo_json_loose_unsupported",
                ["func unsupportedTypeEncoder(e *encodeState, v reflect.Value, _ encOpts) {", "\n"],
            )
            .content(JSON_LOOSE_UNSUPPORTED),
        )
        .with(
            Patch::after(
                "xgo_json_loose_cycle",
                [
                    "func (pe ptrEncoder) encode(e *encodeState, v reflect.Value, opts encOpts) {",
                    "if _, ok := e.ptrSeen[ptr]; ok {",
                    "\n",
                ],
            )
            .content(JSON_LOOSE_CYCLE),
        );

    Ok(Bundle::new(BundleKind::Runtime.name())
        .with_file(runtime2)
        .with_file(proc)
        .with_file(json)
        .with_overlay(OverlayFile::new(TRAP_GO, "runtime/xgo_trap.go")))
}

/// Apply the runtime bundle to the toolchain at `root`.
pub fn apply_all(root: &Path, version: &GoVersion) -> Result<BundleReport, ApplicationError> {
    bundle(version)?.apply_all(root, version, &EmbeddedAssets)
}
