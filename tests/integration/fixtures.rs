//! Synthetic toolchain trees: just enough of each upstream file for the
//! built-in anchors, shaped the way the given release lays them out.

use goroot_patcher::bundle::{compiler, runtime};
use goroot_patcher::GoVersion;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub fn v(minor: u32) -> GoVersion {
    GoVersion::new(1, minor, 0)
}

const RUNTIME2: &str = "package runtime

type g struct {
\tstack       stack
\tstackguard0 uintptr
\tgoid        uint64
}
";

const NEWPROC_117: &str = "func newproc(siz int32, fn *funcval) {
\targp := add(unsafe.Pointer(&fn), sys.PtrSize)
\tgp := getg()
\tpc := getcallerpc()
\tsystemstack(func() {
\t\tnewg := newproc1(fn, argp, siz, gp, pc)

\t\t_p_ := getg().m.p.ptr()
\t\trunqput(_p_, newg, true)

\t\tif mainStarted {
\t\t\twakep()
\t\t}
\t})
}
";

const NEWPROC_118: &str = "func newproc(fn *funcval) {
\tgp := getg()
\tpc := getcallerpc()
\tsystemstack(func() {
\t\tnewg := newproc1(fn, gp, pc)

\t\tpp := getg().m.p.ptr()
\t\trunqput(pp, newg, true)

\t\tif mainStarted {
\t\t\twakep()
\t\t}
\t})
}
";

const NEWPROC_123: &str = "func newproc(fn *funcval) {
\tgp := getg()
\tpc := sys.GetCallerPC()
\tsystemstack(func() {
\t\tnewg := newproc1(fn, gp, pc, false, waitReasonZero)

\t\tpp := getg().m.p.ptr()
\t\trunqput(pp, newg, true)

\t\tif mainStarted {
\t\t\twakep()
\t\t}
\t})
}
";

fn proc_go(minor: u32) -> String {
    let newproc = match minor {
        17 => NEWPROC_117,
        18..=22 => NEWPROC_118,
        _ => NEWPROC_123,
    };
    format!(
        "package runtime

func main() {{
\tmp := getg().m
\tdoInit(&runtime_inittask)
\tclose(main_init_done)

\tfn := main_main
\tfn()
}}

{newproc}
func goexit1() {{
\tif raceenabled {{
\t\tracegoend()
\t}}
\tmcall(goexit0)
}}
"
    )
}

const ENCODE: &str = "package json

import (
\t\"bytes\"
\t\"reflect\"
)

func unsupportedTypeEncoder(e *encodeState, v reflect.Value, _ encOpts) {
\te.error(&UnsupportedTypeError{v.Type()})
}

func (pe ptrEncoder) encode(e *encodeState, v reflect.Value, opts encOpts) {
\tif v.IsNil() {
\t\te.WriteString(\"null\")
\t\treturn
\t}
\tif e.ptrLevel++; e.ptrLevel > startDetectingCyclesAfter {
\t\tptr := v.Interface()
\t\tif _, ok := e.ptrSeen[ptr]; ok {
\t\t\te.error(&UnsupportedValueError{v, \"encountered a cycle\"})
\t\t}
\t\te.ptrSeen[ptr] = struct{}{}
\t\tdefer delete(e.ptrSeen, ptr)
\t}
\tpe.elemEnc(e, v.Elem(), opts)
\te.ptrLevel--
}
";

const INLINE_117: &str = "\t// Inlining
\tbase.Timer.Start(\"fe\", \"inlining\")
\tif base.Flag.LowerL != 0 {
\t\tinline.InlinePackage()
\t}
";

const INLINE_122: &str = "\t// Interleaved devirtualization and inlining.
\tbase.Timer.Start(\"fe\", \"devirtualize-and-inline\")
\tinterleaved.DevirtualizeAndInlinePackage(typecheck.Target, profile)
";

fn gc_main_go(minor: u32) -> String {
    let inline = if minor >= 22 { INLINE_122 } else { INLINE_117 };
    format!(
        "package gc

import (
\t\"cmd/compile/internal/base\"
\t\"cmd/compile/internal/noder\"
)

func Main(archInit func(*ssagen.ArchInfo)) {{
\tnoder.LoadPackage(flag.Args())

{inline}
\tbase.Timer.Start(\"be\", \"compilefuncs\")
\tcompileFunctions()
}}
"
    )
}

const NODER: &str = "package noder

import (
\t\"cmd/compile/internal/syntax\"
)

func LoadPackage(filenames []string) {
\tnoders := make([]*noder, len(filenames))

\tvar lines uint
\tfor _, p := range noders {
\t\tlines += p.file.EOF.Line()
\t}
\tbase.Timer.AddEvent(int64(lines), \"lines\")

\tunified(noders)
}
";

const IRGEN: &str = "package noder

import (
\t\"cmd/compile/internal/types2\"
)

func (g *irgen) generate(noders []*noder) {
\tg.exportTypes()
\tg.stencil()
\tg.finalizeSyms()
}
";

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

/// A toolchain tree for go1.`minor`. `irgen.go` only exists where the
/// release still ships it.
pub fn goroot(minor: u32) -> TempDir {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();

    write(root, "VERSION", &format!("go1.{minor}.3\ntime 2024-01-01T00:00:00Z\n"));
    write(root, runtime::RUNTIME2_GO, RUNTIME2);
    write(root, runtime::PROC_GO, &proc_go(minor));
    write(root, runtime::JSON_ENCODE_GO, ENCODE);
    write(root, compiler::GC_MAIN_GO, &gc_main_go(minor));
    write(root, compiler::NODER_GO, NODER);
    if (18..=21).contains(&minor) {
        write(root, compiler::IRGEN_GO, IRGEN);
    }

    temp_dir
}
