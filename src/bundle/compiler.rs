//! Compiler patches: trap weaving, placeholder linkage, inlining override.
//!
//! The compiler gains three calls into the overlaid `xgo_rewrite_internal`
//! packages:
//!
//! - `AfterFilesParsed` right after the syntax trees exist, weaving a trap
//!   prologue into every selected function and registering every selected
//!   package-level variable through `__xgo_trap_N` / `__xgo_var_N`
//!   placeholders and `__xgo_init_N` functions
//! - `Patch` after the package is loaded, pinning woven functions as not
//!   inlinable
//! - `Link` before back-end compilation, resolving placeholders to the runtime
//!   entry points
//!
//! Inlining is switched off when anything was rewritten, so a trapped call
//! site is never folded into its caller.

use crate::bundle::{Bundle, BundleKind, BundleReport};
use crate::dispatch::{MinorRange, VersionPredicate, VersionTable};
use crate::overlay::{EmbeddedAssets, OverlayFile};
use crate::patch::{ApplicationError, FilePatch, Patch};
use crate::version::{GoVersion, VersionError};
use std::path::Path;

pub const GC_MAIN_GO: &str = "src/cmd/compile/internal/gc/main.go";
pub const NODER_GO: &str = "src/cmd/compile/internal/noder/noder.go";
pub const IRGEN_GO: &str = "src/cmd/compile/internal/noder/irgen.go";

const INTERNAL: &str = "src/cmd/compile/internal/xgo_rewrite_internal";

/// Releases whose generics need traps before instantiation.
pub const GENERIC_PREINSTANTIATION: MinorRange = MinorRange::between(18, 19);

/// Where the inliner runs and what to anchor the override before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineSite {
    pub phase: &'static str,
    pub call: &'static str,
}

fn inline_site() -> VersionTable<InlineSite> {
    VersionTable::new("inlining phase")
        .with(
            MinorRange::between(17, 21),
            InlineSite {
                phase: "base.Timer.Start(\"fe\", \"inlining\")",
                call: "if base.Flag.LowerL != 0 {",
            },
        )
        .with(
            MinorRange::from(22),
            InlineSite {
                phase: "base.Timer.Start(\"fe\", \"devirtualize-and-inline\")",
                call: "interleaved.DevirtualizeAndInlinePackage(",
            },
        )
}

/// Function-list layout of `typecheck.Target`, selecting the walker asset.
fn target_walker() -> VersionTable<&'static str> {
    VersionTable::new("typecheck target layout")
        .with(MinorRange::between(17, 21), "compiler/patch/target_decls.go")
        .with(MinorRange::from(22), "compiler/patch/target_funcs.go")
}

const MAIN_IMPORTS: &str = "\txgo_patch \"cmd/compile/internal/xgo_rewrite_internal/patch\"
\txgo_record \"cmd/compile/internal/xgo_rewrite_internal/record\"";

const MAIN_PATCH: &str = "\tif xgo_patch.Enabled() {
\t\txgo_patch.Patch()
\t}";

const MAIN_NO_INLINE: &str = "\tif xgo_record.HasRewritten() {
\t\tbase.Flag.LowerL = 0
\t}";

const MAIN_LINK: &str = "\txgo_patch.Link()";

const NODER_IMPORTS: &str = "\txgo_syntax \"cmd/compile/internal/xgo_rewrite_internal/syntax\"";

const NODER_AFTER_PARSE: &str =
    "\txgo_syntax.AfterFilesParsed(len(noders), func(i int) *syntax.File { return noders[i].file })";

const IRGEN_IMPORTS: &str = "\txgo_patch \"cmd/compile/internal/xgo_rewrite_internal/patch\"";

const IRGEN_GENERICS: &str = "xgo_patch.TrapGenericsBeforeInstantiation()";

/// Build the compiler bundle for `version`.
pub fn bundle(version: &GoVersion) -> Result<Bundle, VersionError> {
    version.ensure_supported()?;
    let inline = *inline_site().select(version)?;
    let walker = *target_walker().select(version)?;

    let main = FilePatch::new(GC_MAIN_GO)
        .with(Patch::after("xgo_imports", ["package gc", "import (", "\n"]).content(MAIN_IMPORTS))
        .with(
            Patch::after("xgo_patch", ["func Main(", "noder.LoadPackage(flag.Args())", "\n"])
                .content(MAIN_PATCH),
        )
        .with(Patch::before("xgo_no_inline", ["func Main(", inline.phase, inline.call]).content(MAIN_NO_INLINE))
        .with(
            Patch::before("xgo_link", ["func Main(", "base.Timer.Start(\"be\", \"compilefuncs\")"])
                .content(MAIN_LINK),
        );

    let noder = FilePatch::new(NODER_GO)
        .with(Patch::after("xgo_imports", ["package noder", "import (", "\n"]).content(NODER_IMPORTS))
        .with(
            Patch::after(
                "xgo_after_files_parsed",
                [
                    "func LoadPackage(filenames []string) {",
                    "base.Timer.AddEvent(int64(lines), \"lines\")",
                    "\n",
                ],
            )
            .content(NODER_AFTER_PARSE),
        );

    let generics = VersionPredicate::Minors(GENERIC_PREINSTANTIATION);
    let irgen = FilePatch::new(IRGEN_GO)
        .with(
            Patch::after("xgo_imports", ["package noder", "import (", "\n"])
                .content(IRGEN_IMPORTS)
                .when(generics.clone()),
        )
        .with(
            Patch::before("xgo_generic_trap", ["func (g *irgen) generate(noders []*noder) {", "g.stencil()"])
                .content(IRGEN_GENERICS)
                .when(generics.clone()),
        );

    let overlay = |name: &str| OverlayFile::new(format!("{INTERNAL}/{name}"), format!("compiler/{name}"));

    Ok(Bundle::new(BundleKind::Compiler.name())
        .with_file(main)
        .with_file(noder)
        .with_file(irgen)
        .with_overlay(overlay("record/record.go"))
        .with_overlay(overlay("syntax/syntax.go"))
        .with_overlay(overlay("syntax/options.go"))
        .with_overlay(overlay("patch/patch.go"))
        .with_overlay(OverlayFile::new(format!("{INTERNAL}/patch/target.go"), walker))
        .with_overlay(overlay("patch/generic.go").when(generics)))
}

/// Apply the compiler bundle to the toolchain at `root`.
pub fn apply_all(root: &Path, version: &GoVersion) -> Result<BundleReport, ApplicationError> {
    bundle(version)?.apply_all(root, version, &EmbeddedAssets)
}
