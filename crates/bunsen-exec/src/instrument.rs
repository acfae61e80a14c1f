//! Plot-capture instrumentation injected ahead of executed code
//!
//! The executed code runs in a separate process, so plotting calls cannot be
//! patched from this address space. Instead a Python prelude is prepended to
//! the user code: it intercepts `plt.savefig` (redirecting relative targets
//! into the execution's artifact directory) and `plt.show` (turning displays
//! into implicit saves), then prints every captured path in a delimited
//! marker section at interpreter exit. The executor parses that section back
//! out of stdout.

use std::path::Path;

/// Delimiter line separating program output from captured artifact paths.
pub const ARTIFACT_MARKER: &str = "--- GENERATED PLOTS ---";

const PRELUDE_TEMPLATE: &str = r#"
import os as _bunsen_os
import atexit as _bunsen_atexit

_bunsen_plot_dir = r"__BUNSEN_PLOT_DIR__"
_bunsen_saved = []

try:
    import matplotlib
    matplotlib.use("Agg")
    import matplotlib.pyplot as _bunsen_plt

    _bunsen_orig_savefig = _bunsen_plt.savefig

    def _bunsen_savefig(*args, **kwargs):
        target = None
        if args and isinstance(args[0], str):
            target = args[0]
        elif isinstance(kwargs.get("fname"), str):
            target = kwargs["fname"]
        if target is not None and not _bunsen_os.path.isabs(target):
            target = _bunsen_os.path.join(_bunsen_plot_dir, _bunsen_os.path.basename(target))
            if args:
                args = (target,) + args[1:]
            else:
                kwargs["fname"] = target
        result = _bunsen_orig_savefig(*args, **kwargs)
        if target is not None:
            _bunsen_saved.append(target)
        return result

    _bunsen_plt.savefig = _bunsen_savefig

    def _bunsen_show(*args, **kwargs):
        for num in _bunsen_plt.get_fignums():
            fig = _bunsen_plt.figure(num)
            filename = _bunsen_os.path.join(
                _bunsen_plot_dir, "figure_%d.png" % len(_bunsen_saved)
            )
            fig.savefig(filename)
            _bunsen_saved.append(filename)
        return None

    _bunsen_plt.show = _bunsen_show
except ImportError:
    pass


def _bunsen_report():
    if _bunsen_saved:
        print("\n__BUNSEN_MARKER__")
        for f in _bunsen_saved:
            print(f)


_bunsen_atexit.register(_bunsen_report)
"#;

/// Build the full source for one execution: instrumentation prelude
/// targeting `plot_dir`, followed by the user code.
pub fn instrumented_source(code: &str, plot_dir: &Path) -> String {
    let prelude = PRELUDE_TEMPLATE
        .replace("__BUNSEN_PLOT_DIR__", &plot_dir.display().to_string())
        .replace("__BUNSEN_MARKER__", ARTIFACT_MARKER);
    format!("{}\n\n{}", prelude, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_targets_plot_dir() {
        let src = instrumented_source("print('hi')", Path::new("/tmp/plots/abc123"));
        assert!(src.contains("/tmp/plots/abc123"));
        assert!(src.contains(ARTIFACT_MARKER));
        assert!(src.ends_with("print('hi')"));
    }

    #[test]
    fn test_prelude_survives_missing_matplotlib() {
        // The import is guarded so plain scripts run in bare environments.
        let src = instrumented_source("x = 1", Path::new("p"));
        assert!(src.contains("except ImportError"));
    }

    #[test]
    fn test_no_template_placeholders_left() {
        let src = instrumented_source("", Path::new("plots/e1"));
        assert!(!src.contains("__BUNSEN_PLOT_DIR__"));
        assert!(!src.contains("__BUNSEN_MARKER__"));
    }
}
