//! The implementation of the `VALD_LOG` environment variable.
//!
//! When the `vald` feature is not enabled, the hooks compile to no-ops.

#[cfg(not(feature = "vald"))]
mod internals {
    pub(crate) fn log_abi<F: FnOnce() -> String>(_: F) {}
}

#[cfg(feature = "vald")]
mod internals {
    use std::{env, fs::File, io::Write, sync::LazyLock};

    static ABI_LOG: LazyLock<Option<String>> = LazyLock::new(|| env::var("VALD_LOG").ok());

    /// Log cursor-level events to stderr (`VALD_LOG=-`) or append them to a
    /// file, for debugging argument-passing mismatches.
    pub(crate) fn log_abi<F: FnOnce() -> String>(msg: F) {
        match ABI_LOG.as_ref().map(|x| x.as_str()) {
            Some("-") => eprintln!("valist: {}", msg()),
            Some(x) => {
                File::options()
                    .append(true)
                    .create(true)
                    .open(x)
                    .map(|mut f| writeln!(f, "valist: {}", msg()))
                    .ok();
            }
            None => (),
        }
    }
}

pub(crate) use internals::log_abi;
