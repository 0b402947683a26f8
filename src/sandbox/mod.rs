// src/sandbox/mod.rs

//! Deterministic process environment for stage commands
//!
//! Every external process a stage runs gets the same environment on every
//! invocation: the inherited environment is discarded and replaced by a
//! fixed search path (the target's DevTree first, then the base system),
//! the C locale, UTC, a fixed hashing seed, a fixed source date and the
//! standard linker/preprocessor flags pointing into the DevTree. The file
//! creation mask is fixed at [`UMASK`] by the process runner.

mod process;

pub use process::{ProcessExit, ProcessOutput, ProcessRunner};

use crate::archive::BASE_TIME;
use crate::error::{Error, Result};
use nix::sys::signal::{self, SigHandler, Signal};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// System directories searched after the DevTree's bin directory
pub const BASE_SEARCH_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// File creation mask applied to every child process
pub const UMASK: u32 = 0o022;

/// Environment handed to every process a stage runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxEnv {
    vars: BTreeMap<String, String>,
}

impl SandboxEnv {
    /// Build the environment for a target whose DevTree view is `devtree`
    pub fn new(devtree: &Path, build_triple: &str, host_triple: &str) -> Self {
        let devtree = devtree.display().to_string();
        let mut vars = BTreeMap::new();

        vars.insert(
            "PATH".to_string(),
            format!("{}/{}/bin:{}", devtree, host_triple, BASE_SEARCH_PATH),
        );
        vars.insert("LANG".to_string(), "C".to_string());
        vars.insert("LC_ALL".to_string(), "C".to_string());
        vars.insert("TZ".to_string(), "UTC".to_string());
        vars.insert("PYTHONHASHSEED".to_string(), "0".to_string());
        vars.insert("SOURCE_DATE_EPOCH".to_string(), BASE_TIME.to_string());
        vars.insert(
            "LDFLAGS".to_string(),
            standard_ldflags(build_triple, host_triple, &devtree),
        );
        vars.insert(
            "CPPFLAGS".to_string(),
            standard_cppflags(host_triple, &devtree),
        );

        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Copy of this environment with rule-supplied variables layered on top
    pub fn with_overrides(&self, overrides: &BTreeMap<String, String>) -> Self {
        let mut vars = self.vars.clone();
        for (key, value) in overrides {
            vars.insert(key.clone(), value.clone());
        }
        Self { vars }
    }
}

/// Linker flags that keep the linker away from uncontrolled system paths
///
/// On darwin the linker is told to search each `-L` directory for both
/// static and dynamic libraries before moving on, and to skip the default
/// search paths; linux-gnu needs no extra flags.
pub fn standard_ldflags(build_triple: &str, host_triple: &str, devtree: &str) -> String {
    let base = if build_triple.ends_with("-darwin") {
        "-Wl,-Z -Wl,-search_paths_first"
    } else {
        ""
    };
    format!("{} -L{}/{}/lib", base, devtree, host_triple)
}

pub fn standard_cppflags(host_triple: &str, devtree: &str) -> String {
    format!("-I{}/include -I{}/{}/include", devtree, devtree, host_triple)
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_interrupt(_: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the process-wide interrupt flag
///
/// Children run in their own process group, so the terminal's SIGINT only
/// reaches xyz; running stages observe the flag through their
/// [`CancelToken`] and forward the termination to their child.
pub fn install_interrupt_handler() -> Result<()> {
    let handler = SigHandler::Handler(handle_interrupt);
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic.
        unsafe { signal::signal(sig, handler) }
            .map_err(|e| Error::Config(format!("failed to install {} handler: {}", sig, e)))?;
    }
    debug!("Interrupt handler installed");
    Ok(())
}

/// Cooperative cancellation shared by the scheduler and running stages
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    follow_signals: bool,
}

impl CancelToken {
    /// A token cancelled only through [`CancelToken::cancel`]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is also cancelled by SIGINT/SIGTERM
    pub fn from_signals() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            follow_signals: true,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || (self.follow_signals && INTERRUPTED.load(Ordering::SeqCst))
    }
}
