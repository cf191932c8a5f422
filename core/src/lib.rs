//! Core functionality for castoff
//!
//! Launches a child process that outlives its parent: the child runs under a
//! fixed uid/gid with supplementary groups cleared, starts in a given
//! directory with the caller's environment and standard streams, and leads
//! its own session. Once released, the launcher forgets it entirely.
//!
//! ```rust,no_run
//! use castoff_core::{config::LaunchConfig, process::ProcessLauncher};
//! use std::fs::File;
//! use std::os::fd::AsFd;
//!
//! let (read, write) = (File::open("/dev/null")?, File::create("/tmp/worker.log")?);
//! let config = LaunchConfig::for_current_user("/");
//! let mut launcher =
//!     ProcessLauncher::from_config(&config, read.as_fd(), write.as_fd(), write.as_fd());
//!
//! launcher.exec(true, "/usr/bin/sleep", &["/usr/bin/sleep", "60"])?;
//! println!("Run `ps axjf | grep sleep` to see the process running");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[cfg(unix)]
pub mod config;
pub mod error;
#[cfg(unix)]
pub mod process;


pub use error::{CoreError, Result};
#[cfg(unix)]
pub use process::{Credential, Identity, ProcessLauncher};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    ///
    /// `RUST_LOG` takes precedence over `level` when set.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_only_once() {
        assert!(utils::init_tracing("debug").is_ok());

        let err = utils::init_tracing("debug").unwrap_err();
        assert!(matches!(err, CoreError::InitializationError(_)));
    }
}
