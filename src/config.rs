//! Command-line configuration, a `structopt`-derived struct with one
//! positional argument and one repeatable flag.

use std::path::PathBuf;
use structopt::StructOpt;

use crate::log;

/// `tracehound <executable-path> [-v]...`
#[derive(Debug, StructOpt)]
#[structopt(name = "tracehound", about = "A minimal ptrace-based debugger core")]
pub struct Config {
    /// Path to the executable to trace.
    #[structopt(name = "executable-path", parse(from_os_str))]
    pub executable_path: PathBuf,

    /// Increase logging verbosity; repeat for more detail (-v, -vv, -vvv, ...).
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

impl Config {
    /// Apply `--verbose` on top of whatever `TRACEHOUND_LOG` already set.
    /// Each `-v` raises the threshold by one level; it never lowers it
    /// below what the environment already requested.
    pub fn apply_logging(&self) {
        log::init_from_env();
        for _ in 0..self.verbose {
            log::raise_level();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_and_repeated_verbose_flags() {
        let cfg = Config::from_iter(&["tracehound", "/bin/true", "-vv"]);
        assert_eq!(cfg.executable_path, PathBuf::from("/bin/true"));
        assert_eq!(cfg.verbose, 2);
    }

    #[test]
    fn verbose_defaults_to_zero() {
        let cfg = Config::from_iter(&["tracehound", "/bin/true"]);
        assert_eq!(cfg.verbose, 0);
    }
}
