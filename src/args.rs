use duration_string::DurationString;
use gumdrop::Options;

/// Mirror subdirectories of remote repositories into a local project and
/// run commands on changes.
#[derive(Debug, Options)]
pub struct Args {
    /// The workspace directory to sync into (defaults to the current directory).
    #[options(free)]
    pub directory: Option<String>,

    /// The configuration file (defaults to stacksync.json in the workspace).
    #[options()]
    pub config: Option<String>,

    /// Sync a single repository by name and exit.
    #[options(no_short)]
    pub repo: Option<String>,

    /// Sync every repository once and exit. Useful for cronjobs.
    #[options()]
    pub once: bool,

    /// Only check for changes, don't copy any files.
    #[options(no_short)]
    pub check: bool,

    /// Override every enabled auto-sync interval.
    ///
    /// Can be a number postfixed with s(econd), m(inutes), h(ours), d(ays)
    #[options(long = "every", no_short)]
    pub every: Option<DurationString>,

    /// Enable auto-sync for a repository and exit.
    #[options(no_short)]
    pub enable_auto_sync: Option<String>,

    /// Disable auto-sync for a repository and exit.
    #[options(no_short)]
    pub disable_auto_sync: Option<String>,

    /// Only print errors.
    #[options()]
    pub quiet: bool,

    /// Increase verbosity, can be set multiple times (-v debug, -vv tracing)
    #[options(count)]
    pub verbose: u8,

    /// Print the current version.
    #[options(short = "V")]
    pub version: bool,

    /// Print this help.
    #[options()]
    pub help: bool,
}

pub fn parse_args() -> Args {
    Args::parse_args_default_or_exit()
}
