//! Command line options shared by every tool that drives the import pipeline.
use std::time::Duration;

use clap::Args;

use crate::labels::{DEFAULT_PLATFORM_NAME, Platform};

/// Options for scanning a cluster and importing its workloads.
///
/// ```rust
/// use clap::Parser;
/// use workload_import::cli::ImportOptions;
///
/// #[derive(Parser)]
/// struct Opts {
///     #[command(flatten)]
///     import: ImportOptions,
/// }
///
/// let opts = Opts::parse_from(["importer", "--system-namespaces", "rbd-system,monitoring"]);
/// assert_eq!(opts.import.system_namespaces, ["rbd-system", "monitoring"]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Import Options")]
pub struct ImportOptions {
    /// The name of the platform, written into the ownership labels of imported objects.
    #[arg(long, env, default_value = DEFAULT_PLATFORM_NAME)]
    pub platform_name: String,

    /// Namespaces of the platform itself, never offered for import.
    #[arg(long, env, value_delimiter = ',', default_value = "rbd-system")]
    pub system_namespaces: Vec<String>,

    /// The field manager used for updates of live objects.
    #[arg(long, env, default_value = "workload-import")]
    pub field_manager: String,

    /// Deadline of a single Kubernetes API request, e.g. `30s` or `1m`.
    #[arg(long, env, default_value = "30s", value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,
}

impl ImportOptions {
    pub fn platform(&self) -> Platform {
        Platform::new(&self.platform_name)
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::*;

    #[derive(Debug, Parser)]
    struct Opts {
        #[command(flatten)]
        import: ImportOptions,
    }

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let opts = Opts::parse_from(["importer", "--request-timeout", "2m"]);

        assert_eq!(opts.import.platform(), Platform::default());
        assert_eq!(opts.import.system_namespaces, ["rbd-system"]);
        assert_eq!(opts.import.field_manager, "workload-import");
        assert_eq!(opts.import.request_timeout, Duration::from_secs(120));
    }
}
