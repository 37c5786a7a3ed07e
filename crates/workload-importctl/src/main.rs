use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use snafu::{ResultExt, Snafu, ensure};
use workload_import::{
    cli::ImportOptions,
    cluster::{Client, Cluster, MemoryCluster, memory::LoadError},
    import::{self, ImportCoordinator},
    inventory::memory::MemoryInventory,
    kube,
    labels::Platform,
    logging,
    model::{LabelResources, ScanFilter},
    normalize, scanner, yaml,
};

const APP_NAME: &str = "workload-importctl";
const LOG_ENV: &str = "WORKLOAD_IMPORTCTL_LOG";

/// Namespace of documents in a manifest file that do not name one.
const DEFAULT_FILE_NAMESPACE: &str = "default";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to read manifests from {path:?}"))]
    ReadManifests {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to load manifests from {path:?}"))]
    LoadManifests { source: LoadError, path: PathBuf },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to list namespaces"))]
    ListNamespaces { source: scanner::Error },

    #[snafu(display("failed to scan namespace {namespace:?}"))]
    Scan {
        source: scanner::Error,
        namespace: String,
    },

    #[snafu(display("failed to convert resources of namespace {namespace:?}"))]
    Convert {
        source: normalize::Error,
        namespace: String,
    },

    #[snafu(display("failed to import resources of namespace {namespace:?}"))]
    Import {
        source: import::Error,
        namespace: String,
    },

    #[snafu(display("failed to render output"))]
    Render { source: yaml::Error },

    #[snafu(display(
        "importing from a live cluster needs a persistent inventory, use --from-file instead"
    ))]
    LiveImport,
}

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version, about)]
struct Opts {
    /// Read objects from a multi-document YAML file instead of a live cluster.
    #[arg(long, global = true, value_name = "FILE")]
    from_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    import: ImportOptions,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// List the namespaces that can be imported.
    Namespaces {
        #[arg(long, value_enum, default_value_t = ScanFilter::Unmanaged)]
        filter: ScanFilter,
    },

    /// Group the objects of a namespace by application.
    Scan {
        namespace: String,

        #[arg(long, value_enum, default_value_t = ScanFilter::Unmanaged)]
        filter: ScanFilter,
    },

    /// Scan a namespace and convert its workloads into components.
    Convert {
        namespace: String,

        #[arg(long, value_enum, default_value_t = ScanFilter::Unmanaged)]
        filter: ScanFilter,
    },

    /// Scan, convert and import a namespace read with --from-file.
    ///
    /// The inventory is kept in memory, the output shows the rows that were written.
    Import {
        namespace: String,

        /// The external entity that owns the tenant.
        #[arg(long)]
        entity_id: String,

        #[arg(long, value_enum, default_value_t = ScanFilter::Unmanaged)]
        filter: ScanFilter,
    },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME).context(InitializeLoggingSnafu)?;
    ensure_persistent_import(opts.from_file.as_deref(), &opts.command)?;

    let output = match &opts.from_file {
        Some(path) => {
            let cluster = load_cluster(path).await?;
            run(cluster, &opts.import, opts.command).await?
        }
        None => {
            let cluster = Client::try_default(
                Some(opts.import.field_manager.clone()),
                opts.import.request_timeout,
            )
            .await
            .context(CreateClientSnafu)?;
            run(cluster, &opts.import, opts.command).await?
        }
    };

    print!("{output}");
    Ok(())
}

/// Refuses imports that would label live objects without keeping the written rows.
fn ensure_persistent_import(from_file: Option<&Path>, command: &Command) -> Result<(), Error> {
    ensure!(
        from_file.is_some() || !matches!(command, Command::Import { .. }),
        LiveImportSnafu
    );
    Ok(())
}

async fn load_cluster(path: &Path) -> Result<MemoryCluster, Error> {
    let manifests = tokio::fs::read_to_string(path)
        .await
        .context(ReadManifestsSnafu { path })?;
    let cluster = MemoryCluster::new();
    let loaded = cluster
        .load_manifests(&manifests, DEFAULT_FILE_NAMESPACE)
        .context(LoadManifestsSnafu { path })?;
    tracing::info!(path = %path.display(), objects = loaded, "loaded manifests");
    Ok(cluster)
}

/// Runs `command` and returns its YAML output.
async fn run<C: Cluster>(
    cluster: C,
    options: &ImportOptions,
    command: Command,
) -> Result<String, Error> {
    let platform = options.platform();

    match command {
        Command::Namespaces { filter } => {
            let namespaces =
                scanner::list_namespaces(&cluster, &platform, filter, &options.system_namespaces)
                    .await
                    .context(ListNamespacesSnafu)?;
            render(&namespaces)
        }
        Command::Scan { namespace, filter } => {
            render(&scan(&cluster, &platform, filter, &namespace).await?)
        }
        Command::Convert { namespace, filter } => {
            let labels = scan(&cluster, &platform, filter, &namespace).await?;
            let applications = normalize::convert_resources(&cluster, &namespace, &labels)
                .await
                .context(ConvertSnafu {
                    namespace: &namespace,
                })?;
            render(&applications)
        }
        Command::Import {
            namespace,
            entity_id,
            filter,
        } => {
            let labels = scan(&cluster, &platform, filter, &namespace).await?;
            let applications = normalize::convert_resources(&cluster, &namespace, &labels)
                .await
                .context(ConvertSnafu {
                    namespace: &namespace,
                })?;

            let coordinator = ImportCoordinator::new(cluster, MemoryInventory::new(), platform);
            let imported = coordinator
                .import_resources(&namespace, &applications, &entity_id)
                .await
                .context(ImportSnafu {
                    namespace: &namespace,
                })?;
            render(&imported)
        }
    }
}

async fn scan<C: Cluster>(
    cluster: &C,
    platform: &Platform,
    filter: ScanFilter,
    namespace: &str,
) -> Result<LabelResources, Error> {
    scanner::scan_namespace(cluster, platform, filter, namespace)
        .await
        .context(ScanSnafu { namespace })
}

fn render<T: Serialize>(value: &T) -> Result<String, Error> {
    yaml::to_yaml_string(value).context(RenderSnafu)
}
