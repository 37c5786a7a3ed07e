//! Imports unmanaged Kubernetes workloads into the platform inventory.
//!
//! The pipeline runs in three caller-driven steps:
//!
//! 1. [`scanner::scan_namespace`] lists every supported kind in a namespace and groups the object
//!    names by application label. Volumes of workloads are followed to pick up ConfigMaps, Secrets
//!    and PersistentVolumeClaims that carry no label of their own.
//! 2. [`normalize::convert_resources`] turns each workload into a [`model::ConvertResource`] and
//!    snapshots the remaining objects as manifests.
//! 3. [`import::ImportCoordinator::import_resources`] writes tenants, applications, components and
//!    their child records in one inventory transaction and labels the live objects.
//!
//! Cluster access goes through the [`cluster::Cluster`] trait and inventory access through the
//! repository traits in [`inventory`], so every step can run against the in-memory
//! implementations ([`cluster::memory::MemoryCluster`], [`inventory::memory::MemoryInventory`]).

pub mod association;
pub mod cli;
pub mod cluster;
pub mod import;
pub mod inventory;
pub mod kind;
pub mod labels;
pub mod logging;
pub mod manifest;
pub mod model;
pub mod normalize;
pub mod quantity;
pub mod scanner;
pub mod yaml;

// External re-exports
pub use k8s_openapi;
pub use kube;
