//! Logical targets and their resolution onto connections.

use crate::config::cluster::{Auth, ClusterSpec};
use crate::connection::{Connection, Executor, Group};
use crate::errors::{ClusterizeError, Result};
use crate::transport::RemoteTransport;
use crate::types::{GroupMode, NodeAddress};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Where a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Target {
    #[default]
    Head,
    Workers,
    /// Workers followed by the head.
    Cluster,
}

impl Target {
    pub const ALL: [Target; 3] = [Self::Head, Self::Workers, Self::Cluster];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "HEAD",
            Self::Workers => "WORKERS",
            Self::Cluster => "CLUSTER",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Target::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("'{s}' not recognized (expected HEAD, WORKERS or CLUSTER)"))
    }
}

fn same_auth(a: &Auth, b: &Auth) -> bool {
    a.ssh_user == b.ssh_user
        && shellexpand::tilde(&a.ssh_private_key) == shellexpand::tilde(&b.ssh_private_key)
}

/// Maps targets onto connections for one cluster.
///
/// Nothing is contacted here; channels open on first execution.
pub struct TargetResolver<'a, T: RemoteTransport> {
    cluster: &'a ClusterSpec,
    transport: Arc<T>,
    mode: GroupMode,
}

impl<'a, T: RemoteTransport> TargetResolver<'a, T> {
    pub fn new(cluster: &'a ClusterSpec, transport: Arc<T>) -> Self {
        Self {
            cluster,
            transport,
            mode: GroupMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: GroupMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cluster(&self) -> &ClusterSpec {
        self.cluster
    }

    pub fn head_address(&self) -> Result<NodeAddress> {
        let head_ip = self.cluster.provider.head_ip.trim();
        if head_ip.is_empty() {
            return Err(ClusterizeError::config(format!(
                "cluster '{}' has no head_ip",
                self.cluster.cluster_name
            )));
        }
        let auth = self.cluster.head_auth();
        Ok(NodeAddress::new(head_ip, &auth.ssh_user, &auth.ssh_private_key))
    }

    pub fn worker_addresses(&self) -> Vec<NodeAddress> {
        let auth = self.cluster.worker_auth();
        self.cluster
            .provider
            .worker_ips
            .iter()
            .map(|ip| NodeAddress::new(ip.trim(), &auth.ssh_user, &auth.ssh_private_key))
            .collect()
    }

    /// Head and workers must authenticate identically to be merged.
    pub fn cluster_addresses(&self) -> Result<Vec<NodeAddress>> {
        let head_auth = self.cluster.head_auth();
        let worker_auth = self.cluster.worker_auth();
        if head_auth.ssh_user != worker_auth.ssh_user {
            return Err(ClusterizeError::credential_mismatch(format!(
                "head and workers user names do not match ('{}' vs '{}')",
                head_auth.ssh_user, worker_auth.ssh_user
            )));
        }
        if !same_auth(head_auth, worker_auth) {
            return Err(ClusterizeError::credential_mismatch(
                "head and workers ssh keys do not match",
            ));
        }

        let mut addresses = self.worker_addresses();
        addresses.push(self.head_address()?);
        Ok(addresses)
    }

    pub fn addresses(&self, target: Target) -> Result<Vec<NodeAddress>> {
        match target {
            Target::Head => Ok(vec![self.head_address()?]),
            Target::Workers => Ok(self.worker_addresses()),
            Target::Cluster => self.cluster_addresses(),
        }
    }

    pub fn head(&self) -> Result<Connection<T>> {
        Ok(Connection::new(self.head_address()?, Arc::clone(&self.transport)))
    }

    pub fn workers(&self) -> Group<T> {
        Group::new(self.worker_addresses(), Arc::clone(&self.transport), self.mode)
    }

    pub fn whole_cluster(&self) -> Result<Group<T>> {
        Ok(Group::new(
            self.cluster_addresses()?,
            Arc::clone(&self.transport),
            self.mode,
        ))
    }

    pub fn resolve(&self, target: Target) -> Result<Executor<T>> {
        match target {
            Target::Head => self.head().map(Executor::Single),
            Target::Workers => Ok(Executor::Group(self.workers())),
            Target::Cluster => self.whole_cluster().map(Executor::Group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConfigIssue;
    use crate::mock::MockTransport;

    fn cluster() -> ClusterSpec {
        ClusterSpec::from_yaml(
            r#"
cluster_name: exp
auth:
  ssh_user: ops
  ssh_private_key: /nonexistent/key
provider:
  head_ip: 10.0.0.1
  worker_ips: [10.0.0.2, 10.0.0.3]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_target_from_str() {
        assert_eq!("HEAD".parse::<Target>(), Ok(Target::Head));
        assert_eq!("workers".parse::<Target>(), Ok(Target::Workers));
        assert_eq!(" Cluster ".parse::<Target>(), Ok(Target::Cluster));
        assert!("ALL".parse::<Target>().is_err());
        assert_eq!(Target::Cluster.to_string(), "CLUSTER");
    }

    #[test]
    fn test_cluster_is_workers_then_head() {
        let spec = cluster();
        let resolver = TargetResolver::new(&spec, Arc::new(MockTransport::new()));
        let hosts: Vec<_> = resolver
            .addresses(Target::Cluster)
            .unwrap()
            .into_iter()
            .map(|a| a.host)
            .collect();
        assert_eq!(hosts, vec!["10.0.0.2", "10.0.0.3", "10.0.0.1"]);
    }

    #[test]
    fn test_cluster_with_mismatched_user_fails() {
        let mut spec = cluster();
        spec.worker_auth = Some(Auth {
            ssh_user: "root".to_string(),
            ssh_private_key: "/nonexistent/key".to_string(),
        });
        let resolver = TargetResolver::new(&spec, Arc::new(MockTransport::new()));
        match resolver.resolve(Target::Cluster) {
            Err(ClusterizeError::Configuration { issue, .. }) => {
                assert_eq!(issue, ConfigIssue::CredentialMismatch)
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("expected credential mismatch"),
        }
        // Head and workers alone still resolve
        assert!(resolver.resolve(Target::Head).is_ok());
        assert!(resolver.resolve(Target::Workers).is_ok());
    }

    #[test]
    fn test_cluster_with_mismatched_key_fails() {
        let mut spec = cluster();
        spec.head_auth = Some(Auth {
            ssh_user: "ops".to_string(),
            ssh_private_key: "/other/key".to_string(),
        });
        let resolver = TargetResolver::new(&spec, Arc::new(MockTransport::new()));
        let err = resolver.addresses(Target::Cluster).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_cluster_group_deduplicates_head_listed_as_worker() {
        let mut spec = cluster();
        spec.provider.worker_ips.push("10.0.0.1".to_string());
        let resolver = TargetResolver::new(&spec, Arc::new(MockTransport::new()));
        let group = resolver.whole_cluster().unwrap();
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn test_missing_head_ip_is_configuration_error() {
        let mut spec = cluster();
        spec.provider.head_ip.clear();
        let resolver = TargetResolver::new(&spec, Arc::new(MockTransport::new()));
        assert!(resolver.head().is_err());
    }

    #[test]
    fn test_resolution_contacts_nothing() {
        let spec = cluster();
        let mock = Arc::new(MockTransport::new());
        let resolver = TargetResolver::new(&spec, Arc::clone(&mock)).with_mode(GroupMode::Sequential);
        let executor = resolver.resolve(Target::Cluster).unwrap();
        assert_eq!(executor.addresses().len(), 3);
        assert!(mock.connects().is_empty());
    }
}
