use clz_common::config::DockerSpec;
use clz_common::{ClusterSpec, NodeAddress};

pub fn node(host: &str) -> NodeAddress {
    NodeAddress::unresolved(host, "ops")
}

/// Head 10.0.0.1, workers 10.0.0.2 and 10.0.0.3, no docker.
pub fn cluster_spec() -> ClusterSpec {
    crate::test_log!("FIXTURE: plain three-node cluster");
    ClusterSpec::from_yaml(
        r#"
cluster_name: exp
auth:
  ssh_user: ops
  ssh_private_key: /nonexistent/key
provider:
  head_ip: 10.0.0.1
  worker_ips: [10.0.0.2, 10.0.0.3]
setup_commands:
  - echo setup
head_setup_commands:
  - pip install ray
worker_setup_commands: []
head_start_ray_commands:
  - ray start --head
worker_start_ray_commands:
  - ray start --address=$RAY_HEAD_IP:6379
"#,
    )
    .expect("fixture cluster must parse")
}

pub fn docker_cluster_spec() -> ClusterSpec {
    crate::test_log!("FIXTURE: dockerized three-node cluster");
    let mut spec = cluster_spec();
    spec.docker = Some(DockerSpec {
        image: "ubuntu:20.04".to_string(),
        ..DockerSpec::default()
    });
    spec
}
