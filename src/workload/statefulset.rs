//! StatefulSet holding the primary and the replica

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, ExecAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::{namespace_of, object_labels, owner_reference, selector_labels};
use crate::crd::RedisHA;
use crate::{Error, REDIS_PORT, REPLICA_COUNT};

/// Ordinal of the member that serves writes
pub const PRIMARY_ORDINAL: u32 = 0;
/// Ordinal of the member that follows the primary
pub const REPLICA_ORDINAL: u32 = 1;

const DATA_MOUNT_PATH: &str = "/data";
const EXTERNAL_CONFIG_VOLUME: &str = "external-config";
const EXTERNAL_CONFIG_MOUNT_PATH: &str = "/etc/redis/external.conf.d";
const SERVER_MODE: &str = "ha";
const PROBE_GRACE_SECONDS: i32 = 15;

/// Pod name of a member: `<name>-<ordinal>`
pub fn member_name(name: &str, ordinal: u32) -> String {
    format!("{name}-{ordinal}")
}

/// Build the StatefulSet for a RedisHA
///
/// `etcd_addr` is the comma-separated etcd member list exported to the
/// servers as `ETCD_ADDR`; it is left out when it could not be resolved.
pub fn build_statefulset(redis: &RedisHA, etcd_addr: Option<&str>) -> Result<StatefulSet, Error> {
    let name = redis.name_any();
    let namespace = namespace_of(redis)?;
    let owner = owner_reference(redis)?;
    let labels = object_labels(redis);
    let spec = &redis.spec;

    let mut volume_mounts = Vec::new();
    let mut volumes = Vec::new();
    let mut claim_templates = Vec::new();

    if let Some(storage) = &spec.storage {
        claim_templates.push(claim_template(&name, &storage.volume_claim_template, &labels));
        volume_mounts.push(VolumeMount {
            name: name.clone(),
            mount_path: DATA_MOUNT_PATH.to_string(),
            ..Default::default()
        });
    }

    if let Some(config_map) = spec.external_config() {
        volumes.push(Volume {
            name: EXTERNAL_CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: EXTERNAL_CONFIG_VOLUME.to_string(),
            mount_path: EXTERNAL_CONFIG_MOUNT_PATH.to_string(),
            ..Default::default()
        });
    }

    let container = Container {
        name: name.clone(),
        image: Some(spec.kubernetes_config.image.clone()),
        image_pull_policy: spec.kubernetes_config.image_pull_policy.clone(),
        resources: spec.kubernetes_config.resources.clone(),
        env: Some(environment(etcd_addr, spec.persistence_enabled())),
        readiness_probe: Some(ping_probe()),
        liveness_probe: Some(ping_probe()),
        volume_mounts: non_empty(volume_mounts),
        ..Default::default()
    };

    Ok(StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(REPLICA_COUNT),
            service_name: name.clone(),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    node_selector: spec.node_selector.clone(),
                    affinity: spec.affinity.clone(),
                    tolerations: spec.tolerations.clone(),
                    volumes: non_empty(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates: non_empty(claim_templates),
            ..Default::default()
        }),
        status: None,
    })
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// Environment for the Redis container, sorted by name
fn environment(etcd_addr: Option<&str>, persistence: bool) -> Vec<EnvVar> {
    let mut env = vec![
        env_var("SERVER_MODE", SERVER_MODE),
        env_var("SETUP_MODE", SERVER_MODE),
        env_var("REDIS_ADDR", &format!("redis://localhost:{REDIS_PORT}")),
    ];
    if let Some(addr) = etcd_addr {
        env.push(env_var("ETCD_ADDR", addr));
    }
    if persistence {
        env.push(env_var("PERSISTENCE_ENABLED", "true"));
    }
    env.sort_by(|a, b| a.name.cmp(&b.name));
    env
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn ping_probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "/usr/bin/redis-cli".to_string(),
                "-p".to_string(),
                REDIS_PORT.to_string(),
                "ping".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(PROBE_GRACE_SECONDS),
        period_seconds: Some(15),
        failure_threshold: Some(5),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}

fn claim_template(
    name: &str,
    template: &PersistentVolumeClaim,
    labels: &std::collections::BTreeMap<String, String>,
) -> PersistentVolumeClaim {
    let requested = template.spec.clone().unwrap_or_default();

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: requested
                .access_modes
                .or_else(|| Some(vec!["ReadWriteOnce".to_string()])),
            volume_mode: requested
                .volume_mode
                .or_else(|| Some("Filesystem".to_string())),
            ..requested
        }),
        status: None,
    }
}
