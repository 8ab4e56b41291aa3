//! Client Service in front of the pair

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::{namespace_of, object_labels, owner_reference, selector_labels};
use crate::crd::RedisHA;
use crate::{Error, REDIS_PORT};

/// Build the ClusterIP Service named after the RedisHA
pub fn build_service(redis: &RedisHA) -> Result<Service, Error> {
    let name = redis.name_any();

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace_of(redis)?),
            labels: Some(object_labels(redis)),
            owner_references: Some(vec![owner_reference(redis)?]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(&name)),
            ports: Some(vec![ServicePort {
                name: Some("redis-client".to_string()),
                port: REDIS_PORT,
                target_port: Some(IntOrString::Int(REDIS_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    })
}
