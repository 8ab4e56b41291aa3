//! Runtime configuration for the controller

use crate::{Error, DEFAULT_CLUSTER_DOMAIN};

/// Namespace/name of a Kubernetes object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKey {
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl std::str::FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self {
                    namespace: ns.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::config(format!(
                "invalid object reference '{s}', expected namespace/name"
            ))),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Settings shared by every reconcile
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Suffix appended to `<name>.<namespace>` to form the client address
    pub cluster_domain: String,
    /// Endpoints object listing the etcd members the Redis servers talk to
    pub etcd_endpoints: Option<ObjectKey>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            etcd_endpoints: None,
        }
    }
}

impl OperatorConfig {
    /// Build and validate a config from raw flag values
    pub fn new(cluster_domain: &str, etcd_endpoints: Option<&str>) -> Result<Self, Error> {
        let cluster_domain = cluster_domain.trim().trim_matches('.');
        if cluster_domain.is_empty() {
            return Err(Error::config("cluster domain must not be empty"));
        }

        let etcd_endpoints = etcd_endpoints
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .transpose()?;

        Ok(Self {
            cluster_domain: cluster_domain.to_string(),
            etcd_endpoints,
        })
    }

    /// Client address for a RedisHA: `<name>.<namespace>.<cluster_domain>`
    pub fn service_address(&self, name: &str, namespace: &str) -> String {
        format!("{name}.{namespace}.{}", self.cluster_domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_uses_cluster_local() {
        let config = OperatorConfig::default();
        assert_eq!(config.cluster_domain, "svc.cluster.local");
        assert_eq!(
            config.service_address("cache1", "db"),
            "cache1.db.svc.cluster.local"
        );
    }

    #[test]
    fn custom_domain_is_trimmed() {
        let config = OperatorConfig::new(".svc.example.internal.", None).unwrap();
        assert_eq!(
            config.service_address("cache1", "db"),
            "cache1.db.svc.example.internal"
        );
    }

    #[test]
    fn empty_domain_is_rejected() {
        assert!(matches!(
            OperatorConfig::new("  ", None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn etcd_reference_is_parsed() {
        let config =
            OperatorConfig::new("svc.cluster.local", Some("kube-system/coc-kube-etcd")).unwrap();
        let key = config.etcd_endpoints.unwrap();
        assert_eq!(key.namespace, "kube-system");
        assert_eq!(key.name, "coc-kube-etcd");
        assert_eq!(key.to_string(), "kube-system/coc-kube-etcd");
    }

    #[test]
    fn blank_etcd_reference_disables_lookup() {
        let config = OperatorConfig::new("svc.cluster.local", Some("")).unwrap();
        assert!(config.etcd_endpoints.is_none());
    }

    #[rstest]
    #[case::no_slash("coc-kube-etcd")]
    #[case::empty_namespace("/coc-kube-etcd")]
    #[case::empty_name("kube-system/")]
    #[case::too_many_parts("a/b/c")]
    fn malformed_references_are_rejected(#[case] raw: &str) {
        assert!(raw.parse::<ObjectKey>().is_err());
    }
}
