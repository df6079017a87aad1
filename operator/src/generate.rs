use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ObjectReference, Pod, PodSpec, PodTemplateSpec, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;
use kube::api::{ObjectMeta, ResourceExt};

use crate::crd::{
    JupyterGateway, JupyterKernel, JupyterKernelSpec, JupyterKernelTemplate, JupyterNotebook,
    LABEL_NAMESPACE, LABEL_NOTEBOOK,
};
use crate::error::Error;

/// Defaults applied while computing desired state. Passed explicitly instead
/// of living as process-wide constants so tests can vary them.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub notebook_image: String,
    pub gateway_image: String,
    pub container_name: String,
    pub gateway_container_name: String,
    pub kernel_container_name: String,
    pub port_name: String,
    pub port: i32,
    pub label_namespace_key: String,
    pub label_notebook_key: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            notebook_image: "jupyter/base-notebook:python-3.8.6".into(),
            gateway_image: "elyra/enterprise-gateway:2.6.0".into(),
            container_name: "notebook".into(),
            gateway_container_name: "gateway".into(),
            kernel_container_name: "kernel".into(),
            port_name: "notebook".into(),
            port: 8888,
            label_namespace_key: LABEL_NAMESPACE.into(),
            label_notebook_key: LABEL_NOTEBOOK.into(),
        }
    }
}

impl GeneratorConfig {
    pub fn labels(&self, ns: &str, name: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(self.label_namespace_key.clone(), ns.to_string());
        labels.insert(self.label_notebook_key.clone(), name.to_string());
        labels
    }
}

/// Desired deployment for a notebook. Pure: equal inputs yield equal output.
pub fn notebook_deployment(cfg: &GeneratorConfig, nb: &JupyterNotebook) -> Result<Deployment, Error> {
    let (ns, name) = identity(nb)?;
    let labels = cfg.labels(&ns, &name);

    let mut template = nb.spec.template.clone().unwrap_or_default();
    let mut template_meta = template.metadata.take().unwrap_or_default();
    template_meta.labels = Some(merge_labels(template_meta.labels.take(), &labels));
    template.metadata = Some(template_meta);

    let mut pod_spec = template.spec.take().unwrap_or_default();
    if pod_spec.containers.is_empty() {
        pod_spec.containers.push(Container::default());
    }
    {
        let container = &mut pod_spec.containers[0];
        if container.name.is_empty() {
            container.name = cfg.container_name.clone();
        }
        if container.image.is_none() {
            container.image = Some(cfg.notebook_image.clone());
        }
        if container.image_pull_policy.is_none() {
            container.image_pull_policy = Some("IfNotPresent".into());
        }
        if container.args.as_ref().is_none_or(|args| args.is_empty()) {
            container.args = Some(vec!["start-notebook.sh".into()]);
        }
        if container.ports.as_ref().is_none_or(|ports| ports.is_empty()) {
            container.ports = Some(vec![ContainerPort {
                name: Some(cfg.port_name.clone()),
                container_port: cfg.port,
                protocol: Some("TCP".into()),
                ..Default::default()
            }]);
        }
        if let Some(gateway) = &nb.spec.gateway {
            let url = gateway_url(cfg, &ns, gateway)?;
            let args = container.args.get_or_insert_with(Vec::new);
            args.push("--gateway-url".into());
            args.push(url);
        }
        if let Some(resources) = &nb.spec.resources {
            container.resources = Some(resources.clone());
        }
    }
    template.spec = Some(pod_spec);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ns),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_ref(nb)?]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Desired deployment for a gateway: a single enterprise-gateway replica with
/// the cull policy and kernel catalog surfaced as environment.
pub fn gateway_deployment(cfg: &GeneratorConfig, gw: &JupyterGateway) -> Result<Deployment, Error> {
    let (ns, name) = identity(gw)?;
    let labels = cfg.labels(&ns, &name);

    let mut env = vec![EnvVar {
        name: "EG_ALLOWED_KERNELS".into(),
        value: Some(gw.spec.kernels.join(",")),
        ..Default::default()
    }];
    if let Some(default_kernel) = &gw.spec.default_kernel {
        env.push(EnvVar {
            name: "EG_DEFAULT_KERNEL_NAME".into(),
            value: Some(default_kernel.clone()),
            ..Default::default()
        });
    }
    if let Some(timeout) = gw.spec.cull_idle_timeout {
        env.push(EnvVar {
            name: "EG_CULL_IDLE_TIMEOUT".into(),
            value: Some(timeout.to_string()),
            ..Default::default()
        });
    }
    if let Some(interval) = gw.spec.cull_interval {
        env.push(EnvVar {
            name: "EG_CULL_INTERVAL".into(),
            value: Some(interval.to_string()),
            ..Default::default()
        });
    }
    if let Some(cluster_role) = &gw.spec.cluster_role {
        env.push(EnvVar {
            name: "EG_KERNEL_CLUSTER_ROLE".into(),
            value: Some(cluster_role.clone()),
            ..Default::default()
        });
    }

    let container = Container {
        name: cfg.gateway_container_name.clone(),
        image: Some(cfg.gateway_image.clone()),
        image_pull_policy: Some("IfNotPresent".into()),
        ports: Some(vec![ContainerPort {
            name: Some(cfg.port_name.clone()),
            container_port: cfg.port,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        env: Some(env),
        resources: gw.spec.resources.clone(),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ns),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_ref(gw)?]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Service fronting the gateway, named after it so notebooks can reach
/// `http://{name}.{namespace}:{port}`.
pub fn gateway_service(cfg: &GeneratorConfig, gw: &JupyterGateway) -> Result<Service, Error> {
    let (ns, name) = identity(gw)?;
    let labels = cfg.labels(&ns, &name);

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ns),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_ref(gw)?]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some(cfg.port_name.clone()),
                port: cfg.port,
                target_port: Some(IntOrString::Int(cfg.port)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Desired pod for a kernel, built from the resolved catalog entry and its
/// optional pod template.
pub fn kernel_pod(
    cfg: &GeneratorConfig,
    kernel: &JupyterKernel,
    catalog: &JupyterKernelSpec,
    template: Option<&JupyterKernelTemplate>,
) -> Result<Pod, Error> {
    let (ns, name) = identity(kernel)?;
    let labels = cfg.labels(&ns, &name);

    let base = template
        .and_then(|t| t.spec.template.clone())
        .unwrap_or_default();
    let mut meta = base.metadata.unwrap_or_default();
    meta.name = Some(name);
    meta.namespace = Some(ns);
    meta.labels = Some(merge_labels(meta.labels.take(), &labels));
    meta.owner_references = Some(vec![owner_ref(kernel)?]);

    let mut pod_spec = base.spec.unwrap_or_default();
    if pod_spec.containers.is_empty() {
        pod_spec.containers.push(Container::default());
    }
    {
        let container = &mut pod_spec.containers[0];
        if container.name.is_empty() {
            container.name = cfg.kernel_container_name.clone();
        }
        if container.image.is_none() {
            container.image = Some(cfg.notebook_image.clone());
        }
        if let Some(command) = &catalog.spec.command {
            if !command.is_empty() {
                container.command = Some(command.clone());
            }
        }
        let merged = merge_env(container.env.as_deref(), catalog.spec.env.as_deref());
        container.env = merge_env(merged.as_deref(), kernel.spec.env.as_deref());
        if let Some(resources) = &kernel.spec.resources {
            container.resources = Some(resources.clone());
        }
    }
    // a finished kernel pod must stay finished for phase tracking
    if pod_spec.restart_policy.is_none() {
        pod_spec.restart_policy = Some("Never".into());
    }

    Ok(Pod {
        metadata: meta,
        spec: Some(pod_spec),
        ..Default::default()
    })
}

/// Later entries win by name; base order is preserved.
pub fn merge_env(base: Option<&[EnvVar]>, overrides: Option<&[EnvVar]>) -> Option<Vec<EnvVar>> {
    match (base, overrides) {
        (None, None) => None,
        (Some(base), None) => Some(base.to_vec()),
        (None, Some(overrides)) => Some(overrides.to_vec()),
        (Some(base), Some(overrides)) => {
            let mut merged = base.to_vec();
            for var in overrides {
                match merged.iter_mut().find(|e| e.name == var.name) {
                    Some(existing) => *existing = var.clone(),
                    None => merged.push(var.clone()),
                }
            }
            Some(merged)
        }
    }
}

fn gateway_url(cfg: &GeneratorConfig, ns: &str, reference: &ObjectReference) -> Result<String, Error> {
    let name = reference
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::InvalidSpec("gateway reference is missing a name".into()))?;
    let namespace = reference
        .namespace
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(ns);
    Ok(format!("http://{}.{}:{}", name, namespace, cfg.port))
}

fn identity<K: ResourceExt>(obj: &K) -> Result<(String, String), Error> {
    let ns = obj
        .namespace()
        .filter(|ns| !ns.is_empty())
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    let name = obj.name_any();
    if name.is_empty() {
        return Err(Error::MissingObjectKey("metadata.name"));
    }
    Ok((ns, name))
}

fn owner_ref<K>(obj: &K) -> Result<OwnerReference, Error>
where
    K: Resource<DynamicType = ()>,
{
    obj.controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey("metadata.name"))
}

fn merge_labels(
    existing: Option<BTreeMap<String, String>>,
    ours: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = existing.unwrap_or_default();
    for (key, value) in ours {
        labels.insert(key.clone(), value.clone());
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        JupyterGatewaySpec, JupyterKernelCRDSpec, JupyterKernelSpecSpec, JupyterKernelTemplateSpec,
        JupyterNotebookSpec,
    };
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn meta(name: &str, ns: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(ns.into()),
            uid: Some("a-b-c".into()),
            ..Default::default()
        }
    }

    fn notebook(name: &str, ns: &str, spec: JupyterNotebookSpec) -> JupyterNotebook {
        JupyterNotebook {
            metadata: meta(name, ns),
            spec,
            status: None,
        }
    }

    fn first_container(deployment: &Deployment) -> &Container {
        &deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
    }

    #[test]
    fn notebook_without_gateway_has_no_gateway_url_arg() {
        let cfg = GeneratorConfig::default();
        let nb = notebook("nb1", "default", JupyterNotebookSpec::default());

        let deployment = notebook_deployment(&cfg, &nb).unwrap();
        let container = first_container(&deployment);
        assert_eq!(container.args, Some(vec!["start-notebook.sh".to_string()]));
        assert_eq!(container.image.as_deref(), Some("jupyter/base-notebook:python-3.8.6"));
        assert_eq!(container.name, "notebook");
    }

    #[test]
    fn notebook_with_gateway_gets_exactly_one_gateway_url_arg() {
        let cfg = GeneratorConfig::default();
        let nb = notebook(
            "nb1",
            "default",
            JupyterNotebookSpec {
                gateway: Some(ObjectReference {
                    name: Some("g1".into()),
                    namespace: Some("default".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let deployment = notebook_deployment(&cfg, &nb).unwrap();
        let args = first_container(&deployment).args.clone().unwrap();
        assert_eq!(
            args,
            vec![
                "start-notebook.sh".to_string(),
                "--gateway-url".to_string(),
                "http://g1.default:8888".to_string(),
            ]
        );
        assert_eq!(args.iter().filter(|a| *a == "--gateway-url").count(), 1);
    }

    #[test]
    fn gateway_reference_namespace_defaults_to_the_notebooks() {
        let cfg = GeneratorConfig::default();
        let nb = notebook(
            "nb1",
            "team-a",
            JupyterNotebookSpec {
                gateway: Some(ObjectReference {
                    name: Some("g1".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let deployment = notebook_deployment(&cfg, &nb).unwrap();
        let args = first_container(&deployment).args.clone().unwrap();
        assert!(args.contains(&"http://g1.team-a:8888".to_string()));
    }

    #[test]
    fn generator_is_deterministic() {
        let cfg = GeneratorConfig::default();
        let nb = notebook(
            "nb1",
            "default",
            JupyterNotebookSpec {
                gateway: Some(ObjectReference {
                    name: Some("g1".into()),
                    namespace: Some("default".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        assert_eq!(
            notebook_deployment(&cfg, &nb).unwrap(),
            notebook_deployment(&cfg, &nb).unwrap()
        );
    }

    #[test]
    fn notebook_resources_override_container_resources() {
        let cfg = GeneratorConfig::default();
        let mut requests = std::collections::BTreeMap::new();
        requests.insert("cpu".to_string(), Quantity("500m".into()));
        let resources = ResourceRequirements {
            requests: Some(requests),
            ..Default::default()
        };
        let nb = notebook(
            "nb1",
            "default",
            JupyterNotebookSpec {
                resources: Some(resources.clone()),
                ..Default::default()
            },
        );

        let deployment = notebook_deployment(&cfg, &nb).unwrap();
        assert_eq!(first_container(&deployment).resources, Some(resources));
    }

    #[test]
    fn notebook_labels_and_selector_match() {
        let cfg = GeneratorConfig::default();
        let nb = notebook("nb1", "team-a", JupyterNotebookSpec::default());

        let deployment = notebook_deployment(&cfg, &nb).unwrap();
        let labels = deployment.metadata.labels.clone().unwrap();
        assert_eq!(labels.get("namespace").map(String::as_str), Some("team-a"));
        assert_eq!(labels.get("notebook").map(String::as_str), Some("nb1"));
        assert_eq!(
            deployment.spec.as_ref().unwrap().selector.match_labels,
            Some(labels)
        );
    }

    #[test]
    fn custom_default_image_flows_through() {
        let cfg = GeneratorConfig {
            notebook_image: "registry.local/notebook:1".into(),
            ..Default::default()
        };
        let nb = notebook("nb1", "default", JupyterNotebookSpec::default());

        let deployment = notebook_deployment(&cfg, &nb).unwrap();
        assert_eq!(
            first_container(&deployment).image.as_deref(),
            Some("registry.local/notebook:1")
        );
    }

    #[test]
    fn missing_namespace_is_rejected() {
        let cfg = GeneratorConfig::default();
        let nb = JupyterNotebook {
            metadata: ObjectMeta {
                name: Some("nb1".into()),
                ..Default::default()
            },
            spec: JupyterNotebookSpec::default(),
            status: None,
        };

        assert!(matches!(
            notebook_deployment(&cfg, &nb),
            Err(Error::MissingObjectKey("metadata.namespace"))
        ));
    }

    #[test]
    fn gateway_deployment_surfaces_catalog_and_cull_policy() {
        let cfg = GeneratorConfig::default();
        let gw = JupyterGateway {
            metadata: meta("g1", "default"),
            spec: JupyterGatewaySpec {
                kernels: vec!["python3".into(), "ir".into()],
                default_kernel: Some("python3".into()),
                cull_idle_timeout: Some(300),
                cull_interval: Some(60),
                ..Default::default()
            },
            status: None,
        };

        let deployment = gateway_deployment(&cfg, &gw).unwrap();
        let env = first_container(&deployment).env.clone().unwrap();
        let get = |name: &str| {
            env.iter()
                .find(|e| e.name == name)
                .and_then(|e| e.value.clone())
        };
        assert_eq!(get("EG_ALLOWED_KERNELS").as_deref(), Some("python3,ir"));
        assert_eq!(get("EG_DEFAULT_KERNEL_NAME").as_deref(), Some("python3"));
        assert_eq!(get("EG_CULL_IDLE_TIMEOUT").as_deref(), Some("300"));
        assert_eq!(get("EG_CULL_INTERVAL").as_deref(), Some("60"));
        assert_eq!(deployment.spec.as_ref().unwrap().replicas, Some(1));
    }

    #[test]
    fn gateway_service_targets_the_gateway_port() {
        let cfg = GeneratorConfig::default();
        let gw = JupyterGateway {
            metadata: meta("g1", "default"),
            spec: JupyterGatewaySpec {
                kernels: vec!["python3".into()],
                ..Default::default()
            },
            status: None,
        };

        let service = gateway_service(&cfg, &gw).unwrap();
        assert_eq!(service.metadata.name.as_deref(), Some("g1"));
        let ports = service.spec.as_ref().unwrap().ports.clone().unwrap();
        assert_eq!(ports[0].port, 8888);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8888)));
    }

    fn kernel(name: &str, spec: JupyterKernelCRDSpec) -> JupyterKernel {
        JupyterKernel {
            metadata: meta(name, "default"),
            spec,
            status: None,
        }
    }

    fn catalog_entry(spec: JupyterKernelSpecSpec) -> JupyterKernelSpec {
        JupyterKernelSpec {
            metadata: meta("python3", "default"),
            spec,
        }
    }

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    #[test]
    fn kernel_pod_takes_command_and_env_from_the_catalog() {
        let cfg = GeneratorConfig::default();
        let k = kernel(
            "k1",
            JupyterKernelCRDSpec {
                kernel_spec: "python3".into(),
                ..Default::default()
            },
        );
        let entry = catalog_entry(JupyterKernelSpecSpec {
            env: Some(vec![env("KERNEL_LANGUAGE", "python")]),
            command: Some(vec!["python".into(), "-m".into(), "ipykernel".into()]),
            ..Default::default()
        });

        let pod = kernel_pod(&cfg, &k, &entry, None).unwrap();
        let container = &pod.spec.as_ref().unwrap().containers[0];
        assert_eq!(
            container.command,
            Some(vec!["python".into(), "-m".into(), "ipykernel".into()])
        );
        assert_eq!(container.env, Some(vec![env("KERNEL_LANGUAGE", "python")]));
        assert_eq!(
            pod.spec.as_ref().unwrap().restart_policy.as_deref(),
            Some("Never")
        );
    }

    #[test]
    fn kernel_env_overrides_win_by_name() {
        let cfg = GeneratorConfig::default();
        let k = kernel(
            "k1",
            JupyterKernelCRDSpec {
                kernel_spec: "python3".into(),
                env: Some(vec![env("KERNEL_LANGUAGE", "python3.11"), env("EXTRA", "1")]),
                ..Default::default()
            },
        );
        let entry = catalog_entry(JupyterKernelSpecSpec {
            env: Some(vec![env("KERNEL_LANGUAGE", "python")]),
            ..Default::default()
        });

        let pod = kernel_pod(&cfg, &k, &entry, None).unwrap();
        let container = &pod.spec.as_ref().unwrap().containers[0];
        assert_eq!(
            container.env,
            Some(vec![env("KERNEL_LANGUAGE", "python3.11"), env("EXTRA", "1")])
        );
    }

    #[test]
    fn kernel_pod_builds_on_the_referenced_template() {
        let cfg = GeneratorConfig::default();
        let k = kernel(
            "k1",
            JupyterKernelCRDSpec {
                kernel_spec: "python3".into(),
                ..Default::default()
            },
        );
        let entry = catalog_entry(JupyterKernelSpecSpec::default());
        let template = JupyterKernelTemplate {
            metadata: meta("gpu-template", "default"),
            spec: JupyterKernelTemplateSpec {
                template: Some(PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "custom".into(),
                            image: Some("registry.local/kernel:cuda".into()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            },
        };

        let pod = kernel_pod(&cfg, &k, &entry, Some(&template)).unwrap();
        let container = &pod.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.name, "custom");
        assert_eq!(container.image.as_deref(), Some("registry.local/kernel:cuda"));
        let labels = pod.metadata.labels.clone().unwrap();
        assert_eq!(labels.get("notebook").map(String::as_str), Some("k1"));
    }

    #[test]
    fn merge_env_preserves_base_order() {
        let base = vec![env("A", "1"), env("B", "2")];
        let overrides = vec![env("B", "3"), env("C", "4")];

        let merged = merge_env(Some(&base), Some(&overrides)).unwrap();
        assert_eq!(merged, vec![env("A", "1"), env("B", "3"), env("C", "4")]);
    }
}
