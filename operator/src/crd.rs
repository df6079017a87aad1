use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::core::v1::{EnvVar, ObjectReference, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carrying the namespace of the owning resource on every generated object.
pub const LABEL_NAMESPACE: &str = "namespace";
/// Label carrying the name of the owning resource on every generated object.
pub const LABEL_NOTEBOOK: &str = "notebook";
/// Label binding a kernel to the gateway that launched it.
pub const LABEL_GATEWAY: &str = "gateway";

/// RFC 3339 timestamp of the last request a kernel served, written by the
/// gateway runtime. Consumed by the idle culler.
pub const LAST_ACTIVITY_ANNOTATION: &str = "jupyter.jedimindtricks.example/last-activity";

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "jupyter.jedimindtricks.example",
    version = "v1alpha1",
    kind = "JupyterGateway",
    plural = "jupytergateways",
    derive = "Default",
    status = "JupyterGatewayStatus",
    shortname = "jg",
    namespaced
)]
pub struct JupyterGatewaySpec {
    /// Names of the kernel specs this gateway is allowed to launch.
    pub kernels: Vec<String>,

    /// Kernel launched when a client does not ask for one. Must be a member
    /// of `kernels`; enforced at admission.
    #[serde(default)]
    pub default_kernel: Option<String>,

    /// Idle seconds after which a kernel is culled. Unset or <= 0 disables
    /// culling for this gateway.
    #[serde(default)]
    pub cull_idle_timeout: Option<i32>,

    /// Seconds between cull scans. Defaults to 60.
    #[serde(default)]
    pub cull_interval: Option<i32>,

    #[serde(default)]
    pub resources: Option<ResourceRequirements>,

    /// Cluster role granted to kernels launched by this gateway.
    #[serde(default)]
    pub cluster_role: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct JupyterGatewayStatus {
    /// Rollout status of the generated gateway deployment.
    #[serde(default)]
    pub deployment_status: DeploymentStatus,
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "jupyter.jedimindtricks.example",
    version = "v1alpha1",
    kind = "JupyterKernel",
    plural = "jupyterkernels",
    derive = "Default",
    status = "JupyterKernelStatus",
    shortname = "jk",
    namespaced
)]
pub struct JupyterKernelCRDSpec {
    /// Name of the JupyterKernelSpec catalog entry to launch from.
    pub kernel_spec: String,

    /// Environment overrides merged over the catalog entry's env by name.
    #[serde(default)]
    pub env: Option<Vec<EnvVar>>,

    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JupyterKernelStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<JupyterKernelCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<Time>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JupyterKernelCondition {
    pub r#type: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_update_time: Option<Time>,
    pub last_transition_time: Option<Time>,
}

impl JupyterKernelCondition {
    pub fn new(
        r#type: impl Into<String>,
        status: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        JupyterKernelCondition {
            r#type: r#type.into(),
            status: status.into(),
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_update_time: None,
            last_transition_time: None,
        }
    }
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "jupyter.jedimindtricks.example",
    version = "v1alpha1",
    kind = "JupyterKernelSpec",
    plural = "jupyterkernelspecs",
    derive = "Default",
    shortname = "jks",
    namespaced
)]
pub struct JupyterKernelSpecSpec {
    /// Environment every kernel launched from this entry starts with.
    #[serde(default)]
    pub env: Option<Vec<EnvVar>>,

    /// Launch command for the kernel container.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// Reference to a JupyterKernelTemplate providing the pod template.
    #[serde(default)]
    pub template: Option<ObjectReference>,
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "jupyter.jedimindtricks.example",
    version = "v1alpha1",
    kind = "JupyterKernelTemplate",
    plural = "jupyterkerneltemplates",
    derive = "Default",
    shortname = "jkt",
    namespaced
)]
pub struct JupyterKernelTemplateSpec {
    #[serde(default)]
    pub template: Option<PodTemplateSpec>,
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "jupyter.jedimindtricks.example",
    version = "v1alpha1",
    kind = "JupyterNotebook",
    plural = "jupyternotebooks",
    derive = "Default",
    status = "JupyterNotebookStatus",
    shortname = "jn",
    namespaced
)]
pub struct JupyterNotebookSpec {
    /// Gateway this notebook attaches to. The namespace defaults to the
    /// notebook's own when unset.
    #[serde(default)]
    pub gateway: Option<ObjectReference>,

    /// Pod template override for the notebook deployment.
    #[serde(default)]
    pub template: Option<PodTemplateSpec>,

    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct JupyterNotebookStatus {}
