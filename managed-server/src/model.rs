use std::time::Duration;

use duration_str::deserialize_option_duration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ManagedServer",
    group = "managedserver.io",
    version = "v1alpha1",
    namespaced,
    doc = "Cloud server that gets provisioned, powered and destroyed along with the resource.",
    status = "ManagedServerStatus"
)]
pub struct ManagedServerSpec {
    #[serde(flatten)]
    pub server: ServerProperties,

    #[serde(default)]
    pub stopped: bool,

    pub floating_ip: Option<FloatingIpSpec>,

    #[serde(default, deserialize_with = "deserialize_option_duration")]
    #[schemars(with = "Option<String>")]
    pub timeout: Option<Duration>,

    #[serde(default, deserialize_with = "deserialize_option_duration")]
    #[schemars(with = "Option<String>")]
    pub sleep_time: Option<Duration>,
}

#[derive(PartialEq, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct ManagedServerStatus {
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_status: Option<ServerStatus>,
    pub floating_ip: Option<String>,
    #[serde(default)]
    pub floating_ip_allocated: bool,
    #[serde(default)]
    pub floating_ip_attached: bool,
}

#[derive(PartialEq, Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub enum ServerStatus {
    CREATING,
    RUNNING,
    STOPPED,
}

/// Server properties as given by the user. Every field is optional here,
/// required ones are checked when the server gets created.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema, Default)]
pub struct ServerProperties {
    pub name: Option<String>,
    pub image_name: Option<String>,
    pub network_name: Option<String>,
    pub node_description: Option<String>,
    pub node_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema, Default)]
pub struct FloatingIpSpec {
    /// Address to attach. When missing a new one gets allocated.
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderContext {
    #[serde(rename = "RESOURCES_PREFIX", default)]
    pub resources_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Running,
    Stopped,
    Pending,
    Terminated,
    Error,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub state: NodeState,
    pub private_ips: Vec<String>,
    pub public_ips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeImage {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSettings {
    pub name: String,
    pub image_id: String,
    pub password: String,
    pub description: String,
    pub network: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloatingIp {
    pub id: String,
    pub address: String,
    pub node_id: Option<String>,
}

pub fn transform_resource_name(name: &str, provider_context: &ProviderContext) -> String {
    match provider_context.resources_prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() && !name.starts_with(prefix) => {
            format!("{prefix}{name}")
        }
        _ => name.to_string(),
    }
}
