use std::net::Ipv4Addr;

use anyhow::{anyhow, Error};
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use managed_server::driver::ComputeDriver;
use managed_server::error::ServerError;
use managed_server::model::{FloatingIp, Node, NodeImage, NodeSettings, NodeState};

const PAGE_SIZE: &str = "250";
const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";

#[derive(Deserialize)]
pub struct DimensionDataSettings {
    #[serde(rename = "DIDATA_USERNAME")]
    pub username: String,
    #[serde(rename = "DIDATA_PASSWORD")]
    pub password: String,
    #[serde(rename = "DIDATA_REGION")]
    pub region: String,
    #[serde(rename = "DIDATA_ORG_ID")]
    pub org_id: String,
    #[serde(rename = "DIDATA_NETWORK_DOMAIN_ID")]
    pub network_domain_id: String,
}

#[derive(thiserror::Error, Debug)]
#[error("{operation} failed with {code}: {message}")]
pub struct ApiError {
    pub operation: String,
    pub code: String,
    pub message: String,
}

pub struct DimensionData {
    client: Client,
    settings: DimensionDataSettings,
}

impl DimensionData {
    pub fn new(settings: DimensionDataSettings) -> Self {
        let client = Client::new();
        DimensionData { client, settings }
    }

    fn url(&self, path: &str) -> String {
        let region = &self.settings.region;
        let org_id = &self.settings.org_id;
        format!("https://api-{region}.dimensiondata.com/caas/2.4/{org_id}/{path}")
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, Error> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        parse_optional_response(status, &text)
    }

    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, Error> {
        let mut items = vec![];
        let mut page_number = 1;
        loop {
            let page = page_number.to_string();
            let mut params = query.to_vec();
            params.push(("pageSize", PAGE_SIZE));
            params.push(("pageNumber", page.as_str()));

            let result: Option<DdPage<T>> = self.get(path, &params).await?;
            let Some(result) = result else { break };
            let next_page = next_page_number(&result);
            items.extend(result.items);
            match next_page {
                Some(next_page) => page_number = next_page,
                None => break,
            }
        }
        Ok(items)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<DdResponse, Error> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        let result = check_response(parse_response(status, &text)?)?;
        tracing::debug!("{}: {}", result.operation, result.message);
        Ok(result)
    }

    async fn find_vlan(&self, name: &str) -> Result<DdVlan, Error> {
        let vlans: Vec<DdVlan> = self
            .get_all(
                "network/vlan",
                &[
                    ("networkDomainId", self.settings.network_domain_id.as_str()),
                    ("name", name),
                ],
            )
            .await?;
        vlans
            .into_iter()
            .find(|vlan| vlan.name == name)
            .ok_or_else(|| {
                ServerError::non_recoverable(format!("Network {name} was not found")).into()
            })
    }

    async fn list_nat_rules(&self, external_ip: Option<&str>) -> Result<Vec<DdNatRule>, Error> {
        let mut query = vec![("networkDomainId", self.settings.network_domain_id.as_str())];
        if let Some(external_ip) = external_ip {
            query.push(("externalIp", external_ip));
        }
        self.get_all("network/natRule", &query).await
    }
}

impl ComputeDriver for DimensionData {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let servers: Vec<DdServer> = self.get_all("server/server", &[]).await?;
        Ok(servers.into_iter().map(from_dd_server).collect())
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>, Error> {
        let server: Option<DdServer> = self.get(&format!("server/server/{id}"), &[]).await?;
        Ok(server.map(from_dd_server))
    }

    async fn list_images(&self) -> Result<Vec<NodeImage>, Error> {
        let images: Vec<DdImage> = self.get_all("image/osImage", &[]).await?;
        let images = images
            .into_iter()
            .map(|image| NodeImage {
                id: image.id,
                name: image.name,
            })
            .collect();
        Ok(images)
    }

    async fn create_node(&self, settings: &NodeSettings) -> Result<Node, Error> {
        let vlan = self.find_vlan(&settings.network).await?;
        let request = DdDeployServer {
            name: settings.name.clone(),
            description: settings.description.clone(),
            image_id: settings.image_id.clone(),
            start: true,
            administrator_password: settings.password.clone(),
            network_info: DdDeployNetworkInfo {
                network_domain_id: vlan.network_domain.id,
                primary_nic: DdDeployNic { vlan_id: vlan.id },
            },
        };
        let response = self.post("server/deployServer", &request).await?;
        let id = response
            .info_value("serverId")
            .ok_or(anyhow!("Missing server id in deploy response"))?;

        self.get_node(id)
            .await?
            .ok_or(anyhow!("Deployed server {id} was not found"))
    }

    async fn start_node(&self, node: &Node) -> Result<(), Error> {
        self.post("server/startServer", &serde_json::json!({ "id": node.id }))
            .await?;
        Ok(())
    }

    async fn shutdown_node_graceful(&self, node: &Node) -> Result<(), Error> {
        self.post("server/shutdownServer", &serde_json::json!({ "id": node.id }))
            .await?;
        Ok(())
    }

    async fn destroy_node(&self, node: &Node) -> Result<bool, Error> {
        match self
            .post("server/deleteServer", &serde_json::json!({ "id": node.id }))
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn associate_address(&self, node: &Node, address: &str) -> Result<(), Error> {
        let internal_ip = node
            .private_ips
            .first()
            .ok_or(anyhow!("Server {} has no private address", node.id))?;
        let request = DdNatRule {
            id: None,
            network_domain_id: self.settings.network_domain_id.clone(),
            internal_ip: internal_ip.clone(),
            external_ip: address.to_string(),
        };
        self.post("network/createNatRule", &request).await?;
        Ok(())
    }

    async fn disassociate_address(&self, address: &str) -> Result<(), Error> {
        for rule in self.list_nat_rules(Some(address)).await? {
            if let Some(id) = &rule.id {
                self.post("network/deleteNatRule", &serde_json::json!({ "id": id }))
                    .await?;
            }
        }
        Ok(())
    }

    async fn list_addresses(&self) -> Result<Vec<FloatingIp>, Error> {
        let blocks: Vec<DdPublicIpBlock> = self
            .get_all(
                "network/publicIpBlock",
                &[("networkDomainId", self.settings.network_domain_id.as_str())],
            )
            .await?;
        let rules = self.list_nat_rules(None).await?;
        let nodes = if rules.is_empty() {
            vec![]
        } else {
            self.list_nodes().await?
        };

        let mut addresses = vec![];
        for block in blocks {
            for address in block.addresses()? {
                let node_id = rules
                    .iter()
                    .find(|rule| rule.external_ip == address)
                    .and_then(|rule| {
                        nodes
                            .iter()
                            .find(|node| node.private_ips.contains(&rule.internal_ip))
                    })
                    .map(|node| node.id.clone());
                addresses.push(FloatingIp {
                    id: block.id.clone(),
                    address,
                    node_id,
                });
            }
        }
        Ok(addresses)
    }

    async fn allocate_address(&self) -> Result<FloatingIp, Error> {
        let response = self
            .post(
                "network/addPublicIpBlock",
                &serde_json::json!({ "networkDomainId": self.settings.network_domain_id }),
            )
            .await?;
        let id = response
            .info_value("ipBlockId")
            .ok_or(anyhow!("Missing ip block id in response"))?;
        let block: DdPublicIpBlock = self
            .get(&format!("network/publicIpBlock/{id}"), &[])
            .await?
            .ok_or(anyhow!("Public ip block {id} was not found"))?;

        Ok(FloatingIp {
            id: block.id,
            address: block.base_ip,
            node_id: None,
        })
    }

    async fn release_address(&self, address: &FloatingIp) -> Result<bool, Error> {
        match self
            .post(
                "network/removePublicIpBlock",
                &serde_json::json!({ "id": address.id }),
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

fn parse_response<T: DeserializeOwned>(status: StatusCode, text: &str) -> Result<T, Error> {
    if status.is_success() {
        let result = serde_json::from_str(text)?;
        return Ok(result);
    }
    match serde_json::from_str::<DdResponse>(text) {
        Ok(result) => Err(ApiError::from(result).into()),
        Err(_) => Err(anyhow!("Request failed with {status}: {text}")),
    }
}

/// Missing resources come back either as HTTP 404 or as a
/// `RESOURCE_NOT_FOUND` response code.
fn parse_optional_response<T: DeserializeOwned>(
    status: StatusCode,
    text: &str,
) -> Result<Option<T>, Error> {
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    match parse_response(status, text) {
        Ok(result) => Ok(Some(result)),
        Err(err) if is_not_found(&err) => Ok(None),
        Err(err) => Err(err),
    }
}

fn check_response(result: DdResponse) -> Result<DdResponse, Error> {
    match result.response_code.as_str() {
        "OK" | "IN_PROGRESS" => Ok(result),
        _ => Err(ApiError::from(result).into()),
    }
}

fn next_page_number<T>(page: &DdPage<T>) -> Option<u32> {
    if page.items.is_empty() || page.page_number >= page.page_count {
        None
    } else {
        Some(page.page_number + 1)
    }
}

fn is_not_found(err: &Error) -> bool {
    matches!(err.downcast_ref::<ApiError>(), Some(e) if e.code == RESOURCE_NOT_FOUND)
}

fn to_node_state(state: &str, started: bool) -> NodeState {
    match state {
        "NORMAL" if started => NodeState::Running,
        "NORMAL" => NodeState::Stopped,
        "DELETED" => NodeState::Terminated,
        s if s.starts_with("PENDING_") => NodeState::Pending,
        s if s.starts_with("FAILED_") => NodeState::Error,
        _ => NodeState::Unknown,
    }
}

fn from_dd_server(server: DdServer) -> Node {
    let nics: Vec<DdNic> = server
        .network_info
        .map(|info| info.primary_nic.into_iter().chain(info.additional_nic).collect())
        .unwrap_or_else(Vec::new);

    Node {
        state: to_node_state(&server.state, server.started),
        id: server.id,
        name: server.name,
        private_ips: nics.iter().filter_map(|nic| nic.private_ipv4.clone()).collect(),
        public_ips: nics.iter().filter_map(|nic| nic.ipv6.clone()).collect(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
struct DdPage<T> {
    #[serde(
        default,
        alias = "server",
        alias = "osImage",
        alias = "vlan",
        alias = "publicIpBlock",
        alias = "natRule"
    )]
    items: Vec<T>,
    #[serde(default)]
    page_number: u32,
    #[serde(default)]
    page_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DdResponse {
    operation: String,
    response_code: String,
    message: String,
    #[serde(default)]
    info: Vec<DdNameValue>,
}

impl From<DdResponse> for ApiError {
    fn from(result: DdResponse) -> Self {
        ApiError {
            operation: result.operation,
            code: result.response_code,
            message: result.message,
        }
    }
}

impl DdResponse {
    fn info_value(&self, name: &str) -> Option<&str> {
        self.info
            .iter()
            .find(|info| info.name == name)
            .map(|info| info.value.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct DdNameValue {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DdServer {
    id: String,
    name: String,
    #[serde(default)]
    started: bool,
    state: String,
    network_info: Option<DdNetworkInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DdNetworkInfo {
    primary_nic: Option<DdNic>,
    #[serde(default)]
    additional_nic: Vec<DdNic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DdNic {
    private_ipv4: Option<String>,
    ipv6: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DdImage {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DdVlan {
    id: String,
    name: String,
    network_domain: DdReference,
}

#[derive(Debug, Deserialize)]
struct DdReference {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DdDeployServer {
    name: String,
    description: String,
    image_id: String,
    start: bool,
    administrator_password: String,
    network_info: DdDeployNetworkInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DdDeployNetworkInfo {
    network_domain_id: String,
    primary_nic: DdDeployNic,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DdDeployNic {
    vlan_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct DdNatRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    network_domain_id: String,
    internal_ip: String,
    external_ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DdPublicIpBlock {
    id: String,
    base_ip: String,
    size: u32,
}

impl DdPublicIpBlock {
    fn addresses(&self) -> Result<Vec<String>, Error> {
        let base: Ipv4Addr = self.base_ip.parse()?;
        let base = u32::from(base);
        (0..self.size)
            .map(|offset| {
                base.checked_add(offset)
                    .map(|address| Ipv4Addr::from(address).to_string())
                    .ok_or_else(|| anyhow!("Public ip block {} is out of range", self.id))
            })
            .collect()
    }
}
