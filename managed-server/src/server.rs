use std::{sync::Arc, time::Duration};

use anyhow::Error;
use tokio::time::Instant;

use crate::{
    driver::ComputeDriver,
    error::ServerError,
    model::{
        transform_resource_name, Node, NodeImage, NodeSettings, NodeState, ProviderContext,
        ServerProperties,
    },
};

pub struct ServerClient<D> {
    pub driver: Arc<D>,
}

impl<D> ServerClient<D>
where
    D: ComputeDriver,
{
    pub fn new(driver: Arc<D>) -> Self {
        ServerClient { driver }
    }

    pub async fn get_by_name(&self, server_name: &str) -> Result<Option<Node>, Error> {
        let nodes = self.driver.list_nodes().await?;
        Ok(nodes.into_iter().find(|node| node.name == server_name))
    }

    pub async fn get_by_id(&self, server_id: &str) -> Result<Option<Node>, Error> {
        self.driver.get_node(server_id).await
    }

    pub async fn start_server(&self, server: &Node) -> Result<(), Error> {
        tracing::debug!("Starting server {}..", server.id);
        self.driver.start_node(server).await
    }

    pub async fn stop_server(&self, server: &Node) -> Result<(), Error> {
        tracing::debug!("Stopping server {}..", server.id);
        self.driver.shutdown_node_graceful(server).await
    }

    pub async fn delete_server(&self, server: &Node) -> Result<bool, Error> {
        tracing::debug!("Deleting server {}..", server.id);
        self.driver.destroy_node(server).await
    }

    pub async fn wait_for_server_to_be_deleted(
        &self,
        server: Node,
        timeout: Duration,
        sleep_time: Duration,
    ) -> Result<Node, Error> {
        self.wait_for_server_to_obtain_state(server, timeout, sleep_time, NodeState::Terminated)
            .await
    }

    pub async fn wait_for_server_to_be_running(
        &self,
        server: Node,
        timeout: Duration,
        sleep_time: Duration,
    ) -> Result<Node, Error> {
        self.wait_for_server_to_obtain_state(server, timeout, sleep_time, NodeState::Running)
            .await
    }

    pub async fn wait_for_server_to_be_stopped(
        &self,
        server: Node,
        timeout: Duration,
        sleep_time: Duration,
    ) -> Result<Node, Error> {
        self.wait_for_server_to_obtain_state(server, timeout, sleep_time, NodeState::Stopped)
            .await
    }

    /// Polls the server every `sleep_time` until it reaches `state`.
    /// A server that disappears is treated as terminated, so waiting for
    /// any other state fails right away.
    pub async fn wait_for_server_to_obtain_state(
        &self,
        mut server: Node,
        timeout: Duration,
        sleep_time: Duration,
        state: NodeState,
    ) -> Result<Node, Error> {
        let started = Instant::now();
        while server.state != state {
            if started.elapsed() >= timeout {
                return Err(ServerError::Timeout {
                    id: server.id,
                    state,
                    waited: timeout,
                }
                .into());
            }
            tracing::debug!(
                "Server {} is {:?}, waiting for {:?}..",
                server.id,
                server.state,
                state
            );
            tokio::time::sleep(sleep_time).await;
            server = match self.get_by_id(&server.id).await? {
                Some(node) => node,
                None if state == NodeState::Terminated => Node {
                    state: NodeState::Terminated,
                    ..server
                },
                None => {
                    return Err(ServerError::Vanished {
                        id: server.id,
                        state,
                    }
                    .into())
                }
            };
        }
        Ok(server)
    }

    pub async fn connect_floating_ip(&self, server: &Node, ip: &str) -> Result<(), Error> {
        tracing::debug!("Connecting floating ip {} to server {}..", ip, server.id);
        self.driver.associate_address(server, ip).await
    }

    pub async fn disconnect_floating_ip(&self, ip: &str) -> Result<(), Error> {
        tracing::debug!("Disconnecting floating ip {}..", ip);
        self.driver.disassociate_address(ip).await
    }

    pub async fn get_image_by_name(&self, image_name: &str) -> Result<NodeImage, Error> {
        let images = self.driver.list_images().await?;
        images
            .into_iter()
            .find(|image| image.name == image_name)
            .ok_or_else(|| {
                ServerError::non_recoverable(format!("Image {image_name} was not found")).into()
            })
    }

    pub fn is_server_active(&self, server: &Node) -> bool {
        server.state == NodeState::Running
    }

    pub async fn create(
        &self,
        name: &str,
        server_context: &ServerProperties,
        provider_context: &ProviderContext,
    ) -> Result<Node, Error> {
        let image = match &server_context.image_name {
            Some(image_name) => self.get_image_by_name(image_name).await?,
            None => {
                return Err(
                    ServerError::non_recoverable("Image name is a required parameter").into(),
                )
            }
        };

        let network = server_context
            .network_name
            .clone()
            .ok_or_else(|| ServerError::non_recoverable("Network name is a required parameter"))?;

        let description = server_context.node_description.clone().unwrap_or_default();

        let password = server_context
            .node_password
            .clone()
            .ok_or_else(|| ServerError::non_recoverable("node_password is a required parameter"))?;

        let settings = NodeSettings {
            name: transform_resource_name(name, provider_context),
            image_id: image.id,
            password,
            description,
            network,
        };

        tracing::info!("Creating server {}..", settings.name);
        self.driver.create_node(&settings).await
    }
}
