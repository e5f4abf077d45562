use crate::model::{FloatingIp, Node, NodeImage, NodeSettings};
use anyhow::Error;

#[cfg(test)]
use mockall::automock;

/// Provider driver the server and floating IP clients delegate to.
#[trait_variant::make(Send)]
#[cfg_attr(test, automock)]
pub trait ComputeDriver {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;
    async fn get_node(&self, id: &str) -> Result<Option<Node>, Error>;
    async fn list_images(&self) -> Result<Vec<NodeImage>, Error>;
    async fn create_node(&self, settings: &NodeSettings) -> Result<Node, Error>;
    async fn start_node(&self, node: &Node) -> Result<(), Error>;
    async fn shutdown_node_graceful(&self, node: &Node) -> Result<(), Error>;
    async fn destroy_node(&self, node: &Node) -> Result<bool, Error>;
    async fn associate_address(&self, node: &Node, address: &str) -> Result<(), Error>;
    async fn disassociate_address(&self, address: &str) -> Result<(), Error>;
    async fn list_addresses(&self) -> Result<Vec<FloatingIp>, Error>;
    async fn allocate_address(&self) -> Result<FloatingIp, Error>;
    async fn release_address(&self, address: &FloatingIp) -> Result<bool, Error>;
}
