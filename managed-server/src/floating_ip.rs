use std::sync::Arc;

use anyhow::Error;

use crate::{driver::ComputeDriver, model::FloatingIp};

pub struct FloatingIpClient<D> {
    pub driver: Arc<D>,
}

impl<D> FloatingIpClient<D>
where
    D: ComputeDriver,
{
    pub fn new(driver: Arc<D>) -> Self {
        FloatingIpClient { driver }
    }

    pub async fn get_by_ip(&self, address: &str) -> Result<Option<FloatingIp>, Error> {
        let addresses = self.driver.list_addresses().await?;
        Ok(addresses.into_iter().find(|ip| ip.address == address))
    }

    pub async fn create(&self) -> Result<FloatingIp, Error> {
        let ip = self.driver.allocate_address().await?;
        tracing::info!("Allocated floating ip {}", ip.address);
        Ok(ip)
    }

    pub async fn delete(&self, ip: &FloatingIp) -> Result<bool, Error> {
        tracing::info!("Releasing floating ip {}..", ip.address);
        self.driver.release_address(ip).await
    }
}
