use anyhow::{anyhow, Error};
use kube::{
    api::{Patch, PatchParams},
    Api, Client,
};

use crate::model::{ManagedServer, ManagedServerStatus};

#[cfg(test)]
use mockall::automock;

#[trait_variant::make(Send)]
#[cfg_attr(test, automock)]
pub trait KubeClient {
    fn underlying_client(&self) -> &Client;
    async fn patch_server_status(
        &self,
        server: &ManagedServer,
        status: &ManagedServerStatus,
        manager: &str,
    ) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct DefaultKubeClient {
    pub client: Client,
}

impl KubeClient for DefaultKubeClient {
    fn underlying_client(&self) -> &Client {
        &self.client
    }

    async fn patch_server_status(
        &self,
        server: &ManagedServer,
        status: &ManagedServerStatus,
        manager: &str,
    ) -> Result<(), Error> {
        let server_name = server
            .metadata
            .name
            .as_ref()
            .ok_or(anyhow!("Missing server name"))?;

        let server_namespace = server
            .metadata
            .namespace
            .as_ref()
            .ok_or(anyhow!("Missing server namespace"))?;

        let api: Api<ManagedServer> = Api::namespaced(self.client.clone(), server_namespace);
        let patch = serde_json::json!({
            "apiVersion": "managedserver.io/v1alpha1",
            "kind": "ManagedServer",
            "status": status
        });
        let patch = Patch::Apply(&patch);
        let params = PatchParams::apply(manager);
        api.patch_status(server_name, &params, &patch).await?;

        Ok(())
    }
}
