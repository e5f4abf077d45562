use std::{sync::Arc, time::Duration};

use crate::{
    client::KubeClient,
    driver::ComputeDriver,
    error::is_non_recoverable,
    floating_ip::FloatingIpClient,
    model::{
        transform_resource_name, ManagedServer, ManagedServerStatus, Node, NodeState,
        ProviderContext, ServerStatus,
    },
    server::ServerClient,
};
use anyhow::{format_err, Error};
use futures::{StreamExt, TryFutureExt};
use kube::{
    runtime::{
        controller::{self, Action},
        finalizer::{self, finalizer, Event},
        watcher, Controller,
    },
    Api, Resource,
};

const MANAGER_NAME: &str = "managedserver.io/managed-server";
const FINALIZER_NAME: &str = "managedserver.io/managed-server-cleanup";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_SLEEP_TIME: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
enum OperatorError {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub struct Operator<K, D> {
    pub client: Arc<K>,
    pub servers: ServerClient<D>,
    pub floating_ips: FloatingIpClient<D>,
    pub provider_context: ProviderContext,
}

impl<K, D> Operator<K, D>
where
    K: KubeClient,
    D: ComputeDriver,
{
    pub fn new(client: Arc<K>, driver: Arc<D>, provider_context: ProviderContext) -> Self {
        Operator {
            client,
            servers: ServerClient::new(driver.clone()),
            floating_ips: FloatingIpClient::new(driver),
            provider_context,
        }
    }
}

impl<K, D> Operator<K, D>
where
    K: KubeClient + Sync + 'static,
    D: ComputeDriver + Sync + 'static,
{
    pub async fn run(self) -> Result<(), Error> {
        let main_api: Api<ManagedServer> = Api::all(self.client.underlying_client().clone());
        Controller::new(main_api, watcher::Config::default())
            .with_config(controller::Config::default().debounce(Duration::from_secs(5)))
            .run(
                |s, c| c.reconcile_or_cleanup(s),
                |s, e, c| c.error_policy(s, e),
                Arc::new(self),
            )
            .for_each(|_| futures::future::ready(()))
            .await;
        Ok(())
    }
}

impl<K, D> Operator<K, D>
where
    K: KubeClient,
    D: ComputeDriver,
{
    async fn reconcile_or_cleanup(
        self: Arc<Self>,
        server: Arc<ManagedServer>,
    ) -> Result<Action, finalizer::Error<OperatorError>> {
        let ns = server
            .metadata
            .namespace
            .as_deref()
            .ok_or(finalizer::Error::UnnamedObject)?;

        let api: Api<ManagedServer> = Api::namespaced(self.client.underlying_client().clone(), ns);

        finalizer(&api, FINALIZER_NAME, server, |event| async {
            match event {
                Event::Apply(s) => self.reconcile(s).map_err(OperatorError::Anyhow).await,
                Event::Cleanup(s) => self.cleanup(s).map_err(OperatorError::Anyhow).await,
            }
        })
        .await
    }

    async fn reconcile(self: Arc<Self>, server: Arc<ManagedServer>) -> Result<Action, Error> {
        let mut status = server.status.clone().unwrap_or_default();

        let mut node = if let Some(id) = status.server_id.clone() {
            tracing::debug!("Getting existing server..");
            if let Some(node) = self.servers.get_by_id(&id).await? {
                Some(node)
            } else {
                tracing::error!("Failed to find server by id. Resetting status..");
                self.reset_status(&server, &mut status).await?;
                None
            }
        } else {
            None
        };

        if status.server_id.is_none() && status.server_status == Some(ServerStatus::CREATING) {
            tracing::warn!("Server is in CREATING state, but no server id is recorded. Syncing..");

            let name = transform_resource_name(&get_server_name(&server)?, &self.provider_context);
            node = if let Some(node) = self.servers.get_by_name(&name).await? {
                status.server_id = Some(node.id.clone());
                self.patch_status(&server, &status).await?;
                Some(node)
            } else {
                tracing::error!("Failed to find server by name. Resetting status..");
                self.reset_status(&server, &mut status).await?;
                None
            };
        }

        let node = match node {
            Some(node) => node,
            None => {
                tracing::info!("Creating a server..");
                status.server_status = Some(ServerStatus::CREATING);
                self.patch_status(&server, &status).await?;
                let node = self
                    .servers
                    .create(
                        &get_server_name(&server)?,
                        &server.spec.server,
                        &self.provider_context,
                    )
                    .await?;
                status.server_id = Some(node.id.clone());
                self.patch_status(&server, &status).await?;
                node
            }
        };

        let (timeout, sleep_time) = get_wait_settings(&server);

        let node = if server.spec.stopped {
            self.ensure_stopped(node, timeout, sleep_time).await?
        } else if !self.servers.is_server_active(&node) {
            if node.state == NodeState::Stopped {
                tracing::info!("Starting the server..");
                self.servers.start_server(&node).await?;
            }
            self.servers
                .wait_for_server_to_be_running(node, timeout, sleep_time)
                .await?
        } else {
            node
        };

        self.sync_floating_ip(&server, &node, &mut status).await?;

        status.server_status = Some(if self.servers.is_server_active(&node) {
            ServerStatus::RUNNING
        } else {
            ServerStatus::STOPPED
        });
        self.patch_status(&server, &status).await?;

        Ok(Action::requeue(Duration::from_secs(3600)))
    }

    async fn cleanup(self: Arc<Self>, server: Arc<ManagedServer>) -> Result<Action, Error> {
        tracing::debug!("Running cleanup..");
        if let Some(status) = &server.status {
            if let Some(address) = &status.floating_ip {
                self.detach_floating_ip(address, status.floating_ip_allocated)
                    .await?;
            }

            if let Some(id) = &status.server_id {
                if let Some(node) = self.servers.get_by_id(id).await? {
                    let (timeout, sleep_time) = get_wait_settings(&server);
                    let node = self.ensure_stopped(node, timeout, sleep_time).await?;
                    tracing::info!("Destroying the server..");
                    self.servers.delete_server(&node).await?;
                    self.servers
                        .wait_for_server_to_be_deleted(node, timeout, sleep_time)
                        .await?;
                }
            }
        }

        Ok(Action::await_change())
    }

    fn error_policy(
        self: Arc<Self>,
        _server: Arc<ManagedServer>,
        err: &finalizer::Error<OperatorError>,
    ) -> Action {
        match err {
            finalizer::Error::ApplyFailed(OperatorError::Anyhow(e))
            | finalizer::Error::CleanupFailed(OperatorError::Anyhow(e))
                if is_non_recoverable(e) =>
            {
                tracing::error!("Non-recoverable error: {}", e);
                Action::await_change()
            }
            _ => {
                tracing::error!("Error: {}", err);
                Action::requeue(Duration::from_secs(5))
            }
        }
    }

    /// Brings the server to STOPPED. A server that is still being
    /// provisioned has to finish first.
    async fn ensure_stopped(
        &self,
        mut node: Node,
        timeout: Duration,
        sleep_time: Duration,
    ) -> Result<Node, Error> {
        if node.state == NodeState::Pending {
            node = self
                .servers
                .wait_for_server_to_be_running(node, timeout, sleep_time)
                .await?;
        }
        if self.servers.is_server_active(&node) {
            tracing::info!("Stopping the server..");
            self.servers.stop_server(&node).await?;
            node = self
                .servers
                .wait_for_server_to_be_stopped(node, timeout, sleep_time)
                .await?;
        }
        Ok(node)
    }

    async fn sync_floating_ip(
        &self,
        server: &ManagedServer,
        node: &Node,
        status: &mut ManagedServerStatus,
    ) -> Result<(), Error> {
        let wanted = server
            .spec
            .floating_ip
            .as_ref()
            .map(|floating_ip| floating_ip.address.as_deref());

        let keep = match (wanted, status.floating_ip.as_deref()) {
            (Some(None), Some(_)) => true,
            (Some(Some(address)), Some(current)) => address == current,
            _ => false,
        };

        if !keep {
            if let Some(current) = status.floating_ip.take() {
                self.detach_floating_ip(&current, status.floating_ip_allocated)
                    .await?;
                status.floating_ip_allocated = false;
                status.floating_ip_attached = false;
                self.patch_status(server, status).await?;
            }
        }

        let Some(address) = wanted else {
            return Ok(());
        };

        if status.floating_ip.is_none() {
            let (address, allocated) = match address {
                Some(address) => (address.to_string(), false),
                None => (self.floating_ips.create().await?.address, true),
            };
            status.floating_ip = Some(address);
            status.floating_ip_allocated = allocated;
            status.floating_ip_attached = false;
            // The block belongs to us from here on, record it before connecting.
            if allocated {
                self.patch_status(server, status).await?;
            }
        }

        if !status.floating_ip_attached {
            if let Some(address) = status.floating_ip.as_deref() {
                tracing::info!("Connecting floating ip {}..", address);
                self.servers.connect_floating_ip(node, address).await?;
                status.floating_ip_attached = true;
            }
        }

        Ok(())
    }

    /// Forgets a server that no longer exists. A recorded floating ip is
    /// detached (and released when allocated) before the status is cleared.
    async fn reset_status(
        &self,
        server: &ManagedServer,
        status: &mut ManagedServerStatus,
    ) -> Result<(), Error> {
        if let Some(address) = status.floating_ip.take() {
            self.detach_floating_ip(&address, status.floating_ip_allocated)
                .await?;
        }
        *status = Default::default();
        self.patch_status(server, status).await
    }

    async fn detach_floating_ip(&self, address: &str, allocated: bool) -> Result<(), Error> {
        tracing::info!("Disconnecting floating ip {}..", address);
        self.servers.disconnect_floating_ip(address).await?;
        if allocated {
            if let Some(ip) = self.floating_ips.get_by_ip(address).await? {
                self.floating_ips.delete(&ip).await?;
            } else {
                tracing::warn!("Floating ip {} is already released.", address);
            }
        }
        Ok(())
    }

    async fn patch_status(
        &self,
        server: &ManagedServer,
        status: &ManagedServerStatus,
    ) -> Result<(), Error> {
        self.client
            .patch_server_status(server, status, MANAGER_NAME)
            .await
    }
}

fn get_server_name(server: &ManagedServer) -> Result<String, Error> {
    match &server.spec.server.name {
        Some(name) => Ok(name.clone()),
        None => server
            .meta()
            .name
            .clone()
            .ok_or(format_err!("Missing server name")),
    }
}

fn get_wait_settings(server: &ManagedServer) -> (Duration, Duration) {
    (
        server.spec.timeout.unwrap_or(DEFAULT_TIMEOUT),
        server.spec.sleep_time.unwrap_or(DEFAULT_SLEEP_TIME),
    )
}
