mod dimension_data;

use anyhow::Error;
use dimension_data::DimensionData;
use kube::Client;
use managed_server::{client::DefaultKubeClient, model::ProviderContext, operator::Operator};
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();
    tracing::debug!("Starting..");

    let client = Client::try_default().await?;
    let client = DefaultKubeClient { client };
    let client = Arc::new(client);

    let driver = DimensionData::new(de_env::from_env()?);
    let driver = Arc::new(driver);

    let provider_context: ProviderContext = de_env::from_env()?;

    let operator = Operator::new(client, driver, provider_context);

    operator.run().await?;

    tracing::debug!("Terminating..");

    Ok(())
}
