use common::utils::config::get_config;
use tracing::error;

#[allow(dead_code)]
mod runtime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    runtime::init_tracing();

    let config = get_config()?;
    let db = runtime::connect(&config).await?;

    let handles = runtime::start_workers(db, &config).await?;
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task ended abnormally: {}", e);
        }
    }

    Ok(())
}
