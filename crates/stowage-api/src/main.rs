use stowage_core::Config;

// Use mimalloc as the global allocator for lower fragmentation under
// sustained streaming load, especially on musl-based container images.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let (_state, router) = stowage_api::setup::initialize_app(config.clone()).await?;

    stowage_api::setup::server::start_server(&config, router).await?;

    Ok(())
}
