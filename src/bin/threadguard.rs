use anyhow::Result;
use std::sync::Arc;
use threadguard::{config::Settings, run, AppContext};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    let ctx: Arc<AppContext> = AppContext::bootstrap(settings).await?;
    run(ctx).await
}
