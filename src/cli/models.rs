//! `gatekeep models`: list models offered by the server.

use super::ModelsArgs;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::ModelCatalog;
use crate::session::EngineContext;

/// Handle `gatekeep models`.
pub async fn handle_models(config: EngineConfig, args: ModelsArgs) -> Result<()> {
    let ctx = EngineContext::from_config(config)?;
    let catalog = ModelCatalog::new(ctx.service.clone(), ctx.store.clone(), ctx.config.model_cache_ttl);
    let list = if args.refresh {
        catalog.refresh().await?
    } else {
        catalog.models().await?
    };
    let preferred = catalog.preferred_model();

    for model in &list.models {
        let mut marks = Vec::new();
        if list.default.as_deref() == Some(model.id.as_str()) {
            marks.push("default");
        }
        if preferred.as_deref() == Some(model.id.as_str()) {
            marks.push("preferred");
        }
        let name = model.name.as_deref().unwrap_or(&model.id);
        if marks.is_empty() {
            println!("{:<32} {name}", model.id);
        } else {
            println!("{:<32} {name} ({})", model.id, marks.join(", "));
        }
    }
    Ok(())
}
