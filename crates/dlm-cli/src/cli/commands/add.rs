//! `dlm add <url>` – create a new download task.

use anyhow::Result;
use std::path::PathBuf;

use dlm_core::engine::{AddRequest, Engine};
use dlm_core::session::SessionDescriptor;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    engine: &Engine,
    url: String,
    referer: Option<String>,
    user_agent: Option<String>,
    filename: Option<String>,
    size: u64,
    output: Option<PathBuf>,
    start: bool,
) -> Result<()> {
    let mut req = AddRequest::url(url.clone());
    req.session = SessionDescriptor {
        referer,
        user_agent,
        ..Default::default()
    };
    req.target_filename = filename;
    req.total_size = size;
    req.output_path = output;

    let id = engine.add(req).await?;
    println!("Added {id} for URL: {url}");
    if start {
        engine.start(&id).await?;
    }
    Ok(())
}
