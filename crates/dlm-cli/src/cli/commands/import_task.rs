//! `dlm import <manifest>` – join a split download as a partial task.

use anyhow::Result;
use std::path::Path;

use dlm_core::engine::Engine;

pub async fn run(
    engine: &Engine,
    path: &Path,
    parts: Option<&[u32]>,
    separate: bool,
) -> Result<()> {
    let outcome = engine.import_partial(path, parts, separate, None).await?;
    println!(
        "Imported {} task(s) into shared workspace {}",
        outcome.task_ids.len(),
        outcome.workspace.display()
    );
    for id in &outcome.task_ids {
        println!("  {id}");
    }
    Ok(())
}
