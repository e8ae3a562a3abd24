//! `dlm status` – list every task with progress and speed.

use anyhow::Result;

use dlm_core::engine::Engine;

pub async fn run(engine: &Engine) -> Result<()> {
    let tasks = engine.get_all().await?;
    if tasks.is_empty() {
        println!("No downloads.");
        return Ok(());
    }

    println!(
        "{:<10} {:<12} {:>8} {:>12} NAME",
        "ID", "STATE", "PROG", "SPEED"
    );
    for task in tasks {
        let short_id: String = task.id.chars().take(8).collect();
        let speed = if task.speed_bps > 0.0 {
            format!("{}/s", human_bytes(task.speed_bps as u64))
        } else {
            "-".to_string()
        };
        println!(
            "{:<10} {:<12} {:>7.1}% {:>12} {}",
            short_id,
            task.state.as_str(),
            task.progress(),
            speed,
            task.target_filename.as_deref().unwrap_or(&task.url)
        );
        if let Some(err) = &task.error_message {
            println!("{:<10}   {err}", "");
        }
    }
    Ok(())
}

fn human_bytes(v: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    if v >= MIB {
        format!("{:.1}MB", v as f64 / MIB as f64)
    } else if v >= KIB {
        format!("{:.0}KB", v as f64 / KIB as f64)
    } else {
        format!("{v}B")
    }
}
