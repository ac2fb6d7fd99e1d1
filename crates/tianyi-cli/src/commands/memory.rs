use serde_json::json;

use tianyi_core::{Budget, InstructionKind, MemoryEvent, Role};
use tianyi_memory::MemoryManager;

use super::truncate_output;

pub(super) async fn cmd_remember(
    mut manager: MemoryManager,
    role: Role,
    text: String,
) -> tianyi_core::Result<()> {
    let outcome = manager.remember(MemoryEvent::new(role, text)).await;

    println!(
        "✅ buffered ({} / {} turns)",
        manager.buffer().len(),
        manager.buffer().window_size()
    );
    for kind in [InstructionKind::Vector, InstructionKind::Entity, InstructionKind::Relation] {
        if outcome.succeeded.contains(&kind) {
            println!("   stored {kind}");
        }
        for error in outcome.failed.get(&kind).into_iter().flatten() {
            println!("❌ {kind} write failed: {error}");
        }
    }
    if let Some(e) = &outcome.extraction_error {
        println!("⚠️  extraction failed, kept in buffer only: {e}");
    }
    if let Some(e) = &outcome.summary_error {
        println!("⚠️  summary not updated: {e}");
    }
    Ok(())
}

pub(super) async fn cmd_recall(
    manager: &MemoryManager,
    query: &str,
    max_items: Option<usize>,
    max_tokens: Option<usize>,
    json: bool,
) -> tianyi_core::Result<()> {
    let recall = match (max_items, max_tokens) {
        (_, Some(tokens)) => manager.recall(query, Budget::MaxTokens(tokens)).await,
        (Some(items), None) => manager.recall(query, Budget::MaxItems(items)).await,
        (None, None) => manager.recall_default(query).await,
    };

    if json {
        let degraded: Vec<_> = recall
            .degraded
            .iter()
            .map(|(source, error)| json!({ "source": source, "error": error.to_string() }))
            .collect();
        let out = json!({
            "items": recall.items,
            "summary": recall.summary,
            "degraded": degraded,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if let Some(summary) = &recall.summary {
        println!("\x1b[1mSummary\x1b[0m");
        println!("   {}", truncate_output(summary, 200));
    }
    if recall.items.is_empty() {
        println!("No memory for this query.");
    }
    for item in &recall.items {
        let color = match item.provenance {
            tianyi_core::Provenance::Buffer => "\x1b[37m",
            tianyi_core::Provenance::Vector => "\x1b[36m",
            tianyi_core::Provenance::Graph => "\x1b[35m",
        };
        println!(
            "{color}{:<6}\x1b[0m \x1b[90m{:.3}\x1b[0m  {}",
            item.provenance.to_string(),
            item.score,
            truncate_output(&item.text, 120)
        );
    }
    for (source, error) in &recall.degraded {
        println!("⚠️  {source} unavailable: {error}");
    }
    Ok(())
}

pub(super) async fn cmd_forget(
    manager: &MemoryManager,
    ids: Vec<String>,
    entity: bool,
) -> tianyi_core::Result<()> {
    if entity {
        for id in &ids {
            if manager.forget_entity(id).await? {
                println!("✅ removed entity {id}");
            } else {
                println!("❌ no entity {id}");
            }
        }
    } else {
        let removed = manager.forget_vector(&ids).await?;
        println!("✅ removed {removed} of {} vector records", ids.len());
    }
    Ok(())
}

pub(super) async fn cmd_stats(manager: &MemoryManager, json: bool) -> tianyi_core::Result<()> {
    let stats = manager.stats().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("\x1b[1mMemory\x1b[0m");
    println!("   collection     {}", stats.collection);
    println!("   vector records {}", stats.vector_records);
    println!(
        "   graph          {} entities, {} relations, {} aliases",
        stats.graph.entities, stats.graph.relations, stats.graph.aliases
    );
    println!(
        "   buffer         {} / {} turns{}",
        stats.buffered_turns,
        stats.window_size,
        if stats.has_summary { " + summary" } else { "" }
    );
    Ok(())
}
