use std::path::Path;

use tianyi_core::{GraphEntity, GraphRelation, TianyiError};
use tianyi_memory::{GraphDocument, MemoryManager, import_graph, load_aliases};

/// Look up an entity by id first, then by name or alias.
async fn resolve(manager: &MemoryManager, name: &str) -> tianyi_core::Result<GraphEntity> {
    let graph = manager.graph();
    if let Some(entity) = graph.get_entity(name).await? {
        return Ok(entity);
    }
    graph
        .find_entity(name)
        .await?
        .ok_or_else(|| TianyiError::NotFound(format!("entity '{name}'")))
}

pub(super) async fn cmd_entity_add(
    manager: &MemoryManager,
    id: String,
    entity_type: String,
    name: Option<String>,
    aliases: Vec<String>,
    attributes: Vec<(String, String)>,
) -> tianyi_core::Result<()> {
    let mut entity = GraphEntity::new(id, entity_type);
    if let Some(name) = name {
        entity = entity.with_name(name);
    }
    entity.aliases = aliases;
    entity.attributes.extend(attributes);

    let stored = manager.graph().upsert_entity(entity).await?;
    manager.refresh_lexicon().await;
    println!(
        "✅ {} ({}) revision {}",
        stored.id, stored.entity_type, stored.revision
    );
    Ok(())
}

pub(super) async fn cmd_entity_show(manager: &MemoryManager, name: &str) -> tianyi_core::Result<()> {
    let entity = resolve(manager, name).await?;
    println!("\x1b[1m{}\x1b[0m  [{}]", entity.display_name(), entity.entity_type);
    println!("   id       {}", entity.id);
    if !entity.aliases.is_empty() {
        println!("   aliases  {}", entity.aliases.join(", "));
    }
    for (key, value) in &entity.attributes {
        println!("   {key:<8} {value}");
    }
    println!(
        "   updated  {} (revision {})",
        entity.updated_at.format("%Y-%m-%d %H:%M:%S"),
        entity.revision
    );
    Ok(())
}

pub(super) async fn cmd_relation_add(
    manager: &MemoryManager,
    from: String,
    relation_type: String,
    to: String,
    attributes: Vec<(String, String)>,
) -> tianyi_core::Result<()> {
    let from = resolve(manager, &from).await.map(|e| e.id).unwrap_or(from);
    let to = resolve(manager, &to).await.map(|e| e.id).unwrap_or(to);
    let mut relation = GraphRelation::new(from, relation_type, to);
    relation.attributes.extend(attributes);

    let stored = manager.graph().upsert_relation(relation).await?;
    println!("✅ {}", stored.id);
    Ok(())
}

pub(super) async fn cmd_neighbors(
    manager: &MemoryManager,
    name: &str,
    relation_type: Option<&str>,
) -> tianyi_core::Result<()> {
    let entity = resolve(manager, name).await?;
    let edges = manager.graph().neighbor_edges(&entity.id, relation_type).await?;
    if edges.is_empty() {
        println!("{} has no neighbors.", entity.display_name());
        return Ok(());
    }
    for edge in edges {
        println!("{}", edge.describe(entity.display_name()));
    }
    Ok(())
}

pub(super) async fn cmd_path(
    manager: &MemoryManager,
    from: &str,
    to: &str,
    depth: usize,
    limit: usize,
) -> tianyi_core::Result<()> {
    let from = resolve(manager, from).await?;
    let to = resolve(manager, to).await?;
    let paths = manager.graph().find_path(&from.id, &to.id, depth, limit).await?;
    if paths.is_empty() {
        println!(
            "No path from {} to {} within {depth} hops.",
            from.display_name(),
            to.display_name()
        );
        return Ok(());
    }
    for path in paths {
        println!("{} hops: {path}", path.len());
    }
    Ok(())
}

pub(super) async fn cmd_import_graph(
    manager: &MemoryManager,
    file: &Path,
    aliases: Option<&Path>,
) -> tianyi_core::Result<()> {
    let document = GraphDocument::from_file(file)?;
    let aliases = match aliases {
        Some(path) => load_aliases(path)?,
        None => Default::default(),
    };
    let report = import_graph(manager.graph().as_ref(), &document, &aliases).await?;
    manager.refresh_lexicon().await;

    println!(
        "✅ imported {} entities, {} relations, {} aliases",
        report.entities, report.relations, report.aliases
    );
    for skipped in &report.skipped {
        println!("⚠️  skipped {skipped}");
    }
    Ok(())
}
