//! Scripts command: list registered scripts in execution order

use anyhow::{Context, Result};
use tributary_core::DependencyGraph;

pub fn execute(provider: Option<&str>) -> Result<()> {
    let registry =
        tributary_connectors::builtin_registry().context("Failed to register providers")?;

    let providers: Vec<String> = match provider {
        Some(name) if registry.contains_provider(name) => vec![name.to_string()],
        Some(name) => anyhow::bail!("Unknown provider: {}", name),
        None => registry.providers(),
    };

    for name in providers {
        let descriptors = registry.descriptors_for(&name);
        let graph = DependencyGraph::build(&descriptors);
        let order = graph
            .topological_order()
            .with_context(|| format!("Provider {} has a dependency cycle", name))?;

        println!("{} ({} scripts)", name, descriptors.len());
        for id in order {
            let Some(descriptor) = descriptors.iter().find(|d| d.id() == id) else {
                continue;
            };
            let after: Vec<&str> = graph.prerequisites(&id).iter().map(|p| p.as_str()).collect();
            print!(
                "  {}  retention={}d",
                id,
                descriptor.retention_window.num_days()
            );
            if !after.is_empty() {
                print!("  after={}", after.join(","));
            }
            println!();
        }
    }
    Ok(())
}
