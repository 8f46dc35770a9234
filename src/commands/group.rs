use anyhow::Result;
use chrono::NaiveDate;
use regindex::config::Config;
use regindex::graph::{Depth, Direction, EdgeWindow, GroupTraversal, TraversalOptions};
use regindex::store::EdgeDirection;
use regindex::types::RegistryCode;

use super::open_workspace;

/// Arguments of the `group` command
pub struct GroupArgs {
    pub code: RegistryCode,
    pub direction: Direction,
    pub depth: Option<u32>,
    pub unbounded: bool,
    pub historical: bool,
    pub as_of: Option<NaiveDate>,
}

impl GroupArgs {
    fn options(&self, default_depth: u32) -> TraversalOptions {
        let depth = if self.unbounded {
            Depth::Unbounded
        } else {
            Depth::Limited(self.depth.unwrap_or(default_depth))
        };
        let window = match (self.historical, self.as_of) {
            (true, _) => EdgeWindow::All,
            (false, Some(date)) => EdgeWindow::AsOf(date),
            (false, None) => EdgeWindow::Active,
        };
        TraversalOptions::new(self.direction).with_depth(depth).with_window(window)
    }
}

pub async fn show_group(config: Config, args: GroupArgs) -> Result<()> {
    let options = args.options(config.traversal.default_max_depth);
    let workspace = open_workspace(config)?;

    let Some(start) = workspace.store.get_by_code(args.code)? else {
        println!("Company {} is not in the store", args.code);
        return Ok(());
    };
    let generation = workspace.store.stats()?.derived_generation;
    if generation == 0 {
        println!("Derived index has not been built yet. Run `regindex index` first.");
        return Ok(());
    }

    let members = GroupTraversal::new(workspace.store.clone()).walk(args.code, &options)?;

    println!("\nOwnership group of {} {} ({})", start.code, start.name, args.direction);
    println!("{}", "=".repeat(60));
    if members.is_empty() {
        println!("No related companies or holders found.");
        return Ok(());
    }

    for member in &members {
        let arrow = match member.via {
            EdgeDirection::Up => "owner",
            EdgeDirection::Down => "holding",
        };
        let share = member
            .share_percent
            .map(|p| format!("{:.2}%", p))
            .unwrap_or_else(|| "-".to_string());
        let name = match member.code() {
            Some(code) => workspace
                .store
                .get_by_code(code)?
                .map(|record| format!("{} {}", code, record.name))
                .unwrap_or_else(|| code.to_string()),
            None => member.node.to_string(),
        };
        println!(
            "{}[{}] {:<7} {:<50} {:>8}",
            "  ".repeat(member.depth as usize),
            member.depth,
            arrow,
            name,
            share
        );
    }
    println!("\n{} members", members.len());

    Ok(())
}
