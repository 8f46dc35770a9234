//! Breadth-first walk over ownership edges

use chrono::NaiveDate;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use super::DEFAULT_MAX_DEPTH;
use crate::store::{EdgeDirection, RegistryStore, StoreError};
use crate::types::{Holder, OwnershipEdge, RegistryCode, Validity};

/// Which way to walk from the start company
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Towards owners
    #[default]
    Up,
    /// Towards holdings
    Down,
    /// Owners first, then holdings
    Both,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Both => "both",
        })
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" | "owners" => Ok(Direction::Up),
            "down" | "holdings" => Ok(Direction::Down),
            "both" => Ok(Direction::Both),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// How far to expand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Limited(u32),
    Unbounded,
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Limited(DEFAULT_MAX_DEPTH)
    }
}

impl Depth {
    fn allows(&self, depth: u32) -> bool {
        match self {
            Depth::Limited(max) => depth <= *max,
            Depth::Unbounded => true,
        }
    }
}

/// Which edges take part in the walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EdgeWindow {
    /// Edges without an end date
    #[default]
    Active,
    /// Edges valid on the date
    AsOf(NaiveDate),
    /// Every edge ever recorded
    All,
}

impl EdgeWindow {
    pub fn includes(&self, edge: &OwnershipEdge) -> bool {
        match self {
            EdgeWindow::Active => edge.is_open(),
            EdgeWindow::AsOf(date) => edge.is_valid_on(*date),
            EdgeWindow::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalOptions {
    pub direction: Direction,
    pub max_depth: Depth,
    pub window: EdgeWindow,
}

impl TraversalOptions {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ..Default::default()
        }
    }

    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_window(mut self, window: EdgeWindow) -> Self {
        self.window = window;
        self
    }
}

/// A node reached from the start company
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember {
    pub node: Holder,
    /// Edges between the start company and this node
    pub depth: u32,
    /// Nodes from the start company (inclusive) to this one (inclusive)
    pub path: Vec<Holder>,
    /// Share on the edge that reached this node
    pub share_percent: Option<f64>,
    /// Walk that reached this node
    pub via: EdgeDirection,
}

impl GroupMember {
    /// Registry code, when the node is a company in the store
    pub fn code(&self) -> Option<RegistryCode> {
        self.node.company()
    }

    /// Persons and external entities are never expanded
    pub fn is_terminal(&self) -> bool {
        self.code().is_none()
    }
}

/// Walks ownership edges stored by the index builder
pub struct GroupTraversal {
    store: Arc<dyn RegistryStore>,
}

impl GroupTraversal {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    /// Every node reachable from `start`, ordered by depth, then companies by
    /// code, then terminal holders by name. The start company is never part
    /// of the result and each node appears once.
    pub fn walk(&self, start: RegistryCode, options: &TraversalOptions) -> Result<Vec<GroupMember>, StoreError> {
        if self.store.get_by_code(start)?.is_none() {
            return Err(StoreError::NotFound(start));
        }

        let mut visited: HashSet<Holder> = HashSet::new();
        visited.insert(Holder::Company(start));
        let mut members = Vec::new();

        if matches!(options.direction, Direction::Up | Direction::Both) {
            self.walk_one(start, EdgeDirection::Up, options, &mut visited, &mut members)?;
        }
        if matches!(options.direction, Direction::Down | Direction::Both) {
            self.walk_one(start, EdgeDirection::Down, options, &mut visited, &mut members)?;
        }

        debug!(
            "Walked {} from {}: {} members",
            options.direction,
            start,
            members.len()
        );
        Ok(members)
    }

    fn walk_one(
        &self,
        start: RegistryCode,
        direction: EdgeDirection,
        options: &TraversalOptions,
        visited: &mut HashSet<Holder>,
        members: &mut Vec<GroupMember>,
    ) -> Result<(), StoreError> {
        let mut frontier: Vec<(RegistryCode, Vec<Holder>)> = vec![(start, vec![Holder::Company(start)])];
        let mut depth = 0u32;

        while !frontier.is_empty() && options.max_depth.allows(depth + 1) {
            depth += 1;
            let mut level: Vec<GroupMember> = Vec::new();

            for (code, path) in &frontier {
                for edge in self.store.read_ownership_edges(*code, direction)? {
                    if !options.window.includes(&edge) {
                        continue;
                    }
                    let node = match direction {
                        EdgeDirection::Up => edge.holder.clone(),
                        EdgeDirection::Down => Holder::Company(edge.held),
                    };
                    if !visited.insert(node.clone()) {
                        continue;
                    }
                    let mut node_path = path.clone();
                    node_path.push(node.clone());
                    level.push(GroupMember {
                        node,
                        depth,
                        path: node_path,
                        share_percent: edge.share_percent,
                        via: direction,
                    });
                }
            }

            // Holder orders companies by code ahead of persons and externals by name
            level.sort_by(|a, b| a.node.cmp(&b.node));
            frontier = level
                .iter()
                .filter_map(|m| m.code().map(|code| (code, m.path.clone())))
                .collect();
            members.extend(level);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SledStore;
    use crate::types::{CompanyRecord, PersonKey};

    fn company(code: u64) -> Holder {
        Holder::Company(RegistryCode(code))
    }

    fn person(name: &str) -> Holder {
        Holder::Person(PersonKey {
            name: name.to_string(),
            id_code: None,
        })
    }

    fn edge(holder: Holder, held: u64) -> OwnershipEdge {
        OwnershipEdge {
            holder,
            held: RegistryCode(held),
            share_percent: Some(100.0),
            valid_from: None,
            valid_to: None,
        }
    }

    fn graph(codes: &[u64], edges: &[OwnershipEdge]) -> GroupTraversal {
        let store = SledStore::temporary().unwrap();
        for code in codes {
            store.upsert(CompanyRecord::new(RegistryCode(*code), format!("Company {}", code))).unwrap();
        }
        let mut writer = store.derived_writer().unwrap();
        for edge in edges {
            writer.add_edge(edge).unwrap();
        }
        writer.commit().unwrap();
        GroupTraversal::new(Arc::new(store))
    }

    fn nodes(members: &[GroupMember]) -> Vec<(Holder, u32)> {
        members.iter().map(|m| (m.node.clone(), m.depth)).collect()
    }

    #[test]
    fn test_cycle_upwards_returns_each_node_once() {
        // A=1 holds B=2, B holds C=3, C holds A
        let traversal = graph(&[1, 2, 3], &[edge(company(1), 2), edge(company(2), 3), edge(company(3), 1)]);
        let options = TraversalOptions::new(Direction::Up).with_depth(Depth::Limited(5));

        let members = traversal.walk(RegistryCode(1), &options).unwrap();
        assert_eq!(nodes(&members), vec![(company(3), 1), (company(2), 2)]);
        assert_eq!(members[1].path, vec![company(1), company(3), company(2)]);
    }

    #[test]
    fn test_self_loop_terminates() {
        let traversal = graph(&[1], &[edge(company(1), 1)]);
        let options = TraversalOptions::new(Direction::Both).with_depth(Depth::Unbounded);
        assert!(traversal.walk(RegistryCode(1), &options).unwrap().is_empty());
    }

    #[test]
    fn test_persons_are_terminal_and_reported_once() {
        // Mari holds 1 and 2; 2 holds 1
        let traversal = graph(
            &[1, 2],
            &[edge(person("Mari"), 1), edge(company(2), 1), edge(person("Mari"), 2), edge(person("Anu"), 2)],
        );
        let members = traversal.walk(RegistryCode(1), &TraversalOptions::default()).unwrap();
        assert_eq!(
            nodes(&members),
            vec![(company(2), 1), (person("Mari"), 1), (person("Anu"), 2)]
        );
        assert!(members[1].is_terminal());
    }

    #[test]
    fn test_depth_limit_and_level_order() {
        // 1 holds 3 and 2; 2 holds 4
        let traversal = graph(&[1, 2, 3, 4], &[edge(company(1), 3), edge(company(1), 2), edge(company(2), 4)]);

        let shallow = TraversalOptions::new(Direction::Down).with_depth(Depth::Limited(1));
        let members = traversal.walk(RegistryCode(1), &shallow).unwrap();
        assert_eq!(nodes(&members), vec![(company(2), 1), (company(3), 1)]);

        let deep = TraversalOptions::new(Direction::Down).with_depth(Depth::Unbounded);
        let members = traversal.walk(RegistryCode(1), &deep).unwrap();
        assert_eq!(nodes(&members), vec![(company(2), 1), (company(3), 1), (company(4), 2)]);
        assert!(members.iter().all(|m| m.via == EdgeDirection::Down));
    }

    #[test]
    fn test_both_directions_share_visited_set() {
        // 1 holds 2, 2 holds 3, 3 holds 1
        let traversal = graph(&[1, 2, 3], &[edge(company(1), 2), edge(company(2), 3), edge(company(3), 1)]);
        let options = TraversalOptions::new(Direction::Both);

        let members = traversal.walk(RegistryCode(2), &options).unwrap();
        // Upward reaches everything, so the downward walk adds nothing
        assert_eq!(nodes(&members), vec![(company(1), 1), (company(3), 2)]);
        assert!(members.iter().all(|m| m.via == EdgeDirection::Up));
    }

    #[test]
    fn test_edge_window() {
        let mut closed = edge(company(2), 1);
        closed.valid_from = NaiveDate::from_ymd_opt(2010, 1, 1);
        closed.valid_to = NaiveDate::from_ymd_opt(2015, 1, 1);
        let traversal = graph(&[1, 2, 3], &[closed, edge(company(3), 1)]);

        let active = traversal.walk(RegistryCode(1), &TraversalOptions::default()).unwrap();
        assert_eq!(nodes(&active), vec![(company(3), 1)]);

        let all = TraversalOptions::default().with_window(EdgeWindow::All);
        assert_eq!(traversal.walk(RegistryCode(1), &all).unwrap().len(), 2);

        let in_2012 = TraversalOptions::default()
            .with_window(EdgeWindow::AsOf(NaiveDate::from_ymd_opt(2012, 6, 1).unwrap()));
        assert_eq!(traversal.walk(RegistryCode(1), &in_2012).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_start() {
        let traversal = graph(&[1], &[]);
        assert!(matches!(
            traversal.walk(RegistryCode(9), &TraversalOptions::default()),
            Err(StoreError::NotFound(RegistryCode(9)))
        ));
        assert_eq!("Both".parse::<Direction>(), Ok(Direction::Both));
    }
}
