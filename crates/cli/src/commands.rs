//! Subcommands and their results.

use affinity::{AffinityConfig, AffinityProcessor, Assignment, DefaultAffinityKeyMapper, PartitionId};
use anyhow::{bail, ensure, Context};
use clap::Subcommand;
use corelib::{
    ClusterNode, NameHashResolver, NodeHashResolver, NodeId, RingBuilder, TopologyEvent, TopologySnapshot,
    TopologyVersion,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use streaming::EventRouter;
use tracing::info;

const CACHE: &str = "cli";

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the partition table for a set of nodes.
    Assign {
        /// Nodes as `name` or `name@host`, comma separated.
        #[arg(long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,
    },
    /// Simulate joins and leaves and report what moves.
    Rebalance {
        #[arg(long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,
        /// Nodes joining the topology.
        #[arg(long, value_delimiter = ',')]
        join: Vec<String>,
        /// Names of nodes leaving the topology.
        #[arg(long, value_delimiter = ',')]
        leave: Vec<String>,
    },
    /// Show the partition and owners of each key.
    Route {
        #[arg(long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Show the share of the hash ring owned by each node.
    Ring {
        #[arg(long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,
    },
    /// Route events (words) to single owners with the event router.
    Dispatch {
        #[arg(long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,
        #[arg(required = true)]
        events: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeLoad {
    pub primary: usize,
    pub backup: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyRoute {
    pub key: String,
    pub partition: PartitionId,
    pub owners: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandResult {
    Assignment {
        version: TopologyVersion,
        partitions: Vec<Vec<String>>,
        load: BTreeMap<String, NodeLoad>,
    },
    Rebalance {
        partitions: u32,
        moved_primaries: usize,
        changed_partitions: usize,
        before: BTreeMap<String, NodeLoad>,
        after: BTreeMap<String, NodeLoad>,
    },
    Routes {
        routes: Vec<KeyRoute>,
    },
    Ring {
        points: usize,
        shares: BTreeMap<String, f64>,
    },
    Dispatch {
        owners: BTreeMap<String, Vec<String>>,
    },
}

/// Parses `name` / `name@host` arguments into members joined in the given order.
///
/// Node ids are derived from the names so the same name always gets the
/// same id across invocations.
pub fn parse_nodes(args: &[String]) -> anyhow::Result<Vec<ClusterNode>> {
    args
        .iter()
        .enumerate()
        .map(|(order, arg)| parse_node(arg, order as u64))
        .collect()
}

fn parse_node(arg: &str, order: u64) -> anyhow::Result<ClusterNode> {
    let (name, host) = match arg.split_once('@') {
        Some((name, host)) => (name.trim(), Some(host.trim())),
        None => (arg.trim(), None),
    };
    ensure!(!name.is_empty(), "empty node name in {arg:?}");

    let mut node = ClusterNode::new(NodeId(0), order, name);
    node.id = NodeId(NameHashResolver.resolve(&node).0);
    if let Some(host) = host {
        ensure!(!host.is_empty(), "empty host in {arg:?}");
        node = node.with_host(host);
    }
    Ok(node)
}

fn names(nodes: &[ClusterNode]) -> BTreeMap<NodeId, String> {
    nodes.iter().map(|n| (n.id, n.name.clone())).collect()
}

fn load(assignment: &Assignment, names: &BTreeMap<NodeId, String>) -> BTreeMap<String, NodeLoad> {
    names
        .iter()
        .map(|(id, name)| {
            let parts = assignment.partitions_for(*id);
            (
                name.clone(),
                NodeLoad {
                    primary: parts.primary.len(),
                    backup: parts.backup.len(),
                },
            )
        })
        .collect()
}

fn owner_names(owners: &[NodeId], names: &BTreeMap<NodeId, String>) -> Vec<String> {
    owners
        .iter()
        .map(|id| names.get(id).cloned().unwrap_or_else(|| id.to_string()))
        .collect()
}

impl Command {
    pub fn execute(&self, config: &AffinityConfig) -> anyhow::Result<CommandResult> {
        match self {
            Command::Assign { nodes } => assign(config, nodes),
            Command::Rebalance { nodes, join, leave } => rebalance(config, nodes, join, leave),
            Command::Route { nodes, keys } => route(config, nodes, keys),
            Command::Ring { nodes } => ring(config, nodes),
            Command::Dispatch { nodes, events } => dispatch(config, nodes, events),
        }
    }
}

fn assign(config: &AffinityConfig, args: &[String]) -> anyhow::Result<CommandResult> {
    let nodes = parse_nodes(args)?;
    let names = names(&nodes);
    let processor = AffinityProcessor::new();
    let cache = processor.register(CACHE, config)?;

    let update = cache.on_topology_change(TopologyVersion(1), TopologySnapshot::new(nodes)?, None)?;
    let assignment = update.assignment().context("assignment was not published")?;

    Ok(CommandResult::Assignment {
        version: assignment.version(),
        partitions: assignment
            .table()
            .iter()
            .map(|owners| owner_names(owners, &names))
            .collect(),
        load: load(assignment, &names),
    })
}

fn rebalance(
    config: &AffinityConfig,
    args: &[String],
    join: &[String],
    leave: &[String],
) -> anyhow::Result<CommandResult> {
    let before_nodes = parse_nodes(args)?;
    let before = TopologySnapshot::new(before_nodes.clone())?;

    let mut after = before.clone();
    let mut last_event = None;
    for name in leave {
        let Some(node) = after.nodes().iter().find(|n| &n.name == name).map(|n| n.id) else {
            bail!("cannot remove unknown node {name}");
        };
        after = after.without(node);
        last_event = Some(TopologyEvent::left(node));
    }
    let mut joined = Vec::with_capacity(join.len());
    for (i, arg) in join.iter().enumerate() {
        let node = parse_node(arg, (args.len() + i) as u64)?;
        last_event = Some(TopologyEvent::joined(node.id));
        joined.push(node.clone());
        after = after.with(node)?;
    }

    let mut names = names(&before_nodes);
    names.extend(self::names(&joined));

    let processor = AffinityProcessor::new();
    let cache = processor.register(CACHE, config)?;
    let first = cache.on_topology_change(TopologyVersion(1), before, None)?;
    let second = cache.on_topology_change(TopologyVersion(2), after, last_event)?;
    let (first, second) = match (first.assignment(), second.assignment()) {
        (Some(a), Some(b)) => (Arc::clone(a), Arc::clone(b)),
        _ => bail!("assignment was not published"),
    };

    info!(
        joined = join.len(),
        left = leave.len(),
        moved = first.moved_primaries(&second).len(),
        "simulated rebalance"
    );
    Ok(CommandResult::Rebalance {
        partitions: config.partitions,
        moved_primaries: first.moved_primaries(&second).len(),
        changed_partitions: first.changed_partitions(&second).len(),
        before: load(&first, &names),
        after: load(&second, &names),
    })
}

fn route(config: &AffinityConfig, args: &[String], keys: &[String]) -> anyhow::Result<CommandResult> {
    let nodes = parse_nodes(args)?;
    let names = names(&nodes);
    let processor = AffinityProcessor::new();
    processor.register(CACHE, config)?;
    processor.on_topology_change(TopologyVersion(1), TopologySnapshot::new(nodes)?, None)?;

    let facade = processor.facade::<String>(CACHE, Arc::new(DefaultAffinityKeyMapper))?;
    let routes = keys
        .iter()
        .map(|key| -> anyhow::Result<KeyRoute> {
            Ok(KeyRoute {
                key: key.clone(),
                partition: facade.partition(key)?,
                owners: owner_names(&facade.all_nodes(key)?, &names),
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(CommandResult::Routes { routes })
}

fn ring(config: &AffinityConfig, args: &[String]) -> anyhow::Result<CommandResult> {
    let nodes = parse_nodes(args)?;
    let mut builder = RingBuilder::new().with_vnodes(config.replicas);
    for node in &nodes {
        builder = match node.replicas_override() {
            Some(replicas) => builder.add_member_with_vnodes(node.name.clone(), replicas),
            None => builder.add_member(node.name.clone()),
        };
    }
    let ring = builder.build();
    Ok(CommandResult::Ring {
        points: ring.point_count(),
        shares: ring.ownership(),
    })
}

fn dispatch(config: &AffinityConfig, args: &[String], events: &[String]) -> anyhow::Result<CommandResult> {
    let live: Vec<String> = parse_nodes(args)?.into_iter().map(|n| n.name).collect();
    let router = EventRouter::with_replicas(config.replicas);

    let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for event in events {
        let owner = router.route(event.as_str(), &live)?;
        owners.entry(owner).or_default().push(event.clone());
    }
    Ok(CommandResult::Dispatch { owners })
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Assignment {
                version,
                partitions,
                load,
            } => {
                writeln!(f, "topology version {version}")?;
                for (part, owners) in partitions.iter().enumerate() {
                    writeln!(f, "{part:>6}  {}", owners.join(", "))?;
                }
                write_load(f, load)
            }
            CommandResult::Rebalance {
                partitions,
                moved_primaries,
                changed_partitions,
                before,
                after,
            } => {
                writeln!(f, "partitions:          {partitions}")?;
                writeln!(f, "moved primaries:     {moved_primaries}")?;
                writeln!(f, "changed partitions:  {changed_partitions}")?;
                writeln!(f, "before:")?;
                write_load(f, before)?;
                writeln!(f, "after:")?;
                write_load(f, after)
            }
            CommandResult::Routes { routes } => {
                for route in routes {
                    writeln!(f, "{}  partition {}  -> {}", route.key, route.partition, route.owners.join(", "))?;
                }
                Ok(())
            }
            CommandResult::Ring { points, shares } => {
                writeln!(f, "{points} points")?;
                for (name, share) in shares {
                    writeln!(f, "{name:<20} {:>6.2}%", share * 100.0)?;
                }
                Ok(())
            }
            CommandResult::Dispatch { owners } => {
                for (node, events) in owners {
                    writeln!(f, "{node:<20} {}", events.join(" "))?;
                }
                Ok(())
            }
        }
    }
}

fn write_load(f: &mut fmt::Formatter<'_>, load: &BTreeMap<String, NodeLoad>) -> fmt::Result {
    for (name, l) in load {
        writeln!(f, "  {name:<20} primary {:>6}  backup {:>6}", l.primary, l.backup)?;
    }
    Ok(())
}
