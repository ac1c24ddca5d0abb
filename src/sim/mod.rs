//! Weighted-graph route finding, run through the gateway as a demo agent.
//!
//! A [`Scenario`] describes an undirected graph and a set of agents, each with
//! a start and goal node. [`run_simulation`] sends one request per agent
//! through a [`Gateway`] whose executor is the scenario's [`RouteExecutor`],
//! so both gates see every route the "agents" produce.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{HailstormError, Result};
use crate::executor::{AgentExecutor, ExecutorRequest, ExecutorResponse};
use crate::gateway::{AgentRequest, Gateway, Outcome};

const DEFAULT_SCENARIO: &str = include_str!("../../scenarios/ring.json");

/// Undirected graph with non-negative edge weights.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    adjacency: BTreeMap<u32, Vec<(u32, f64)>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge in both directions. Negative or non-finite weights are
    /// rejected.
    pub fn add_edge(&mut self, a: u32, b: u32, weight: f64) -> Result<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(HailstormError::ConfigValidation(format!(
                "edge {a}-{b} has invalid weight {weight}"
            )));
        }
        self.adjacency.entry(a).or_default().push((b, weight));
        self.adjacency.entry(b).or_default().push((a, weight));
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Cheapest path from `from` to `to` and its total cost.
    pub fn shortest_path(&self, from: u32, to: u32) -> Option<(Vec<u32>, f64)> {
        if !self.adjacency.contains_key(&from) || !self.adjacency.contains_key(&to) {
            return None;
        }

        let mut dist: HashMap<u32, f64> = HashMap::from([(from, 0.0)]);
        let mut prev: HashMap<u32, u32> = HashMap::new();
        let mut heap = BinaryHeap::from([Frontier { cost: 0.0, node: from }]);

        while let Some(Frontier { cost, node }) = heap.pop() {
            if node == to {
                break;
            }
            if cost > dist.get(&node).copied().unwrap_or(f64::INFINITY) {
                continue;
            }
            for &(next, weight) in self.adjacency.get(&node).into_iter().flatten() {
                let candidate = cost + weight;
                if candidate < dist.get(&next).copied().unwrap_or(f64::INFINITY) {
                    dist.insert(next, candidate);
                    prev.insert(next, node);
                    heap.push(Frontier {
                        cost: candidate,
                        node: next,
                    });
                }
            }
        }

        let cost = *dist.get(&to)?;
        let mut path = vec![to];
        let mut node = to;
        while let Some(&p) = prev.get(&node) {
            path.push(p);
            node = p;
        }
        path.reverse();
        Some((path, cost))
    }
}

/// Min-heap entry: lowest cost first, ties broken by node id.
#[derive(Debug, PartialEq)]
struct Frontier {
    cost: f64,
    node: u32,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Executor whose "agents" answer with the cheapest route between their
/// start and goal nodes.
pub struct RouteExecutor {
    graph: Graph,
    agents: HashMap<String, (u32, u32)>,
}

impl RouteExecutor {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            agents: HashMap::new(),
        }
    }

    pub fn add_agent(&mut self, id: impl Into<String>, start: u32, goal: u32) {
        self.agents.insert(id.into(), (start, goal));
    }

    /// The text an agent produces.
    pub fn route_for(&self, agent_id: &str) -> Result<String> {
        let &(start, goal) = self
            .agents
            .get(agent_id)
            .ok_or_else(|| HailstormError::Executor(format!("unknown agent '{agent_id}'")))?;
        Ok(match self.graph.shortest_path(start, goal) {
            Some((path, cost)) => {
                let hops: Vec<String> = path.iter().map(u32::to_string).collect();
                format!("{agent_id} route: {} (cost {cost})", hops.join(" -> "))
            }
            None => format!("{agent_id} route: no path from {start} to {goal}"),
        })
    }
}

#[async_trait::async_trait]
impl AgentExecutor for RouteExecutor {
    async fn execute(&self, request: &ExecutorRequest) -> Result<ExecutorResponse> {
        let route = self.route_for(&request.agent_id)?;
        Ok(ExecutorResponse::text(route))
    }

    fn name(&self) -> &str {
        "route"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioAgent {
    pub id: String,
    pub start: u32,
    pub goal: u32,
    #[serde(default)]
    pub role: Option<String>,
}

/// A graph plus the agents that walk it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// `[a, b, weight]` triples.
    pub edges: Vec<(u32, u32, f64)>,
    pub agents: Vec<ScenarioAgent>,
}

impl Scenario {
    /// The four-node ring shipped with Hailstorm.
    pub fn builtin() -> Result<Self> {
        Ok(serde_json::from_str(DEFAULT_SCENARIO)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| HailstormError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn graph(&self) -> Result<Graph> {
        let mut graph = Graph::new();
        for &(a, b, w) in &self.edges {
            graph.add_edge(a, b, w)?;
        }
        Ok(graph)
    }

    /// Executor with every scenario agent registered.
    pub fn executor(&self) -> Result<RouteExecutor> {
        let mut executor = RouteExecutor::new(self.graph()?);
        for agent in &self.agents {
            executor.add_agent(&agent.id, agent.start, agent.goal);
        }
        Ok(executor)
    }
}

/// One agent's turn in a simulation.
#[derive(Debug)]
pub struct AgentRun {
    pub agent_id: String,
    pub result: Result<Outcome>,
}

/// Invoke every scenario agent once through `gateway`, in scenario order.
pub async fn run_simulation(gateway: &Gateway, scenario: &Scenario) -> Vec<AgentRun> {
    let mut runs = Vec::with_capacity(scenario.agents.len());
    for agent in &scenario.agents {
        let mut request = AgentRequest::new(
            &agent.id,
            format!("Find a route from node {} to node {}", agent.start, agent.goal),
        )
        .with_session(format!("sim-{}", agent.id));
        request.role = agent.role.clone();

        let result = gateway.invoke(request).await;
        match &result {
            Ok(Outcome::Allowed { response, .. }) => info!("{}: {}", agent.id, response),
            Ok(Outcome::Denied { stage, check, .. }) => {
                info!("{}: denied at {} gate by '{}'", agent.id, stage, check)
            }
            Err(e) => warn!("{}: {}", agent.id, e),
        }
        runs.push(AgentRun {
            agent_id: agent.id.clone(),
            result,
        });
    }
    runs
}
