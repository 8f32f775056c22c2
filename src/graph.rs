// SPDX-License-Identifier: Apache-2.0

//! Translation graph over representation kinds, and the path sampler.
//!
//! Every (translator, accepted input kind, option profile) triple is one
//! edge. Paths are simple (no repeated kind) and bounded by a hop limit, so
//! sampling terminates on cyclic graphs.
//!
//! Sampling policy: when at most `n` distinct simple paths exist they are all
//! returned, in depth-first edge order. Otherwise paths are drawn as random
//! walks that pick uniformly, at each hop, among the outgoing edges that lead
//! to an unvisited kind from which the sink is still reachable within the
//! remaining hop budget. Duplicate walks are dropped, and the number of walks
//! is bounded.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

use crate::repr::{KindSelector, RepresentationKind, RepresentationRegistry};
use crate::translator::{OptionProfile, Translator};

/// Random walks attempted per requested path before giving up.
const WALKS_PER_PATH: usize = 64;

pub type EdgeId = usize;

#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub from: RepresentationKind,
    pub to: RepresentationKind,
    pub translator: Arc<dyn Translator>,
    pub profile: OptionProfile,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{}/{}]",
            self.from,
            self.to,
            self.translator.name(),
            self.profile.name
        )
    }
}

#[derive(Debug)]
pub enum GraphError {
    NoPath {
        source: RepresentationKind,
        sink: String,
    },
    EmptyProfiles(String),
    DuplicateTranslator(String),
    UnknownTranslator(String),
    UnknownProfile { translator: String, profile: String },
    /// A persisted strategy does not describe a path of this graph.
    BadStrategy(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::NoPath { source, sink } => {
                write!(f, "no translation path from {} to {}", source, sink)
            }
            GraphError::EmptyProfiles(name) => {
                write!(f, "translator {} declares no option profiles", name)
            }
            GraphError::DuplicateTranslator(name) => {
                write!(f, "translator {} is registered twice", name)
            }
            GraphError::UnknownTranslator(name) => write!(f, "unknown translator {}", name),
            GraphError::UnknownProfile {
                translator,
                profile,
            } => write!(f, "translator {} has no profile {}", translator, profile),
            GraphError::BadStrategy(msg) => write!(f, "invalid strategy: {}", msg),
        }
    }
}

impl std::error::Error for GraphError {}

/// One step of a compilation path.
#[derive(Debug, Clone)]
pub struct Hop {
    pub edge: EdgeId,
    pub translator: Arc<dyn Translator>,
    pub profile: OptionProfile,
}

/// Ordered translators connecting a source kind to a sink kind.
#[derive(Debug, Clone)]
pub struct CompilationPath {
    pub source: RepresentationKind,
    pub hops: Vec<Hop>,
}

impl CompilationPath {
    pub fn sink(&self) -> &RepresentationKind {
        match self.hops.last() {
            Some(hop) => hop.translator.output_kind(),
            None => &self.source,
        }
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.hops.iter().map(|h| h.edge).collect()
    }

    /// Human readable rendering, e.g. `verilog -[yosys/default]-> netlist@yosys`.
    pub fn describe(&self) -> String {
        let mut s = self.source.to_string();
        for hop in &self.hops {
            s.push_str(&format!(
                " -[{}/{}]-> {}",
                hop.translator.name(),
                hop.profile.name,
                hop.translator.output_kind()
            ));
        }
        s
    }

    pub fn to_strategy(&self) -> PathStrategy {
        PathStrategy {
            source: self.source.clone(),
            sink: self.sink().clone(),
            hops: self
                .hops
                .iter()
                .map(|h| HopStrategy {
                    translator: h.translator.name().to_string(),
                    profile: h.profile.name.clone(),
                    args: h.profile.args.clone(),
                    output: h.translator.output_kind().clone(),
                })
                .collect(),
        }
    }
}

/// Serializable form of a path, persisted as `strategy.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStrategy {
    pub source: RepresentationKind,
    pub sink: RepresentationKind,
    pub hops: Vec<HopStrategy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopStrategy {
    pub translator: String,
    pub profile: String,
    pub args: Vec<String>,
    pub output: RepresentationKind,
}

#[derive(Debug)]
pub struct TranslationGraph {
    translators: Vec<Arc<dyn Translator>>,
    edges: Vec<Edge>,
    outgoing: BTreeMap<RepresentationKind, Vec<EdgeId>>,
    registry: RepresentationRegistry,
}

impl TranslationGraph {
    /// Registers `translators` and declares `sources` as source kinds.
    pub fn new(
        translators: Vec<Arc<dyn Translator>>,
        sources: &[RepresentationKind],
    ) -> Result<Self, GraphError> {
        let mut registry = RepresentationRegistry::new();
        for s in sources {
            registry.declare(s.clone());
        }
        let mut names = HashSet::new();
        let mut edges = Vec::new();
        let mut outgoing: BTreeMap<RepresentationKind, Vec<EdgeId>> = BTreeMap::new();
        for t in &translators {
            if !names.insert(t.name().to_string()) {
                return Err(GraphError::DuplicateTranslator(t.name().to_string()));
            }
            if t.option_profiles().is_empty() {
                return Err(GraphError::EmptyProfiles(t.name().to_string()));
            }
            registry.declare(t.output_kind().clone());
            for input in t.input_kinds() {
                registry.declare(input.clone());
                for profile in t.option_profiles() {
                    let id = edges.len();
                    edges.push(Edge {
                        id,
                        from: input.clone(),
                        to: t.output_kind().clone(),
                        translator: t.clone(),
                        profile: profile.clone(),
                    });
                    outgoing.entry(input.clone()).or_default().push(id);
                }
            }
        }
        log::debug!(
            "translation graph: {} translators, {} kinds, {} edges",
            translators.len(),
            registry.len(),
            edges.len()
        );
        Ok(TranslationGraph {
            translators,
            edges,
            outgoing,
            registry,
        })
    }

    pub fn registry(&self) -> &RepresentationRegistry {
        &self.registry
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// One line per edge, in registration order.
    pub fn dump(&self) -> String {
        self.edges.iter().map(|e| format!("{}\n", e)).collect()
    }

    pub fn translators(&self) -> &[Arc<dyn Translator>] {
        &self.translators
    }

    pub fn translator(&self, name: &str) -> Option<&Arc<dyn Translator>> {
        self.translators.iter().find(|t| t.name() == name)
    }

    fn outgoing(&self, kind: &RepresentationKind) -> &[EdgeId] {
        self.outgoing.get(kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn path_from_edges(&self, source: &RepresentationKind, edge_ids: &[EdgeId]) -> CompilationPath {
        CompilationPath {
            source: source.clone(),
            hops: edge_ids
                .iter()
                .map(|&id| {
                    let e = &self.edges[id];
                    Hop {
                        edge: id,
                        translator: e.translator.clone(),
                        profile: e.profile.clone(),
                    }
                })
                .collect(),
        }
    }

    /// Minimum hop count from each kind to a kind matching `sink`, over
    /// edges admitted by `filter`.
    fn distances_to_sink(
        &self,
        sink: &KindSelector,
        filter: &dyn Fn(&Edge) -> bool,
    ) -> HashMap<RepresentationKind, usize> {
        let mut incoming: HashMap<&RepresentationKind, Vec<&Edge>> = HashMap::new();
        for e in self.edges.iter().filter(|e| filter(e)) {
            incoming.entry(&e.to).or_default().push(e);
        }
        let mut dist = HashMap::new();
        let mut queue = VecDeque::new();
        for kind in self.registry.iter().filter(|k| sink.matches(k)) {
            dist.insert(kind.clone(), 0);
            queue.push_back(kind.clone());
        }
        while let Some(kind) = queue.pop_front() {
            let d = dist[&kind];
            for e in incoming.get(&kind).map(|v| v.as_slice()).unwrap_or(&[]) {
                if !dist.contains_key(&e.from) {
                    dist.insert(e.from.clone(), d + 1);
                    queue.push_back(e.from.clone());
                }
            }
        }
        dist
    }

    /// Edges leaving `node` that can still complete a simple path within
    /// `remaining` hops.
    fn feasible_edges(
        &self,
        node: &RepresentationKind,
        visited: &HashSet<RepresentationKind>,
        remaining: usize,
        dist: &HashMap<RepresentationKind, usize>,
        filter: &dyn Fn(&Edge) -> bool,
    ) -> Vec<EdgeId> {
        self.outgoing(node)
            .iter()
            .copied()
            .filter(|&id| {
                let e = &self.edges[id];
                !visited.contains(&e.to)
                    && dist.get(&e.to).map_or(false, |d| d + 1 <= remaining)
                    && filter(e)
            })
            .collect()
    }

    /// Depth-first enumeration of up to `limit` simple paths, in stable edge
    /// order.
    pub fn enumerate_paths(
        &self,
        source: &RepresentationKind,
        sink: &KindSelector,
        max_hops: usize,
        limit: usize,
        filter: &dyn Fn(&Edge) -> bool,
    ) -> Vec<CompilationPath> {
        let dist = self.distances_to_sink(sink, filter);
        let mut found: Vec<Vec<EdgeId>> = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(source.clone());
        let mut stack = Vec::new();
        self.enumerate_from(
            source, sink, max_hops, limit, filter, &dist, &mut visited, &mut stack, &mut found,
        );
        found
            .iter()
            .map(|ids| self.path_from_edges(source, ids))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn enumerate_from(
        &self,
        node: &RepresentationKind,
        sink: &KindSelector,
        max_hops: usize,
        limit: usize,
        filter: &dyn Fn(&Edge) -> bool,
        dist: &HashMap<RepresentationKind, usize>,
        visited: &mut HashSet<RepresentationKind>,
        stack: &mut Vec<EdgeId>,
        found: &mut Vec<Vec<EdgeId>>,
    ) {
        if found.len() >= limit {
            return;
        }
        let remaining = max_hops - stack.len();
        for id in self.feasible_edges(node, visited, remaining, dist, filter) {
            if found.len() >= limit {
                return;
            }
            let to = self.edges[id].to.clone();
            stack.push(id);
            if sink.matches(&to) {
                found.push(stack.clone());
            } else {
                visited.insert(to.clone());
                self.enumerate_from(
                    &to, sink, max_hops, limit, filter, dist, visited, stack, found,
                );
                visited.remove(&to);
            }
            stack.pop();
        }
    }

    pub fn has_path(
        &self,
        source: &RepresentationKind,
        sink: &KindSelector,
        max_hops: usize,
        filter: &dyn Fn(&Edge) -> bool,
    ) -> bool {
        !self
            .enumerate_paths(source, sink, max_hops, 1, filter)
            .is_empty()
    }

    /// Draws up to `n` distinct simple paths from `source` to a kind matching
    /// `sink`. Identical arguments always give the identical ordered result.
    pub fn sample_paths(
        &self,
        source: &RepresentationKind,
        sink: &KindSelector,
        n: usize,
        seed: u64,
        max_hops: usize,
        filter: &dyn Fn(&Edge) -> bool,
    ) -> Result<Vec<CompilationPath>, GraphError> {
        let exhaustive = self.enumerate_paths(source, sink, max_hops, n.saturating_add(1), filter);
        if exhaustive.is_empty() {
            return Err(GraphError::NoPath {
                source: source.clone(),
                sink: sink.to_string(),
            });
        }
        if exhaustive.len() <= n {
            log::debug!(
                "sample_paths: only {} path(s) from {} to {}; returning all",
                exhaustive.len(),
                source,
                sink
            );
            return Ok(exhaustive);
        }

        let dist = self.distances_to_sink(sink, filter);
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let mut seen: HashSet<Vec<EdgeId>> = HashSet::new();
        let mut sampled: Vec<Vec<EdgeId>> = Vec::new();
        let attempts = n.saturating_mul(WALKS_PER_PATH);
        for _ in 0..attempts {
            if sampled.len() >= n {
                break;
            }
            let mut node = source.clone();
            let mut visited = HashSet::new();
            visited.insert(source.clone());
            let mut walk: Vec<EdgeId> = Vec::new();
            let accepted = loop {
                let remaining = max_hops - walk.len();
                let choices = self.feasible_edges(&node, &visited, remaining, &dist, filter);
                let id = match choices.choose(&mut rng) {
                    Some(&id) => id,
                    None => break false,
                };
                walk.push(id);
                node = self.edges[id].to.clone();
                if sink.matches(&node) {
                    break true;
                }
                visited.insert(node.clone());
            };
            if accepted && seen.insert(walk.clone()) {
                sampled.push(walk);
            }
        }
        log::debug!(
            "sample_paths: drew {} of {} requested path(s) from {} to {}",
            sampled.len(),
            n,
            source,
            sink
        );
        Ok(sampled
            .iter()
            .map(|ids| self.path_from_edges(source, ids))
            .collect())
    }

    /// Rebuilds a path from its persisted strategy.
    pub fn resolve_strategy(&self, strategy: &PathStrategy) -> Result<CompilationPath, GraphError> {
        let mut node = strategy.source.clone();
        let mut ids = Vec::new();
        for hop in &strategy.hops {
            if self.translator(&hop.translator).is_none() {
                return Err(GraphError::UnknownTranslator(hop.translator.clone()));
            }
            let id = self
                .outgoing(&node)
                .iter()
                .copied()
                .find(|&id| {
                    let e = &self.edges[id];
                    e.translator.name() == hop.translator && e.profile.name == hop.profile
                })
                .ok_or_else(|| GraphError::UnknownProfile {
                    translator: hop.translator.clone(),
                    profile: hop.profile.clone(),
                })?;
            ids.push(id);
            node = self.edges[id].to.clone();
        }
        if ids.is_empty() {
            return Err(GraphError::BadStrategy("strategy has no hops".to_string()));
        }
        if node != strategy.sink {
            return Err(GraphError::BadStrategy(format!(
                "strategy ends at {} instead of {}",
                node, strategy.sink
            )));
        }
        Ok(self.path_from_edges(&strategy.source, &ids))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::artifact::{CircuitArtifact, Payload};
    use crate::translator::{ToolError, TranslateContext};
    use pretty_assertions::assert_eq;

    /// In-memory translator used to build graphs for tests.
    #[derive(Debug)]
    pub struct FakeTranslator {
        name: String,
        inputs: Vec<RepresentationKind>,
        output: RepresentationKind,
        profiles: Vec<OptionProfile>,
    }

    impl FakeTranslator {
        pub fn new(name: &str, inputs: &[&str], output: &str, profiles: &[&str]) -> Arc<dyn Translator> {
            Arc::new(FakeTranslator {
                name: name.to_string(),
                inputs: inputs.iter().map(|s| s.parse().unwrap()).collect(),
                output: output.parse().unwrap(),
                profiles: profiles.iter().map(|p| OptionProfile::new(p, &[])).collect(),
            })
        }
    }

    impl Translator for FakeTranslator {
        fn name(&self) -> &str {
            &self.name
        }
        fn input_kinds(&self) -> &[RepresentationKind] {
            &self.inputs
        }
        fn output_kind(&self) -> &RepresentationKind {
            &self.output
        }
        fn option_profiles(&self) -> &[OptionProfile] {
            &self.profiles
        }
        fn run(
            &self,
            input: &CircuitArtifact,
            _profile: &OptionProfile,
            _ctx: &TranslateContext,
        ) -> Result<Payload, ToolError> {
            Ok(Payload::Text(Arc::from(input.text().unwrap().as_ref())))
        }
    }

    fn kind(s: &str) -> RepresentationKind {
        s.parse().unwrap()
    }

    fn all(_: &Edge) -> bool {
        true
    }

    /// verilog -> {a, b} -> netlist, with a cycle between a and b and two
    /// profiles on the first hop.
    fn diamond() -> TranslationGraph {
        TranslationGraph::new(
            vec![
                FakeTranslator::new("a", &["verilog"], "verilog@a", &["p0", "p1"]),
                FakeTranslator::new("b", &["verilog", "verilog@a"], "verilog@b", &["p0"]),
                FakeTranslator::new("back", &["verilog@b"], "verilog@a", &["p0"]),
                FakeTranslator::new("synth", &["verilog@a", "verilog@b"], "netlist@synth", &["p0"]),
            ],
            &[kind("verilog")],
        )
        .unwrap()
    }

    fn describe_all(paths: &[CompilationPath]) -> Vec<String> {
        paths.iter().map(|p| p.describe()).collect()
    }

    #[test]
    fn test_every_profile_is_an_edge() {
        let g = diamond();
        let from_source = g.edges().iter().filter(|e| e.from == kind("verilog")).count();
        // a/p0, a/p1, b/p0
        assert_eq!(from_source, 3);
        assert_eq!(g.edges().len(), 7);
    }

    #[test]
    fn test_dump_lists_every_edge() {
        let g = diamond();
        let dump = g.dump();
        assert_eq!(dump.lines().count(), g.edges().len());
        assert_eq!(dump.lines().next(), Some("verilog -> verilog@a [a/p0]"));
        assert!(dump.contains("verilog@b -> verilog@a [back/p0]\n"));
    }

    #[test]
    fn test_enumerates_all_simple_paths() {
        let g = diamond();
        let paths = g.enumerate_paths(&kind("verilog"), &"netlist".parse().unwrap(), 6, 100, &all);
        assert_eq!(
            describe_all(&paths),
            vec![
                "verilog -[a/p0]-> verilog@a -[b/p0]-> verilog@b -[synth/p0]-> netlist@synth",
                "verilog -[a/p0]-> verilog@a -[synth/p0]-> netlist@synth",
                "verilog -[a/p1]-> verilog@a -[b/p0]-> verilog@b -[synth/p0]-> netlist@synth",
                "verilog -[a/p1]-> verilog@a -[synth/p0]-> netlist@synth",
                "verilog -[b/p0]-> verilog@b -[back/p0]-> verilog@a -[synth/p0]-> netlist@synth",
                "verilog -[b/p0]-> verilog@b -[synth/p0]-> netlist@synth",
            ]
        );
        for p in &paths {
            let mut kinds = vec![p.source.clone()];
            kinds.extend(p.hops.iter().map(|h| h.translator.output_kind().clone()));
            let unique: HashSet<_> = kinds.iter().collect();
            assert_eq!(unique.len(), kinds.len(), "path revisits a kind: {}", p.describe());
        }
    }

    #[test]
    fn test_hop_bound_is_respected() {
        let g = diamond();
        let paths = g.enumerate_paths(&kind("verilog"), &"netlist".parse().unwrap(), 2, 100, &all);
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.len() <= 2 && !p.is_empty()));
    }

    #[test]
    fn test_small_path_sets_are_returned_whole() {
        let g = diamond();
        let sink: KindSelector = "netlist".parse().unwrap();
        let paths = g.sample_paths(&kind("verilog"), &sink, 10, 7, 6, &all).unwrap();
        assert_eq!(paths.len(), 6);
        let unique: HashSet<Vec<EdgeId>> = paths.iter().map(|p| p.edge_ids()).collect();
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn test_sampling_is_deterministic_per_seed() {
        let g = diamond();
        let sink: KindSelector = "netlist".parse().unwrap();
        let a = g.sample_paths(&kind("verilog"), &sink, 3, 1234, 6, &all).unwrap();
        let b = g.sample_paths(&kind("verilog"), &sink, 3, 1234, 6, &all).unwrap();
        assert_eq!(describe_all(&a), describe_all(&b));
        assert_eq!(a.len(), 3);
        let unique: HashSet<Vec<EdgeId>> = a.iter().map(|p| p.edge_ids()).collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_sampling_terminates_on_cycles_without_sink() {
        let g = TranslationGraph::new(
            vec![
                FakeTranslator::new("x", &["verilog", "verilog@y"], "verilog@x", &["p"]),
                FakeTranslator::new("y", &["verilog@x"], "verilog@y", &["p"]),
            ],
            &[kind("verilog")],
        )
        .unwrap();
        let err = g
            .sample_paths(&kind("verilog"), &"netlist".parse().unwrap(), 4, 0, 8, &all)
            .unwrap_err();
        assert!(matches!(err, GraphError::NoPath { .. }));
    }

    #[test]
    fn test_filter_excludes_edges() {
        let g = diamond();
        let sink: KindSelector = "netlist".parse().unwrap();
        let no_a = |e: &Edge| e.translator.name() != "a";
        let paths = g.sample_paths(&kind("verilog"), &sink, 10, 0, 6, &no_a).unwrap();
        assert_eq!(
            describe_all(&paths),
            vec![
                "verilog -[b/p0]-> verilog@b -[back/p0]-> verilog@a -[synth/p0]-> netlist@synth",
                "verilog -[b/p0]-> verilog@b -[synth/p0]-> netlist@synth",
            ]
        );
    }

    #[test]
    fn test_duplicate_translator_names_are_rejected() {
        let err = TranslationGraph::new(
            vec![
                FakeTranslator::new("a", &["verilog"], "netlist@a", &["p"]),
                FakeTranslator::new("a", &["verilog"], "netlist@a", &["p"]),
            ],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTranslator(_)));
    }

    #[test]
    fn test_strategy_round_trip() {
        let g = diamond();
        let sink: KindSelector = "netlist".parse().unwrap();
        let paths = g.sample_paths(&kind("verilog"), &sink, 10, 0, 6, &all).unwrap();
        for p in &paths {
            let json = serde_json::to_string(&p.to_strategy()).unwrap();
            let strategy: PathStrategy = serde_json::from_str(&json).unwrap();
            let resolved = g.resolve_strategy(&strategy).unwrap();
            assert_eq!(resolved.edge_ids(), p.edge_ids());
        }
    }
}
