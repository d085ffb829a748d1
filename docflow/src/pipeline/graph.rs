//! Executable dependency graph built from a declarative configuration.
//!
//! The graph is validated and built once per configuration, then reused for
//! every run against it; it is immutable after construction. Router-driven
//! branch pruning is a per-run overlay on the context, never a mutation of
//! the graph.

use super::config::{PipelineConfig, StageConfig};
use crate::core::StageKind;
use crate::errors::ConfigError;
use crate::processors::ProcessorRegistry;
use crate::stages::{AggregatorStage, ProcessorStage, RouterStage, Stage, ValidatorStage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A stage node: its declaration, resolved behavior, and graph position.
pub struct GraphNode {
    /// The stage's declarative configuration.
    pub config: StageConfig,
    /// The resolved stage implementation.
    pub stage: Arc<dyn Stage>,
    /// Stages that depend on this one (reverse edges).
    pub dependents: Vec<String>,
    /// The wave index this stage executes in.
    pub wave: usize,
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("name", &self.config.name)
            .field("wave", &self.wave)
            .field("dependents", &self.dependents)
            .finish()
    }
}

/// A validated, immutable execution graph with a precomputed wave schedule.
pub struct ExecutionGraph {
    name: String,
    nodes: HashMap<String, GraphNode>,
    waves: Vec<Vec<String>>,
}

impl ExecutionGraph {
    /// Validates a configuration into an executable graph.
    ///
    /// Wave placement is deterministic: a stage belongs to the earliest wave
    /// strictly after all its dependencies' waves, and stages within a wave
    /// keep declaration order (stable, reproducible scheduling).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for duplicate stage names, undeclared
    /// dependencies, dependency cycles, or unresolved registry references.
    pub fn build(
        config: &PipelineConfig,
        registry: &ProcessorRegistry,
    ) -> Result<Self, ConfigError> {
        if config.stages.is_empty() {
            return Err(ConfigError::Empty {
                pipeline: config.name.clone(),
            });
        }

        let mut declared: HashSet<&str> = HashSet::new();
        for stage in &config.stages {
            if stage.name.trim().is_empty() {
                return Err(ConfigError::InvalidName {
                    message: format!(
                        "Pipeline '{}' declares a stage with an empty name",
                        config.name
                    ),
                });
            }
            if !declared.insert(stage.name.as_str()) {
                return Err(ConfigError::DuplicateStage {
                    name: stage.name.clone(),
                });
            }
        }

        for stage in &config.stages {
            for dep in &stage.depends_on {
                if !declared.contains(dep.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        detect_cycles(config)?;

        // Registry references resolve now so misconfiguration fails at
        // build time, never mid-run.
        let mut stages: HashMap<String, Arc<dyn Stage>> = HashMap::new();
        for stage_config in &config.stages {
            stages.insert(
                stage_config.name.clone(),
                resolve_stage(stage_config, registry)?,
            );
        }

        let wave_index = compute_waves(config);
        let wave_count = wave_index.values().copied().max().map_or(0, |w| w + 1);
        let mut waves: Vec<Vec<String>> = vec![Vec::new(); wave_count];
        for stage in &config.stages {
            waves[wave_index[&stage.name]].push(stage.name.clone());
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for stage in &config.stages {
            for dep in &stage.depends_on {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(stage.name.clone());
            }
        }

        let nodes = config
            .stages
            .iter()
            .map(|stage_config| {
                let name = stage_config.name.clone();
                let node = GraphNode {
                    config: stage_config.clone(),
                    stage: Arc::clone(&stages[&name]),
                    dependents: dependents.remove(&name).unwrap_or_default(),
                    wave: wave_index[&name],
                };
                (name, node)
            })
            .collect();

        Ok(Self {
            name: config.name.clone(),
            nodes,
            waves,
        })
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the wave schedule: disjoint stage-name groups in execution
    /// order, declaration order within each wave.
    #[must_use]
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Looks up a node by stage name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    /// Returns the wave index of a stage.
    #[must_use]
    pub fn wave_of(&self, name: &str) -> Option<usize> {
        self.nodes.get(name).map(|n| n.wave)
    }

    /// Returns every stage reachable through dependent edges from `name`.
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> HashSet<String> {
        let mut reached = HashSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            if let Some(node) = self.nodes.get(&current) {
                for dependent in &node.dependents {
                    if reached.insert(dependent.clone()) {
                        frontier.push(dependent.clone());
                    }
                }
            }
        }
        reached
    }
}

impl std::fmt::Debug for ExecutionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGraph")
            .field("name", &self.name)
            .field("stages", &self.nodes.len())
            .field("waves", &self.waves)
            .finish()
    }
}

fn resolve_stage(
    config: &StageConfig,
    registry: &ProcessorRegistry,
) -> Result<Arc<dyn Stage>, ConfigError> {
    let missing = |reference: &str| ConfigError::UnknownProcessor {
        stage: config.name.clone(),
        processor: reference.to_string(),
    };
    let unnamed = || ConfigError::InvalidName {
        message: format!(
            "Stage '{}' is a {} and must name a registry reference",
            config.name, config.kind
        ),
    };

    match config.kind {
        StageKind::Processor => {
            let reference = config.processor.as_deref().ok_or_else(unnamed)?;
            let processor = registry.get(reference).ok_or_else(|| missing(reference))?;
            Ok(Arc::new(ProcessorStage::new(config.name.as_str(), processor)))
        }
        StageKind::Validator => {
            let reference = config.processor.as_deref().ok_or_else(unnamed)?;
            let validator = registry
                .get_validator(reference)
                .ok_or_else(|| missing(reference))?;
            Ok(Arc::new(ValidatorStage::new(config.name.as_str(), validator)))
        }
        StageKind::Router => {
            let reference = config.processor.as_deref().ok_or_else(unnamed)?;
            let router = registry
                .get_router(reference)
                .ok_or_else(|| missing(reference))?;
            Ok(Arc::new(RouterStage::new(config.name.as_str(), router)))
        }
        StageKind::Aggregator => match config.processor.as_deref() {
            Some(reference) => {
                let merger = registry
                    .get_merge(reference)
                    .ok_or_else(|| missing(reference))?;
                Ok(Arc::new(AggregatorStage::with_merge(config.name.as_str(), merger)))
            }
            None => Ok(Arc::new(AggregatorStage::new(config.name.as_str()))),
        },
    }
}

/// Depth-first cycle detection reporting the offending path.
fn detect_cycles(config: &PipelineConfig) -> Result<(), ConfigError> {
    let deps: HashMap<&str, &[String]> = config
        .stages
        .iter()
        .map(|s| (s.name.as_str(), s.depends_on.as_slice()))
        .collect();

    let mut finished: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        finished: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        pipeline: &str,
    ) -> Result<(), ConfigError> {
        if finished.contains(node) {
            return Ok(());
        }
        if on_stack.contains(node) {
            let start = stack.iter().position(|n| *n == node).unwrap_or(0);
            let mut path: Vec<String> = stack[start..].iter().map(ToString::to_string).collect();
            path.push(node.to_string());
            return Err(ConfigError::Cycle {
                pipeline: pipeline.to_string(),
                path,
            });
        }

        stack.push(node);
        on_stack.insert(node);

        if let Some(node_deps) = deps.get(node) {
            for dep in *node_deps {
                visit(dep, deps, finished, stack, on_stack, pipeline)?;
            }
        }

        stack.pop();
        on_stack.remove(node);
        finished.insert(node);
        Ok(())
    }

    // Visit in declaration order so the reported cycle is deterministic.
    for stage in &config.stages {
        visit(
            &stage.name,
            &deps,
            &mut finished,
            &mut stack,
            &mut on_stack,
            &config.name,
        )?;
    }
    Ok(())
}

/// Assigns each stage the earliest wave strictly after its dependencies.
fn compute_waves(config: &PipelineConfig) -> HashMap<String, usize> {
    let deps: HashMap<&str, &[String]> = config
        .stages
        .iter()
        .map(|s| (s.name.as_str(), s.depends_on.as_slice()))
        .collect();

    fn wave_of<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        memo: &mut HashMap<&'a str, usize>,
    ) -> usize {
        if let Some(&wave) = memo.get(node) {
            return wave;
        }
        let wave = deps
            .get(node)
            .map(|node_deps| {
                node_deps
                    .iter()
                    .map(|dep| wave_of(dep.as_str(), deps, memo) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        memo.insert(node, wave);
        wave
    }

    let mut memo = HashMap::new();
    config
        .stages
        .iter()
        .map(|s| {
            let wave = wave_of(s.name.as_str(), &deps, &mut memo);
            (s.name.clone(), wave)
        })
        .collect()
}
