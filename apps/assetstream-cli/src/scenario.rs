use std::path::Path;

use anyhow::Context;
use assetstream_common::{Priority, Vec3};
use assetstream_core::StreamConfig;
use serde::{Deserialize, Serialize};

/// A YAML-described streaming run: engine config, the resources to
/// register and the path the viewer walks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub config: StreamConfig,
    /// Simulated seconds between cycles.
    pub tick_secs: f64,
    pub resources: Vec<ResourceSpec>,
    /// Viewer waypoints, walked at constant speed over the run.
    pub path: Vec<[f32; 3]>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            config: StreamConfig::default(),
            tick_secs: 0.1,
            resources: Vec::new(),
            path: vec![[0.0; 3]],
        }
    }
}

/// One simulated asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub key: String,
    pub position: [f32; 3],
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Cycles the simulated load stays pending.
    #[serde(default = "default_load_polls")]
    pub load_polls: u32,
    #[serde(default = "default_size_bytes")]
    pub size_bytes: u64,
    /// Make every load of this asset fail.
    #[serde(default)]
    pub fail: bool,
}

fn default_load_polls() -> u32 {
    2
}

fn default_size_bytes() -> u64 {
    1024 * 1024
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in scenario {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(text)?;
        scenario.config.validate()?;
        if scenario.tick_secs.is_nan() || scenario.tick_secs <= 0.0 {
            anyhow::bail!("tick_secs must be positive, got {}", scenario.tick_secs);
        }
        Ok(scenario)
    }

    /// Viewer position at `cycle` of a run lasting `cycles` cycles.
    pub fn viewpoint(&self, cycle: usize, cycles: usize) -> Vec3 {
        let points: Vec<Vec3> = self.path.iter().copied().map(Vec3::from_array).collect();
        match points.as_slice() {
            [] => Vec3::ZERO,
            [only] => *only,
            _ => {
                let t = if cycles <= 1 {
                    0.0
                } else {
                    cycle.min(cycles - 1) as f32 / (cycles - 1) as f32
                };
                let scaled = t * (points.len() - 1) as f32;
                let segment = (scaled.floor() as usize).min(points.len() - 2);
                points[segment].lerp(points[segment + 1], scaled - segment as f32)
            }
        }
    }
}
