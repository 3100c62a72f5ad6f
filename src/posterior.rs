use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::diagnostics::ConvergenceSummary;
use crate::error::PipelineError;
use crate::model::ParamLayout;
use crate::registry::TeamRegistry;
use crate::sampler::{SampleOutput, SamplerConfig};

pub const ARTIFACT_VERSION: u32 = 1;

/// Retained draws from all chains, kept per chain so diagnostics can be
/// recomputed offline, plus the layout that indexes a draw.
#[derive(Debug, Clone)]
pub struct PosteriorEnsemble {
    pub layout: ParamLayout,
    /// `chains[c][i]` is flattened draw `i` of chain `c`.
    pub chains: Vec<Vec<Vec<f64>>>,
}

impl PosteriorEnsemble {
    pub fn new(layout: ParamLayout, chains: Vec<Vec<Vec<f64>>>) -> Self {
        Self { layout, chains }
    }

    pub fn num_draws(&self) -> usize {
        self.chains.iter().map(Vec::len).sum()
    }

    /// Posterior mean of one flattened coordinate, pooled over chains.
    pub fn mean_of(&self, index: usize) -> f64 {
        let mut sum = 0.0f64;
        let mut n = 0usize;
        for chain in &self.chains {
            for draw in chain {
                sum += draw[index];
                n += 1;
            }
        }
        if n == 0 { 0.0 } else { sum / n as f64 }
    }
}

/// Per-chain adaptation facts worth keeping next to the draws.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStats {
    pub divergences: usize,
    pub accept_rate: f64,
    pub step_size: f64,
    pub mean_tree_depth: f64,
    pub max_depth_hits: usize,
}

/// Everything needed to reproduce the rating table without resampling:
/// registry order, sampler configuration, retained draws, diagnostics, and
/// a fingerprint tying the fit to its input data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitArtifact {
    pub version: u32,
    pub created_utc: String,
    pub input_fingerprint: String,
    pub teams: Vec<String>,
    pub config: SamplerConfig,
    pub chains: Vec<Vec<Vec<f64>>>,
    #[serde(default)]
    pub chain_stats: Vec<ChainStats>,
    pub convergence: ConvergenceSummary,
}

impl FitArtifact {
    pub fn assemble(
        registry: &TeamRegistry,
        config: &SamplerConfig,
        output: SampleOutput,
        convergence: ConvergenceSummary,
        input_fingerprint: String,
    ) -> Self {
        let mut chains = Vec::with_capacity(output.chains.len());
        let mut chain_stats = Vec::with_capacity(output.chains.len());
        for chain in output.chains {
            chain_stats.push(ChainStats {
                divergences: chain.divergences,
                accept_rate: chain.accept_rate,
                step_size: chain.step_size,
                mean_tree_depth: chain.mean_tree_depth,
                max_depth_hits: chain.max_depth_hits,
            });
            chains.push(chain.draws);
        }
        Self {
            version: ARTIFACT_VERSION,
            created_utc: Utc::now().to_rfc3339(),
            input_fingerprint,
            teams: registry.names().to_vec(),
            config: config.clone(),
            chains,
            chain_stats,
            convergence,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let json = serde_json::to_string_pretty(self).context("serialize fit artifact")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("write fit artifact tmp {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("replace fit artifact {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read fit artifact {}", path.display()))?;
        let artifact: FitArtifact =
            serde_json::from_str(&raw).context("parse fit artifact json")?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<()> {
        let reject = |reason: String| -> anyhow::Error {
            PipelineError::ArtifactRejected { reason }.into()
        };
        if self.version != ARTIFACT_VERSION {
            return Err(reject(format!(
                "version {} (this build reads version {ARTIFACT_VERSION})",
                self.version
            )));
        }
        if self.teams.is_empty() {
            return Err(reject("no teams stored".to_string()));
        }
        if self.chains.iter().all(Vec::is_empty) {
            return Err(reject("no retained draws stored".to_string()));
        }
        let dim = ParamLayout::new(self.teams.len()).dim();
        for (c, chain) in self.chains.iter().enumerate() {
            for draw in chain {
                if draw.len() != dim {
                    return Err(reject(format!(
                        "chain {c} draw width {} does not fit {} teams",
                        draw.len(),
                        self.teams.len()
                    )));
                }
            }
        }
        if self.input_fingerprint.len() != 64
            || !self.input_fingerprint.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(reject("malformed input fingerprint".to_string()));
        }
        Ok(())
    }

    pub fn registry(&self) -> Result<TeamRegistry> {
        TeamRegistry::from_names(self.teams.clone())
    }

    pub fn ensemble(&self) -> PosteriorEnsemble {
        PosteriorEnsemble::new(ParamLayout::new(self.teams.len()), self.chains.clone())
    }
}
