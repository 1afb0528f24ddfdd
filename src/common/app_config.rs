// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<HashAggConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static HashAggConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = HashAggConfig::load_from_file(path.as_ref())?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn init_from_env_or_default() -> Result<&'static HashAggConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = HashAggConfig::load_from_file(&path)?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn config() -> Result<&'static HashAggConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("HASHAGG_CONFIG")
        && !p.trim().is_empty()
    {
        return Ok(PathBuf::from(p));
    }

    let local = PathBuf::from("hashagg.toml");
    if local.exists() {
        return Ok(local);
    }

    Err(anyhow!(
        "missing config file: set $HASHAGG_CONFIG or create ./hashagg.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct HashAggConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "hashagg::exec::spill=debug,info"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub spill: SpillConfig,
}

impl HashAggConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: HashAggConfig = toml::from_str(s)?;
        cfg.spill.validate()?;
        cfg.runtime.validate()?;
        Ok(cfg)
    }

    pub fn effective_log_filter(&self) -> String {
        self.log_filter
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.log_level.clone())
    }
}

impl Default for HashAggConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
            spill: SpillConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Initial byte capacity reserved by each aggregate state arena.
    #[serde(default = "default_state_arena_block_size")]
    pub state_arena_block_size: usize,
    /// Chunk capacity of the bounded queue used by streaming pre-aggregation.
    #[serde(default = "default_streaming_queue_capacity")]
    pub streaming_queue_capacity: usize,
    /// Upper bound on rows per chunk when materializing results.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_state_arena_block_size() -> usize {
    64 * 1024
}
fn default_streaming_queue_capacity() -> usize {
    8
}
fn default_batch_size() -> usize {
    4096
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.streaming_queue_capacity == 0 {
            return Err(anyhow!("runtime.streaming_queue_capacity must be positive"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("runtime.batch_size must be positive"));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            state_arena_block_size: default_state_arena_block_size(),
            streaming_queue_capacity: default_streaming_queue_capacity(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SpillConfig {
    #[serde(default = "default_spill_enable")]
    pub enable: bool,
    #[serde(default)]
    pub local_dirs: Vec<String>,
    /// One of "none", "lz4" or "zstd".
    #[serde(default = "default_spill_ipc_compression")]
    pub ipc_compression: String,
    /// Spill writes `1 << partition_count_bits` chunks per round.
    #[serde(default = "default_spill_partition_count_bits")]
    pub partition_count_bits: u32,
    /// Resident bytes above which a hash aggregation spills. Unset disables spilling.
    #[serde(default)]
    pub agg_bytes_threshold: Option<usize>,
}

fn default_spill_enable() -> bool {
    false
}
fn default_spill_ipc_compression() -> String {
    "lz4".to_string()
}
fn default_spill_partition_count_bits() -> u32 {
    4
}

/// Largest accepted `partition_count_bits`.
pub const MAX_SPILL_PARTITION_COUNT_BITS: u32 = 16;

impl SpillConfig {
    fn validate(&self) -> Result<()> {
        if self.partition_count_bits > MAX_SPILL_PARTITION_COUNT_BITS {
            return Err(anyhow!(
                "spill.partition_count_bits={} exceeds {}",
                self.partition_count_bits,
                MAX_SPILL_PARTITION_COUNT_BITS
            ));
        }
        match self.ipc_compression.trim().to_ascii_lowercase().as_str() {
            "none" | "lz4" | "lz4_frame" | "zstd" => Ok(()),
            other => Err(anyhow!("unsupported spill.ipc_compression: {other}")),
        }
    }
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            enable: default_spill_enable(),
            local_dirs: Vec::new(),
            ipc_compression: default_spill_ipc_compression(),
            partition_count_bits: default_spill_partition_count_bits(),
            agg_bytes_threshold: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_takes_defaults() {
        let cfg = HashAggConfig::parse("").expect("parse");
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.spill.enable);
        assert_eq!(cfg.spill.partition_count_bits, 4);
        assert_eq!(cfg.spill.agg_bytes_threshold, None);
        assert_eq!(cfg.runtime.streaming_queue_capacity, 8);
    }

    #[test]
    fn spill_section_is_parsed() {
        let cfg = HashAggConfig::parse(
            r#"
log_filter = "hashagg=debug"

[spill]
enable = true
local_dirs = ["/tmp/a", "/tmp/b"]
ipc_compression = "zstd"
partition_count_bits = 2
agg_bytes_threshold = 1048576
"#,
        )
        .expect("parse");
        assert!(cfg.spill.enable);
        assert_eq!(cfg.spill.local_dirs.len(), 2);
        assert_eq!(cfg.spill.partition_count_bits, 2);
        assert_eq!(cfg.spill.agg_bytes_threshold, Some(1 << 20));
        assert_eq!(cfg.effective_log_filter(), "hashagg=debug");
    }

    #[test]
    fn oversized_partition_bits_are_rejected() {
        let err = HashAggConfig::parse("[spill]\npartition_count_bits = 17\n")
            .expect_err("must reject");
        assert!(err.to_string().contains("partition_count_bits"));
    }

    #[test]
    fn unknown_codec_is_rejected() {
        assert!(HashAggConfig::parse("[spill]\nipc_compression = \"snappy\"\n").is_err());
    }
}
