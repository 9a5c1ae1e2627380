use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::blockstream::SharedBlockStreams;
use crate::cache::{Cache, WriteMissPolicy};
use crate::cache_set::CacheSet;
use crate::clock::{ModtimeTable, SharedClock};
use crate::error::ConfigError;
use crate::level::{CacheLevel, SharedLevel, WritePolicy};
use crate::replacement_policies::{ApproximationStats, ReplacementPolicy, DEFAULT_LOOKAHEAD};
use crate::trace::SharedTrace;

/// The JSON description of a single cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpec {
    /// Required for a standalone cache. Inside a cache set it may be left out, or must match the set
    #[serde(default, alias = "blocksize")]
    pub block_size: Option<u64>,
    #[serde(default)]
    pub write_miss_policy: WriteMissPolicy,
    #[serde(default = "default_replacement_policy")]
    pub replacement_policy: ReplacementPolicyConfig,
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,
    pub levels: Vec<LevelSpec>,
}

/// One level of a cache: either described in place, or a reference to a level shared within a
/// cache set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelSpec {
    Owned {
        num_blocks: u64,
        /// The number of sets
        associativity: u64,
        write_policy: WritePolicy,
    },
    Shared {
        shared_name: String,
    },
}

/// The JSON description of a group of caches, which may share levels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSetSpec {
    #[serde(alias = "blocksize")]
    pub block_size: u64,
    #[serde(default)]
    pub shared_levels: Vec<NamedLevelSpec>,
    pub caches: Vec<CacheSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedLevelSpec {
    pub name: String,
    pub num_blocks: u64,
    pub associativity: u64,
    pub write_policy: WritePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplacementPolicyConfig {
    #[serde(rename = "LRU", alias = "lru")]
    Lru,
    #[serde(rename = "MRU", alias = "mru")]
    Mru,
    #[serde(rename = "RANDOM", alias = "random", alias = "Random")]
    Random,
    #[serde(rename = "OPT", alias = "opt")]
    Opt,
    #[serde(rename = "PES", alias = "pes")]
    Pes,
    #[serde(rename = "ApproxOPT", alias = "approxopt", alias = "approx_opt")]
    ApproxOpt,
    #[serde(rename = "ApproxPES", alias = "approxpes", alias = "approx_pes")]
    ApproxPes,
}

impl ReplacementPolicyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lru => "LRU",
            Self::Mru => "MRU",
            Self::Random => "RANDOM",
            Self::Opt => "OPT",
            Self::Pes => "PES",
            Self::ApproxOpt => "ApproxOPT",
            Self::ApproxPes => "ApproxPES",
        }
    }
}

impl Default for ReplacementPolicyConfig {
    fn default() -> Self {
        ReplacementPolicyConfig::Lru
    }
}

fn default_replacement_policy() -> ReplacementPolicyConfig {
    warn!("No replacement policy given, defaulting to LRU");
    ReplacementPolicyConfig::default()
}

fn default_lookahead() -> usize {
    DEFAULT_LOOKAHEAD
}

fn read_spec<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let file = File::open(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

impl CacheSpec {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        read_spec(path)
    }

    /// Builds the cache this spec describes
    ///
    /// # Arguments
    ///
    /// * `trace`: The trace the cache will run over. Needed by the OPT and PES policies and their
    /// approximations
    /// * `streams`: The block stream reader for that trace. Needed by OPT and PES
    ///
    /// returns: Result<Cache, ConfigError>
    pub fn build(&self, trace: Option<SharedTrace>, streams: Option<SharedBlockStreams>) -> Result<Cache, ConfigError> {
        let block_size = self.block_size.ok_or(ConfigError::MissingBlockSize)?;
        let mut builder = self.builder(block_size)?;
        if let Some(trace) = trace {
            builder = builder.trace(trace);
        }
        if let Some(streams) = streams {
            builder = builder.block_streams(streams);
        }
        builder.build()
    }

    /// A builder with everything but the levels and shared resources filled in
    fn base_builder(&self, block_size: u64) -> CacheBuilder {
        let mut builder = CacheBuilder::new(block_size)
            .write_miss_policy(self.write_miss_policy)
            .replacement_policy(self.replacement_policy)
            .lookahead(self.lookahead);
        if let Some(seed) = self.random_seed {
            builder = builder.random_seed(seed);
        }
        builder
    }

    fn builder(&self, block_size: u64) -> Result<CacheBuilder, ConfigError> {
        self.levels.iter().try_fold(self.base_builder(block_size), |builder, level| match level {
            LevelSpec::Owned { num_blocks, associativity, write_policy } => {
                Ok(builder.level(*num_blocks, *associativity, *write_policy))
            }
            LevelSpec::Shared { shared_name } => Err(ConfigError::UnknownSharedLevel(shared_name.clone())),
        })
    }
}

impl CacheSetSpec {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        read_spec(path)
    }

    /// Builds every cache, sharing one clock between them. A shared level is created where it is
    /// first used, and every later reference to it gets the same instance
    pub fn build(&self, trace: Option<SharedTrace>, streams: Option<SharedBlockStreams>) -> Result<CacheSet, ConfigError> {
        let mut definitions: HashMap<&str, &NamedLevelSpec> = HashMap::new();
        for shared in &self.shared_levels {
            if definitions.insert(shared.name.as_str(), shared).is_some() {
                return Err(ConfigError::DuplicateSharedLevel(shared.name.clone()));
            }
        }
        let mut instances: HashMap<&str, SharedLevel> = HashMap::new();
        let clock = ModtimeTable::shared();

        let mut caches = Vec::with_capacity(self.caches.len());
        for spec in &self.caches {
            if let Some(block_size) = spec.block_size.filter(|size| *size != self.block_size) {
                return Err(ConfigError::BlockSizeMismatch { expected: self.block_size, cache: block_size });
            }
            let mut builder = spec.base_builder(self.block_size).clock(clock.clone());
            for (depth, level) in spec.levels.iter().enumerate() {
                builder = match level {
                    LevelSpec::Owned { num_blocks, associativity, write_policy } => {
                        builder.level(*num_blocks, *associativity, *write_policy)
                    }
                    LevelSpec::Shared { shared_name } => {
                        let definition = definitions
                            .get(shared_name.as_str())
                            .ok_or_else(|| ConfigError::UnknownSharedLevel(shared_name.clone()))?;
                        let instance = match instances.get(shared_name.as_str()) {
                            Some(instance) => instance.clone(),
                            None => {
                                let instance = CacheLevel::new(
                                    depth,
                                    definition.num_blocks,
                                    definition.associativity,
                                    self.block_size,
                                    definition.write_policy,
                                )?
                                .into_shared();
                                instances.insert(shared_name.as_str(), instance.clone());
                                instance
                            }
                        };
                        builder.shared_level(instance)
                    }
                };
            }
            if let Some(trace) = &trace {
                builder = builder.trace(trace.clone());
            }
            if let Some(streams) = &streams {
                builder = builder.block_streams(streams.clone());
            }
            caches.push(builder.build()?);
        }
        CacheSet::new(caches, clock)
    }
}

enum LevelChoice {
    Blocks { num_blocks: u64, associativity: u64, write_policy: WritePolicy },
    Bytes { size: u64, associativity: u64, write_policy: WritePolicy },
    Shared(SharedLevel),
}

/// Builds a [Cache] in code rather than from JSON
pub struct CacheBuilder {
    block_size: u64,
    levels: Vec<LevelChoice>,
    write_miss_policy: WriteMissPolicy,
    policy: ReplacementPolicyConfig,
    random_seed: Option<u64>,
    lookahead: usize,
    trace: Option<SharedTrace>,
    streams: Option<SharedBlockStreams>,
    clock: Option<SharedClock>,
}

impl CacheBuilder {
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size,
            levels: Vec::new(),
            write_miss_policy: WriteMissPolicy::default(),
            policy: ReplacementPolicyConfig::default(),
            random_seed: None,
            lookahead: DEFAULT_LOOKAHEAD,
            trace: None,
            streams: None,
            clock: None,
        }
    }

    /// Adds a level below the existing ones
    ///
    /// # Arguments
    ///
    /// * `num_blocks`: The number of blocks in the level
    /// * `associativity`: The number of sets the blocks are split into
    /// * `write_policy`: How the level handles writes
    ///
    /// returns: CacheBuilder
    pub fn level(mut self, num_blocks: u64, associativity: u64, write_policy: WritePolicy) -> Self {
        self.levels.push(LevelChoice::Blocks { num_blocks, associativity, write_policy });
        self
    }

    /// Adds a level given its size in bytes, which must be a multiple of the block size
    pub fn level_bytes(mut self, size: u64, associativity: u64, write_policy: WritePolicy) -> Self {
        self.levels.push(LevelChoice::Bytes { size, associativity, write_policy });
        self
    }

    /// Adds a level that other caches may also hold
    pub fn shared_level(mut self, level: SharedLevel) -> Self {
        self.levels.push(LevelChoice::Shared(level));
        self
    }

    pub fn write_miss_policy(mut self, policy: WriteMissPolicy) -> Self {
        self.write_miss_policy = policy;
        self
    }

    pub fn replacement_policy(mut self, policy: ReplacementPolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// How many upcoming accesses the approximate policies may look at
    pub fn lookahead(mut self, window: usize) -> Self {
        self.lookahead = window;
        self
    }

    pub fn trace(mut self, trace: SharedTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn block_streams(mut self, streams: SharedBlockStreams) -> Self {
        self.streams = Some(streams);
        self
    }

    /// Shares a clock with other caches. A fresh clock is used otherwise
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Cache, ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        let block_size = self.block_size;
        let levels = self
            .levels
            .into_iter()
            .enumerate()
            .map(|(depth, choice)| match choice {
                LevelChoice::Blocks { num_blocks, associativity, write_policy } => {
                    Ok(CacheLevel::new(depth, num_blocks, associativity, block_size, write_policy)?.into_shared())
                }
                LevelChoice::Bytes { size, associativity, write_policy } => {
                    if size % block_size != 0 {
                        return Err(ConfigError::BlockSizeDoesNotDivideSize { level: depth, size, block_size });
                    }
                    Ok(CacheLevel::new(depth, size / block_size, associativity, block_size, write_policy)?.into_shared())
                }
                LevelChoice::Shared(level) => Ok(level),
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let policy = Self::policy(self.policy, block_size, self.random_seed, self.lookahead, self.trace, self.streams)?;
        Cache::new(block_size, levels, self.write_miss_policy, policy, self.clock.unwrap_or_else(ModtimeTable::shared))
    }

    fn policy(
        choice: ReplacementPolicyConfig,
        block_size: u64,
        seed: Option<u64>,
        window: usize,
        trace: Option<SharedTrace>,
        streams: Option<SharedBlockStreams>,
    ) -> Result<ReplacementPolicy, ConfigError> {
        let name = choice.name();
        let exact = |trace: Option<SharedTrace>,
                     streams: Option<SharedBlockStreams>|
         -> Result<(SharedTrace, SharedBlockStreams), ConfigError> {
            let trace = trace.ok_or(ConfigError::MissingTrace(name))?;
            let streams = streams.ok_or(ConfigError::MissingBlockStreams(name))?;
            let file_block_size = streams.borrow().block_size();
            if file_block_size != block_size {
                return Err(ConfigError::BlockStreamSizeMismatch { file: file_block_size, cache: block_size });
            }
            Ok((trace, streams))
        };
        Ok(match choice {
            ReplacementPolicyConfig::Lru => ReplacementPolicy::Lru,
            ReplacementPolicyConfig::Mru => ReplacementPolicy::Mru,
            ReplacementPolicyConfig::Random => ReplacementPolicy::random(seed),
            ReplacementPolicyConfig::Opt => {
                let (trace, streams) = exact(trace, streams)?;
                ReplacementPolicy::Opt { trace, streams }
            }
            ReplacementPolicyConfig::Pes => {
                let (trace, streams) = exact(trace, streams)?;
                ReplacementPolicy::Pes { trace, streams }
            }
            ReplacementPolicyConfig::ApproxOpt => ReplacementPolicy::ApproxOpt {
                trace: trace.ok_or(ConfigError::MissingTrace(name))?,
                window,
                stats: ApproximationStats::default(),
            },
            ReplacementPolicyConfig::ApproxPes => ReplacementPolicy::ApproxPes {
                trace: trace.ok_or(ConfigError::MissingTrace(name))?,
                window,
                stats: ApproximationStats::default(),
            },
        })
    }
}
