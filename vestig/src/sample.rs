// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record sampling: a composable decision function over a candidate record.
//!
//! Samplers are pure functions of the record plus their own local state, so
//! they cannot fail. The bypass policy (errors always kept) is evaluated
//! before any sampler body runs.

use crate::level::LogLevel;
use crate::record::LogRecord;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use vestig_common::rate_limiter::TokenBucket;
use vestig_common::MutexExt;

/// A sampling decision over a candidate record.
pub trait Sampler: Send + Sync {
    fn should_sample(&self, record: &LogRecord) -> bool;
}

/// Keep each record with probability `p`.
pub struct ProbabilitySampler {
    probability: f64,
}

impl ProbabilitySampler {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }
}

impl Sampler for ProbabilitySampler {
    fn should_sample(&self, _record: &LogRecord) -> bool {
        if self.probability >= 1.0 {
            return true;
        }
        if self.probability <= 0.0 {
            return false;
        }
        rand::thread_rng().gen::<f64>() < self.probability
    }
}

/// Keep at most `max_per_second` records, with burst up to the same amount.
pub struct RateLimitSampler {
    bucket: Mutex<TokenBucket>,
}

impl RateLimitSampler {
    pub fn new(max_per_second: f64) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::per_second(max_per_second)),
        }
    }
}

impl Sampler for RateLimitSampler {
    fn should_sample(&self, _record: &LogRecord) -> bool {
        self.bucket.lock_or_panic().try_acquire(None)
    }
}

/// One namespace route: a prefix (optionally `*`-suffixed) and the sampler
/// handling records under it.
pub struct NamespaceRule {
    pattern: String,
    wildcard: bool,
    sampler: Box<dyn Sampler>,
}

impl NamespaceRule {
    pub fn new(pattern: &str, sampler: Box<dyn Sampler>) -> Self {
        let normalized = normalize_namespace(pattern);
        let wildcard = normalized.ends_with(".*");
        let pattern = if wildcard {
            normalized[..normalized.len() - 2].to_string()
        } else {
            normalized
        };
        Self {
            pattern,
            wildcard,
            sampler,
        }
    }

    fn matches(&self, namespace: &str) -> bool {
        if self.wildcard {
            namespace == self.pattern
                || namespace
                    .strip_prefix(&self.pattern)
                    .is_some_and(|rest| rest.starts_with('.'))
        } else {
            namespace == self.pattern
        }
    }

    fn specificity(&self) -> usize {
        self.pattern.len()
    }
}

// `.` and `:` both delimit namespace segments.
fn normalize_namespace(ns: &str) -> String {
    ns.replace(':', ".")
}

/// Route records to an inner sampler by longest-prefix match of their
/// namespace. Records matching no rule (or carrying no namespace) fall back
/// to the fallback sampler, or are kept.
pub struct NamespaceSampler {
    rules: Vec<NamespaceRule>,
    fallback: Option<Box<dyn Sampler>>,
}

impl NamespaceSampler {
    pub fn new(mut rules: Vec<NamespaceRule>, fallback: Option<Box<dyn Sampler>>) -> Self {
        // Longest prefix first.
        rules.sort_by(|a, b| b.specificity().cmp(&a.specificity()));
        Self { rules, fallback }
    }

    fn fall_back(&self, record: &LogRecord) -> bool {
        match &self.fallback {
            Some(sampler) => sampler.should_sample(record),
            None => true,
        }
    }
}

impl Sampler for NamespaceSampler {
    fn should_sample(&self, record: &LogRecord) -> bool {
        let Some(namespace) = record.namespace.as_deref() else {
            return self.fall_back(record);
        };
        let namespace = normalize_namespace(namespace);
        for rule in &self.rules {
            if rule.matches(&namespace) {
                return rule.sampler.should_sample(record);
            }
        }
        self.fall_back(record)
    }
}

/// All children must accept.
pub struct CompositeSampler {
    children: Vec<Box<dyn Sampler>>,
}

impl CompositeSampler {
    pub fn new(children: Vec<Box<dyn Sampler>>) -> Self {
        Self { children }
    }
}

impl Sampler for CompositeSampler {
    fn should_sample(&self, record: &LogRecord) -> bool {
        self.children.iter().all(|c| c.should_sample(record))
    }
}

pub fn create_probability_sampler(probability: f64) -> Box<dyn Sampler> {
    Box::new(ProbabilitySampler::new(probability))
}

pub fn create_rate_limit_sampler(max_per_second: f64) -> Box<dyn Sampler> {
    Box::new(RateLimitSampler::new(max_per_second))
}

pub fn create_namespace_sampler(
    rules: Vec<NamespaceRule>,
    fallback: Option<Box<dyn Sampler>>,
) -> Box<dyn Sampler> {
    Box::new(NamespaceSampler::new(rules, fallback))
}

pub fn create_composite_sampler(children: Vec<Box<dyn Sampler>>) -> Box<dyn Sampler> {
    Box::new(CompositeSampler::new(children))
}

/// Declarative sampler configuration. A bare number is promoted to a
/// probability sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SamplerConfig {
    Probability(f64),
    Spec(SamplerSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplerSpec {
    Probability {
        probability: f64,
    },
    RateLimit {
        max_per_second: f64,
    },
    Namespace {
        rules: Vec<NamespaceRuleConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Box<SamplerConfig>>,
    },
    Composite {
        children: Vec<SamplerConfig>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceRuleConfig {
    pub pattern: String,
    pub sampler: SamplerConfig,
}

pub fn create_sampler_from_config(config: &SamplerConfig) -> Box<dyn Sampler> {
    match config {
        SamplerConfig::Probability(p) => create_probability_sampler(*p),
        SamplerConfig::Spec(spec) => match spec {
            SamplerSpec::Probability { probability } => create_probability_sampler(*probability),
            SamplerSpec::RateLimit { max_per_second } => {
                create_rate_limit_sampler(*max_per_second)
            }
            SamplerSpec::Namespace { rules, fallback } => {
                let rules = rules
                    .iter()
                    .map(|r| NamespaceRule::new(&r.pattern, create_sampler_from_config(&r.sampler)))
                    .collect();
                create_namespace_sampler(
                    rules,
                    fallback.as_deref().map(create_sampler_from_config),
                )
            }
            SamplerSpec::Composite { children } => {
                create_composite_sampler(children.iter().map(create_sampler_from_config).collect())
            }
        },
    }
}

/// The sampling decision applied at emission, wrapping an optional sampler
/// with the never-sampled-below-level bypass.
pub struct SamplingPolicy {
    /// Skip the sampler entirely for records at or above
    /// [`SamplingPolicy::bypass_level`].
    pub always_sample_errors: bool,
    pub bypass_level: LogLevel,
    pub sampler: Option<Box<dyn Sampler>>,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            always_sample_errors: true,
            bypass_level: LogLevel::Error,
            sampler: None,
        }
    }
}

impl SamplingPolicy {
    pub fn from_config(config: Option<&SamplerConfig>) -> Self {
        Self {
            sampler: config.map(create_sampler_from_config),
            ..Default::default()
        }
    }

    /// The bypass is checked before the sampler body.
    pub fn should_keep(&self, record: &LogRecord) -> bool {
        if self.always_sample_errors && record.level >= self.bypass_level {
            return true;
        }
        match &self.sampler {
            Some(sampler) => sampler.should_sample(record),
            None => true,
        }
    }
}
