//! Optimizer configuration: typed sections, layered merge, validation.
//!
//! Four TOML tables are merged in precedence order (defaults < file < env <
//! CLI) and the result is deserialized into one immutable [`OptimizerConfig`]
//! that is passed by reference everywhere. Nothing reads the environment
//! except [`env_layer`], and only with the variables handed to it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use optlab_core::distributions::DistributionFamily;
use optlab_core::domain::{StructureType, VarMethod, MAX_WIDTH_STRIKES};

pub const ENV_PREFIX: &str = "OPTLAB_";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("conflicting configuration: {0}")]
    Conflict(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        reason: reason.into(),
    }
}

// ─── Sections ───────────────────────────────────────────────────────

/// Daily return moments of a market regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeParams {
    pub mean_daily_return: f64,
    pub daily_vol: f64,
    /// Recorded for reporting; not modelled by the regime samplers.
    #[serde(default)]
    pub skew: f64,
    #[serde(default)]
    pub kurtosis_excess: f64,
}

impl RegimeParams {
    pub const fn new(mean_daily_return: f64, daily_vol: f64, skew: f64, kurtosis_excess: f64) -> Self {
        Self {
            mean_daily_return,
            daily_vol,
            skew,
            kurtosis_excess,
        }
    }
}

pub fn default_regimes() -> BTreeMap<String, RegimeParams> {
    BTreeMap::from([
        ("neutral".to_string(), RegimeParams::new(0.0, 0.01, 0.0, 1.0)),
        ("strong-bullish".to_string(), RegimeParams::new(0.02, 0.03, 0.5, 2.0)),
        ("mild-bullish".to_string(), RegimeParams::new(0.01, 0.02, 0.3, 1.5)),
        ("strong-bearish".to_string(), RegimeParams::new(-0.02, 0.03, -0.5, 2.0)),
        ("mild-bearish".to_string(), RegimeParams::new(-0.01, 0.02, -0.3, 1.5)),
    ])
}

/// Where the unconditional return model comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnconditionalSource {
    /// Student-t / Normal built from the regime's moments.
    #[default]
    Regime,
    /// `mc.distribution` fitted to the symbol's history.
    History,
}

/// Monte Carlo settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McConfig {
    /// Baseline path count for the first adaptive iteration.
    pub num_paths: usize,
    pub max_paths: usize,
    /// Dollar PnL used for `POP_target`.
    pub profit_target: f64,
    pub epnl_ci_target: f64,
    pub pop_ci_target: f64,
    /// Master seed; absent means non-reproducible runs. A layer clears it
    /// with `seed = "none"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub var_alpha: f64,
    pub var_method: VarMethod,
    /// Annual rate; the metrics use rate / 252 per step.
    pub risk_free_rate: f64,
    pub distribution: DistributionFamily,
    pub unconditional_source: UnconditionalSource,
    pub drawdown_sample_paths: usize,
}

impl Default for McConfig {
    fn default() -> Self {
        Self {
            num_paths: 5000,
            max_paths: 20000,
            profit_target: 500.0,
            epnl_ci_target: 100.0,
            pop_ci_target: 0.03,
            seed: Some(42),
            var_alpha: 0.05,
            var_method: VarMethod::Historical,
            risk_free_rate: 0.0,
            distribution: DistributionFamily::Laplace,
            unconditional_source: UnconditionalSource::Regime,
            drawdown_sample_paths: 200,
        }
    }
}

/// Stage 3 hard filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Account capital; also the ceiling on capital required per trade.
    pub max_capital: f64,
    pub max_loss_pct: f64,
    pub min_epnl: f64,
    pub min_pop_breakeven: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_capital: 15000.0,
            max_loss_pct: 0.05,
            min_epnl: 500.0,
            min_pop_breakeven: 0.60,
        }
    }
}

/// Composite score weights. Penalty weights are applied with a negative sign.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub w_pop: f64,
    pub w_roc: f64,
    pub w_theta: f64,
    pub w_tail: f64,
    pub w_delta: f64,
    pub w_gamma: f64,
    pub w_vega: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            w_pop: 0.35,
            w_roc: 0.30,
            w_theta: 0.10,
            w_tail: 0.15,
            w_delta: 0.05,
            w_gamma: 0.03,
            w_vega: 0.02,
        }
    }
}

impl ScoringWeights {
    fn named(&self) -> [(&'static str, f64); 7] {
        [
            ("w_pop", self.w_pop),
            ("w_roc", self.w_roc),
            ("w_theta", self.w_theta),
            ("w_tail", self.w_tail),
            ("w_delta", self.w_delta),
            ("w_gamma", self.w_gamma),
            ("w_vega", self.w_vega),
        ]
    }
}

/// Stages 0–2 and the Stage 3 survivor band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    pub dte_min: i64,
    pub dte_max: i64,
    pub max_expiries: usize,
    /// Fewer selected expiries than this adds a hint.
    pub min_expiries: usize,
    pub moneyness_min: f64,
    pub moneyness_max: f64,
    pub min_volume: u64,
    pub max_spread_pct: f64,
    pub max_width_strikes: u32,
    pub max_structures: usize,
    pub structure_types: Vec<StructureType>,
    pub survivor_band_min: usize,
    pub survivor_band_max: usize,
    /// Fixed K per structure type; derived from the band when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k_per_type: Option<usize>,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            dte_min: 7,
            dte_max: 45,
            max_expiries: 5,
            min_expiries: 3,
            moneyness_min: 0.85,
            moneyness_max: 1.15,
            min_volume: 10,
            max_spread_pct: 0.25,
            max_width_strikes: 3,
            max_structures: 5000,
            structure_types: StructureType::all(),
            survivor_band_min: 50,
            survivor_band_max: 200,
            top_k_per_type: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub commission_per_contract: f64,
    /// Full synthetic spread as a fraction of mid when a quote side is missing.
    pub spread_pct: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            commission_per_contract: 0.65,
            spread_pct: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionalConfig {
    pub min_episodes: usize,
    pub min_samples: usize,
    pub distance_threshold: f64,
}

impl Default for ConditionalConfig {
    fn default() -> Self {
        Self {
            min_episodes: 30,
            min_samples: 60,
            distance_threshold: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricerKind {
    #[default]
    BlackScholes,
    /// Accepted by the parser, rejected by validation.
    Quantlib,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_workers: usize,
    pub memory_budget_gb: f64,
    pub pricer: PricerKind,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_workers: 6,
            memory_budget_gb: 8.0,
            pricer: PricerKind::BlackScholes,
        }
    }
}

/// The merged, validated configuration for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub regimes: BTreeMap<String, RegimeParams>,
    pub mc: McConfig,
    pub filters: FilterConfig,
    pub scoring: ScoringWeights,
    pub funnel: FunnelConfig,
    pub costs: CostConfig,
    pub conditional: ConditionalConfig,
    pub runtime: RuntimeConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            regimes: default_regimes(),
            mc: McConfig::default(),
            filters: FilterConfig::default(),
            scoring: ScoringWeights::default(),
            funnel: FunnelConfig::default(),
            costs: CostConfig::default(),
            conditional: ConditionalConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

// ─── Layers ─────────────────────────────────────────────────────────

/// The four precedence layers, lowest first.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    pub defaults: toml::Table,
    pub file: toml::Table,
    pub env: toml::Table,
    pub cli: toml::Table,
}

impl ConfigLayers {
    /// Defaults only; fill the other layers before calling [`ConfigLayers::resolve`].
    pub fn with_defaults() -> Result<Self, ConfigError> {
        let defaults = match toml::Value::try_from(OptimizerConfig::default()) {
            Ok(toml::Value::Table(t)) => t,
            Ok(_) => return Err(ConfigError::Parse("defaults did not serialize to a table".into())),
            Err(e) => return Err(ConfigError::Parse(e.to_string())),
        };
        Ok(Self {
            defaults,
            ..Self::default()
        })
    }

    pub fn merged(&self) -> toml::Table {
        let mut out = self.defaults.clone();
        for layer in [&self.file, &self.env, &self.cli] {
            deep_merge(&mut out, layer.clone());
        }
        if let Some(toml::Value::Table(mc)) = out.get_mut("mc") {
            let cleared = matches!(
                mc.get("seed"),
                Some(toml::Value::String(s)) if s.is_empty() || s.eq_ignore_ascii_case("none")
            );
            if cleared {
                mc.remove("seed");
            }
        }
        out
    }

    /// Merge, deserialize and validate.
    pub fn resolve(&self) -> Result<OptimizerConfig, ConfigError> {
        let config: OptimizerConfig = toml::Value::Table(self.merged())
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Recursively overlay `overlay` onto `base`; nested tables merge, scalars replace.
pub fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

pub fn file_layer(path: &Path) -> Result<toml::Table, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    text.parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))
}

/// `OPTLAB_MC__NUM_PATHS=8000` becomes `mc.num_paths = 8000`.
pub fn env_layer<I, K, V>(vars: I) -> Result<toml::Table, ConfigError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut layer = toml::Table::new();
    for (key, value) in vars {
        let Some(rest) = key.as_ref().strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest.split(ENV_SEPARATOR).map(|p| p.to_lowercase()).collect();
        if path.len() < 2 || path.iter().any(String::is_empty) {
            debug!(key = key.as_ref(), "ignoring env var without section separator");
            continue;
        }
        insert_path(&mut layer, &path, parse_scalar(value.as_ref()))?;
    }
    Ok(layer)
}

/// `--override section.key=value` pairs.
pub fn override_layer<S: AsRef<str>>(overrides: &[S]) -> Result<toml::Table, ConfigError> {
    let mut layer = toml::Table::new();
    for raw in overrides {
        let raw = raw.as_ref();
        let (path, value) = raw
            .split_once('=')
            .ok_or_else(|| invalid(raw, "override must look like section.key=value"))?;
        let path: Vec<String> = path.trim().split('.').map(|p| p.trim().to_string()).collect();
        if path.len() < 2 || path.iter().any(String::is_empty) {
            return Err(invalid(raw, "override key needs a section, e.g. mc.num_paths"));
        }
        insert_path(&mut layer, &path, parse_scalar(value))?;
    }
    Ok(layer)
}

fn insert_path(table: &mut toml::Table, path: &[String], value: toml::Value) -> Result<(), ConfigError> {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => return Ok(()),
    };
    let mut cursor = table;
    for part in parents {
        let entry = cursor
            .entry(part.clone())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        cursor = match entry {
            toml::Value::Table(t) => t,
            _ => return Err(invalid(&path.join("."), format!("'{part}' is not a section"))),
        };
    }
    cursor.insert(last.clone(), value);
    Ok(())
}

/// bool, then integer, then float, then string with surrounding quotes stripped.
pub fn parse_scalar(raw: &str) -> toml::Value {
    let s = raw.trim();
    if let Ok(b) = s.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = s.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return toml::Value::Float(f);
    }
    let unquoted = s
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(s);
    toml::Value::String(unquoted.to_string())
}

// ─── Validation ─────────────────────────────────────────────────────

impl OptimizerConfig {
    /// Build from the given layers: optional TOML file, env vars, CLI overrides.
    pub fn load<I, K, V, S>(file: Option<&Path>, env: I, overrides: &[S]) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
        S: AsRef<str>,
    {
        let mut layers = ConfigLayers::with_defaults()?;
        if let Some(path) = file {
            layers.file = file_layer(path)?;
        }
        layers.env = env_layer(env)?;
        layers.cli = override_layer(overrides)?;
        layers.resolve()
    }

    pub fn regime(&self, label: &str) -> Option<&RegimeParams> {
        self.regimes.get(label)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mc = &self.mc;
        if mc.num_paths == 0 {
            return Err(invalid("mc.num_paths", "must be positive"));
        }
        if mc.max_paths < mc.num_paths {
            return Err(invalid(
                "mc.max_paths",
                format!("{} is below mc.num_paths {}", mc.max_paths, mc.num_paths),
            ));
        }
        if !(mc.var_alpha > 0.0 && mc.var_alpha < 0.5) {
            return Err(invalid("mc.var_alpha", format!("{} is outside (0, 0.5)", mc.var_alpha)));
        }
        if !(mc.epnl_ci_target.is_finite() && mc.epnl_ci_target > 0.0) {
            return Err(invalid("mc.epnl_ci_target", "must be positive"));
        }
        if !(mc.pop_ci_target > 0.0 && mc.pop_ci_target < 1.0) {
            return Err(invalid("mc.pop_ci_target", "must be in (0, 1)"));
        }
        if !mc.risk_free_rate.is_finite() || !mc.profit_target.is_finite() {
            return Err(invalid("mc", "risk_free_rate and profit_target must be finite"));
        }
        if mc.drawdown_sample_paths == 0 {
            return Err(invalid("mc.drawdown_sample_paths", "must be positive"));
        }

        let f = &self.filters;
        if !(f.max_capital.is_finite() && f.max_capital > 0.0) {
            return Err(invalid("filters.max_capital", "must be positive"));
        }
        if !(f.max_loss_pct > 0.0 && f.max_loss_pct <= 1.0) {
            return Err(invalid("filters.max_loss_pct", "must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&f.min_pop_breakeven) {
            return Err(invalid("filters.min_pop_breakeven", "must be in [0, 1]"));
        }
        if !f.min_epnl.is_finite() {
            return Err(invalid("filters.min_epnl", "must be finite"));
        }

        for (name, w) in self.scoring.named() {
            if !(w.is_finite() && w >= 0.0) {
                return Err(invalid(&format!("scoring.{name}"), format!("weight {w} must be non-negative")));
            }
        }

        let fu = &self.funnel;
        if fu.dte_min < 0 || fu.dte_min > fu.dte_max {
            return Err(invalid(
                "funnel.dte_min",
                format!("window [{}, {}] is inverted or negative", fu.dte_min, fu.dte_max),
            ));
        }
        if fu.max_expiries == 0 || fu.min_expiries > fu.max_expiries {
            return Err(invalid("funnel.max_expiries", "need 0 < min_expiries <= max_expiries"));
        }
        if !(fu.moneyness_min > 0.0 && fu.moneyness_min < fu.moneyness_max) {
            return Err(invalid("funnel.moneyness_min", "need 0 < moneyness_min < moneyness_max"));
        }
        if !(fu.max_spread_pct >= 0.0) {
            return Err(invalid("funnel.max_spread_pct", "must be non-negative"));
        }
        if !(1..=MAX_WIDTH_STRIKES).contains(&fu.max_width_strikes) {
            return Err(invalid(
                "funnel.max_width_strikes",
                format!("must be between 1 and {MAX_WIDTH_STRIKES}"),
            ));
        }
        if fu.max_structures == 0 {
            return Err(invalid("funnel.max_structures", "must be positive"));
        }
        if fu.structure_types.is_empty() {
            return Err(invalid("funnel.structure_types", "at least one structure type is required"));
        }
        if fu.survivor_band_max == 0 || fu.survivor_band_min > fu.survivor_band_max {
            return Err(invalid("funnel.survivor_band_min", "need survivor_band_min <= survivor_band_max"));
        }
        if fu.top_k_per_type == Some(0) {
            return Err(invalid("funnel.top_k_per_type", "must be positive when set"));
        }

        let c = &self.costs;
        if !(c.commission_per_contract.is_finite() && c.commission_per_contract >= 0.0) {
            return Err(invalid("costs.commission_per_contract", "must be non-negative"));
        }
        if !(c.spread_pct >= 0.0 && c.spread_pct < 2.0) {
            return Err(invalid("costs.spread_pct", "must be in [0, 2)"));
        }

        let cond = &self.conditional;
        if cond.min_episodes == 0 || cond.min_samples == 0 {
            return Err(invalid("conditional.min_episodes", "episode and sample minimums must be positive"));
        }
        if !(cond.distance_threshold >= 0.0) {
            return Err(invalid("conditional.distance_threshold", "must be non-negative"));
        }

        let rt = &self.runtime;
        if rt.max_workers == 0 {
            return Err(invalid("runtime.max_workers", "must be at least 1"));
        }
        if !(rt.memory_budget_gb.is_finite() && rt.memory_budget_gb > 0.0) {
            return Err(invalid("runtime.memory_budget_gb", "must be positive"));
        }

        if self.regimes.is_empty() {
            return Err(invalid("regimes", "at least one regime is required"));
        }
        for (label, r) in &self.regimes {
            if !(r.daily_vol.is_finite() && r.daily_vol > 0.0) || !r.mean_daily_return.is_finite() {
                return Err(invalid(
                    &format!("regimes.{label}"),
                    "daily_vol must be positive and mean_daily_return finite",
                ));
            }
        }

        // Conflicts: individually valid, jointly unusable.
        if rt.pricer == PricerKind::Quantlib {
            return Err(ConfigError::Conflict(
                "runtime.pricer = \"quantlib\" is not available in this build; use \"black_scholes\"".into(),
            ));
        }
        let loss_budget = f.max_capital * f.max_loss_pct;
        let min_commission = 4.0 * c.commission_per_contract;
        if loss_budget < min_commission {
            return Err(ConfigError::Conflict(format!(
                "filters.max_capital x filters.max_loss_pct = {loss_budget:.2} cannot cover the \
                 minimum four-leg commission {min_commission:.2}"
            )));
        }
        Ok(())
    }
}
