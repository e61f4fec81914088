//! Search space definitions and extraction of tunable parameters from a
//! parameter document.

use serde::{Deserialize, Serialize};
use tracing::debug;

use hs_types::{validation_error, Guideline, HsResult, ParamValue, ParameterDocument, Suggestion};

/// Whether a dimension is explored additively or multiplicatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpaceKind {
    Linear,
    Log,
}

/// Sampling distribution for one tunable parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub kind: SpaceKind,
    /// Characteristic step size around the current value.
    pub scale: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub is_integer: bool,
}

impl Distribution {
    pub fn linear(scale: f64) -> Self {
        Self {
            kind: SpaceKind::Linear,
            scale,
            min: None,
            max: None,
            is_integer: false,
        }
    }

    pub fn log(scale: f64) -> Self {
        Self {
            kind: SpaceKind::Log,
            ..Self::linear(scale)
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn integer(mut self, is_integer: bool) -> Self {
        self.is_integer = is_integer;
        self
    }

    /// Project a raw sample back into the admissible set: inside the bounds,
    /// strictly positive for log dimensions, whole for integer dimensions.
    pub fn clamp(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        if self.kind == SpaceKind::Log {
            v = v.max(f64::MIN_POSITIVE);
        }
        if self.is_integer {
            v = v.round();
            if let Some(min) = self.min {
                v = v.max(min.ceil());
            }
            if let Some(max) = self.max {
                v = v.min(max.floor());
            }
        }
        v
    }
}

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Unique name, e.g. `"0_Rate"`.
    pub name: String,
    pub distribution: Distribution,
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, distribution: Distribution) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            distribution,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Distribution> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.distribution)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }
}

/// A parameter the optimizer is allowed to move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunableParameter {
    /// `"{global_index}_{param_name}"`; stable only within one extraction
    /// pass over an unchanged document.
    pub unique_name: String,
    pub sheet: String,
    pub element_index: usize,
    pub param_name: String,
    /// The declared guideline, with `Val` replaced by the element's current
    /// value when it has one.
    pub guideline: Guideline,
}

impl TunableParameter {
    pub fn is_integer(&self) -> bool {
        self.guideline.kind.as_deref() == Some("Int")
    }
}

/// Everything extracted from a document before the first trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub tunables: Vec<TunableParameter>,
    pub initial_params: Suggestion,
    pub search_space: SearchSpace,
}

impl ParameterSpace {
    /// Walk the document and build tunables, initial values and sampling
    /// distributions. Fails if any guideline is malformed or nothing is
    /// tunable.
    pub fn extract(document: &ParameterDocument) -> HsResult<Self> {
        let tunables = enumerate_tunables(document);
        if tunables.is_empty() {
            return Err(validation_error!(
                "document {:?} declares no tunable parameters",
                document.name
            ));
        }

        let mut initial_params = Suggestion::with_capacity(tunables.len());
        let mut search_space = SearchSpace::new();
        for tunable in &tunables {
            let (initial, distribution) = distribution_for(tunable)?;
            debug!(
                name = %tunable.unique_name,
                initial,
                kind = ?distribution.kind,
                scale = distribution.scale,
                "tunable parameter"
            );
            initial_params.insert(tunable.unique_name.clone(), initial);
            search_space = search_space.add(tunable.unique_name.clone(), distribution);
        }

        Ok(Self {
            tunables,
            initial_params,
            search_space,
        })
    }

    pub fn len(&self) -> usize {
        self.tunables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunables.is_empty()
    }

    pub fn tunable(&self, unique_name: &str) -> Option<&TunableParameter> {
        self.tunables.iter().find(|t| t.unique_name == unique_name)
    }
}

/// List every tunable parameter in extraction order, copying the element's
/// current value over the guideline's static `Val`.
pub fn enumerate_tunables(document: &ParameterDocument) -> Vec<TunableParameter> {
    document
        .hyper_sites()
        .enumerate()
        .map(|(index, site)| {
            let mut guideline = site.guideline.clone();
            if let Some(current) = site.current_value() {
                guideline.val = Some(current.clone());
            }
            TunableParameter {
                unique_name: format!("{index}_{}", site.param_name),
                sheet: site.sheet.to_string(),
                element_index: site.element_index,
                param_name: site.param_name.to_string(),
                guideline,
            }
        })
        .collect()
}

fn numeric_field(
    tunable: &TunableParameter,
    field: &str,
    value: Option<&ParamValue>,
) -> HsResult<Option<f64>> {
    match value {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            validation_error!(
                "{}: {field} of {} is not a number: {v}",
                tunable.unique_name,
                tunable.param_name
            )
        }),
    }
}

/// Scale used when `Val` is zero and nothing else sets one.
const DEFAULT_SCALE: f64 = 1.0;

fn space_is(guideline: &Guideline, kind: &str) -> bool {
    guideline
        .space
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case(kind))
}

/// Initial value and distribution for one tunable.
///
/// Scale is `Val / 4` unless `StdDev` (then `Sigma`) overrides it. A zero
/// scale falls back to a quarter of the bounded range, or 1.0. The space
/// is linear for non-positive values, for an explicit `Space: Linear`, and
/// for fully bounded ranges that don't ask for `Space: Log`; otherwise log.
fn distribution_for(tunable: &TunableParameter) -> HsResult<(f64, Distribution)> {
    let g = &tunable.guideline;
    let val = numeric_field(tunable, "Val", g.val.as_ref())?.ok_or_else(|| {
        validation_error!(
            "{}: guideline for {} in sheet {} has no Val",
            tunable.unique_name,
            tunable.param_name,
            tunable.sheet
        )
    })?;
    let min = numeric_field(tunable, "Min", g.min.as_ref())?;
    let max = numeric_field(tunable, "Max", g.max.as_ref())?;
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            return Err(validation_error!(
                "{}: Min {lo} is greater than Max {hi}",
                tunable.unique_name
            ));
        }
    }

    let mut scale = val / 4.0;
    if let Some(std_dev) = numeric_field(tunable, "StdDev", g.std_dev.as_ref())? {
        scale = std_dev;
    }
    if let Some(sigma) = numeric_field(tunable, "Sigma", g.sigma.as_ref())? {
        scale = sigma;
    }
    let mut scale = scale.abs();
    if scale == 0.0 {
        scale = match (min, max) {
            (Some(lo), Some(hi)) if hi > lo => (hi - lo) / 4.0,
            _ => DEFAULT_SCALE,
        };
    }

    let bounded = min.is_some() && max.is_some();
    let log_admissible = val > 0.0 && min.map_or(true, |lo| lo > 0.0);
    let kind = if !log_admissible || space_is(g, "Linear") {
        SpaceKind::Linear
    } else if space_is(g, "Log") || !bounded {
        SpaceKind::Log
    } else {
        SpaceKind::Linear
    };

    let distribution = Distribution {
        kind,
        scale,
        min,
        max,
        is_integer: tunable.is_integer(),
    };
    Ok((val, distribution))
}
