//! Produces the minimal per-trial parameter document handed to the
//! evaluator.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use hs_types::{
    validation_error, DocumentLayout, Element, HsResult, NamedList, ParamValue, ParameterDocument,
    Suggestion,
};

use crate::search::ParameterSpace;

const SUGGESTED_DESC: &str = "Parameters suggested by optimizer";

/// Render a suggested value the way the executable expects to read it.
pub fn format_value(value: f64, is_integer: bool) -> String {
    if is_integer {
        format!("{}", value.round() as i64)
    } else {
        format!("{value}")
    }
}

/// Name of the parameter file for one trial.
pub fn trial_file_name(label: &str) -> String {
    format!("hyperparams_{label}.json")
}

#[derive(Debug, Clone)]
struct Slot {
    unique_name: String,
    param_name: String,
    is_integer: bool,
}

/// Builds trial documents from a read-only template.
///
/// Shared by every worker; each call works on a fresh copy.
#[derive(Debug, Clone)]
pub struct TrialParameterInjector {
    template: ParameterDocument,
    /// `(sheet, element_index)` to the tunables of that element, in order.
    slots: HashMap<(String, usize), Vec<Slot>>,
    artifacts_dir: PathBuf,
    layout: DocumentLayout,
}

impl TrialParameterInjector {
    pub fn new(
        template: ParameterDocument,
        space: &ParameterSpace,
        artifacts_dir: impl Into<PathBuf>,
        layout: DocumentLayout,
    ) -> Self {
        let mut slots: HashMap<(String, usize), Vec<Slot>> = HashMap::new();
        for tunable in &space.tunables {
            slots
                .entry((tunable.sheet.clone(), tunable.element_index))
                .or_default()
                .push(Slot {
                    unique_name: tunable.unique_name.clone(),
                    param_name: tunable.param_name.clone(),
                    is_integer: tunable.is_integer(),
                });
        }
        Self {
            template,
            slots,
            artifacts_dir: artifacts_dir.into(),
            layout,
        }
    }

    pub fn template(&self) -> &ParameterDocument {
        &self.template
    }

    /// Build the trial document for `suggestion`.
    pub fn inject(&self, suggestion: &Suggestion, label: &str) -> HsResult<ParameterDocument> {
        let mut sheets = NamedList::new();
        for (sheet, elements) in self.template.sheets.iter() {
            let mut kept = Vec::new();
            for (index, element) in elements.iter().enumerate() {
                let Some(slots) = self.slots.get(&(sheet.to_string(), index)) else {
                    continue;
                };
                let mut params = NamedList::new();
                for slot in slots {
                    let value = suggestion.get(&slot.unique_name).ok_or_else(|| {
                        validation_error!(
                            "suggestion for {label} has no value for {}",
                            slot.unique_name
                        )
                    })?;
                    params.insert(
                        slot.param_name.clone(),
                        ParamValue::Text(format_value(*value, slot.is_integer)),
                    );
                }
                kept.push(Element {
                    sel: element.sel.clone(),
                    desc: element.desc.clone(),
                    params,
                    hypers: None,
                });
            }
            sheets.insert(sheet, kept);
        }

        Ok(ParameterDocument {
            name: label.to_string(),
            desc: SUGGESTED_DESC.to_string(),
            sheets,
        })
    }

    /// Inject and write `hyperparams_{label}.json` under the artifacts dir.
    pub fn write(&self, suggestion: &Suggestion, label: &str) -> HsResult<PathBuf> {
        let document = self.inject(suggestion, label)?;
        fs::create_dir_all(&self.artifacts_dir)?;
        let path = self.artifacts_dir.join(trial_file_name(label));
        document.save(&path, self.layout)?;
        debug!(label, path = %path.display(), "wrote trial parameter file");
        Ok(path)
    }
}
