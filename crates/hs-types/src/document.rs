//! Typed parameter document: sheets of elements carrying current `Params`
//! and optional `Hypers` guidelines.
//!
//! The executable under optimization emits this document as JSON, either as a
//! bare object or as a one-element list of parameter sets. Key order is
//! significant (it fixes the extraction order), so every mapping is held in a
//! [`NamedList`] rather than a hash map.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use crate::errors::HsResult;
use crate::validation_error;

/// An insertion-ordered string-keyed mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedList<V> {
    entries: Vec<(String, V)>,
}

impl<V> NamedList<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Insert or replace. A replaced entry keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: V) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }
}

impl<V> Default for NamedList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for NamedList<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut list = Self::new();
        for (k, v) in iter {
            list.insert(k, v);
        }
        list
    }
}

impl<V: Serialize> Serialize for NamedList<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for NamedList<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NamedListVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for NamedListVisitor<V> {
            type Value = NamedList<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string-keyed map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut list = NamedList::new();
                while let Some((k, v)) = access.next_entry::<String, V>()? {
                    list.insert(k, v);
                }
                Ok(list)
            }
        }

        deserializer.deserialize_map(NamedListVisitor(PhantomData))
    }
}

// The executable encodes empty maps as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A parameter value as it appears in the document. The executable writes
/// most values as strings, so numeric text is treated as a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl ParamValue {
    /// Finite numeric interpretation, if any.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            Self::Number(v) => *v,
            Self::Text(s) => s.trim().parse::<f64>().ok()?,
            Self::Flag(_) => return None,
        };
        v.is_finite().then_some(v)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Flag(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Per-parameter tuning metadata from an element's `Hypers` block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Guideline {
    /// Default value. Required; optional here so a missing `Val` surfaces as a
    /// validation error instead of a parse error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<ParamValue>,
    /// `"Int"` marks an integer parameter.
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// `"Linear"` or `"Log"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
}

impl Guideline {
    pub fn with_val(val: impl Into<ParamValue>) -> Self {
        Self {
            val: Some(val.into()),
            ..Self::default()
        }
    }

    pub fn with_bounds(mut self, min: impl Into<ParamValue>, max: impl Into<ParamValue>) -> Self {
        self.min = Some(min.into());
        self.max = Some(max.into());
        self
    }
}

/// One selector block within a sheet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Element {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: NamedList<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypers: Option<NamedList<Guideline>>,
}

impl Element {
    /// The `Hypers` block, if present and non-empty.
    pub fn tunable_hypers(&self) -> Option<&NamedList<Guideline>> {
        self.hypers.as_ref().filter(|h| !h.is_empty())
    }
}

/// How a document is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentLayout {
    /// A bare `{Name, Desc, Sheets}` object.
    #[default]
    Object,
    /// A one-element list of parameter sets.
    SetList,
}

/// A named parameter set: ordered sheets of elements.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sheets: NamedList<Vec<Element>>,
}

impl ParameterDocument {
    /// Parse either layout. A set list must hold exactly one set.
    ///
    /// Deserializes straight from the text so declared key order survives.
    pub fn from_json_str(raw: &str) -> HsResult<Self> {
        if raw.trim_start().starts_with('[') {
            let mut sets: Vec<Self> = serde_json::from_str(raw)?;
            if sets.len() != 1 {
                return Err(validation_error!(
                    "expected exactly one parameter set, found {}",
                    sets.len()
                ));
            }
            Ok(sets.remove(0))
        } else {
            Ok(serde_json::from_str(raw)?)
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> HsResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self, layout: DocumentLayout) -> HsResult<String> {
        Ok(match layout {
            DocumentLayout::Object => serde_json::to_string_pretty(self)?,
            DocumentLayout::SetList => serde_json::to_string_pretty(std::slice::from_ref(self))?,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P, layout: DocumentLayout) -> HsResult<()> {
        std::fs::write(path.as_ref(), self.to_json_string(layout)?)?;
        Ok(())
    }

    /// Every declared hyperparameter in extraction order: sheets as declared,
    /// then elements by index, then each `Hypers` block in declared order.
    pub fn hyper_sites(&self) -> impl Iterator<Item = HyperSite<'_>> {
        self.sheets.iter().flat_map(|(sheet, elements)| {
            elements
                .iter()
                .enumerate()
                .flat_map(move |(element_index, element)| {
                    element.tunable_hypers().into_iter().flat_map(move |hypers| {
                        hypers.iter().map(move |(param_name, guideline)| HyperSite {
                            sheet,
                            element_index,
                            element,
                            param_name,
                            guideline,
                        })
                    })
                })
        })
    }

    /// Total number of names declared across all non-empty `Hypers` blocks.
    pub fn hyper_count(&self) -> usize {
        self.hyper_sites().count()
    }
}

/// One declared hyperparameter, located within its document.
#[derive(Debug, Clone, Copy)]
pub struct HyperSite<'a> {
    pub sheet: &'a str,
    pub element_index: usize,
    pub element: &'a Element,
    pub param_name: &'a str,
    pub guideline: &'a Guideline,
}

impl HyperSite<'_> {
    /// The element's current value for this parameter, if it carries one.
    pub fn current_value(&self) -> Option<&ParamValue> {
        self.element.params.get(self.param_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[{
        "Name": "Base",
        "Desc": "base params",
        "Sheets": {
            "Network": [
                {"Sel": "Layer", "Desc": "all layers",
                 "Params": {"Layer.Inhib.Gi": "1.8", "Layer.Act.Gain": "100"},
                 "Hypers": {"Layer.Inhib.Gi": {"Val": "1.8", "Min": "1", "Max": "3"}}},
                {"Sel": "Prjn", "Params": {"Prjn.Learn.Lrate": "0.04"}, "Hypers": null},
                {"Sel": ".Back", "Params": null}
            ],
            "Sim": []
        }
    }]"#;

    #[test]
    fn parses_set_list_and_preserves_order() {
        let doc = ParameterDocument::from_json_str(SAMPLE).unwrap();
        assert_eq!(doc.name, "Base");
        let sheets: Vec<&str> = doc.sheets.keys().collect();
        assert_eq!(sheets, vec!["Network", "Sim"]);

        let network = doc.sheets.get("Network").unwrap();
        assert_eq!(network.len(), 3);
        assert!(network[2].params.is_empty());
        let params: Vec<&str> = network[0].params.keys().collect();
        assert_eq!(params, vec!["Layer.Inhib.Gi", "Layer.Act.Gain"]);
        assert!(network[1].tunable_hypers().is_none());
        assert_eq!(doc.hyper_count(), 1);
    }

    #[test]
    fn hyper_sites_follow_declared_order() {
        let doc = ParameterDocument::from_json_str(
            r#"{"Sheets": {
                "B": [{"Params": {}, "Hypers": {"z": {"Val": 1}, "a": {"Val": 2}}}],
                "A": [{"Params": {}}, {"Params": {"k": "5"}, "Hypers": {"k": {"Val": 3}}}]
            }}"#,
        )
        .unwrap();
        let sites: Vec<(&str, usize, &str)> = doc
            .hyper_sites()
            .map(|s| (s.sheet, s.element_index, s.param_name))
            .collect();
        assert_eq!(sites, vec![("B", 0, "z"), ("B", 0, "a"), ("A", 1, "k")]);
        let k = doc.hyper_sites().last().unwrap();
        assert_eq!(k.current_value(), Some(&ParamValue::from("5")));
    }

    #[test]
    fn rejects_multi_set_lists() {
        let err = ParameterDocument::from_json_str(r#"[{"Name":"a"},{"Name":"b"}]"#).unwrap_err();
        assert!(matches!(err, crate::HsError::Validation(_)));
    }

    #[test]
    fn accepts_bare_object() {
        let doc = ParameterDocument::from_json_str(r#"{"Name":"x","Sheets":{}}"#).unwrap();
        assert_eq!(doc.name, "x");
        assert!(doc.sheets.is_empty());
    }

    #[test]
    fn param_value_numeric_views() {
        assert_eq!(ParamValue::from("0.25").as_f64(), Some(0.25));
        assert_eq!(ParamValue::from(3.0).as_f64(), Some(3.0));
        assert_eq!(ParamValue::from("fast").as_f64(), None);
        assert_eq!(ParamValue::from("NaN").as_f64(), None);
        assert_eq!(ParamValue::Flag(true).to_string(), "true");
    }

    #[test]
    fn guideline_field_names() {
        let g: Guideline = serde_json::from_str(
            r#"{"Val": 2, "StdDev": "0.5", "Type": "Int", "Space": "Linear"}"#,
        )
        .unwrap();
        assert_eq!(g.val.as_ref().and_then(ParamValue::as_f64), Some(2.0));
        assert_eq!(g.std_dev.as_ref().and_then(ParamValue::as_f64), Some(0.5));
        assert_eq!(g.kind.as_deref(), Some("Int"));
        assert_eq!(g.space.as_deref(), Some("Linear"));
    }

    #[test]
    fn layouts_on_disk() {
        let doc = ParameterDocument::from_json_str(SAMPLE).unwrap();
        let object = doc.to_json_string(DocumentLayout::Object).unwrap();
        assert!(object.trim_start().starts_with('{'));
        let sets = doc.to_json_string(DocumentLayout::SetList).unwrap();
        assert!(sets.trim_start().starts_with('['));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        doc.save(&path, DocumentLayout::SetList).unwrap();
        assert_eq!(ParameterDocument::load(&path).unwrap(), doc);
    }

    #[test]
    fn written_documents_keep_declared_key_order() {
        let doc = ParameterDocument::from_json_str(SAMPLE).unwrap();
        let written = doc.to_json_string(DocumentLayout::Object).unwrap();
        let network = written.find("\"Network\"").unwrap();
        let sim = written.find("\"Sim\"").unwrap();
        assert!(network < sim);
        let gi = written.find("\"Layer.Inhib.Gi\": \"1.8\"").unwrap();
        let gain = written.find("\"Layer.Act.Gain\"").unwrap();
        assert!(gi < gain);
    }
}
