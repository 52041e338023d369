use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use arbor_core::{ArborError, FeatureVector, Float, Matrix, Record, Result, Value};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// How a selected field is turned into a feature slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FeatureKind {
    Continuous,
    Categorical { cardinality: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureField {
    pub name: String,
    pub kind: FeatureKind,
}

/// Which record fields become features.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldSelection {
    /// Every field except the label / prediction field, in record order.
    #[default]
    All,
    /// Exactly these fields, in this order.
    Include(Vec<String>),
    /// Every field in record order except these (and the label / prediction field).
    Exclude(Vec<String>),
}

impl FieldSelection {
    /// Builds a selection from include/exclude lists, at most one of which may be non-empty.
    pub fn from_lists(include: &[String], exclude: &[String]) -> Result<Self> {
        match (include.is_empty(), exclude.is_empty()) {
            (true, true) => Ok(FieldSelection::All),
            (false, true) => Ok(FieldSelection::Include(include.to_vec())),
            (true, false) => Ok(FieldSelection::Exclude(exclude.to_vec())),
            (false, false) => Err(ArborError::InvalidConfig(
                "featureFieldsToInclude and featureFieldsToExclude are mutually exclusive".into(),
            )),
        }
    }

    /// Resolves the selection to an ordered field list using `record` as the schema.
    ///
    /// `reserved` is the label (training) or prediction (inference) field; it never
    /// becomes a feature.
    pub fn resolve(&self, record: &Record, reserved: &str) -> Result<Vec<String>> {
        match self {
            FieldSelection::All => Ok(record
                .field_names()
                .filter(|name| *name != reserved)
                .map(str::to_owned)
                .collect()),
            FieldSelection::Include(fields) => {
                if let Some(f) = fields.iter().find(|f| f.as_str() == reserved) {
                    return Err(ArborError::InvalidConfig(format!(
                        "field '{f}' cannot be both a feature and the label/prediction field"
                    )));
                }
                if let Some(f) = fields.iter().find(|f| !record.contains(f)) {
                    return Err(ArborError::missing_field(f.clone()));
                }
                Ok(fields.clone())
            }
            FieldSelection::Exclude(excluded) => Ok(record
                .field_names()
                .filter(|name| *name != reserved && !excluded.iter().any(|e| e == name))
                .map(str::to_owned)
                .collect()),
        }
    }
}

/// Ordered description of the model's features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    fields: Vec<FeatureField>,
}

impl FeatureSpec {
    pub fn new(fields: Vec<FeatureField>) -> Self {
        Self { fields }
    }

    /// Resolves `selection` against a sample record and tags fields named in
    /// `cardinality_mapping` as categorical.
    ///
    /// # Errors
    ///
    /// - [`ArborError::InvalidConfig`] if the mapping names a field that is not selected,
    ///   or declares a zero cardinality
    /// - [`ArborError::MissingFeatureField`] if an included field is absent from `sample`
    pub fn resolve(
        selection: &FieldSelection,
        sample: &Record,
        cardinality_mapping: &BTreeMap<String, usize>,
        label_field: &str,
    ) -> Result<Self> {
        let names = selection.resolve(sample, label_field)?;

        for (field, &cardinality) in cardinality_mapping {
            if !names.iter().any(|n| n == field) {
                return Err(ArborError::InvalidConfig(format!(
                    "cardinality mapping names '{field}' which is not a selected feature"
                )));
            }
            if cardinality == 0 {
                return Err(ArborError::InvalidConfig(format!(
                    "cardinality of '{field}' must be at least 1"
                )));
            }
        }

        let fields = names
            .into_iter()
            .map(|name| {
                let kind = match cardinality_mapping.get(&name) {
                    Some(&cardinality) => FeatureKind::Categorical { cardinality },
                    None => FeatureKind::Continuous,
                };
                FeatureField { name, kind }
            })
            .collect();

        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FeatureField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Normalized categorical value.
///
/// Integral floats collapse onto [`Category::Int`] and `NaN` onto
/// [`Category::Null`], so `3` and `3.0` are one category.
///
/// Total order: `Null < Int < Float < Str`, numeric values by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Category {
    Null,
    Int(i64),
    Float(Float),
    Str(String),
}

impl Category {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Category::Null,
            Value::Int(v) => Category::Int(*v),
            Value::Float(v) if v.is_nan() => Category::Null,
            Value::Float(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => Category::Int(*v as i64),
            Value::Float(v) => Category::Float(*v),
            Value::Str(s) => Category::Str(s.clone()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Category::Null => 0,
            Category::Int(_) => 1,
            Category::Float(_) => 2,
            Category::Str(_) => 3,
        }
    }
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Category {}

impl PartialOrd for Category {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Category {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Category::Int(a), Category::Int(b)) => a.cmp(b),
            (Category::Float(a), Category::Float(b)) => a.total_cmp(b),
            (Category::Str(a), Category::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Null => f.write_str("null"),
            Category::Int(v) => write!(f, "{v}"),
            Category::Float(v) => write!(f, "{v}"),
            Category::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Maps records to feature vectors.
///
/// Continuous fields pass through as `f64` (`null` becomes `NaN`). Categorical
/// fields are coded by position in a sorted vocabulary of the values seen while
/// fitting, so codes do not depend on record order or partitioning and are
/// reproduced exactly at prediction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    spec: FeatureSpec,
    /// Sorted vocabulary per feature; `None` for continuous features.
    vocabularies: Vec<Option<Vec<Category>>>,
}

impl FeatureEncoder {
    /// Collects categorical vocabularies from `records`.
    ///
    /// # Errors
    ///
    /// - [`ArborError::MissingFeatureField`] if a record lacks a categorical field
    /// - [`ArborError::FeatureCardinalityExceeded`] if a field has more distinct
    ///   values than its declared cardinality
    pub fn fit(spec: FeatureSpec, records: &[Record]) -> Result<Self> {
        let mut vocabularies = Vec::with_capacity(spec.len());

        for field in spec.fields() {
            let FeatureKind::Categorical { cardinality } = field.kind else {
                vocabularies.push(None);
                continue;
            };

            let mut seen = BTreeSet::new();
            for record in records {
                let value = record
                    .get(&field.name)
                    .ok_or_else(|| ArborError::missing_field(field.name.clone()))?;
                seen.insert(Category::from_value(value));
            }

            if seen.len() > cardinality {
                return Err(ArborError::FeatureCardinalityExceeded {
                    field: field.name.clone(),
                    cardinality,
                    observed: seen.len(),
                });
            }

            tracing::debug!(
                field = %field.name,
                distinct = seen.len(),
                cardinality,
                "collected categorical vocabulary"
            );
            vocabularies.push(Some(seen.into_iter().collect()));
        }

        Ok(Self { spec, vocabularies })
    }

    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    /// Checks that every categorical field has a sorted vocabulary within its
    /// cardinality and every continuous field has none.
    pub fn validate(&self) -> Result<()> {
        if self.vocabularies.len() != self.spec.len() {
            return Err(ArborError::invalid_model(format!(
                "{} vocabularies for {} features",
                self.vocabularies.len(),
                self.spec.len()
            )));
        }
        for (field, vocabulary) in self.spec.fields().iter().zip(&self.vocabularies) {
            match (field.kind, vocabulary) {
                (FeatureKind::Continuous, None) => {}
                (FeatureKind::Categorical { cardinality }, Some(vocabulary)) => {
                    if vocabulary.len() > cardinality {
                        return Err(ArborError::invalid_model(format!(
                            "vocabulary of '{}' has {} entries but cardinality is {cardinality}",
                            field.name,
                            vocabulary.len()
                        )));
                    }
                    if vocabulary.windows(2).any(|w| w[0] >= w[1]) {
                        return Err(ArborError::invalid_model(format!(
                            "vocabulary of '{}' is not strictly sorted",
                            field.name
                        )));
                    }
                }
                _ => {
                    return Err(ArborError::invalid_model(format!(
                        "feature '{}' kind disagrees with its vocabulary",
                        field.name
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn num_features(&self) -> usize {
        self.spec.len()
    }

    /// Vocabulary of a categorical feature, indexed by code.
    pub fn vocabulary(&self, feature: usize) -> Option<&[Category]> {
        self.vocabularies.get(feature)?.as_deref()
    }

    /// Encodes one record.
    ///
    /// # Errors
    ///
    /// - [`ArborError::MissingFeatureField`] if a feature field is absent
    /// - [`ArborError::NonNumericFeature`] for a string in a continuous field
    /// - [`ArborError::UnknownCategory`] for a categorical value outside the vocabulary
    pub fn encode(&self, record: &Record) -> Result<FeatureVector> {
        self.spec
            .fields()
            .iter()
            .zip(&self.vocabularies)
            .map(|(field, vocabulary)| {
                let value = record
                    .get(&field.name)
                    .ok_or_else(|| ArborError::missing_field(field.name.clone()))?;
                match vocabulary {
                    Some(vocabulary) => encode_categorical(&field.name, vocabulary, value),
                    None => encode_continuous(&field.name, value),
                }
            })
            .collect()
    }

    /// Encodes every record into an `(n_records, n_features)` matrix.
    pub fn encode_all(&self, records: &[Record]) -> Result<Matrix> {
        #[cfg(feature = "parallel")]
        let rows: Vec<FeatureVector> = records
            .par_iter()
            .map(|r| self.encode(r))
            .collect::<Result<_>>()?;

        #[cfg(not(feature = "parallel"))]
        let rows: Vec<FeatureVector> = records
            .iter()
            .map(|r| self.encode(r))
            .collect::<Result<_>>()?;

        Ok(Matrix::from_fn(rows.len(), self.num_features(), |i, j| {
            rows[i][j]
        }))
    }
}

fn encode_continuous(field: &str, value: &Value) -> Result<Float> {
    match value {
        Value::Null => Ok(Float::NAN),
        Value::Str(_) => Err(ArborError::NonNumericFeature {
            field: field.to_owned(),
            value: value.to_string(),
        }),
        Value::Int(v) => Ok(*v as Float),
        Value::Float(v) => Ok(*v),
    }
}

fn encode_categorical(field: &str, vocabulary: &[Category], value: &Value) -> Result<Float> {
    vocabulary
        .binary_search(&Category::from_value(value))
        .map(|code| code as Float)
        .map_err(|_| ArborError::UnknownCategory {
            field: field.to_owned(),
            value: value.to_string(),
        })
}
