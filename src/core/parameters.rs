use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Typed value of a job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl ParameterValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::String(_) => "STRING",
            ParameterValue::Long(_) => "LONG",
            ParameterValue::Double(_) => "DOUBLE",
            ParameterValue::Date(_) => "DATE",
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(value) => f.write_str(value),
            ParameterValue::Long(value) => write!(f, "{}", value),
            ParameterValue::Double(value) => write!(f, "{}", value),
            ParameterValue::Date(value) => f.write_str(&value.to_rfc3339()),
        }
    }
}

/// A single job parameter: a typed value plus whether it takes part in the
/// identity of the job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    value: ParameterValue,
    identifying: bool,
}

impl JobParameter {
    pub fn new(value: ParameterValue, identifying: bool) -> Self {
        Self { value, identifying }
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn is_identifying(&self) -> bool {
        self.identifying
    }
}

impl fmt::Display for JobParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{value={}, type={}, identifying={}}}",
            self.value,
            self.value.type_name(),
            self.identifying
        )
    }
}

/// Parameters of a job run, ordered by name.
///
/// Only identifying parameters take part in equality and hashing: two parameter
/// sets that differ in non-identifying entries designate the same job instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn get(&self, name: &str) -> Option<&JobParameter> {
        self.parameters.get(name)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name).map(JobParameter::value) {
            Some(ParameterValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get(name).map(JobParameter::value) {
            Some(ParameterValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        match self.get(name).map(JobParameter::value) {
            Some(ParameterValue::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get(name).map(JobParameter::value) {
            Some(ParameterValue::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter()
    }

    /// Returns the subset of parameters that identify the job instance.
    pub fn identifying_parameters(&self) -> JobParameters {
        JobParameters {
            parameters: self
                .parameters
                .iter()
                .filter(|(_, parameter)| parameter.is_identifying())
                .map(|(name, parameter)| (name.clone(), parameter.clone()))
                .collect(),
        }
    }

    fn identifying_entries(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.parameters
            .iter()
            .filter(|(_, parameter)| parameter.is_identifying())
            .map(|(name, parameter)| (name, parameter.value()))
    }

    /// Canonical text of the identifying parameters, used for job keys.
    ///
    /// Every name and value is prefixed with its length, so that no value can
    /// spell out another parameter.
    pub fn to_identifying_string(&self) -> String {
        self.identifying_entries()
            .map(|(name, value)| {
                let text = value.to_string();
                format!(
                    "{}:{}={}:{}:{};",
                    name.len(),
                    name,
                    value.type_name(),
                    text.len(),
                    text
                )
            })
            .collect()
    }
}

impl ParameterValue {
    fn same_as(&self, other: &ParameterValue) -> bool {
        match (self, other) {
            (ParameterValue::Double(left), ParameterValue::Double(right)) => {
                left.to_bits() == right.to_bits()
            }
            _ => self == other,
        }
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        self.type_name().hash(state);
        match self {
            ParameterValue::String(value) => value.hash(state),
            ParameterValue::Long(value) => value.hash(state),
            ParameterValue::Double(value) => value.to_bits().hash(state),
            ParameterValue::Date(value) => value.hash(state),
        }
    }
}

impl PartialEq for JobParameters {
    fn eq(&self, other: &Self) -> bool {
        let mut left = self.identifying_entries();
        let mut right = other.identifying_entries();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some((left_name, left_value)), Some((right_name, right_value))) => {
                    if left_name != right_name || !left_value.same_as(right_value) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

impl Eq for JobParameters {}

impl Hash for JobParameters {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (name, value) in self.identifying_entries() {
            name.hash(state);
            value.hash_into(state);
        }
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (name, parameter)) in self.parameters.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "'{}':'{}'", name, parameter)?;
        }
        f.write_str("}")
    }
}

/// Fluent builder for [`JobParameters`].
///
/// # Examples
///
/// ```
/// use spring_batch_repository::core::parameters::JobParametersBuilder;
///
/// let parameters = JobParametersBuilder::new()
///     .add_string("input.file", "persons.csv")
///     .add_long("run.id", 1)
///     .add_non_identifying_string("requested.by", "ops")
///     .build();
///
/// assert_eq!(parameters.len(), 3);
/// assert_eq!(parameters.identifying_parameters().len(), 2);
/// ```
#[derive(Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing parameter set.
    pub fn from_parameters(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.parameters.clone(),
        }
    }

    pub fn add_parameter(mut self, name: &str, parameter: JobParameter) -> Self {
        self.parameters.insert(name.to_string(), parameter);
        self
    }

    pub fn add_string(self, name: &str, value: &str) -> Self {
        self.add_parameter(
            name,
            JobParameter::new(ParameterValue::String(value.to_string()), true),
        )
    }

    pub fn add_non_identifying_string(self, name: &str, value: &str) -> Self {
        self.add_parameter(
            name,
            JobParameter::new(ParameterValue::String(value.to_string()), false),
        )
    }

    pub fn add_long(self, name: &str, value: i64) -> Self {
        self.add_parameter(name, JobParameter::new(ParameterValue::Long(value), true))
    }

    pub fn add_double(self, name: &str, value: f64) -> Self {
        self.add_parameter(name, JobParameter::new(ParameterValue::Double(value), true))
    }

    pub fn add_date(self, name: &str, value: DateTime<Utc>) -> Self {
        self.add_parameter(name, JobParameter::new(ParameterValue::Date(value), true))
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}

/// Derives the key that, together with the job name, identifies a job instance.
pub trait JobKeyGenerator: Send + Sync {
    fn generate_key(&self, parameters: &JobParameters) -> String;
}

/// SHA-256 hex digest of the canonical identifying parameters.
#[derive(Default, Debug, Clone, Copy)]
pub struct DefaultJobKeyGenerator;

impl JobKeyGenerator for DefaultJobKeyGenerator {
    fn generate_key(&self, parameters: &JobParameters) -> String {
        let mut hasher = Sha256::new();
        hasher.update(parameters.to_identifying_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
