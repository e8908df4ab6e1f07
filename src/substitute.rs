use regex::{Captures, Regex};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableEnvironment {
    vars: BTreeMap<String, String>,
}

impl VariableEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn extend_from_pairs<I, S>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for entry in pairs {
            if let Some((key, value)) = entry.as_ref().split_once('=') {
                self.insert(key, value);
            }
        }
    }
}

// The lookup key keeps any doubled brace: `{{name}}` resolves `{name}`.
fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{(\{?)([A-Za-z0-9_]+)(\}?)\}").expect("placeholder pattern is valid")
    })
}

pub fn substitute_str(input: &str, env: &VariableEnvironment) -> String {
    token_pattern()
        .replace_all(input, |caps: &Captures<'_>| {
            let key = format!("{}{}{}", &caps[1], &caps[2], &caps[3]);
            match env.get(&key) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

pub fn substitute(value: &Value, env: &VariableEnvironment) -> Value {
    match value {
        Value::String(text) => Value::String(substitute_str(text, env)),
        Value::Sequence(items) => {
            Value::Sequence(items.iter().map(|item| substitute(item, env)).collect())
        }
        Value::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), substitute(item, env));
            }
            Value::Mapping(out)
        }
        other => other.clone(),
    }
}
