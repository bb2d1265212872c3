//! Environment composition for remote invocations.
//!
//! Three layers are merged in order: the process-wide base layer, the
//! session layer derived from project and session names, and the caller's
//! per-invocation overrides. Values are shell expressions that the remote
//! shell evaluates, so a later key may reference an earlier one.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Name of the base variable pointing at the per-node artifact directory.
pub const CLUSTERIZE_DIR: &str = "CLUSTERIZE_DIR";
/// Default location of the per-node artifact directory.
pub const DEFAULT_ARTIFACT_DIR: &str = "$HOME/.clusterize";

pub const PROJECT_DIR: &str = "PROJECT_DIR";
pub const SESSION_DIR: &str = "SESSION_DIR";

/// Insertion-ordered `name -> value-expression` mapping.
///
/// Re-assigning an existing key replaces its value in place; it does not
/// move the key to the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvLayer {
    entries: Vec<(String, String)>,
}

impl EnvLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overlay `other` on top of `self`.
    pub fn extend(&mut self, other: &EnvLayer) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    /// Render as a success-chained prefix: `export A=1 && export B=$A/x`.
    ///
    /// An empty layer renders to an empty string.
    pub fn render(&self) -> String {
        render(self)
    }

    /// Prepend the rendered layer to `command`.
    pub fn prefix(&self, command: &str) -> String {
        if self.is_empty() {
            command.to_string()
        } else {
            format!("{} && {}", self.render(), command)
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvLayer {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut layer = EnvLayer::new();
        for (k, v) in iter {
            layer.insert(k, v);
        }
        layer
    }
}

impl Serialize for EnvLayer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EnvLayer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LayerVisitor;

        impl<'de> Visitor<'de> for LayerVisitor {
            type Value = EnvLayer;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of environment variable names to values")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<EnvLayer, E> {
                Ok(EnvLayer::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<EnvLayer, A::Error> {
                let mut layer = EnvLayer::new();
                while let Some((key, value)) = access.next_entry::<String, EnvValue>()? {
                    layer.insert(key, value.0);
                }
                Ok(layer)
            }
        }

        deserializer.deserialize_any(LayerVisitor)
    }
}

/// Scalar YAML values (`PORT: 6379`, `DEBUG: true`) are accepted as strings.
struct EnvValue(String);

impl<'de> Deserialize<'de> for EnvValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl Visitor<'_> for ValueVisitor {
            type Value = EnvValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a scalar environment value")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<EnvValue, E> {
                Ok(EnvValue(v.to_string()))
            }

            fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<EnvValue, E> {
                Ok(EnvValue(v.to_string()))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<EnvValue, E> {
                Ok(EnvValue(v.to_string()))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<EnvValue, E> {
                Ok(EnvValue(v.to_string()))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<EnvValue, E> {
                Ok(EnvValue(v.to_string()))
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<EnvValue, E> {
                Ok(EnvValue(String::new()))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Process-wide base layer.
///
/// Built once at startup (from settings) and passed down explicitly, so
/// tests can substitute their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseEnvironment {
    artifact_dir: String,
}

impl Default for BaseEnvironment {
    fn default() -> Self {
        Self {
            artifact_dir: DEFAULT_ARTIFACT_DIR.to_string(),
        }
    }
}

impl BaseEnvironment {
    pub fn new(artifact_dir: impl Into<String>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn artifact_dir(&self) -> &str {
        &self.artifact_dir
    }

    pub fn layer(&self) -> EnvLayer {
        EnvLayer::new().with(CLUSTERIZE_DIR, self.artifact_dir.clone())
    }
}

/// Session layer: project and session directories as remote shell expressions.
pub fn session_env(project_name: &str, session_name: &str) -> EnvLayer {
    EnvLayer::new()
        .with(PROJECT_DIR, format!("${CLUSTERIZE_DIR}/{project_name}"))
        .with(SESSION_DIR, format!("${PROJECT_DIR}/{session_name}"))
}

/// Merge base, session and caller layers; later layers win on collisions.
pub fn compose(base: &EnvLayer, session: &EnvLayer, caller: &EnvLayer) -> EnvLayer {
    let mut composed = base.clone();
    composed.extend(session);
    composed.extend(caller);
    composed
}

/// Render `export K=V` statements joined with `&&`.
///
/// Values are emitted verbatim: they are expressions for the remote shell.
pub fn render(layer: &EnvLayer) -> String {
    layer
        .iter()
        .map(|(k, v)| format!("export {k}={v}"))
        .collect::<Vec<_>>()
        .join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_render_matches_remote_shell_form() {
        let base = EnvLayer::new().with(CLUSTERIZE_DIR, "$HOME/.clusterize");
        let session = EnvLayer::new().with(PROJECT_DIR, "$CLUSTERIZE_DIR/p");
        let composed = compose(&base, &session, &EnvLayer::new());

        assert_eq!(
            composed.render(),
            "export CLUSTERIZE_DIR=$HOME/.clusterize && export PROJECT_DIR=$CLUSTERIZE_DIR/p"
        );
    }

    #[test]
    fn test_render_empty_layer() {
        assert_eq!(render(&EnvLayer::new()), "");
        assert_eq!(EnvLayer::new().prefix("ls"), "ls");
    }

    #[test]
    fn test_prefix_chains_with_command() {
        let layer = EnvLayer::new().with("A", "1");
        assert_eq!(layer.prefix("echo $A"), "export A=1 && echo $A");
    }

    #[test]
    fn test_reassignment_keeps_position() {
        let mut layer = EnvLayer::new().with("A", "1").with("B", "2");
        layer.insert("A", "3");
        let keys: Vec<_> = layer.keys().collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert_eq!(layer.get("A"), Some("3"));
    }

    #[test]
    fn test_caller_overrides_session_and_base() {
        let base = BaseEnvironment::default().layer();
        let session = session_env("proj", "exp1");
        let caller = EnvLayer::new()
            .with(SESSION_DIR, "/scratch/exp1")
            .with("EXTRA", "1");
        let composed = compose(&base, &session, &caller);

        let keys: Vec<_> = composed.keys().collect();
        assert_eq!(keys, vec![CLUSTERIZE_DIR, PROJECT_DIR, SESSION_DIR, "EXTRA"]);
        assert_eq!(composed.get(SESSION_DIR), Some("/scratch/exp1"));
        assert_eq!(composed.get(PROJECT_DIR), Some("$CLUSTERIZE_DIR/proj"));
    }

    #[test]
    fn test_session_env_references_previous_layer() {
        let session = session_env("proj", "exp1");
        assert_eq!(session.get(PROJECT_DIR), Some("$CLUSTERIZE_DIR/proj"));
        assert_eq!(session.get(SESSION_DIR), Some("$PROJECT_DIR/exp1"));
    }

    #[test]
    fn test_substituted_base_environment() {
        let base = BaseEnvironment::new("/opt/clz").layer();
        assert_eq!(base.render(), "export CLUSTERIZE_DIR=/opt/clz");
    }

    #[test]
    fn test_deserialize_preserves_yaml_order() {
        let yaml = "ZETA: z\nALPHA: a\nPORT: 6379\nDEBUG: true\n";
        let layer: EnvLayer = serde_yaml_ng::from_str(yaml).unwrap();
        let keys: Vec<_> = layer.keys().collect();
        assert_eq!(keys, vec!["ZETA", "ALPHA", "PORT", "DEBUG"]);
        assert_eq!(layer.get("PORT"), Some("6379"));
        assert_eq!(layer.get("DEBUG"), Some("true"));
    }

    #[test]
    fn test_serialize_round_trip_keeps_order() {
        let layer = EnvLayer::new().with("B", "2").with("A", "1");
        let yaml = serde_yaml_ng::to_string(&layer).unwrap();
        assert!(yaml.find("B:").unwrap() < yaml.find("A:").unwrap());
    }

    fn layer_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::vec(("[A-E]", "[a-z0-9]{0,4}"), 0..8)
    }

    proptest! {
        #[test]
        fn prop_caller_always_wins(
            base in layer_strategy(),
            session in layer_strategy(),
            caller in layer_strategy(),
        ) {
            let base: EnvLayer = base.into_iter().collect();
            let session: EnvLayer = session.into_iter().collect();
            let caller: EnvLayer = caller.into_iter().collect();
            let composed = compose(&base, &session, &caller);

            for (key, value) in caller.iter() {
                prop_assert_eq!(composed.get(key), Some(value));
            }
        }

        #[test]
        fn prop_first_insertion_order_preserved(
            base in layer_strategy(),
            session in layer_strategy(),
            caller in layer_strategy(),
        ) {
            let base: EnvLayer = base.into_iter().collect();
            let session: EnvLayer = session.into_iter().collect();
            let caller: EnvLayer = caller.into_iter().collect();
            let composed = compose(&base, &session, &caller);

            let mut expected: Vec<&str> = Vec::new();
            for key in base.keys().chain(session.keys()).chain(caller.keys()) {
                if !expected.contains(&key) {
                    expected.push(key);
                }
            }
            let actual: Vec<&str> = composed.keys().collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
