//! Component registry — maps config names to constructible factories.
//!
//! Each component category (model, loss, optimizer, ...) owns one
//! `Registry<dyn Trait>`. Factories take the merged keyword parameters of a
//! `ComponentSpec` and return a boxed trait object. Registries are plain
//! values owned by whoever builds components; there is no global lookup
//! table.

use crate::config::{ComponentSpec, Params};
use crate::error::CoreError;
use std::collections::HashMap;
use tracing::debug;

/// Factory for one named component within a category.
pub type Factory<T> = Box<dyn Fn(Params) -> Result<Box<T>, CoreError> + Send + Sync>;

/// A collection of named factories for one component category.
pub struct Registry<T: ?Sized> {
    category: String,
    factories: HashMap<String, Factory<T>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            factories: HashMap::new(),
        }
    }

    /// Register a factory under `name`. Re-registering a name within the
    /// same category is an error, never a silent overwrite.
    pub fn add<F>(&mut self, name: &str, factory: F) -> Result<(), CoreError>
    where
        F: Fn(Params) -> Result<Box<T>, CoreError> + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(CoreError::already_registered(&self.category, name));
        }
        debug!(category = %self.category, name = %name, "Registering component factory");
        self.factories.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    /// Resolve `spec.name` and instantiate it with the union of
    /// `spec.params` and `overrides`; `overrides` win on key collision.
    pub fn build(&self, spec: &ComponentSpec, overrides: Params) -> Result<Box<T>, CoreError> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| CoreError::unknown_name(&self.category, &spec.name))?;
        let params = merge_params(&spec.params, overrides);
        factory(params)
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Union of `base` and `overrides`, with `overrides` taking precedence.
pub fn merge_params(base: &Params, overrides: Params) -> Params {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key, value);
    }
    merged
}

/// Deserialize merged params into a factory's typed parameter struct.
///
/// Unknown or ill-typed keys surface as a `Config` error naming the
/// offending component, so bad configs fail before any epoch runs.
pub fn typed_params<P: serde::de::DeserializeOwned>(
    component: &str,
    params: Params,
) -> Result<P, CoreError> {
    serde_json::from_value(serde_json::Value::Object(params))
        .map_err(|e| CoreError::config(format!("invalid params for '{component}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    trait Greeter {
        fn greet(&self) -> String;
    }

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct HelloParams {
        #[serde(default)]
        loud: bool,
    }

    struct Hello {
        loud: bool,
    }

    impl Greeter for Hello {
        fn greet(&self) -> String {
            if self.loud { "HELLO".into() } else { "hello".into() }
        }
    }

    fn registry() -> Registry<dyn Greeter> {
        let mut r: Registry<dyn Greeter> = Registry::new("greeter");
        r.add("hello", |params| {
            let p: HelloParams = typed_params("hello", params)?;
            Ok(Box::new(Hello { loud: p.loud }))
        })
        .unwrap();
        r
    }

    #[test]
    fn test_build_registered_name() {
        let r = registry();
        let spec = ComponentSpec::named("hello");
        let greeter = r.build(&spec, Params::new()).unwrap();
        assert_eq!(greeter.greet(), "hello");
    }

    #[test]
    fn test_unknown_name_fails() {
        let r = registry();
        let spec = ComponentSpec::named("goodbye");
        let err = r.build(&spec, Params::new()).map(|_| ()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownName { .. }));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut r = registry();
        let err = r
            .add("hello", |_| {
                Ok(Box::new(Hello { loud: false }) as Box<dyn Greeter>)
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRegistered { .. }));
    }

    #[test]
    fn test_overrides_win_on_collision() {
        let r = registry();
        let mut spec = ComponentSpec::named("hello");
        spec.params.insert("loud".into(), json!(false));

        let mut overrides = Params::new();
        overrides.insert("loud".into(), json!(true));

        let greeter = r.build(&spec, overrides).unwrap();
        assert_eq!(greeter.greet(), "HELLO");
    }

    #[test]
    fn test_unknown_param_key_fails() {
        let r = registry();
        let mut spec = ComponentSpec::named("hello");
        spec.params.insert("volume".into(), json!(11));
        let err = r.build(&spec, Params::new()).map(|_| ()).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_names_sorted() {
        let mut r = registry();
        r.add("aloha", |_| {
            Ok(Box::new(Hello { loud: false }) as Box<dyn Greeter>)
        })
        .unwrap();
        assert_eq!(r.names(), vec!["aloha".to_string(), "hello".to_string()]);
        assert_eq!(r.len(), 2);
        assert!(r.contains("aloha"));
    }
}
