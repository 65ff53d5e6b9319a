//! Feature transforms applied per example before batching.

use crate::data::Example;
use crate::error::HarnessError;
use mlforge_core::registry::typed_params;
use mlforge_core::{CoreError, Params};
use serde::Deserialize;

/// A per-example feature transform.
pub trait Transform: Send + Sync {
    fn apply(&self, example: Example) -> Result<Example, HarnessError>;
}

/// Chains sub-transforms in listed order. Built by the builder when the
/// configured transform name is the `compose` marker.
pub struct Compose {
    transforms: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }
}

impl Transform for Compose {
    fn apply(&self, mut example: Example) -> Result<Example, HarnessError> {
        for transform in &self.transforms {
            example = transform.apply(example)?;
        }
        Ok(example)
    }
}

/// `(x - mean) / std` over every feature.
pub struct Normalize {
    mean: f64,
    std: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NormalizeParams {
    mean: f64,
    std: f64,
}

impl Normalize {
    pub fn from_params(params: Params) -> Result<Self, CoreError> {
        let p: NormalizeParams = typed_params("normalize", params)?;
        if p.std == 0.0 {
            return Err(CoreError::config("normalize: std must be non-zero"));
        }
        Ok(Self {
            mean: p.mean,
            std: p.std,
        })
    }
}

impl Transform for Normalize {
    fn apply(&self, mut example: Example) -> Result<Example, HarnessError> {
        for x in &mut example.features {
            *x = (*x - self.mean) / self.std;
        }
        Ok(example)
    }
}

/// Multiplies every feature by a constant factor.
pub struct Scale {
    factor: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScaleParams {
    factor: f64,
}

impl Scale {
    pub fn from_params(params: Params) -> Result<Self, CoreError> {
        let p: ScaleParams = typed_params("scale", params)?;
        Ok(Self { factor: p.factor })
    }
}

impl Transform for Scale {
    fn apply(&self, mut example: Example) -> Result<Example, HarnessError> {
        for x in &mut example.features {
            *x *= self.factor;
        }
        Ok(example)
    }
}

/// Leaves the example untouched.
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, example: Example) -> Result<Example, HarnessError> {
        Ok(example)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn example() -> Example {
        Example {
            features: vec![2.0, 4.0],
            target: 1,
        }
    }

    #[test]
    fn test_normalize() {
        let mut params = Params::new();
        params.insert("mean".into(), json!(2.0));
        params.insert("std".into(), json!(2.0));
        let t = Normalize::from_params(params).unwrap();
        let out = t.apply(example()).unwrap();
        assert_eq!(out.features, vec![0.0, 1.0]);
    }

    #[test]
    fn test_normalize_zero_std_rejected() {
        let mut params = Params::new();
        params.insert("mean".into(), json!(0.0));
        params.insert("std".into(), json!(0.0));
        assert!(Normalize::from_params(params).is_err());
    }

    #[test]
    fn test_compose_applies_in_order() {
        let mut scale_params = Params::new();
        scale_params.insert("factor".into(), json!(10.0));
        let mut norm_params = Params::new();
        norm_params.insert("mean".into(), json!(20.0));
        norm_params.insert("std".into(), json!(1.0));

        // scale then normalize: 2 -> 20 -> 0, 4 -> 40 -> 20
        let chain = Compose::new(vec![
            Box::new(Scale::from_params(scale_params).unwrap()),
            Box::new(Normalize::from_params(norm_params).unwrap()),
        ]);
        let out = chain.apply(example()).unwrap();
        assert_eq!(out.features, vec![0.0, 20.0]);
    }
}
